use sqlx::{Pool, Sqlite};
use tracing::info;

/// Run all pending database migrations
///
/// Migrations are embedded at compile time from `migrations/`; sqlx records
/// which ones were applied, so this is safe to call on every start.
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<(), sqlx::migrate::MigrateError> {
    info!("Running database migrations...");

    sqlx::migrate!("./migrations").run(pool).await?;

    info!("Database migrations completed successfully");
    Ok(())
}
