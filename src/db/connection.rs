use std::str::FromStr;

use sqlx::{
    Error, Pool, Sqlite,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};

/// Create a SQLite connection pool
///
/// # Parameters
/// - `database_url`: SQLite connection string
///   Format: sqlite://PATH/TO/FILE.db?mode=rwc
/// - `max_connections`: upper bound on pooled connections
///
/// The file is created if missing and opened in WAL mode so status readers
/// are not blocked while the worker writes.
pub async fn get_connection(database_url: &str, max_connections: u32) -> Result<Pool<Sqlite>, Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}
