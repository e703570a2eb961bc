use serde::{Deserialize, Serialize};
use validator::Validate;

/// Request body for submitting a lookup job
#[derive(Deserialize, Serialize, Debug, Validate)]
pub struct SubmitJob {
    /// Subject to look up. `username` is accepted for older clients.
    #[serde(alias = "username")]
    #[validate(length(min = 1, message = "Target must not be empty"))]
    pub target: String,
}
