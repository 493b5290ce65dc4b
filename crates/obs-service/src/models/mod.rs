//! Response bodies.

use serde::{Deserialize, Serialize};

/// Body of a successful JSON response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub status: String,
    pub message: String,
}

impl SuccessResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "Success".to_string(),
            message: message.into(),
        }
    }
}
