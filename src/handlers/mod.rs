pub mod carts;
pub mod orders;
pub mod payments;

use serde::{Deserialize, Serialize};

/// Wire shape for message-only successes: `{"success": true, "message": ...}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        MessageResponse {
            success: true,
            message: message.into(),
        }
    }
}
