use serde::{Deserialize, Serialize};

/// What the chat-session client reports back for a delivered message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Provider message id, when the client returns one.
    pub message_id: Option<String>,
}

impl SendReceipt {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            message_id: Some(id.into()),
        }
    }
}
