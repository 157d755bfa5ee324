use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageContent},
    messaging::types::SendReceipt,
    Result,
};

/// Port to the external chat-session client.
///
/// Failures are reported as [`Error::Provider`](crate::Error::Provider) with
/// the client's human-readable text. The governance core never looks at
/// structured codes, only at that text.
#[async_trait]
pub trait SendCapability: Send + Sync {
    /// Send one message. When both text and media are present the text is
    /// the media caption.
    async fn send(&self, chat_id: &ChatId, content: &MessageContent) -> Result<SendReceipt>;

    async fn assign_label(&self, chat_id: &ChatId, label: &str) -> Result<()>;

    /// Chats currently tagged with `label`, in the session's order.
    async fn chats_with_label(&self, label: &str) -> Result<Vec<ChatId>>;
}
