//! Per-contact chat history and the post-send bookkeeping that feeds it.

use std::{collections::HashMap, fmt, sync::Arc, sync::Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{Destination, MessageContent},
    messaging::{port::SendCapability, types::SendReceipt},
    Error, Result,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Incoming,
    Outgoing,
}

/// One message as stored in a chat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub direction: Direction,
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub has_media: bool,
    pub timestamp: DateTime<Local>,
    /// Delivery acknowledgement level reported by the client (1 = sent to server).
    pub ack: Option<u8>,
    pub provider_id: Option<String>,
    pub fingerprint: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub contact: Destination,
    pub messages: Vec<StoredMessage>,
    /// Body of the last incoming message (or the first message of the chat).
    pub last_message: String,
    /// Set once we have sent anything into an existing chat.
    pub has_replied: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    Created,
    Appended,
}

impl SaveOutcome {
    pub fn is_new_chat(self) -> bool {
        matches!(self, SaveOutcome::Created)
    }
}

#[async_trait]
pub trait ChatHistory: Send + Sync {
    /// Append `message` to the chat with `contact`, creating it if needed.
    async fn save(&self, contact: &Destination, message: StoredMessage) -> Result<SaveOutcome>;

    async fn chat(&self, contact: &Destination) -> Result<Option<ChatRecord>>;
}

#[derive(Debug, Default)]
pub struct InMemoryChatHistory {
    chats: Mutex<HashMap<Destination, ChatRecord>>,
}

impl InMemoryChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chats.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ChatHistory for InMemoryChatHistory {
    async fn save(&self, contact: &Destination, message: StoredMessage) -> Result<SaveOutcome> {
        let mut chats = self
            .chats
            .lock()
            .map_err(|_| Error::External("chat history lock poisoned".to_string()))?;

        match chats.get_mut(contact) {
            Some(chat) => {
                match message.direction {
                    Direction::Incoming => {
                        chat.last_message = message.body.clone().unwrap_or_default();
                    }
                    Direction::Outgoing => chat.has_replied = true,
                }
                chat.messages.push(message);
                Ok(SaveOutcome::Appended)
            }
            None => {
                let last_message = message.body.clone().unwrap_or_default();
                chats.insert(
                    contact.clone(),
                    ChatRecord {
                        contact: contact.clone(),
                        messages: vec![message],
                        last_message,
                        has_replied: false,
                    },
                );
                Ok(SaveOutcome::Created)
            }
        }
    }

    async fn chat(&self, contact: &Destination) -> Result<Option<ChatRecord>> {
        let chats = self
            .chats
            .lock()
            .map_err(|_| Error::External("chat history lock poisoned".to_string()))?;
        Ok(chats.get(contact).cloned())
    }
}

/// Records delivered messages and labels chats seen for the first time.
#[derive(Clone)]
pub struct HistoryRecorder {
    history: Arc<dyn ChatHistory>,
    capability: Arc<dyn SendCapability>,
    default_label: Option<String>,
}

impl fmt::Debug for HistoryRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryRecorder")
            .field("default_label", &self.default_label)
            .finish()
    }
}

impl HistoryRecorder {
    pub fn new(
        history: Arc<dyn ChatHistory>,
        capability: Arc<dyn SendCapability>,
        default_label: Option<String>,
    ) -> Self {
        Self {
            history,
            capability,
            default_label,
        }
    }

    pub fn history(&self) -> &Arc<dyn ChatHistory> {
        &self.history
    }

    /// Store an externally reported message as-is.
    pub async fn save(&self, contact: &Destination, message: StoredMessage) -> Result<SaveOutcome> {
        self.history.save(contact, message).await
    }

    /// Bookkeeping after a delivered send. Failures are logged and swallowed.
    pub async fn record_outgoing(&self, contact: &Destination, content: &MessageContent, receipt: &SendReceipt) {
        let message = StoredMessage {
            direction: Direction::Outgoing,
            body: content.body().map(str::to_string),
            mime_type: content.media.as_ref().map(|m| m.mime_type.clone()),
            has_media: content.media.is_some(),
            timestamp: Local::now(),
            ack: Some(1),
            provider_id: receipt.message_id.clone(),
            fingerprint: Some(content.fingerprint(contact)),
        };

        let outcome = match self.history.save(contact, message).await {
            Ok(o) => o,
            Err(e) => {
                tracing::error!(destination = %contact, error = %e, "failed to record outgoing message");
                return;
            }
        };

        if !outcome.is_new_chat() {
            return;
        }
        let Some(label) = self.default_label.as_deref() else {
            return;
        };

        let chat_id = contact.chat_id();
        match self.capability.assign_label(&chat_id, label).await {
            Ok(()) => tracing::info!(chat_id = %chat_id, label, "assigned default label to new chat"),
            Err(e) => tracing::error!(chat_id = %chat_id, label, error = %e, "failed to assign default label"),
        }
    }
}
