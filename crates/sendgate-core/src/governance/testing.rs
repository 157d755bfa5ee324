//! Fakes shared by the governance tests.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageContent},
    messaging::{port::SendCapability, types::SendReceipt},
    ports::{WaitRequest, Waiter},
    Error, Result,
};

#[derive(Default)]
pub(crate) struct RecordingWaiter {
    requests: Mutex<Vec<WaitRequest>>,
}

impl RecordingWaiter {
    pub(crate) fn requests(&self) -> Vec<WaitRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn durations(&self) -> Vec<Duration> {
        self.requests().into_iter().map(|r| r.duration).collect()
    }
}

#[async_trait]
impl Waiter for RecordingWaiter {
    async fn wait(&self, req: WaitRequest) {
        self.requests.lock().unwrap().push(req);
    }
}

/// Capability that replays a script of outcomes, then either keeps failing
/// with `fallback_error` or succeeds.
#[derive(Default)]
pub(crate) struct FakeCapability {
    script: Mutex<VecDeque<std::result::Result<(), String>>>,
    fallback_error: Option<String>,
    calls: AtomicUsize,
    sent: Mutex<Vec<ChatId>>,
    labels: Mutex<Vec<(ChatId, String)>>,
}

impl FakeCapability {
    pub(crate) fn ok() -> Self {
        Self::default()
    }

    pub(crate) fn failing_with(message: &str) -> Self {
        Self {
            fallback_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn scripted(script: Vec<std::result::Result<(), String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn sent_to(&self) -> Vec<ChatId> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn labels(&self) -> Vec<(ChatId, String)> {
        self.labels.lock().unwrap().clone()
    }
}

#[async_trait]
impl SendCapability for FakeCapability {
    async fn send(&self, chat_id: &ChatId, _content: &MessageContent) -> Result<SendReceipt> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.sent.lock().unwrap().push(chat_id.clone());

        let next = self.script.lock().unwrap().pop_front();
        let outcome = match (next, &self.fallback_error) {
            (Some(o), _) => o,
            (None, Some(e)) => Err(e.clone()),
            (None, None) => Ok(()),
        };

        outcome
            .map(|()| SendReceipt::with_id(format!("msg-{n}")))
            .map_err(Error::Provider)
    }

    async fn assign_label(&self, chat_id: &ChatId, label: &str) -> Result<()> {
        self.labels
            .lock()
            .unwrap()
            .push((chat_id.clone(), label.to_string()));
        Ok(())
    }

    async fn chats_with_label(&self, label: &str) -> Result<Vec<ChatId>> {
        Ok(self
            .labels()
            .into_iter()
            .filter(|(_, l)| l == label)
            .map(|(chat, _)| chat)
            .collect())
    }
}
