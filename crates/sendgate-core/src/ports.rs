use std::{sync::Mutex, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Local};

use crate::governance::pacing::PacingBand;

/// Source of wall-clock time. Window buckets and pacing bands are derived
/// from the local calendar, so this returns local time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Local>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Local>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Why a send is suspended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitPurpose {
    /// Backoff before retry `retry` (0-indexed).
    Backoff { retry: u32 },
    /// Post-send pacing delay.
    Pacing(PacingBand),
}

/// A single suspension of the send path.
///
/// Non-exhaustive so a cancellation signal can be added without breaking
/// existing `Waiter` callers.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct WaitRequest {
    pub duration: Duration,
    pub purpose: WaitPurpose,
}

impl WaitRequest {
    pub fn new(duration: Duration, purpose: WaitPurpose) -> Self {
        Self { duration, purpose }
    }
}

/// Asynchronous wait primitive used for backoff and pacing delays.
///
/// Implementations must yield to the scheduler rather than block the thread.
#[async_trait]
pub trait Waiter: Send + Sync {
    async fn wait(&self, req: WaitRequest);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TokioWaiter;

#[async_trait]
impl Waiter for TokioWaiter {
    async fn wait(&self, req: WaitRequest) {
        if req.duration > Duration::ZERO {
            tokio::time::sleep(req.duration).await;
        }
    }
}
