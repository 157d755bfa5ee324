//! Bounded retries with exponential backoff.
//!
//! The attempt sequence is an explicit state machine:
//!
//! ```text
//! Attempt(n) --succeed--> Success
//! Attempt(n) --fail(transient), n < max--> Wait { retry: n } --resume--> Attempt(n+1)
//! Attempt(n) --fail(transient), n = max--> Exhausted
//! Attempt(n) --fail(permanent)--> PermanentFailure
//! ```
//!
//! [`RetryMachine`] holds only the transitions; [`RetryEngine`] drives it
//! against the send capability and the wait primitive.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    domain::{Destination, MessageContent},
    governance::rate_window::RateWindowTracker,
    messaging::{port::SendCapability, types::SendReceipt},
    ports::{WaitPurpose, WaitRequest, Waiter},
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    pub multiplier: f64,
    /// Lower-case substrings marking provider throttling.
    pub transient_markers: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
            max_retries: 2,
            multiplier: 2.0,
            transient_markers: [
                "rate limit",
                "too many requests",
                "429",
                "temporarily blocked",
                "blocked",
                "spam",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Provider throttling; worth retrying after a backoff.
    Transient,
    /// Anything else; retrying will not help.
    Permanent,
}

impl RetryPolicy {
    pub fn classify(&self, message: &str) -> FailureKind {
        let lower = message.to_lowercase();
        if self
            .transient_markers
            .iter()
            .any(|m| lower.contains(&m.to_lowercase()))
        {
            FailureKind::Transient
        } else {
            FailureKind::Permanent
        }
    }

    /// Delay before retry `retry` (0-indexed): `initial × multiplier^retry`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = i32::try_from(retry).unwrap_or(i32::MAX);
        let ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exp);
        let cap = self.max_delay.as_millis() as f64;

        if !ms.is_finite() || ms >= cap {
            self.max_delay
        } else {
            Duration::from_millis(ms as u64)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryState {
    /// About to make attempt `n` (0-indexed).
    Attempt(u32),
    /// Waiting `delay` before retry `retry`.
    Wait { retry: u32, delay: Duration },
    Success { attempts: u32 },
    Exhausted { attempts: u32, last_error: String },
    PermanentFailure { attempts: u32, error: String },
}

impl RetryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RetryState::Success { .. }
                | RetryState::Exhausted { .. }
                | RetryState::PermanentFailure { .. }
        )
    }
}

/// Transition table for one attempt sequence. Calls made in a state that
/// does not accept them leave the state unchanged.
#[derive(Debug)]
pub struct RetryMachine<'p> {
    policy: &'p RetryPolicy,
    state: RetryState,
}

impl<'p> RetryMachine<'p> {
    pub fn new(policy: &'p RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Attempt(0),
        }
    }

    pub fn state(&self) -> &RetryState {
        &self.state
    }

    pub fn succeed(&mut self) -> &RetryState {
        if let RetryState::Attempt(n) = self.state {
            self.state = RetryState::Success { attempts: n.saturating_add(1) };
        }
        &self.state
    }

    pub fn fail(&mut self, message: &str) -> &RetryState {
        let RetryState::Attempt(n) = self.state else {
            return &self.state;
        };

        self.state = match self.policy.classify(message) {
            FailureKind::Permanent => RetryState::PermanentFailure {
                attempts: n.saturating_add(1),
                error: message.to_string(),
            },
            FailureKind::Transient if n < self.policy.max_retries => RetryState::Wait {
                retry: n,
                delay: self.policy.backoff(n),
            },
            FailureKind::Transient => RetryState::Exhausted {
                attempts: n.saturating_add(1),
                last_error: message.to_string(),
            },
        };
        &self.state
    }

    pub fn resume(&mut self) -> &RetryState {
        if let RetryState::Wait { retry, .. } = self.state {
            self.state = RetryState::Attempt(retry.saturating_add(1));
        }
        &self.state
    }
}

/// Terminal result of [`RetryEngine::run`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryOutcome {
    Delivered { receipt: SendReceipt, attempts: u32 },
    Exhausted { attempts: u32, last_error: String },
    Permanent { attempts: u32, error: String },
}

pub struct RetryEngine {
    policy: RetryPolicy,
    tracker: Arc<RateWindowTracker>,
    waiter: Arc<dyn Waiter>,
}

impl std::fmt::Debug for RetryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryEngine")
            .field("policy", &self.policy)
            .finish()
    }
}

impl RetryEngine {
    pub fn new(policy: RetryPolicy, tracker: Arc<RateWindowTracker>, waiter: Arc<dyn Waiter>) -> Self {
        Self {
            policy,
            tracker,
            waiter,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send through `capability` until success or a terminal failure.
    ///
    /// A success is counted in the rate windows exactly once, before this
    /// returns. Attempts are strictly sequential.
    pub async fn run(
        &self,
        capability: &dyn SendCapability,
        destination: &Destination,
        content: &MessageContent,
    ) -> RetryOutcome {
        let chat_id = destination.chat_id();
        let mut machine = RetryMachine::new(&self.policy);
        let mut receipt = None;

        loop {
            match machine.state().clone() {
                RetryState::Attempt(n) => match capability.send(&chat_id, content).await {
                    Ok(r) => {
                        self.tracker.record_send(Some(destination));
                        receipt = Some(r);
                        machine.succeed();
                    }
                    Err(e) => {
                        let message = e.to_string();
                        tracing::warn!(
                            destination = %destination,
                            attempt = n.saturating_add(1),
                            max_attempts = self.policy.max_retries.saturating_add(1),
                            error = %message,
                            "send attempt failed"
                        );
                        machine.fail(&message);
                    }
                },
                RetryState::Wait { retry, delay } => {
                    tracing::info!(
                        destination = %destination,
                        retry = retry.saturating_add(1),
                        delay_ms = delay.as_millis() as u64,
                        "backing off before retry"
                    );
                    self.waiter
                        .wait(WaitRequest::new(delay, WaitPurpose::Backoff { retry }))
                        .await;
                    machine.resume();
                }
                RetryState::Success { attempts } => {
                    return RetryOutcome::Delivered {
                        receipt: receipt.take().unwrap_or_default(),
                        attempts,
                    };
                }
                RetryState::Exhausted {
                    attempts,
                    last_error,
                } => {
                    return RetryOutcome::Exhausted {
                        attempts,
                        last_error,
                    };
                }
                RetryState::PermanentFailure { attempts, error } => {
                    tracing::error!(destination = %destination, attempts, error = %error, "send failed permanently");
                    return RetryOutcome::Permanent { attempts, error };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::testing::{FakeCapability, RecordingWaiter};
    use crate::governance::rate_window::RateLimits;
    use crate::ports::ManualClock;
    use chrono::{Local, TimeZone};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(100),
            max_retries,
            multiplier: 2.0,
            ..RetryPolicy::default()
        }
    }

    fn engine(p: RetryPolicy) -> (Arc<RateWindowTracker>, Arc<RecordingWaiter>, RetryEngine) {
        let clock = Arc::new(ManualClock::new(
            Local.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap(),
        ));
        let tracker = Arc::new(RateWindowTracker::new(RateLimits::default(), clock));
        let waiter = Arc::new(RecordingWaiter::default());
        let e = RetryEngine::new(p, tracker.clone(), waiter.clone());
        (tracker, waiter, e)
    }

    fn dest() -> Destination {
        Destination::parse("+201061261991").unwrap()
    }

    #[test]
    fn classifies_by_lowercased_substring() {
        let p = RetryPolicy::default();
        assert_eq!(p.classify("HTTP 429 Too Many Requests"), FailureKind::Transient);
        assert_eq!(p.classify("Account TEMPORARILY BLOCKED"), FailureKind::Transient);
        assert_eq!(p.classify("Rate Limit hit"), FailureKind::Transient);
        assert_eq!(p.classify("chat not found"), FailureKind::Permanent);
        assert_eq!(p.classify(""), FailureKind::Permanent);
    }

    #[test]
    fn backoff_sequence_is_exponential_and_capped() {
        let p = RetryPolicy {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            multiplier: 3.0,
            max_retries: 5,
            ..RetryPolicy::default()
        };
        let seq: Vec<u64> = (0..p.max_retries)
            .map(|n| p.backoff(n).as_millis() as u64)
            .collect();
        assert_eq!(seq, vec![1000, 3000, 9000, 10_000, 10_000]);

        // Huge exponents saturate at the cap instead of overflowing.
        assert_eq!(p.backoff(u32::MAX), Duration::from_millis(10_000));
    }

    #[test]
    fn machine_walks_transient_path_to_exhaustion() {
        let p = policy(2);
        let mut m = RetryMachine::new(&p);
        assert_eq!(m.state(), &RetryState::Attempt(0));

        assert_eq!(
            m.fail("429"),
            &RetryState::Wait { retry: 0, delay: Duration::from_secs(30) }
        );
        assert_eq!(m.resume(), &RetryState::Attempt(1));
        assert_eq!(
            m.fail("429"),
            &RetryState::Wait { retry: 1, delay: Duration::from_secs(60) }
        );
        assert_eq!(m.resume(), &RetryState::Attempt(2));
        assert_eq!(
            m.fail("429"),
            &RetryState::Exhausted { attempts: 3, last_error: "429".to_string() }
        );
        assert!(m.state().is_terminal());
    }

    #[test]
    fn machine_stops_on_permanent_failure() {
        let p = policy(5);
        let mut m = RetryMachine::new(&p);
        assert_eq!(
            m.fail("invalid chat"),
            &RetryState::PermanentFailure { attempts: 1, error: "invalid chat".to_string() }
        );
    }

    #[test]
    fn machine_ignores_out_of_order_transitions() {
        let p = policy(2);
        let mut m = RetryMachine::new(&p);
        // resume only applies while waiting
        assert_eq!(m.resume(), &RetryState::Attempt(0));

        m.fail("spam");
        // succeed/fail only apply to an attempt
        let waiting = m.state().clone();
        assert_eq!(m.succeed(), &waiting);
        assert_eq!(m.fail("boom"), &waiting);

        m.resume();
        assert_eq!(m.succeed(), &RetryState::Success { attempts: 2 });
        assert_eq!(m.fail("boom"), &RetryState::Success { attempts: 2 });
    }

    #[test]
    fn attempt_counts_saturate_at_the_top_of_the_range() {
        let p = policy(u32::MAX);
        let mut m = RetryMachine::new(&p);
        m.state = RetryState::Attempt(u32::MAX);
        assert_eq!(m.succeed(), &RetryState::Success { attempts: u32::MAX });

        let mut m = RetryMachine::new(&p);
        m.state = RetryState::Wait { retry: u32::MAX, delay: Duration::ZERO };
        assert_eq!(m.resume(), &RetryState::Attempt(u32::MAX));
    }

    #[tokio::test]
    async fn unbounded_retry_policy_still_logs_and_stops_on_permanent() {
        let (_tracker, _waiter, e) = engine(policy(u32::MAX));
        let cap = FakeCapability::failing_with("chat not found");

        let out = e.run(&cap, &dest(), &MessageContent::text("hi")).await;
        assert!(matches!(out, RetryOutcome::Permanent { attempts: 1, .. }));
    }

    #[test]
    fn zero_retries_exhausts_on_first_transient() {
        let p = policy(0);
        let mut m = RetryMachine::new(&p);
        assert!(matches!(m.fail("blocked"), RetryState::Exhausted { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn transient_on_every_attempt_is_exhausted() {
        let (tracker, waiter, e) = engine(policy(2));
        let cap = FakeCapability::failing_with("Error: 429 too many requests");

        let out = e.run(&cap, &dest(), &MessageContent::text("hi")).await;
        assert_eq!(
            out,
            RetryOutcome::Exhausted {
                attempts: 3,
                last_error: "Error: 429 too many requests".to_string()
            }
        );
        assert_eq!(cap.calls(), 3);
        assert_eq!(
            waiter.durations(),
            vec![Duration::from_secs(30), Duration::from_secs(60)]
        );
        assert_eq!(tracker.snapshot().daily.current, 0);
    }

    #[tokio::test]
    async fn permanent_error_makes_exactly_one_attempt() {
        let (_tracker, waiter, e) = engine(policy(2));
        let cap = FakeCapability::failing_with("Evaluation failed: chat not found");

        let out = e.run(&cap, &dest(), &MessageContent::text("hi")).await;
        assert_eq!(
            out,
            RetryOutcome::Permanent {
                attempts: 1,
                error: "Evaluation failed: chat not found".to_string()
            }
        );
        assert_eq!(cap.calls(), 1);
        assert!(waiter.durations().is_empty());
    }

    #[tokio::test]
    async fn success_after_transient_records_once() {
        let (tracker, waiter, e) = engine(policy(2));
        let cap = FakeCapability::scripted(vec![Err("rate limit".to_string()), Ok(())]);
        let d = dest();

        let out = e.run(&cap, &d, &MessageContent::text("hi")).await;
        match out {
            RetryOutcome::Delivered { attempts, receipt } => {
                assert_eq!(attempts, 2);
                assert!(receipt.message_id.is_some());
            }
            other => panic!("expected delivery, got {other:?}"),
        }
        assert_eq!(cap.calls(), 2);
        assert_eq!(waiter.durations(), vec![Duration::from_secs(30)]);
        assert_eq!(tracker.snapshot().daily.current, 1);
        assert_eq!(tracker.snapshot().hourly.current, 1);
        assert_eq!(cap.sent_to(), vec![d.chat_id(), d.chat_id()]);
    }
}
