use std::{fmt, sync::Arc};

use crate::{
    config::Config,
    domain::{Destination, MessageContent, SendMode},
    errors::Error,
    governance::{
        pacing::PacingPolicy,
        rate_window::{Admission, RateLimitStats, RateWindowTracker},
        retry::{RetryEngine, RetryOutcome},
        SendError, SendResult,
    },
    messaging::port::SendCapability,
    ports::{Clock, WaitPurpose, WaitRequest, Waiter},
    Result,
};

/// Governance state shared by every tenant's orchestrator.
///
/// The tracker is process-wide: all tenants draw from the same counters.
#[derive(Clone)]
pub struct Governance {
    pub tracker: Arc<RateWindowTracker>,
    pub pacing: PacingPolicy,
    pub retry: Arc<RetryEngine>,
    pub waiter: Arc<dyn Waiter>,
    pub max_batch_size: usize,
}

impl fmt::Debug for Governance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Governance")
            .field("tracker", &self.tracker)
            .field("pacing", &self.pacing)
            .field("retry", &self.retry)
            .field("max_batch_size", &self.max_batch_size)
            .finish()
    }
}

impl Governance {
    pub fn from_config(cfg: &Config, clock: Arc<dyn Clock>, waiter: Arc<dyn Waiter>) -> Self {
        let tracker = Arc::new(RateWindowTracker::new(cfg.rate_limits, clock.clone()));
        let retry = Arc::new(RetryEngine::new(
            cfg.retry.clone(),
            tracker.clone(),
            waiter.clone(),
        ));
        Self {
            tracker,
            pacing: PacingPolicy::new(cfg.pacing, clock),
            retry,
            waiter,
            max_batch_size: cfg.max_batch_size,
        }
    }
}

/// Result of a bulk send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BulkReport {
    /// One entry per attempted destination, in input order. Destinations
    /// after an admission denial are absent.
    pub results: Vec<SendResult>,
    /// True when an admission denial left destinations unattempted.
    pub halted: bool,
    pub stats: RateLimitStats,
}

impl BulkReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// The admission denial that ended the batch, if any.
    ///
    /// Set even when the denied destination was the last one and nothing
    /// was left to skip.
    pub fn denial(&self) -> Option<&SendResult> {
        self.results.iter().find(|r| r.is_admission_denied())
    }
}

/// One tenant's send façade: normalization, admission, policy, retry and
/// pacing composed into a single operation.
pub struct SendOrchestrator {
    capability: Arc<dyn SendCapability>,
    gov: Governance,
}

impl fmt::Debug for SendOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendOrchestrator")
            .field("gov", &self.gov)
            .finish()
    }
}

impl SendOrchestrator {
    pub fn new(capability: Arc<dyn SendCapability>, gov: Governance) -> Self {
        Self { capability, gov }
    }

    pub fn capability(&self) -> &Arc<dyn SendCapability> {
        &self.capability
    }

    pub fn governance(&self) -> &Governance {
        &self.gov
    }

    pub fn rate_limit_stats(&self) -> RateLimitStats {
        self.gov.tracker.snapshot()
    }

    /// Send one message. Never fails: every outcome is a [`SendResult`].
    ///
    /// On success the call suspends for the pacing delay before returning,
    /// which also throttles a caller iterating over a batch.
    pub async fn send(&self, raw_destination: &str, content: &MessageContent, mode: SendMode) -> SendResult {
        if let Err(e) = content.validate() {
            return SendResult::failed(raw_destination.trim(), e.into(), 0);
        }
        let destination = match Destination::parse(raw_destination) {
            Ok(d) => d,
            Err(e) => return SendResult::failed(raw_destination.trim(), e.into(), 0),
        };

        if let Admission::Denied { reason, limits } = self.gov.tracker.check_admission(Some(&destination)) {
            tracing::warn!(
                destination = %destination,
                reason = %reason,
                current = limits.current,
                max = limits.max,
                reset_at = %limits.reset_at,
                "send denied by rate window"
            );
            return SendResult::failed(
                destination.as_str(),
                SendError::AdmissionDenied { reason, limits },
                0,
            );
        }

        if self.gov.pacing.late_night_blocked() {
            tracing::warn!(destination = %destination, "send blocked during late night hours");
            return SendResult::failed(destination.as_str(), SendError::PolicyBlocked, 0);
        }

        let result = match self
            .gov
            .retry
            .run(self.capability.as_ref(), &destination, content)
            .await
        {
            RetryOutcome::Delivered { receipt, attempts } => {
                SendResult::delivered(destination.as_str(), receipt, attempts)
            }
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                tracing::error!(
                    destination = %destination,
                    attempts,
                    last_error = %last_error,
                    "send gave up after repeated throttling"
                );
                SendResult::failed(
                    destination.as_str(),
                    SendError::RetriesExhausted {
                        attempts,
                        last_error,
                    },
                    attempts,
                )
            }
            RetryOutcome::Permanent { attempts, error } => SendResult::failed(
                destination.as_str(),
                SendError::PermanentProvider { message: error },
                attempts,
            ),
        };

        if result.success {
            let (band, delay) = self.gov.pacing.compute_delay(mode);
            tracing::debug!(
                destination = %destination,
                band = %band,
                delay_ms = delay.as_millis() as u64,
                "pacing after send"
            );
            self.gov
                .waiter
                .wait(WaitRequest::new(delay, WaitPurpose::Pacing(band)))
                .await;
        }

        result
    }

    /// Send `content` to each destination in order, stopping at the first
    /// admission denial.
    ///
    /// The whole batch is refused up front when it is empty or larger than
    /// the configured ceiling. Other per-destination failures do not stop
    /// the batch.
    pub async fn send_bulk(&self, raw_destinations: &[String], content: &MessageContent) -> Result<BulkReport> {
        if raw_destinations.is_empty() {
            return Err(Error::Validation(
                "Phone numbers must be a non-empty list".to_string(),
            ));
        }
        if raw_destinations.len() > self.gov.max_batch_size {
            return Err(Error::BatchTooLarge {
                requested: raw_destinations.len(),
                max: self.gov.max_batch_size,
            });
        }
        content
            .validate()
            .map_err(|e| Error::Validation(e.to_string()))?;

        let mut results = Vec::with_capacity(raw_destinations.len());
        let mut halted = false;

        for (idx, raw) in raw_destinations.iter().enumerate() {
            let result = self.send(raw, content, SendMode::Bulk).await;
            let denied = result.is_admission_denied();
            results.push(result);

            if denied {
                let remaining = raw_destinations.len() - idx - 1;
                if remaining > 0 {
                    tracing::warn!(remaining, "rate window exhausted, stopping bulk send");
                }
                halted = remaining > 0;
                break;
            }
        }

        Ok(BulkReport {
            results,
            halted,
            stats: self.gov.tracker.snapshot(),
        })
    }
}
