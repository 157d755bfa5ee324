//! Send governance: admission, pacing, retry and the orchestrator that
//! composes them.

pub mod orchestrator;
pub mod pacing;
pub mod rate_window;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

use crate::{
    domain::ValidationError,
    governance::rate_window::{DenialReason, WindowLimits},
    messaging::types::SendReceipt,
};

pub use orchestrator::{BulkReport, Governance, SendOrchestrator};

/// Why a single send did not go out. Every variant is recovered into a
/// [`SendResult`]; none escapes the orchestrator as a fault.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{reason}")]
    AdmissionDenied {
        reason: DenialReason,
        limits: WindowLimits,
    },

    #[error("Sending messages during late night hours is blocked to prevent spam detection")]
    PolicyBlocked,

    #[error("{message}")]
    PermanentProvider { message: String },

    #[error("Rate limit error: Maximum retries exceeded. Please wait before sending more messages.")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl SendError {
    /// Stable machine-readable tag.
    pub fn code(&self) -> &'static str {
        match self {
            SendError::Validation(_) => "validation_error",
            SendError::AdmissionDenied { .. } => "rate_limited",
            SendError::PolicyBlocked => "policy_blocked",
            SendError::PermanentProvider { .. } => "provider_error",
            SendError::RetriesExhausted { .. } => "retries_exhausted",
        }
    }
}

/// Outcome of one send, returned to the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendResult {
    pub success: bool,
    /// Canonical destination when it parsed, otherwise the raw input.
    pub destination: String,
    /// Non-fatal condition on a successful send. Nothing sets it yet.
    pub warning: Option<String>,
    pub error: Option<SendError>,
    /// Present only for admission denials.
    pub rate_limit_info: Option<WindowLimits>,
    pub receipt: Option<SendReceipt>,
    pub attempts: u32,
}

impl SendResult {
    pub fn delivered(destination: impl Into<String>, receipt: SendReceipt, attempts: u32) -> Self {
        Self {
            success: true,
            destination: destination.into(),
            warning: None,
            error: None,
            rate_limit_info: None,
            receipt: Some(receipt),
            attempts,
        }
    }

    pub fn failed(destination: impl Into<String>, error: SendError, attempts: u32) -> Self {
        let rate_limit_info = match &error {
            SendError::AdmissionDenied { limits, .. } => Some(*limits),
            _ => None,
        };
        Self {
            success: false,
            destination: destination.into(),
            warning: None,
            error: Some(error),
            rate_limit_info,
            receipt: None,
            attempts,
        }
    }

    pub fn is_admission_denied(&self) -> bool {
        self.rate_limit_info.is_some()
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    #[test]
    fn only_admission_denials_carry_window_info() {
        let limits = WindowLimits {
            current: 5,
            max: 5,
            reset_at: Local.with_ymd_and_hms(2026, 1, 16, 0, 0, 0).unwrap(),
        };
        let denied = SendResult::failed(
            "+201061261991",
            SendError::AdmissionDenied {
                reason: DenialReason::DestinationDailyLimit,
                limits,
            },
            0,
        );
        assert!(denied.is_admission_denied());
        assert_eq!(denied.rate_limit_info, Some(limits));
        assert_eq!(
            denied.error_message().as_deref(),
            Some("Daily message limit exceeded for this number")
        );

        let blocked = SendResult::failed("+201061261991", SendError::PolicyBlocked, 0);
        assert!(!blocked.is_admission_denied());
        assert_eq!(blocked.error.as_ref().map(SendError::code), Some("policy_blocked"));
    }

    #[test]
    fn exhausted_message_hides_provider_text() {
        let err = SendError::RetriesExhausted {
            attempts: 3,
            last_error: "429 from upstream".to_string(),
        };
        assert!(!err.to_string().contains("upstream"));
        assert!(err.to_string().contains("Maximum retries exceeded"));
    }
}
