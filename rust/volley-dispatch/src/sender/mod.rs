//! Channel sender abstraction.
//!
//! The telephony/SMS provider is a black box behind [`ChannelSender`]. The
//! scheduler treats the interface as at-least-once-attempt and never assumes
//! provider-side idempotency: every invocation is one attempt, and errors of
//! any kind surface as a retryable [`SendOutcome`], never as a panic or a
//! scheduler-level fault.

pub mod http;

pub use http::HttpChannelSender;

use async_trait::async_trait;

use crate::domain::DispatchTask;

/// Result of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The provider accepted and completed the attempt.
    Delivered,
    /// The attempt failed with a provider-reported reason. Retryable.
    Failed(String),
    /// The provider did not answer in time. Treated like a transient failure.
    TimedOut,
}

impl SendOutcome {
    /// Failure reason recorded on the contact, if the attempt did not succeed.
    #[must_use]
    pub fn error_reason(&self) -> Option<String> {
        match self {
            Self::Delivered => None,
            Self::Failed(reason) => Some(reason.clone()),
            Self::TimedOut => Some("sender timed out".to_string()),
        }
    }
}

/// Black-box outbound channel (telephony/SMS provider integration).
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Perform one dispatch attempt for the given task.
    ///
    /// Implementations must map every internal error to a [`SendOutcome`];
    /// this call is infallible from the scheduler's point of view.
    async fn send(&self, task: &DispatchTask) -> SendOutcome;

    /// Best-effort request to abort an in-flight attempt.
    ///
    /// Called on campaign cancellation. The scheduler bounds the wait and
    /// never relies on confirmation; the default implementation does nothing.
    async fn abort(&self, campaign_id: &str, contact_id: &str) {
        let _ = (campaign_id, contact_id);
    }
}
