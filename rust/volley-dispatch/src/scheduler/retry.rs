//! Retry and fallback policy decisions.
//!
//! Both policies are pure decision functions; the contact queue applies the
//! resulting transitions. The retry delay is flat; the configuration surface
//! exposes a single delay number, and this module implements exactly that
//! contract. Richer backoff would be a separate extension, not an assumed
//! requirement.

use chrono::{DateTime, Utc};

use crate::domain::{Channel, ChannelMode, RetryConfig};

/// Decision for a failed dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again, no earlier than the given instant.
    Retry {
        /// Earliest instant of the next attempt.
        at: DateTime<Utc>,
    },
    /// All permitted attempts on the current channel are used up.
    Exhausted,
}

/// Flat-delay, bounded-attempt retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy;

impl RetryPolicy {
    /// Decide what happens after a failed attempt.
    ///
    /// `attempt_count` is the number of attempts already begun on the current
    /// channel (the failed one included). A contact gets `max_retries + 1`
    /// attempts in total, so the failed attempt schedules a retry while
    /// `attempt_count < max_retries + 1`.
    #[must_use]
    pub fn on_failure(
        attempt_count: u32,
        retry: &RetryConfig,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        if attempt_count < retry.max_retries + 1 {
            RetryDecision::Retry {
                at: now + retry.delay(),
            }
        } else {
            RetryDecision::Exhausted
        }
    }
}

/// Voice-to-SMS fallback policy.
#[derive(Debug, Clone, Copy)]
pub struct FallbackPolicy;

impl FallbackPolicy {
    /// Whether an exhausted contact on `channel` converts to an SMS
    /// obligation under the given campaign mode.
    ///
    /// Only exhausted *voice* attempts convert, and only under
    /// `voice_with_sms_fallback`; since fallback campaigns always begin on
    /// voice, an exhausted SMS contact has necessarily used its one
    /// conversion already and fails permanently instead.
    #[must_use]
    pub fn converts(mode: ChannelMode, channel: Channel) -> bool {
        mode == ChannelMode::VoiceWithSmsFallback && channel == Channel::Voice
    }
}
