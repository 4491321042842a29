//! Per-campaign, per-channel rate limiting using governor.
//!
//! Each campaign owns one direct (unkeyed) token bucket per channel, sized to
//! `messages_per_hour`: capacity is one hour's worth and tokens refill
//! continuously at `messages_per_hour / 3600` per second. `try_acquire` never
//! blocks; the dispatch loop polls and leaves denied contacts due for the
//! next tick. governor's accounting is atomic, so the limiter is safe to
//! share across all dispatch workers of one scheduler instance.
//!
//! Pausing a campaign never touches the bucket: accumulated tokens survive,
//! bounded at capacity, so a long pause cannot produce a burst beyond one
//! hour's worth on resume.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};

use crate::domain::{Campaign, Channel};

/// Direct (single-bucket) governor limiter.
pub type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// The pair of channel buckets for one campaign.
pub struct ChannelRateLimiters {
    voice: Arc<DirectRateLimiter>,
    sms: Arc<DirectRateLimiter>,
}

impl std::fmt::Debug for ChannelRateLimiters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRateLimiters").finish_non_exhaustive()
    }
}

impl ChannelRateLimiters {
    /// Build both channel buckets from the campaign's rate configuration.
    ///
    /// The SMS bucket uses the independent SMS override when configured,
    /// otherwise the primary limit. Channels the mode never uses still get a
    /// bucket; it simply goes unconsulted.
    #[must_use]
    pub fn for_campaign(campaign: &Campaign) -> Self {
        Self {
            voice: Arc::new(Self::build(
                campaign.rate_limit_for(Channel::Voice).messages_per_hour,
            )),
            sms: Arc::new(Self::build(
                campaign.rate_limit_for(Channel::Sms).messages_per_hour,
            )),
        }
    }

    fn build(messages_per_hour: u32) -> DirectRateLimiter {
        // Zero is rejected at campaign validation; clamp defensively anyway.
        let per_hour = NonZeroU32::new(messages_per_hour).unwrap_or(NonZeroU32::MIN);
        RateLimiter::direct(Quota::per_hour(per_hour))
    }

    /// Try to take one token for the given channel. Never blocks.
    #[must_use]
    pub fn try_acquire(&self, channel: Channel) -> bool {
        self.limiter(channel).check().is_ok()
    }

    fn limiter(&self, channel: Channel) -> &DirectRateLimiter {
        match channel {
            Channel::Voice => &self.voice,
            Channel::Sms => &self.sms,
        }
    }
}
