//! Per-contact dispatch state.
//!
//! Exactly one [`CampaignContact`] exists per (campaign, contact) pair. It is
//! created when contacts are added to the campaign, mutated only by dispatch
//! outcomes, and retained after completion for reporting. [`DispatchTask`] is
//! the ephemeral projection handed to a dispatch worker, never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::campaign::{Campaign, Channel};

/// Contact identifier (opaque, owned by the excluded contact store).
pub type ContactId = String;

/// Lifecycle state of one contact within one campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactState {
    /// Created, not yet seen by the scheduler.
    Pending,
    /// Seen by the scheduler, awaiting window/rate-limit grant.
    Queued,
    /// Handed to the channel sender; in flight.
    Dispatching,
    /// Delivered successfully; terminal.
    Succeeded,
    /// Failed, scheduled for another attempt.
    Retrying,
    /// All attempts on the current channel used without success; terminal
    /// unless converted to an SMS fallback.
    Exhausted,
    /// Converted from an exhausted voice attempt to an SMS obligation.
    FallbackTriggered,
    /// No further attempts will ever be made; terminal.
    FailedPermanently,
}

impl ContactState {
    /// Whether the contact can be picked up for dispatch (given its
    /// `next_eligible_at` has passed).
    #[must_use]
    pub const fn is_due_state(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Queued | Self::Retrying | Self::FallbackTriggered
        )
    }

    /// Whether no further state changes are possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Exhausted | Self::FailedPermanently
        )
    }
}

impl std::fmt::Display for ContactState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Dispatching => "dispatching",
            Self::Succeeded => "succeeded",
            Self::Retrying => "retrying",
            Self::Exhausted => "exhausted",
            Self::FallbackTriggered => "fallback_triggered",
            Self::FailedPermanently => "failed_permanently",
        };
        write!(f, "{s}")
    }
}

/// One contact's dispatch record within one campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignContact {
    /// Contact identifier.
    pub contact_id: ContactId,
    /// Channel the next attempt will use. Flips to SMS exactly once on
    /// fallback conversion.
    pub channel: Channel,
    /// Current lifecycle state.
    pub state: ContactState,
    /// Attempts begun on the current channel. Reset to 0 by fallback.
    pub attempt_count: u32,
    /// Earliest instant the contact may next be dispatched.
    pub next_eligible_at: DateTime<Utc>,
    /// Most recent failure reason, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the in-flight attempt began; drives the dispatch timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
    /// Record creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl CampaignContact {
    /// Create a fresh pending record, eligible immediately.
    #[must_use]
    pub fn new(contact_id: impl Into<ContactId>, channel: Channel, now: DateTime<Utc>) -> Self {
        Self {
            contact_id: contact_id.into(),
            channel,
            state: ContactState::Pending,
            attempt_count: 0,
            next_eligible_at: now,
            last_error: None,
            dispatched_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the contact is due for dispatch at the given instant.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state.is_due_state() && self.next_eligible_at <= now
    }
}

/// Ephemeral projection of a due contact handed to a dispatch worker.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchTask {
    /// Owning campaign.
    pub campaign_id: String,
    /// Target contact.
    pub contact_id: ContactId,
    /// Channel for this attempt.
    pub channel: Channel,
    /// Opaque agent reference for this channel.
    pub agent_id: String,
    /// Caller/sender number reference.
    pub from_number: String,
    /// 1-based attempt number on the current channel.
    pub attempt: u32,
}

impl DispatchTask {
    /// Project a task from a contact that was just marked dispatching.
    #[must_use]
    pub fn project(campaign: &Campaign, contact: &CampaignContact) -> Self {
        Self {
            campaign_id: campaign.id.clone(),
            contact_id: contact.contact_id.clone(),
            channel: contact.channel,
            agent_id: campaign.agent_for(contact.channel).unwrap_or_default().to_string(),
            from_number: campaign.from_number.clone(),
            attempt: contact.attempt_count,
        }
    }
}

/// Aggregate contact counts by state, for dashboard polling and the terminal
/// completion event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub pending: usize,
    pub queued: usize,
    pub dispatching: usize,
    pub succeeded: usize,
    pub retrying: usize,
    pub exhausted: usize,
    pub fallback_triggered: usize,
    pub failed_permanently: usize,
}

impl StateCounts {
    /// Record one contact in the given state.
    pub fn record(&mut self, state: ContactState) {
        match state {
            ContactState::Pending => self.pending += 1,
            ContactState::Queued => self.queued += 1,
            ContactState::Dispatching => self.dispatching += 1,
            ContactState::Succeeded => self.succeeded += 1,
            ContactState::Retrying => self.retrying += 1,
            ContactState::Exhausted => self.exhausted += 1,
            ContactState::FallbackTriggered => self.fallback_triggered += 1,
            ContactState::FailedPermanently => self.failed_permanently += 1,
        }
    }

    /// Total contacts counted.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.pending
            + self.queued
            + self.dispatching
            + self.succeeded
            + self.retrying
            + self.exhausted
            + self.fallback_triggered
            + self.failed_permanently
    }

    /// Contacts in a terminal state.
    #[must_use]
    pub const fn terminal(&self) -> usize {
        self.succeeded + self.exhausted + self.failed_permanently
    }
}
