//! Per-campaign contact queue.
//!
//! Holds every [`CampaignContact`] of one campaign plus a due-index ordered
//! by `next_eligible_at`. All state transitions flow through this type, and
//! callers serialize access behind a mutex, so the "never double-dispatch one
//! contact" invariant holds by construction: a contact leaves the due-index
//! the moment it is marked dispatching and only re-enters through a recorded
//! outcome or a dispatch-timeout reap.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};

use crate::domain::{
    CampaignContact, CampaignId, Channel, ChannelMode, ContactId, ContactState, RetryConfig,
    StateCounts,
};
use crate::sender::SendOutcome;

use super::retry::{FallbackPolicy, RetryDecision, RetryPolicy};

/// Ordered, stateful set of per-contact dispatch tasks for one campaign.
#[derive(Debug)]
pub struct CampaignContactQueue {
    campaign_id: CampaignId,
    mode: ChannelMode,
    retry: RetryConfig,
    contacts: HashMap<ContactId, CampaignContact>,
    /// Due-index: contacts in a due state, ordered by eligibility instant.
    due: BTreeSet<(DateTime<Utc>, ContactId)>,
    /// Set once the campaign is cancelled; failures of in-flight attempts
    /// then finalize instead of scheduling retries.
    cancelled: bool,
}

impl CampaignContactQueue {
    /// Create an empty queue for a campaign.
    #[must_use]
    pub fn new(campaign_id: impl Into<CampaignId>, mode: ChannelMode, retry: RetryConfig) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            mode,
            retry,
            contacts: HashMap::new(),
            due: BTreeSet::new(),
            cancelled: false,
        }
    }

    /// Bulk-enqueue contacts on the campaign's initial channel.
    ///
    /// Idempotent: re-adding an existing contact is a no-op. Returns the
    /// number of contacts actually added.
    pub fn enqueue_initial<I, S>(&mut self, contact_ids: I, now: DateTime<Utc>) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<ContactId>,
    {
        let mut added = 0;
        for id in contact_ids {
            let id = id.into();
            if self.contacts.contains_key(&id) {
                continue;
            }
            let contact = CampaignContact::new(id.clone(), self.mode.initial_channel(), now);
            self.due.insert((contact.next_eligible_at, id.clone()));
            self.contacts.insert(id, contact);
            added += 1;
        }
        added
    }

    /// Contacts due at `now`, in eligibility order, up to `limit`.
    ///
    /// Pending contacts picked up here move to `queued` ("seen by the
    /// scheduler, awaiting a window/rate grant"); a window or rate-limit
    /// denial leaves them in the due-index unpenalized.
    pub fn peek_due(&mut self, now: DateTime<Utc>, limit: usize) -> Vec<CampaignContact> {
        let ids: Vec<ContactId> = self
            .due
            .iter()
            .take_while(|(at, _)| *at <= now)
            .take(limit)
            .map(|(_, id)| id.clone())
            .collect();

        let mut batch = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(contact) = self.contacts.get_mut(&id) {
                if contact.state == ContactState::Pending {
                    contact.state = ContactState::Queued;
                    contact.updated_at = now;
                }
                batch.push(contact.clone());
            }
        }
        batch
    }

    /// Move a due contact into `dispatching` and begin an attempt.
    ///
    /// Returns the updated contact (attempt count already incremented) for
    /// task projection, or `None` if the contact is not in a due state; the
    /// guard is what makes double-dispatch impossible rather than merely
    /// unlikely.
    pub fn mark_dispatching(
        &mut self,
        contact_id: &str,
        now: DateTime<Utc>,
    ) -> Option<CampaignContact> {
        let contact = self.contacts.get_mut(contact_id)?;
        if !contact.state.is_due_state() {
            return None;
        }

        self.due.remove(&(contact.next_eligible_at, contact.contact_id.clone()));
        contact.state = ContactState::Dispatching;
        contact.attempt_count += 1;
        contact.dispatched_at = Some(now);
        contact.updated_at = now;
        Some(contact.clone())
    }

    /// Record the outcome of an in-flight attempt.
    ///
    /// Returns the contact's new state, or `None` if the contact is not
    /// currently `dispatching`: an outcome arriving after the dispatch
    /// timeout already reaped the attempt is dropped rather than applied
    /// twice.
    pub fn mark_outcome(
        &mut self,
        contact_id: &str,
        outcome: &SendOutcome,
        now: DateTime<Utc>,
    ) -> Option<ContactState> {
        let contact = self.contacts.get(contact_id)?;
        if contact.state != ContactState::Dispatching {
            tracing::debug!(
                campaign_id = %self.campaign_id,
                contact_id,
                state = %contact.state,
                "Dropping late outcome for contact no longer in flight"
            );
            return None;
        }

        match outcome {
            SendOutcome::Delivered => {
                let contact = self.contacts.get_mut(contact_id)?;
                contact.state = ContactState::Succeeded;
                contact.dispatched_at = None;
                contact.updated_at = now;
                Some(ContactState::Succeeded)
            }
            SendOutcome::Failed(_) | SendOutcome::TimedOut => {
                let reason = outcome
                    .error_reason()
                    .unwrap_or_else(|| "send failed".to_string());
                Some(self.apply_failure(contact_id, reason, now))
            }
        }
    }

    /// Revert dispatching contacts whose attempt has outlived the dispatch
    /// timeout, treating them as failed. Protects against sender-side hangs.
    ///
    /// Returns the ids of reaped contacts.
    pub fn reap_stale(&mut self, now: DateTime<Utc>, timeout: Duration) -> Vec<ContactId> {
        let stale: Vec<ContactId> = self
            .contacts
            .values()
            .filter(|c| {
                c.state == ContactState::Dispatching
                    && c.dispatched_at
                        .and_then(|at| at.checked_add_signed(timeout))
                        .is_some_and(|deadline| deadline <= now)
            })
            .map(|c| c.contact_id.clone())
            .collect();

        for id in &stale {
            self.apply_failure(id, "dispatch timed out".to_string(), now);
        }
        stale
    }

    /// Finalize every re-dispatchable contact on campaign cancellation.
    ///
    /// In-flight `dispatching` contacts are left untouched; their outcomes
    /// resolve naturally (a post-cancel failure finalizes instead of
    /// retrying). Returns the number of contacts swept.
    pub fn cancel_remaining(&mut self, reason: &str, now: DateTime<Utc>) -> usize {
        self.cancelled = true;

        let mut swept = 0;
        for contact in self.contacts.values_mut() {
            if contact.state.is_due_state() {
                contact.state = ContactState::FailedPermanently;
                contact.last_error = Some(reason.to_string());
                contact.updated_at = now;
                swept += 1;
            }
        }
        self.due.clear();
        swept
    }

    /// Apply a failed attempt through the retry and fallback policies.
    fn apply_failure(&mut self, contact_id: &str, reason: String, now: DateTime<Utc>) -> ContactState {
        let mode = self.mode;
        let retry = self.retry;
        let cancelled = self.cancelled;

        let Some(contact) = self.contacts.get_mut(contact_id) else {
            return ContactState::FailedPermanently;
        };

        contact.last_error = Some(reason);
        contact.dispatched_at = None;
        contact.updated_at = now;

        if cancelled {
            // The campaign is terminal; rescheduling would contradict cancel.
            contact.state = ContactState::FailedPermanently;
            return contact.state;
        }

        match RetryPolicy::on_failure(contact.attempt_count, &retry, now) {
            RetryDecision::Retry { at } => {
                contact.state = ContactState::Retrying;
                contact.next_eligible_at = at;
                let key = (at, contact.contact_id.clone());
                self.due.insert(key);
                ContactState::Retrying
            }
            RetryDecision::Exhausted => {
                if FallbackPolicy::converts(mode, contact.channel) {
                    contact.state = ContactState::FallbackTriggered;
                    contact.channel = Channel::Sms;
                    contact.attempt_count = 0;
                    contact.next_eligible_at = now;
                    let key = (now, contact.contact_id.clone());
                    self.due.insert(key);
                    ContactState::FallbackTriggered
                } else if mode == ChannelMode::VoiceWithSmsFallback
                    && contact.channel == Channel::Sms
                {
                    // The one permitted fallback chain also exhausted.
                    contact.state = ContactState::FailedPermanently;
                    ContactState::FailedPermanently
                } else {
                    contact.state = ContactState::Exhausted;
                    ContactState::Exhausted
                }
            }
        }
    }

    /// Aggregate counts by contact state.
    #[must_use]
    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for contact in self.contacts.values() {
            counts.record(contact.state);
        }
        counts
    }

    /// Contacts currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.contacts
            .values()
            .filter(|c| c.state == ContactState::Dispatching)
            .count()
    }

    /// Ids of contacts currently in flight.
    #[must_use]
    pub fn in_flight_ids(&self) -> Vec<ContactId> {
        self.contacts
            .values()
            .filter(|c| c.state == ContactState::Dispatching)
            .map(|c| c.contact_id.clone())
            .collect()
    }

    /// Whether any contact can still be dispatched, now or in the future.
    #[must_use]
    pub fn has_redispatchable(&self) -> bool {
        self.contacts.values().any(|c| c.state.is_due_state())
    }

    /// Whether the run is finished: nothing re-dispatchable and nothing in
    /// flight.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        !self.has_redispatchable() && self.in_flight() == 0
    }

    /// Channels that still have contacts in a due state.
    #[must_use]
    pub fn active_channels(&self) -> Vec<Channel> {
        let mut channels = Vec::with_capacity(2);
        for channel in [Channel::Voice, Channel::Sms] {
            if self
                .contacts
                .values()
                .any(|c| c.state.is_due_state() && c.channel == channel)
            {
                channels.push(channel);
            }
        }
        channels
    }

    /// Look up a single contact record.
    #[must_use]
    pub fn get(&self, contact_id: &str) -> Option<CampaignContact> {
        self.contacts.get(contact_id).cloned()
    }

    /// Number of contact records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    /// Whether the queue holds no contacts at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(mode: ChannelMode, max_retries: u32, delay_secs: u64) -> CampaignContactQueue {
        CampaignContactQueue::new(
            "camp-1",
            mode,
            RetryConfig {
                max_retries,
                retry_delay_secs: delay_secs,
            },
        )
    }

    #[test]
    fn test_enqueue_is_idempotent() {
        let now = Utc::now();
        let mut q = queue(ChannelMode::Voice, 0, 0);

        assert_eq!(q.enqueue_initial(["a", "b", "c"], now), 3);
        assert_eq!(q.enqueue_initial(["b", "c", "d"], now), 1);
        assert_eq!(q.len(), 4);
    }

    #[test]
    fn test_peek_due_orders_by_eligibility_and_marks_queued() {
        let now = Utc::now();
        let mut q = queue(ChannelMode::Voice, 2, 600);
        q.enqueue_initial(["a"], now - Duration::minutes(2));
        q.enqueue_initial(["b"], now - Duration::minutes(5));
        q.enqueue_initial(["c"], now + Duration::minutes(5));

        let due = q.peek_due(now, 10);
        let ids: Vec<&str> = due.iter().map(|c| c.contact_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"], "oldest eligibility first, future excluded");
        assert!(due.iter().all(|c| c.state == ContactState::Queued));
    }

    #[test]
    fn test_dispatching_contacts_are_never_due() {
        let now = Utc::now();
        let mut q = queue(ChannelMode::Voice, 2, 600);
        q.enqueue_initial(["a"], now);

        let contact = q.mark_dispatching("a", now).unwrap();
        assert_eq!(contact.state, ContactState::Dispatching);
        assert_eq!(contact.attempt_count, 1);

        assert!(q.peek_due(now, 10).is_empty());
        // A second mark while in flight is refused.
        assert!(q.mark_dispatching("a", now).is_none());
    }

    #[test]
    fn test_success_outcome() {
        let now = Utc::now();
        let mut q = queue(ChannelMode::Voice, 2, 600);
        q.enqueue_initial(["a"], now);
        q.mark_dispatching("a", now).unwrap();

        let state = q.mark_outcome("a", &SendOutcome::Delivered, now).unwrap();
        assert_eq!(state, ContactState::Succeeded);
        assert!(q.is_drained());
    }

    #[test]
    fn test_failure_schedules_flat_delay_retry() {
        let now = Utc::now();
        let mut q = queue(ChannelMode::Voice, 2, 600);
        q.enqueue_initial(["a"], now);
        q.mark_dispatching("a", now).unwrap();

        let state = q
            .mark_outcome("a", &SendOutcome::Failed("busy".to_string()), now)
            .unwrap();
        assert_eq!(state, ContactState::Retrying);

        let contact = q.get("a").unwrap();
        assert_eq!(contact.next_eligible_at, now + Duration::minutes(10));
        assert_eq!(contact.last_error.as_deref(), Some("busy"));

        // Not due until the delay elapses.
        assert!(q.peek_due(now, 10).is_empty());
        assert_eq!(q.peek_due(now + Duration::minutes(10), 10).len(), 1);
    }

    #[test]
    fn test_retry_chain_exhausts_at_max_retries() {
        let mut now = Utc::now();
        let mut q = queue(ChannelMode::Voice, 2, 600);
        q.enqueue_initial(["a"], now);

        // Attempts 1 and 2 fail and retry; attempt 3 exhausts.
        for expected in [ContactState::Retrying, ContactState::Retrying] {
            q.mark_dispatching("a", now).unwrap();
            let state = q
                .mark_outcome("a", &SendOutcome::Failed("no answer".to_string()), now)
                .unwrap();
            assert_eq!(state, expected);
            now += Duration::minutes(10);
        }

        let contact = q.mark_dispatching("a", now).unwrap();
        assert_eq!(contact.attempt_count, 3);
        let state = q
            .mark_outcome("a", &SendOutcome::Failed("no answer".to_string()), now)
            .unwrap();
        assert_eq!(state, ContactState::Exhausted);

        let contact = q.get("a").unwrap();
        assert!(contact.attempt_count <= 3, "attempt_count bounded by max_retries + 1");
        assert!(q.is_drained());
    }

    #[test]
    fn test_timeout_outcome_is_a_transient_failure() {
        let now = Utc::now();
        let mut q = queue(ChannelMode::Voice, 1, 60);
        q.enqueue_initial(["a"], now);
        q.mark_dispatching("a", now).unwrap();

        let state = q.mark_outcome("a", &SendOutcome::TimedOut, now).unwrap();
        assert_eq!(state, ContactState::Retrying);
        assert_eq!(
            q.get("a").unwrap().last_error.as_deref(),
            Some("sender timed out")
        );
    }

    #[test]
    fn test_voice_exhaustion_converts_to_sms_exactly_once() {
        let now = Utc::now();
        let mut q = queue(ChannelMode::VoiceWithSmsFallback, 0, 0);
        q.enqueue_initial(["a"], now);

        // Voice chain: single attempt (max_retries = 0) exhausts and converts.
        q.mark_dispatching("a", now).unwrap();
        let state = q
            .mark_outcome("a", &SendOutcome::Failed("voicemail".to_string()), now)
            .unwrap();
        assert_eq!(state, ContactState::FallbackTriggered);

        let contact = q.get("a").unwrap();
        assert_eq!(contact.channel, Channel::Sms);
        assert_eq!(contact.attempt_count, 0, "fallback starts a fresh attempt chain");
        assert!(contact.is_due(now), "fallback is immediately eligible");

        // SMS chain exhausts: permanently failed, never a second conversion.
        q.mark_dispatching("a", now).unwrap();
        let state = q
            .mark_outcome("a", &SendOutcome::Failed("undeliverable".to_string()), now)
            .unwrap();
        assert_eq!(state, ContactState::FailedPermanently);
        assert!(q.is_drained());
    }

    #[test]
    fn test_voice_only_mode_ends_at_exhausted() {
        let now = Utc::now();
        let mut q = queue(ChannelMode::Voice, 0, 0);
        q.enqueue_initial(["a"], now);

        q.mark_dispatching("a", now).unwrap();
        let state = q
            .mark_outcome("a", &SendOutcome::Failed("no answer".to_string()), now)
            .unwrap();
        assert_eq!(state, ContactState::Exhausted);
    }

    #[test]
    fn test_reap_stale_goes_through_retry_policy() {
        let now = Utc::now();
        let mut q = queue(ChannelMode::Voice, 1, 600);
        q.enqueue_initial(["a", "b"], now);
        q.mark_dispatching("a", now).unwrap();
        q.mark_dispatching("b", now - Duration::minutes(5)).unwrap();

        let reaped = q.reap_stale(now, Duration::minutes(2));
        assert_eq!(reaped, vec!["b".to_string()]);

        let contact = q.get("b").unwrap();
        assert_eq!(contact.state, ContactState::Retrying);
        assert_eq!(contact.last_error.as_deref(), Some("dispatch timed out"));
        // "a" is still comfortably in flight.
        assert_eq!(q.get("a").unwrap().state, ContactState::Dispatching);
    }

    #[test]
    fn test_late_outcome_after_reap_is_dropped() {
        let now = Utc::now();
        let mut q = queue(ChannelMode::Voice, 1, 600);
        q.enqueue_initial(["a"], now - Duration::minutes(10));
        q.mark_dispatching("a", now - Duration::minutes(10)).unwrap();
        q.reap_stale(now, Duration::minutes(2));

        // The real outcome arrives after the reap already failed the attempt.
        assert!(q.mark_outcome("a", &SendOutcome::Delivered, now).is_none());
        assert_eq!(q.get("a").unwrap().state, ContactState::Retrying);
    }

    #[test]
    fn test_cancel_sweeps_due_but_not_in_flight() {
        let now = Utc::now();
        let mut q = queue(ChannelMode::Voice, 2, 600);
        q.enqueue_initial(["a", "b", "c", "d"], now);
        q.mark_dispatching("d", now).unwrap();

        let swept = q.cancel_remaining("cancelled", now);
        assert_eq!(swept, 3);

        for id in ["a", "b", "c"] {
            let contact = q.get(id).unwrap();
            assert_eq!(contact.state, ContactState::FailedPermanently);
            assert_eq!(contact.last_error.as_deref(), Some("cancelled"));
        }
        assert_eq!(q.get("d").unwrap().state, ContactState::Dispatching);

        // The in-flight attempt resolves naturally and is not overwritten.
        let state = q.mark_outcome("d", &SendOutcome::Delivered, now).unwrap();
        assert_eq!(state, ContactState::Succeeded);
    }

    #[test]
    fn test_post_cancel_failure_finalizes_instead_of_retrying() {
        let now = Utc::now();
        let mut q = queue(ChannelMode::Voice, 3, 600);
        q.enqueue_initial(["a"], now);
        q.mark_dispatching("a", now).unwrap();
        q.cancel_remaining("cancelled", now);

        let state = q
            .mark_outcome("a", &SendOutcome::Failed("busy".to_string()), now)
            .unwrap();
        assert_eq!(state, ContactState::FailedPermanently);
        assert_eq!(q.get("a").unwrap().last_error.as_deref(), Some("busy"));
    }

    #[test]
    fn test_counts_and_drain_tracking() {
        let now = Utc::now();
        let mut q = queue(ChannelMode::Voice, 2, 600);
        q.enqueue_initial(["a", "b", "c"], now);
        q.mark_dispatching("a", now).unwrap();
        q.mark_outcome("a", &SendOutcome::Delivered, now).unwrap();
        q.mark_dispatching("b", now).unwrap();

        let counts = q.counts();
        assert_eq!(counts.succeeded, 1);
        assert_eq!(counts.dispatching, 1);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.total(), 3);

        assert!(!q.is_drained());
        assert_eq!(q.in_flight(), 1);
        assert!(q.has_redispatchable());
    }
}
