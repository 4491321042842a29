//! Per-campaign dispatch loop.
//!
//! One [`DispatchScheduler`] runs per active campaign as an independent tokio
//! task. No lock is shared across campaigns, so one campaign's load or pause
//! state never affects another's. Each tick it reaps stale dispatches, then
//! for every due contact checks the sending window and rate limiter and, on a
//! grant, hands the contact to the channel sender through a bounded worker
//! pool. Outcomes flow back into the queue through the retry and fallback
//! policies.
//!
//! The worker pool bounds concurrency, not throughput; the rate limiter is
//! the throughput governor. Window and rate denials leave contacts due and
//! unpenalized: they are deferred eligibility, not failures.
//!
//! # Run state machine
//!
//! ```text
//! idle → running → (paused ⇄ running) → draining → stopped
//! ```
//!
//! Pause is cooperative: new acquisitions stop, in-flight attempts complete
//! and record their outcomes. Cancel sweeps re-dispatchable contacts, asks
//! the sender to abort in-flight attempts under a bounded timeout, and stops.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

use crate::config::SchedulerConfig;
use crate::domain::{Campaign, DispatchTask, StateCounts};
use crate::events::{CampaignEvent, EventBus};
use crate::sender::{ChannelSender, SendOutcome};

use super::queue::CampaignContactQueue;
use super::rate_limit::ChannelRateLimiters;
use super::window::SendWindowEvaluator;

/// Control signal from the run controller to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSignal {
    /// Acquire and dispatch normally.
    Run,
    /// Stop acquiring; let in-flight attempts complete.
    Pause,
    /// Terminal: sweep the queue and stop.
    Cancel,
}

/// Engine run state, published for the status operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Created, loop not yet entered.
    Idle,
    /// Acquiring and dispatching.
    Running,
    /// Held; in-flight attempts completing.
    Paused,
    /// Nothing left to acquire; waiting for in-flight attempts.
    Draining,
    /// Loop exited.
    Stopped,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Why a running campaign is making no progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedReason {
    /// Every channel with due contacts has an enabled window with no allowed
    /// weekdays; no instant will ever be eligible.
    NoEligibleDays,
}

impl std::fmt::Display for BlockedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoEligibleDays => write!(f, "no_eligible_days"),
        }
    }
}

/// Live run status published by the engine over a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunStatus {
    /// Current loop state.
    pub state: RunState,
    /// Set when the run is permanently stalled by configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<BlockedReason>,
}

impl RunStatus {
    const fn idle() -> Self {
        Self {
            state: RunState::Idle,
            blocked: None,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The queue drained (or the absolute end bound passed).
    Completed {
        /// Final per-contact outcome counts.
        counts: StateCounts,
    },
    /// The campaign was cancelled mid-run.
    Cancelled {
        /// Counts at the moment of cancellation.
        counts: StateCounts,
    },
}

/// Engine timing and sizing knobs, fixed at start time.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    /// Loop tick interval.
    pub tick_interval: Duration,
    /// Maximum concurrent dispatch workers per campaign.
    pub worker_pool_size: usize,
    /// How long an attempt may stay in flight before it is reaped as failed.
    pub dispatch_timeout: Duration,
    /// Upper bound on waiting for a sender-side abort during cancel.
    pub abort_timeout: Duration,
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            worker_pool_size: config.worker_pool_size,
            dispatch_timeout: Duration::from_secs(config.dispatch_timeout_secs),
            abort_timeout: Duration::from_secs(config.abort_timeout_secs),
        }
    }
}

/// The per-campaign dispatch loop.
pub struct DispatchScheduler {
    campaign: Campaign,
    queue: Arc<Mutex<CampaignContactQueue>>,
    limiters: Arc<ChannelRateLimiters>,
    sender: Arc<dyn ChannelSender>,
    events: Arc<EventBus>,
    settings: SchedulerSettings,
    signal: watch::Receiver<RunSignal>,
    status_tx: watch::Sender<RunStatus>,
    workers: Arc<Semaphore>,
    /// Set once the absolute end bound passes; no further acquisitions.
    bounds_closed: bool,
}

impl std::fmt::Debug for DispatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchScheduler")
            .field("campaign_id", &self.campaign.id)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DispatchScheduler {
    /// Assemble an engine for one campaign run.
    ///
    /// Returns the engine plus the status receiver the controller polls.
    pub fn new(
        campaign: Campaign,
        queue: Arc<Mutex<CampaignContactQueue>>,
        sender: Arc<dyn ChannelSender>,
        events: Arc<EventBus>,
        settings: SchedulerSettings,
        signal: watch::Receiver<RunSignal>,
    ) -> (Self, watch::Receiver<RunStatus>) {
        let limiters = Arc::new(ChannelRateLimiters::for_campaign(&campaign));
        let (status_tx, status_rx) = watch::channel(RunStatus::idle());
        let workers = Arc::new(Semaphore::new(settings.worker_pool_size.max(1)));

        (
            Self {
                campaign,
                queue,
                limiters,
                sender,
                events,
                settings,
                signal,
                status_tx,
                workers,
                bounds_closed: false,
            },
            status_rx,
        )
    }

    /// Drive the run to completion. Consumes the engine.
    pub async fn run(mut self) -> RunOutcome {
        tracing::info!(
            campaign_id = %self.campaign.id,
            mode = %self.campaign.channel_mode,
            contacts = self.queue.lock().len(),
            "Dispatch loop started"
        );
        self.publish(RunState::Running, None);

        let mut interval = tokio::time::interval(self.settings.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = self.signal.changed() => {
                    // A dropped controller is equivalent to cancellation.
                    if changed.is_err() {
                        return self.finalize_cancelled().await;
                    }
                }
            }

            let signal = *self.signal.borrow();
            let now = Utc::now();

            match signal {
                RunSignal::Cancel => return self.finalize_cancelled().await,
                RunSignal::Pause => {
                    // No new acquisitions; in-flight attempts keep resolving
                    // and hung ones are still reaped.
                    self.reap_stale(now);
                    self.publish(RunState::Paused, None);
                }
                RunSignal::Run => {
                    if let Some(outcome) = self.tick(now) {
                        return outcome;
                    }
                }
            }
        }
    }

    /// One scheduling pass. Returns the run outcome once the queue drains.
    fn tick(&mut self, now: DateTime<Utc>) -> Option<RunOutcome> {
        self.reap_stale(now);

        if !self.bounds_closed && self.campaign.ended(now) {
            tracing::info!(
                campaign_id = %self.campaign.id,
                "Absolute end bound passed; draining in-flight attempts"
            );
            self.bounds_closed = true;
        }

        if !self.bounds_closed && self.campaign.within_bounds(now) {
            self.acquire_due(now);
        }

        let blocked = self.blocked_reason();
        let (redispatchable, in_flight, counts) = {
            let queue = self.queue.lock();
            (queue.has_redispatchable(), queue.in_flight(), queue.counts())
        };

        let can_progress = redispatchable && !self.bounds_closed;
        if can_progress {
            self.publish(RunState::Running, blocked);
            return None;
        }

        if in_flight > 0 {
            self.publish(RunState::Draining, None);
            return None;
        }

        tracing::info!(
            campaign_id = %self.campaign.id,
            succeeded = counts.succeeded,
            exhausted = counts.exhausted,
            failed_permanently = counts.failed_permanently,
            "Dispatch loop finished"
        );
        self.events.broadcast(
            &self.campaign.id,
            CampaignEvent::CampaignCompleted {
                campaign_id: self.campaign.id.clone(),
                counts,
                timestamp: Utc::now(),
            },
        );
        self.publish(RunState::Stopped, None);
        Some(RunOutcome::Completed { counts })
    }

    /// Dispatch every due contact that clears the window, worker-pool, and
    /// rate-limit gates. Denied contacts stay due for the next tick.
    fn acquire_due(&self, now: DateTime<Utc>) {
        let batch = {
            let mut queue = self.queue.lock();
            queue.peek_due(now, self.settings.worker_pool_size.max(1) * 2)
        };

        for contact in batch {
            let window = self.campaign.window_for(contact.channel);
            if SendWindowEvaluator::never_eligible(window)
                || !SendWindowEvaluator::is_eligible(window, now)
            {
                continue;
            }

            // Worker slot before rate token: a full pool must not burn
            // through the hour's budget.
            let Ok(permit) = Arc::clone(&self.workers).try_acquire_owned() else {
                break;
            };
            if !self.limiters.try_acquire(contact.channel) {
                continue;
            }

            let task = {
                let mut queue = self.queue.lock();
                queue.mark_dispatching(&contact.contact_id, now)
            };
            if let Some(marked) = task {
                let task = DispatchTask::project(&self.campaign, &marked);
                tracing::debug!(
                    campaign_id = %self.campaign.id,
                    contact_id = %task.contact_id,
                    channel = %task.channel,
                    attempt = task.attempt,
                    "Dispatching contact"
                );
                self.spawn_worker(task, permit);
            }
        }
    }

    /// Spawn one dispatch worker. The semaphore permit travels with it.
    fn spawn_worker(&self, task: DispatchTask, permit: OwnedSemaphorePermit) {
        let queue = Arc::clone(&self.queue);
        let sender = Arc::clone(&self.sender);
        let events = Arc::clone(&self.events);
        let timeout = self.settings.dispatch_timeout;
        let campaign_id = self.campaign.id.clone();

        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, sender.send(&task)).await {
                Ok(outcome) => outcome,
                Err(_) => SendOutcome::TimedOut,
            };

            let now = Utc::now();
            let new_state = {
                let mut queue = queue.lock();
                queue.mark_outcome(&task.contact_id, &outcome, now)
            };

            if let Some(state) = new_state {
                tracing::debug!(
                    campaign_id = %campaign_id,
                    contact_id = %task.contact_id,
                    channel = %task.channel,
                    attempt = task.attempt,
                    state = %state,
                    "Attempt resolved"
                );
                events.broadcast(
                    &campaign_id,
                    CampaignEvent::ContactStateChanged {
                        campaign_id: campaign_id.clone(),
                        contact_id: task.contact_id.clone(),
                        channel: task.channel,
                        state,
                        timestamp: now,
                    },
                );
            }

            drop(permit);
        });
    }

    /// Reap attempts that outlived the dispatch timeout.
    fn reap_stale(&self, now: DateTime<Utc>) {
        let timeout =
            chrono::Duration::from_std(self.settings.dispatch_timeout).unwrap_or(chrono::Duration::MAX);
        let reaped = {
            let mut queue = self.queue.lock();
            queue.reap_stale(now, timeout)
        };
        for contact_id in reaped {
            tracing::warn!(
                campaign_id = %self.campaign.id,
                contact_id = %contact_id,
                "Dispatch exceeded timeout; treated as failed"
            );
        }
    }

    /// Sweep the queue, request best-effort aborts, and stop.
    async fn finalize_cancelled(self) -> RunOutcome {
        let now = Utc::now();
        let (swept, in_flight_ids) = {
            let mut queue = self.queue.lock();
            let swept = queue.cancel_remaining("cancelled", now);
            (swept, queue.in_flight_ids())
        };

        tracing::info!(
            campaign_id = %self.campaign.id,
            swept,
            in_flight = in_flight_ids.len(),
            "Campaign cancelled; sweeping queue"
        );

        // Bounded, best-effort: never block cancellation on the provider.
        for contact_id in in_flight_ids {
            let _ = tokio::time::timeout(
                self.settings.abort_timeout,
                self.sender.abort(&self.campaign.id, &contact_id),
            )
            .await;
        }

        let counts = self.queue.lock().counts();
        self.events.broadcast(
            &self.campaign.id,
            CampaignEvent::CampaignCancelled {
                campaign_id: self.campaign.id.clone(),
                counts,
                timestamp: Utc::now(),
            },
        );
        self.publish(RunState::Stopped, None);
        RunOutcome::Cancelled { counts }
    }

    /// Which blocked reason, if any, applies right now.
    ///
    /// Blocked means: contacts are waiting, but every channel they wait on
    /// has a window that can never admit an instant.
    fn blocked_reason(&self) -> Option<BlockedReason> {
        let channels = self.queue.lock().active_channels();
        if channels.is_empty() {
            return None;
        }
        channels
            .iter()
            .all(|c| SendWindowEvaluator::never_eligible(self.campaign.window_for(*c)))
            .then_some(BlockedReason::NoEligibleDays)
    }

    fn publish(&self, state: RunState, blocked: Option<BlockedReason>) {
        let status = RunStatus { state, blocked };
        if *self.status_tx.borrow() != status {
            let _ = self.status_tx.send(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChannelMode, ContactState, RetryConfig, SendWindow};
    use async_trait::async_trait;
    use std::collections::BTreeSet;

    /// Sender that resolves instantly with a fixed outcome.
    struct FixedSender(SendOutcome);

    #[async_trait]
    impl ChannelSender for FixedSender {
        async fn send(&self, _task: &DispatchTask) -> SendOutcome {
            self.0.clone()
        }
    }

    fn fast_settings() -> SchedulerSettings {
        SchedulerSettings {
            tick_interval: Duration::from_millis(10),
            worker_pool_size: 4,
            dispatch_timeout: Duration::from_secs(5),
            abort_timeout: Duration::from_millis(100),
        }
    }

    fn ready_campaign(mode: ChannelMode) -> Campaign {
        let mut campaign = Campaign::new("engine-test", mode);
        campaign.from_number = "+15550100".to_string();
        campaign.voice_agent_id = Some("agent-v".to_string());
        campaign.text_agent_id = Some("agent-t".to_string());
        campaign.retry = RetryConfig {
            max_retries: 0,
            retry_delay_secs: 0,
        };
        campaign
    }

    fn spawn_run(
        campaign: Campaign,
        contacts: &[&str],
        sender: Arc<dyn ChannelSender>,
    ) -> (
        Arc<Mutex<CampaignContactQueue>>,
        watch::Sender<RunSignal>,
        watch::Receiver<RunStatus>,
        tokio::task::JoinHandle<RunOutcome>,
    ) {
        let mut queue =
            CampaignContactQueue::new(campaign.id.clone(), campaign.channel_mode, campaign.retry);
        queue.enqueue_initial(contacts.iter().copied(), Utc::now());
        let queue = Arc::new(Mutex::new(queue));

        let (signal_tx, signal_rx) = watch::channel(RunSignal::Run);
        let events = Arc::new(EventBus::new());
        let (engine, status_rx) = DispatchScheduler::new(
            campaign,
            Arc::clone(&queue),
            sender,
            events,
            fast_settings(),
            signal_rx,
        );
        let handle = tokio::spawn(engine.run());
        (queue, signal_tx, status_rx, handle)
    }

    #[tokio::test]
    async fn test_drains_all_contacts_on_success() {
        let (queue, _signal, _status, handle) = spawn_run(
            ready_campaign(ChannelMode::Voice),
            &["a", "b", "c"],
            Arc::new(FixedSender(SendOutcome::Delivered)),
        );

        let outcome = handle.await.unwrap();
        match outcome {
            RunOutcome::Completed { counts } => {
                assert_eq!(counts.succeeded, 3);
                assert_eq!(counts.total(), 3);
            }
            RunOutcome::Cancelled { .. } => panic!("run should complete naturally"),
        }
        assert!(queue.lock().is_drained());
    }

    #[tokio::test]
    async fn test_failures_exhaust_without_fallback() {
        let (queue, _signal, _status, handle) = spawn_run(
            ready_campaign(ChannelMode::Voice),
            &["a"],
            Arc::new(FixedSender(SendOutcome::Failed("no answer".to_string()))),
        );

        match handle.await.unwrap() {
            RunOutcome::Completed { counts } => assert_eq!(counts.exhausted, 1),
            RunOutcome::Cancelled { .. } => panic!("run should complete naturally"),
        }
        assert_eq!(
            queue.lock().get("a").unwrap().last_error.as_deref(),
            Some("no answer")
        );
    }

    #[tokio::test]
    async fn test_fallback_chain_runs_to_failed_permanently() {
        let (queue, _signal, _status, handle) = spawn_run(
            ready_campaign(ChannelMode::VoiceWithSmsFallback),
            &["a"],
            Arc::new(FixedSender(SendOutcome::Failed("unreachable".to_string()))),
        );

        match handle.await.unwrap() {
            RunOutcome::Completed { counts } => {
                assert_eq!(counts.failed_permanently, 1);
                assert_eq!(counts.exhausted, 0);
            }
            RunOutcome::Cancelled { .. } => panic!("run should complete naturally"),
        }
        // Ended on the SMS channel, having fallen back exactly once.
        assert_eq!(queue.lock().get("a").unwrap().channel, crate::domain::Channel::Sms);
    }

    #[tokio::test]
    async fn test_never_eligible_window_surfaces_blocked() {
        let mut campaign = ready_campaign(ChannelMode::Voice);
        campaign.send_window = SendWindow {
            enabled: true,
            start_time: chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: chrono::NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            days: BTreeSet::new(),
            timezone: "UTC".to_string(),
        };

        let (queue, signal, status, handle) = spawn_run(
            campaign,
            &["a"],
            Arc::new(FixedSender(SendOutcome::Delivered)),
        );

        // Give the loop a few ticks; nothing must dispatch and the blocked
        // reason must be published.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(queue.lock().counts().succeeded, 0);
        assert_eq!(status.borrow().blocked, Some(BlockedReason::NoEligibleDays));

        signal.send(RunSignal::Cancel).unwrap();
        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, RunOutcome::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_cancel_sweeps_and_reports() {
        let mut campaign = ready_campaign(ChannelMode::Voice);
        // Future start bound keeps everything pending.
        campaign.scheduled_start = Some(Utc::now() + chrono::Duration::hours(1));

        let (queue, signal, _status, handle) = spawn_run(
            campaign,
            &["a", "b", "c"],
            Arc::new(FixedSender(SendOutcome::Delivered)),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.lock().counts().pending, 3, "start bound defers dispatch");

        signal.send(RunSignal::Cancel).unwrap();
        match handle.await.unwrap() {
            RunOutcome::Cancelled { counts } => {
                assert_eq!(counts.failed_permanently, 3);
            }
            RunOutcome::Completed { .. } => panic!("cancelled run must not complete"),
        }
    }

    #[tokio::test]
    async fn test_end_bound_completes_without_dispatching() {
        let mut campaign = ready_campaign(ChannelMode::Voice);
        campaign.scheduled_end = Some(Utc::now() - chrono::Duration::minutes(1));

        let (queue, _signal, _status, handle) = spawn_run(
            campaign,
            &["a", "b"],
            Arc::new(FixedSender(SendOutcome::Delivered)),
        );

        match handle.await.unwrap() {
            RunOutcome::Completed { counts } => {
                assert_eq!(counts.succeeded, 0);
                assert_eq!(counts.pending, 2, "leftover contacts stay visible");
            }
            RunOutcome::Cancelled { .. } => panic!("expected natural completion"),
        }
        assert_eq!(queue.lock().get("a").unwrap().state, ContactState::Pending);
    }
}
