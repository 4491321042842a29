//! Campaign run lifecycle management.
//!
//! The [`CampaignRunController`] owns the arena of campaign runs indexed by
//! campaign id and is the only component that mutates `Campaign.status`. Each
//! started campaign gets its own queue, rate limiters, and engine task;
//! campaigns share nothing, so one campaign's load or pause state never
//! affects another's.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;

use crate::domain::{
    Campaign, CampaignContact, CampaignId, CampaignStatus, ContactId, StateCounts,
};
use crate::error::{DispatchError, DispatchResult};
use crate::events::{CampaignEvent, EventBus};
use crate::sender::ChannelSender;

use super::engine::{
    DispatchScheduler, RunOutcome, RunSignal, RunState, RunStatus, SchedulerSettings,
};
use super::queue::CampaignContactQueue;

/// Handle to one live (or finished) engine task.
struct CampaignRun {
    signal: watch::Sender<RunSignal>,
    status_rx: watch::Receiver<RunStatus>,
}

/// Aggregate status report for dashboard polling.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignStatusReport {
    /// Campaign id.
    pub campaign_id: CampaignId,
    /// Lifecycle status.
    pub status: CampaignStatus,
    /// Engine loop state, if a run was ever started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_state: Option<RunState>,
    /// Why the run is permanently stalled, if it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<String>,
    /// Contact counts by state. Distinguishes `exhausted` and
    /// `failed_permanently` from `succeeded`, so partial failure is visible
    /// without per-contact drill-down.
    pub counts: StateCounts,
}

/// Owns campaign lifecycle state and the per-campaign engine tasks.
pub struct CampaignRunController {
    campaigns: Arc<RwLock<HashMap<CampaignId, Campaign>>>,
    queues: RwLock<HashMap<CampaignId, Arc<Mutex<CampaignContactQueue>>>>,
    runs: RwLock<HashMap<CampaignId, CampaignRun>>,
    sender: Arc<dyn ChannelSender>,
    events: Arc<EventBus>,
    settings: SchedulerSettings,
}

impl std::fmt::Debug for CampaignRunController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CampaignRunController")
            .field("campaigns", &self.campaigns.read().len())
            .field("runs", &self.runs.read().len())
            .finish_non_exhaustive()
    }
}

impl CampaignRunController {
    /// Create a controller dispatching through the given channel sender.
    pub fn new(
        sender: Arc<dyn ChannelSender>,
        events: Arc<EventBus>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            campaigns: Arc::new(RwLock::new(HashMap::new())),
            queues: RwLock::new(HashMap::new()),
            runs: RwLock::new(HashMap::new()),
            sender,
            events,
            settings,
        }
    }

    /// Register a campaign delivered by the configuration surface.
    ///
    /// Configuration problems are rejected here and again at `start`; they
    /// are never surfaced as per-contact failures mid-run.
    pub fn register(&self, mut campaign: Campaign) -> DispatchResult<Campaign> {
        campaign.validate().map_err(DispatchError::Validation)?;

        campaign.status = if campaign.scheduled_start.is_some_and(|start| start > Utc::now()) {
            CampaignStatus::Scheduled
        } else {
            CampaignStatus::Draft
        };
        campaign.updated_at = Utc::now();

        self.campaigns
            .write()
            .insert(campaign.id.clone(), campaign.clone());
        tracing::info!(campaign_id = %campaign.id, name = %campaign.name, "Campaign registered");
        Ok(campaign)
    }

    /// List all registered campaigns.
    pub fn list(&self) -> Vec<Campaign> {
        self.campaigns.read().values().cloned().collect()
    }

    /// Look up a campaign by id.
    pub fn get(&self, campaign_id: &str) -> DispatchResult<Campaign> {
        self.campaigns
            .read()
            .get(campaign_id)
            .cloned()
            .ok_or_else(|| DispatchError::CampaignNotFound(campaign_id.to_string()))
    }

    /// Add contacts to a campaign.
    ///
    /// Idempotent: re-adding an existing contact is a no-op. CampaignContact
    /// records are created here, whether or not the run has started. Returns
    /// the number of contacts actually added.
    pub fn add_contacts<I, S>(&self, campaign_id: &str, contact_ids: I) -> DispatchResult<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<ContactId>,
    {
        let campaign = self.get(campaign_id)?;
        if campaign.status.is_terminal() {
            return Err(DispatchError::InvalidTransition {
                from: campaign.status,
                to: campaign.status,
            });
        }

        let queue = self.queue_for(&campaign);
        let added = queue.lock().enqueue_initial(contact_ids, Utc::now());
        tracing::debug!(campaign_id, added, "Contacts enqueued");
        Ok(added)
    }

    /// Start a campaign run. Rejects unless status is `draft` or `scheduled`.
    pub fn start(&self, campaign_id: &str) -> DispatchResult<()> {
        let campaign = {
            let mut campaigns = self.campaigns.write();
            let campaign = campaigns
                .get_mut(campaign_id)
                .ok_or_else(|| DispatchError::CampaignNotFound(campaign_id.to_string()))?;

            if !campaign.status.can_start() {
                return Err(DispatchError::InvalidTransition {
                    from: campaign.status,
                    to: CampaignStatus::Running,
                });
            }
            campaign.validate().map_err(DispatchError::Validation)?;

            campaign.status = CampaignStatus::Running;
            campaign.updated_at = Utc::now();
            campaign.clone()
        };

        let queue = self.queue_for(&campaign);
        let contact_count = queue.lock().len();

        let (signal_tx, signal_rx) = watch::channel(RunSignal::Run);
        let (engine, status_rx) = DispatchScheduler::new(
            campaign.clone(),
            Arc::clone(&queue),
            Arc::clone(&self.sender),
            Arc::clone(&self.events),
            self.settings,
            signal_rx,
        );

        self.runs.write().insert(
            campaign.id.clone(),
            CampaignRun {
                signal: signal_tx,
                status_rx,
            },
        );

        self.events.broadcast(
            &campaign.id,
            CampaignEvent::CampaignStarted {
                campaign_id: campaign.id.clone(),
                contact_count,
                timestamp: Utc::now(),
            },
        );

        // The engine task is fully independent; the controller only records
        // the terminal status once the run returns.
        let campaigns = self.campaigns_handle();
        let campaign_id_owned = campaign.id.clone();
        tokio::spawn(async move {
            let outcome = engine.run().await;
            let mut campaigns = campaigns.write();
            if let Some(campaign) = campaigns.get_mut(&campaign_id_owned) {
                match outcome {
                    RunOutcome::Completed { .. } => {
                        if campaign.status == CampaignStatus::Running {
                            campaign.status = CampaignStatus::Completed;
                            campaign.updated_at = Utc::now();
                        }
                    }
                    RunOutcome::Cancelled { .. } => {
                        // Status was already set by cancel().
                    }
                }
            }
        });

        tracing::info!(campaign_id, contact_count, "Campaign started");
        Ok(())
    }

    /// Pause a running campaign. In-flight attempts complete; no new
    /// dispatches are acquired until resumed. Idempotent.
    pub fn pause(&self, campaign_id: &str) -> DispatchResult<()> {
        if !self.transition(campaign_id, CampaignStatus::Running, CampaignStatus::Paused)? {
            return Ok(());
        }
        self.signal(campaign_id, RunSignal::Pause);
        self.events.broadcast(
            campaign_id,
            CampaignEvent::CampaignPaused {
                campaign_id: campaign_id.to_string(),
                timestamp: Utc::now(),
            },
        );
        tracing::info!(campaign_id, "Campaign paused");
        Ok(())
    }

    /// Resume a paused campaign. Idempotent.
    pub fn resume(&self, campaign_id: &str) -> DispatchResult<()> {
        if !self.transition(campaign_id, CampaignStatus::Paused, CampaignStatus::Running)? {
            return Ok(());
        }
        self.signal(campaign_id, RunSignal::Run);
        self.events.broadcast(
            campaign_id,
            CampaignEvent::CampaignResumed {
                campaign_id: campaign_id.to_string(),
                timestamp: Utc::now(),
            },
        );
        tracing::info!(campaign_id, "Campaign resumed");
        Ok(())
    }

    /// Cancel a campaign. Valid from any non-terminal status; terminal,
    /// irreversible, and idempotent.
    ///
    /// Remaining re-dispatchable contacts become `failed_permanently` with
    /// reason `cancelled`; in-flight attempts are asked to abort but resolve
    /// naturally.
    pub fn cancel(&self, campaign_id: &str) -> DispatchResult<()> {
        {
            let mut campaigns = self.campaigns.write();
            let campaign = campaigns
                .get_mut(campaign_id)
                .ok_or_else(|| DispatchError::CampaignNotFound(campaign_id.to_string()))?;
            if campaign.status == CampaignStatus::Cancelled {
                return Ok(());
            }
            if campaign.status.is_terminal() {
                return Err(DispatchError::InvalidTransition {
                    from: campaign.status,
                    to: CampaignStatus::Cancelled,
                });
            }
            campaign.status = CampaignStatus::Cancelled;
            campaign.updated_at = Utc::now();
        }

        if self.runs.read().contains_key(campaign_id) {
            // The engine sweeps the queue and emits the cancelled event.
            self.signal(campaign_id, RunSignal::Cancel);
        } else {
            // Never started: sweep whatever contacts were staged.
            if let Some(queue) = self.queues.read().get(campaign_id) {
                queue.lock().cancel_remaining("cancelled", Utc::now());
            }
            self.events.broadcast(
                campaign_id,
                CampaignEvent::CampaignCancelled {
                    campaign_id: campaign_id.to_string(),
                    counts: self.counts_for(campaign_id),
                    timestamp: Utc::now(),
                },
            );
        }

        tracing::info!(campaign_id, "Campaign cancelled");
        Ok(())
    }

    /// Aggregate status for dashboard polling.
    pub fn status(&self, campaign_id: &str) -> DispatchResult<CampaignStatusReport> {
        let campaign = self.get(campaign_id)?;

        let (run_state, blocked) = self.runs.read().get(campaign_id).map_or((None, None), |run| {
            let status = *run.status_rx.borrow();
            (Some(status.state), status.blocked.map(|b| b.to_string()))
        });

        Ok(CampaignStatusReport {
            campaign_id: campaign.id,
            status: campaign.status,
            run_state,
            blocked,
            counts: self.counts_for(campaign_id),
        })
    }

    /// Per-contact drill-down for dashboard detail views.
    pub fn contact(&self, campaign_id: &str, contact_id: &str) -> DispatchResult<CampaignContact> {
        self.get(campaign_id)?;
        self.queues
            .read()
            .get(campaign_id)
            .and_then(|queue| queue.lock().get(contact_id))
            .ok_or_else(|| DispatchError::ContactNotFound {
                campaign_id: campaign_id.to_string(),
                contact_id: contact_id.to_string(),
            })
    }

    fn counts_for(&self, campaign_id: &str) -> StateCounts {
        self.queues
            .read()
            .get(campaign_id)
            .map(|queue| queue.lock().counts())
            .unwrap_or_default()
    }

    /// Get or lazily create the contact queue for a campaign.
    fn queue_for(&self, campaign: &Campaign) -> Arc<Mutex<CampaignContactQueue>> {
        if let Some(queue) = self.queues.read().get(&campaign.id) {
            return Arc::clone(queue);
        }
        let mut queues = self.queues.write();
        Arc::clone(queues.entry(campaign.id.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(CampaignContactQueue::new(
                campaign.id.clone(),
                campaign.channel_mode,
                campaign.retry,
            )))
        }))
    }

    /// Enforce a `from -> to` status transition.
    ///
    /// Returns `false` without touching anything when the campaign is
    /// already in the target status (idempotent repeat).
    fn transition(
        &self,
        campaign_id: &str,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> DispatchResult<bool> {
        let mut campaigns = self.campaigns.write();
        let campaign = campaigns
            .get_mut(campaign_id)
            .ok_or_else(|| DispatchError::CampaignNotFound(campaign_id.to_string()))?;
        if campaign.status == to {
            return Ok(false);
        }
        if campaign.status != from {
            return Err(DispatchError::InvalidTransition {
                from: campaign.status,
                to,
            });
        }
        campaign.status = to;
        campaign.updated_at = Utc::now();
        Ok(true)
    }

    fn signal(&self, campaign_id: &str, signal: RunSignal) {
        if let Some(run) = self.runs.read().get(campaign_id) {
            let _ = run.signal.send(signal);
        }
    }

    /// Shared handle to the campaign map for the run-completion hook.
    fn campaigns_handle(&self) -> Arc<RwLock<HashMap<CampaignId, Campaign>>> {
        Arc::clone(&self.campaigns)
    }
}
