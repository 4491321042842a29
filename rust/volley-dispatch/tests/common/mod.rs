//! Shared test helpers: a scripted in-memory channel sender and campaign
//! builders with fast timings.

#![allow(dead_code, reason = "each test binary uses a subset of these helpers")]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use volley_dispatch::domain::{Campaign, ChannelMode, DispatchTask, RateLimitConfig, RetryConfig};
use volley_dispatch::events::EventBus;
use volley_dispatch::scheduler::{CampaignRunController, SchedulerSettings};
use volley_dispatch::sender::{ChannelSender, SendOutcome};

/// Sender whose outcomes are scripted per contact.
///
/// Unscripted sends deliver successfully. Each scripted outcome is consumed
/// once, in order, so "fail twice then succeed" is a three-entry script.
#[derive(Default)]
pub struct ScriptedSender {
    scripts: Mutex<HashMap<String, VecDeque<SendOutcome>>>,
    calls: Mutex<Vec<DispatchTask>>,
    aborted: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A sender whose every attempt takes `delay` to resolve.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    /// Script the outcomes of a contact's next attempts.
    pub fn script<I>(&self, contact_id: &str, outcomes: I)
    where
        I: IntoIterator<Item = SendOutcome>,
    {
        self.scripts
            .lock()
            .entry(contact_id.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// All attempts made so far.
    pub fn calls(&self) -> Vec<DispatchTask> {
        self.calls.lock().clone()
    }

    /// Attempts made for one contact.
    pub fn calls_for(&self, contact_id: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|t| t.contact_id == contact_id)
            .count()
    }

    /// Contacts the scheduler asked to abort.
    pub fn aborted(&self) -> Vec<String> {
        self.aborted.lock().clone()
    }
}

#[async_trait]
impl ChannelSender for ScriptedSender {
    async fn send(&self, task: &DispatchTask) -> SendOutcome {
        self.calls.lock().push(task.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.scripts
            .lock()
            .get_mut(&task.contact_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(SendOutcome::Delivered)
    }

    async fn abort(&self, _campaign_id: &str, contact_id: &str) {
        self.aborted.lock().push(contact_id.to_string());
    }
}

/// Scheduler settings tightened for tests.
pub fn fast_settings() -> SchedulerSettings {
    SchedulerSettings {
        tick_interval: Duration::from_millis(10),
        worker_pool_size: 4,
        dispatch_timeout: Duration::from_secs(5),
        abort_timeout: Duration::from_millis(200),
    }
}

/// Controller wired to the given sender with fast settings.
pub fn controller_with(sender: Arc<dyn ChannelSender>) -> Arc<CampaignRunController> {
    Arc::new(CampaignRunController::new(
        sender,
        Arc::new(EventBus::new()),
        fast_settings(),
    ))
}

/// Controller plus a shared event bus.
pub fn controller_with_events(
    sender: Arc<dyn ChannelSender>,
) -> (Arc<CampaignRunController>, Arc<EventBus>) {
    let events = Arc::new(EventBus::new());
    let controller = Arc::new(CampaignRunController::new(
        sender,
        Arc::clone(&events),
        fast_settings(),
    ));
    (controller, events)
}

/// A valid campaign with an always-open window, generous rate limit, and
/// immediate retries.
pub fn quick_campaign(mode: ChannelMode, max_retries: u32) -> Campaign {
    let mut campaign = Campaign::new("test campaign", mode);
    campaign.from_number = "+15550100".to_string();
    campaign.voice_agent_id = Some("agent-voice".to_string());
    campaign.text_agent_id = Some("agent-text".to_string());
    campaign.rate_limit = RateLimitConfig {
        messages_per_hour: 1000,
    };
    campaign.retry = RetryConfig {
        max_retries,
        retry_delay_secs: 0,
    };
    campaign
}

/// Poll until the condition holds or the timeout elapses.
pub async fn wait_until<F>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
