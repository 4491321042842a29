//! Campaign lifecycle event streaming.
//!
//! Pub/sub infrastructure for streaming campaign events to dashboard clients
//! and the analytics consumer. Each campaign gets its own broadcast channel;
//! the terminal [`CampaignEvent::CampaignCompleted`] event carries the final
//! per-contact outcome counts that post-campaign reporting consumes.
//!
//! If a subscriber falls behind by more than the channel capacity, older
//! events are dropped and the subscriber sees a lag error; events are
//! ephemeral, the queue itself is the source of truth.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::domain::{Channel, ContactState, StateCounts};

/// Channel capacity for campaign events.
const CHANNEL_CAPACITY: usize = 256;

/// Campaign lifecycle events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignEvent {
    /// A run began with the given number of enqueued contacts.
    CampaignStarted {
        campaign_id: String,
        contact_count: usize,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },

    /// The run was paused; in-flight attempts keep resolving.
    CampaignPaused {
        campaign_id: String,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },

    /// The run resumed from pause.
    CampaignResumed {
        campaign_id: String,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },

    /// The run was cancelled; remaining contacts were swept.
    CampaignCancelled {
        campaign_id: String,
        counts: StateCounts,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },

    /// One contact's attempt resolved into a new state.
    ContactStateChanged {
        campaign_id: String,
        contact_id: String,
        channel: Channel,
        state: ContactState,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },

    /// Terminal: the queue drained. Consumed by analytics/reporting.
    CampaignCompleted {
        campaign_id: String,
        counts: StateCounts,
        #[serde(with = "chrono::serde::ts_seconds")]
        timestamp: DateTime<Utc>,
    },
}

impl CampaignEvent {
    /// The campaign this event belongs to.
    #[must_use]
    pub fn campaign_id(&self) -> &str {
        match self {
            Self::CampaignStarted { campaign_id, .. }
            | Self::CampaignPaused { campaign_id, .. }
            | Self::CampaignResumed { campaign_id, .. }
            | Self::CampaignCancelled { campaign_id, .. }
            | Self::ContactStateChanged { campaign_id, .. }
            | Self::CampaignCompleted { campaign_id, .. } => campaign_id,
        }
    }

    /// Whether this event ends the campaign's event stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CampaignCompleted { .. } | Self::CampaignCancelled { .. }
        )
    }
}

/// Per-campaign broadcast bus.
///
/// Channels are created on first use and can be cleaned up once a campaign's
/// terminal event has been consumed. `parking_lot::RwLock` guards the channel
/// registry; the channels themselves are `tokio::sync::broadcast`.
#[derive(Debug, Clone)]
pub struct EventBus {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<CampaignEvent>>>>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Subscribe to all future events for a campaign.
    pub fn subscribe(&self, campaign_id: &str) -> broadcast::Receiver<CampaignEvent> {
        let mut channels = self.channels.write();
        let sender = channels.entry(campaign_id.to_string()).or_insert_with(|| {
            let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
            tx
        });
        sender.subscribe()
    }

    /// Broadcast an event to a campaign's subscribers.
    ///
    /// Returns the number of subscribers that received it. Broadcasting with
    /// no subscribers still creates the channel so later subscribers see
    /// future events.
    pub fn broadcast(&self, campaign_id: &str, event: CampaignEvent) -> usize {
        {
            let channels = self.channels.read();
            if let Some(sender) = channels.get(campaign_id) {
                let receivers = sender.receiver_count();
                let _ = sender.send(event);
                return receivers;
            }
        }

        let mut channels = self.channels.write();
        let sender = channels.entry(campaign_id.to_string()).or_insert_with(|| {
            let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
            tx
        });
        let _ = sender.send(event);
        0
    }

    /// Drop the channel for a finished campaign. Subscribers see `Closed`.
    pub fn cleanup(&self, campaign_id: &str) {
        self.channels.write().remove(campaign_id);
    }

    /// Number of live campaign channels.
    #[must_use]
    pub fn active_channels(&self) -> usize {
        self.channels.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(campaign_id: &str) -> CampaignEvent {
        CampaignEvent::CampaignStarted {
            campaign_id: campaign_id.to_string(),
            contact_count: 1,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe("camp-1");
        let mut rx2 = bus.subscribe("camp-1");

        assert_eq!(bus.broadcast("camp-1", started("camp-1")), 2);
        assert_eq!(rx1.recv().await.unwrap().campaign_id(), "camp-1");
        assert_eq!(rx2.recv().await.unwrap().campaign_id(), "camp-1");
    }

    #[tokio::test]
    async fn test_campaign_channels_are_isolated() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe("camp-1");
        let _rx2 = bus.subscribe("camp-2");

        bus.broadcast("camp-1", started("camp-1"));
        let event = rx1.recv().await.unwrap();
        assert_eq!(event.campaign_id(), "camp-1");
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_keeps_channel() {
        let bus = EventBus::new();
        assert_eq!(bus.broadcast("camp-1", started("camp-1")), 0);
        assert_eq!(bus.active_channels(), 1);

        // Later subscribers receive only future events.
        let mut rx = bus.subscribe("camp-1");
        bus.broadcast("camp-1", started("camp-1"));
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_closes_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("camp-1");
        bus.cleanup("camp-1");

        assert_eq!(bus.active_channels(), 0);
        assert!(rx.recv().await.is_err());
    }

    #[test]
    fn test_terminal_events() {
        let completed = CampaignEvent::CampaignCompleted {
            campaign_id: "camp-1".to_string(),
            counts: StateCounts::default(),
            timestamp: Utc::now(),
        };
        assert!(completed.is_terminal());
        assert!(!started("camp-1").is_terminal());
    }
}
