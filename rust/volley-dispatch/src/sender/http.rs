//! HTTP forwarding channel sender.
//!
//! Posts dispatch payloads to configured per-channel provider endpoints.
//! This is deployment plumbing, not provider logic: whatever service sits
//! behind the endpoint owns dialing, SMS delivery, and the AI conversation.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::SenderConfig;
use crate::domain::{Channel, DispatchTask};

use super::{ChannelSender, SendOutcome};

/// Channel sender that forwards dispatch requests over HTTP.
#[derive(Debug, Clone)]
pub struct HttpChannelSender {
    client: reqwest::Client,
    voice_endpoint: Option<String>,
    sms_endpoint: Option<String>,
}

/// Abort request body posted on campaign cancellation.
#[derive(Debug, Serialize)]
struct AbortRequest<'a> {
    campaign_id: &'a str,
    contact_id: &'a str,
}

impl HttpChannelSender {
    /// Build a sender from configuration.
    pub fn new(config: &SenderConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            voice_endpoint: config.voice_endpoint.clone(),
            sms_endpoint: config.sms_endpoint.clone(),
        })
    }

    /// Whether at least one channel endpoint is configured.
    #[must_use]
    pub fn has_endpoints(&self) -> bool {
        self.voice_endpoint.is_some() || self.sms_endpoint.is_some()
    }

    fn endpoint_for(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Voice => self.voice_endpoint.as_deref(),
            Channel::Sms => self.sms_endpoint.as_deref(),
        }
    }
}

#[async_trait]
impl ChannelSender for HttpChannelSender {
    async fn send(&self, task: &DispatchTask) -> SendOutcome {
        let Some(endpoint) = self.endpoint_for(task.channel) else {
            return SendOutcome::Failed(format!(
                "no provider endpoint configured for channel {}",
                task.channel
            ));
        };

        match self.client.post(endpoint).json(task).send().await {
            Ok(response) if response.status().is_success() => SendOutcome::Delivered,
            Ok(response) => SendOutcome::Failed(format!(
                "provider returned {} for {}",
                response.status(),
                task.channel
            )),
            Err(e) if e.is_timeout() => SendOutcome::TimedOut,
            Err(e) => SendOutcome::Failed(e.to_string()),
        }
    }

    async fn abort(&self, campaign_id: &str, contact_id: &str) {
        // Fire-and-forget; cancellation never blocks on the provider.
        for endpoint in [self.voice_endpoint.as_deref(), self.sms_endpoint.as_deref()]
            .into_iter()
            .flatten()
        {
            let url = format!("{}/abort", endpoint.trim_end_matches('/'));
            let body = AbortRequest {
                campaign_id,
                contact_id,
            };
            if let Err(e) = self.client.post(&url).json(&body).send().await {
                tracing::debug!(
                    campaign_id,
                    contact_id,
                    error = %e,
                    "Abort request failed (ignored)"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_without_endpoint_is_failure_not_panic() {
        let sender = HttpChannelSender::new(&SenderConfig::default()).unwrap();
        assert!(!sender.has_endpoints());

        let task = DispatchTask {
            campaign_id: "camp-1".to_string(),
            contact_id: "c-1".to_string(),
            channel: Channel::Voice,
            agent_id: "agent-v".to_string(),
            from_number: "+15550100".to_string(),
            attempt: 1,
        };

        match sender.send(&task).await {
            SendOutcome::Failed(reason) => assert!(reason.contains("voice")),
            other => panic!("Expected Failed, got {other:?}"),
        }
    }
}
