//! Campaign configuration and lifecycle status.
//!
//! A [`Campaign`] is the immutable configuration handed to the scheduler at
//! start time: channel mode, sending window(s), rate limit(s), retry policy,
//! agent references, and optional absolute start/end bounds. The controller
//! is the only component that mutates [`Campaign::status`].

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Campaign identifier (UUID string).
pub type CampaignId = String;

/// Outbound channel for a single dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// AI voice call.
    Voice,
    /// Text message.
    Sms,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Voice => write!(f, "voice"),
            Self::Sms => write!(f, "sms"),
        }
    }
}

/// Channel mode configured on a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    /// Voice calls only.
    Voice,
    /// Text messages only.
    Sms,
    /// Voice calls, converting each exhausted contact to one SMS attempt chain.
    VoiceWithSmsFallback,
}

impl ChannelMode {
    /// Channel every contact starts on under this mode.
    #[must_use]
    pub const fn initial_channel(&self) -> Channel {
        match self {
            Self::Voice | Self::VoiceWithSmsFallback => Channel::Voice,
            Self::Sms => Channel::Sms,
        }
    }

    /// Whether the mode can ever dispatch on the given channel.
    #[must_use]
    pub const fn uses_channel(&self, channel: Channel) -> bool {
        match self {
            Self::Voice => matches!(channel, Channel::Voice),
            Self::Sms => matches!(channel, Channel::Sms),
            Self::VoiceWithSmsFallback => true,
        }
    }
}

impl std::fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Voice => write!(f, "voice"),
            Self::Sms => write!(f, "sms"),
            Self::VoiceWithSmsFallback => write!(f, "voice_with_sms_fallback"),
        }
    }
}

impl FromStr for ChannelMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "voice" => Ok(Self::Voice),
            "sms" => Ok(Self::Sms),
            "voice_with_sms_fallback" => Ok(Self::VoiceWithSmsFallback),
            _ => Err(format!("Unknown channel mode: {s}")),
        }
    }
}

/// Campaign lifecycle status.
///
/// Transitions are monotonic except `Running ⇄ Paused`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    /// Created but not yet started.
    Draft,
    /// Accepted with a future start bound.
    Scheduled,
    /// Dispatch loop active.
    Running,
    /// Dispatch loop held; in-flight attempts complete.
    Paused,
    /// Queue drained.
    Completed,
    /// Stopped by an unrecoverable fault.
    Failed,
    /// Cancelled by the dashboard; terminal.
    Cancelled,
}

impl CampaignStatus {
    /// Whether the status admits no further transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `start` is legal from this status.
    #[must_use]
    pub const fn can_start(&self) -> bool {
        matches!(self, Self::Draft | Self::Scheduled)
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Recurring local-time sending window.
///
/// Weekdays are numbered 0–6 with Sunday = 0, matching the configuration
/// surface. When disabled, every instant is eligible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendWindow {
    /// Whether the window restricts sending at all.
    pub enabled: bool,
    /// Local start of the window (inclusive).
    pub start_time: NaiveTime,
    /// Local end of the window (exclusive). Must be after `start_time`.
    pub end_time: NaiveTime,
    /// Allowed weekdays, 0–6 with Sunday = 0. Empty means never eligible.
    pub days: BTreeSet<u8>,
    /// IANA timezone name, e.g. `America/New_York`.
    pub timezone: String,
}

impl SendWindow {
    /// A disabled window: every instant is eligible.
    #[must_use]
    pub fn always_open() -> Self {
        Self {
            enabled: false,
            start_time: NaiveTime::MIN,
            end_time: NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN),
            days: (0..7).collect(),
            timezone: "UTC".to_string(),
        }
    }

    /// Resolve the configured IANA timezone.
    pub fn tz(&self) -> Result<Tz, String> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| format!("Unknown IANA timezone: {}", self.timezone))
    }

    /// Validate the window configuration.
    ///
    /// An empty day set on an enabled window is valid (the scheduler surfaces
    /// it as a blocked run rather than rejecting it); overnight wraparound and
    /// unknown timezones are not.
    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if self.start_time >= self.end_time {
            return Err(format!(
                "Send window start_time {} must be before end_time {} (no overnight wraparound)",
                self.start_time, self.end_time
            ));
        }
        if let Some(day) = self.days.iter().find(|d| **d > 6) {
            return Err(format!("Send window weekday {day} out of range 0-6"));
        }
        self.tz().map(|_| ())
    }
}

/// Per-channel throughput ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum dispatches per hour on one channel of one campaign.
    pub messages_per_hour: u32,
}

impl RateLimitConfig {
    /// Validate the rate limit configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.messages_per_hour == 0 {
            return Err("messages_per_hour must be positive".to_string());
        }
        Ok(())
    }
}

/// Retry policy configuration: bounded attempts with a flat delay.
///
/// The configuration surface exposes a single delay number; there is
/// deliberately no backoff multiplier here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries allowed after the initial attempt (0 = no retries).
    pub max_retries: u32,
    /// Flat delay between a failure and the next attempt, in seconds.
    pub retry_delay_secs: u64,
}

impl RetryConfig {
    /// The flat retry delay as a duration.
    #[must_use]
    pub fn delay(&self) -> chrono::Duration {
        i64::try_from(self.retry_delay_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

/// A configured outbound campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    /// Unique campaign ID.
    pub id: CampaignId,
    /// Display name.
    pub name: String,
    /// Channel mode.
    pub channel_mode: ChannelMode,
    /// Lifecycle status. Mutated only by the run controller.
    pub status: CampaignStatus,
    /// Sending window for the primary channel.
    pub send_window: SendWindow,
    /// Independent sending window for SMS fallback attempts, if configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sms_send_window: Option<SendWindow>,
    /// Rate limit for the primary channel.
    pub rate_limit: RateLimitConfig,
    /// Independent SMS rate limit, if configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sms_rate_limit: Option<RateLimitConfig>,
    /// Retry policy.
    pub retry: RetryConfig,
    /// Opaque voice agent reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_agent_id: Option<String>,
    /// Opaque text agent reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_agent_id: Option<String>,
    /// Caller/sender number reference.
    pub from_number: String,
    /// Absolute earliest dispatch instant, if bounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_start: Option<DateTime<Utc>>,
    /// Absolute latest dispatch instant, if bounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_end: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Create a new draft campaign with the given configuration.
    #[must_use]
    pub fn new(name: impl Into<String>, channel_mode: ChannelMode) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            channel_mode,
            status: CampaignStatus::Draft,
            send_window: SendWindow::always_open(),
            sms_send_window: None,
            rate_limit: RateLimitConfig {
                messages_per_hour: 60,
            },
            sms_rate_limit: None,
            retry: RetryConfig {
                max_retries: 0,
                retry_delay_secs: 600,
            },
            voice_agent_id: None,
            text_agent_id: None,
            from_number: String::new(),
            scheduled_start: None,
            scheduled_end: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The sending window governing the given channel.
    ///
    /// SMS fallback attempts use the independent SMS window when one is
    /// configured; otherwise they share the primary window.
    #[must_use]
    pub fn window_for(&self, channel: Channel) -> &SendWindow {
        match channel {
            Channel::Sms => self.sms_send_window.as_ref().unwrap_or(&self.send_window),
            Channel::Voice => &self.send_window,
        }
    }

    /// The rate limit governing the given channel.
    #[must_use]
    pub fn rate_limit_for(&self, channel: Channel) -> RateLimitConfig {
        match channel {
            Channel::Sms => self.sms_rate_limit.unwrap_or(self.rate_limit),
            Channel::Voice => self.rate_limit,
        }
    }

    /// The agent reference attached for the given channel.
    #[must_use]
    pub fn agent_for(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Voice => self.voice_agent_id.as_deref(),
            Channel::Sms => self.text_agent_id.as_deref(),
        }
    }

    /// Whether the instant lies within the absolute `[start, end]` bounds.
    ///
    /// The absolute bounds and the recurring window are conjunctive: both
    /// must be satisfied for a dispatch to be permitted.
    #[must_use]
    pub fn within_bounds(&self, instant: DateTime<Utc>) -> bool {
        if let Some(start) = self.scheduled_start {
            if instant < start {
                return false;
            }
        }
        if let Some(end) = self.scheduled_end {
            if instant > end {
                return false;
            }
        }
        true
    }

    /// Whether the absolute end bound has passed.
    #[must_use]
    pub fn ended(&self, instant: DateTime<Utc>) -> bool {
        self.scheduled_end.is_some_and(|end| instant > end)
    }

    /// Validate the campaign configuration before a run starts.
    ///
    /// Malformed configuration is fatal here, never a per-contact failure
    /// mid-run.
    pub fn validate(&self) -> Result<(), String> {
        let mut problems = Vec::new();

        if self.from_number.trim().is_empty() {
            problems.push("from_number is required".to_string());
        }

        if let Err(e) = self.send_window.validate() {
            problems.push(e);
        }
        if let Some(ref window) = self.sms_send_window {
            if let Err(e) = window.validate() {
                problems.push(format!("SMS window: {e}"));
            }
        }

        if let Err(e) = self.rate_limit.validate() {
            problems.push(e);
        }
        if let Some(ref limit) = self.sms_rate_limit {
            if let Err(e) = limit.validate() {
                problems.push(format!("SMS rate limit: {e}"));
            }
        }

        if self.channel_mode.uses_channel(Channel::Voice) && self.voice_agent_id.is_none() {
            problems.push(format!(
                "voice_agent_id is required for channel mode {}",
                self.channel_mode
            ));
        }
        if self.channel_mode.uses_channel(Channel::Sms) && self.text_agent_id.is_none() {
            problems.push(format!(
                "text_agent_id is required for channel mode {}",
                self.channel_mode
            ));
        }

        if let (Some(start), Some(end)) = (self.scheduled_start, self.scheduled_end) {
            if start >= end {
                problems.push("scheduled_start must be before scheduled_end".to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_campaign(mode: ChannelMode) -> Campaign {
        let mut campaign = Campaign::new("test", mode);
        campaign.from_number = "+15550100".to_string();
        campaign.voice_agent_id = Some("agent-v".to_string());
        campaign.text_agent_id = Some("agent-t".to_string());
        campaign
    }

    #[test]
    fn test_channel_mode_initial_channel() {
        assert_eq!(ChannelMode::Voice.initial_channel(), Channel::Voice);
        assert_eq!(ChannelMode::Sms.initial_channel(), Channel::Sms);
        assert_eq!(
            ChannelMode::VoiceWithSmsFallback.initial_channel(),
            Channel::Voice
        );
    }

    #[test]
    fn test_channel_mode_parsing() {
        assert_eq!(
            ChannelMode::from_str("voice_with_sms_fallback").unwrap(),
            ChannelMode::VoiceWithSmsFallback
        );
        assert!(ChannelMode::from_str("carrier_pigeon").is_err());
    }

    #[test]
    fn test_status_terminality() {
        assert!(CampaignStatus::Cancelled.is_terminal());
        assert!(CampaignStatus::Completed.is_terminal());
        assert!(!CampaignStatus::Paused.is_terminal());
        assert!(CampaignStatus::Draft.can_start());
        assert!(CampaignStatus::Scheduled.can_start());
        assert!(!CampaignStatus::Running.can_start());
    }

    #[test]
    fn test_window_validation_rejects_wraparound() {
        let window = SendWindow {
            enabled: true,
            start_time: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            days: (0..7).collect(),
            timezone: "UTC".to_string(),
        };
        assert!(window.validate().is_err());
    }

    #[test]
    fn test_window_validation_rejects_bad_timezone() {
        let window = SendWindow {
            enabled: true,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            days: (0..7).collect(),
            timezone: "Mars/Olympus_Mons".to_string(),
        };
        assert!(window.validate().unwrap_err().contains("timezone"));
    }

    #[test]
    fn test_window_validation_allows_empty_days() {
        // An enabled window with no days is a blocked run, not a config error.
        let window = SendWindow {
            enabled: true,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            days: BTreeSet::new(),
            timezone: "UTC".to_string(),
        };
        assert!(window.validate().is_ok());
    }

    #[test]
    fn test_campaign_validation_requires_agents_per_mode() {
        let mut campaign = base_campaign(ChannelMode::VoiceWithSmsFallback);
        campaign.text_agent_id = None;
        let err = campaign.validate().unwrap_err();
        assert!(err.contains("text_agent_id"));

        let mut campaign = base_campaign(ChannelMode::Sms);
        campaign.voice_agent_id = None;
        assert!(campaign.validate().is_ok());
    }

    #[test]
    fn test_campaign_validation_rejects_zero_rate() {
        let mut campaign = base_campaign(ChannelMode::Voice);
        campaign.rate_limit.messages_per_hour = 0;
        assert!(campaign.validate().is_err());
    }

    #[test]
    fn test_within_bounds_is_conjunctive_range() {
        let mut campaign = base_campaign(ChannelMode::Voice);
        let start = Utc::now();
        let end = start + chrono::Duration::hours(2);
        campaign.scheduled_start = Some(start);
        campaign.scheduled_end = Some(end);

        assert!(!campaign.within_bounds(start - chrono::Duration::seconds(1)));
        assert!(campaign.within_bounds(start + chrono::Duration::hours(1)));
        assert!(!campaign.within_bounds(end + chrono::Duration::seconds(1)));
        assert!(campaign.ended(end + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_sms_window_falls_back_to_primary() {
        let campaign = base_campaign(ChannelMode::VoiceWithSmsFallback);
        assert_eq!(*campaign.window_for(Channel::Sms), campaign.send_window);

        let mut campaign = campaign;
        let mut sms_window = SendWindow::always_open();
        sms_window.timezone = "Europe/Berlin".to_string();
        campaign.sms_send_window = Some(sms_window.clone());
        assert_eq!(*campaign.window_for(Channel::Sms), sms_window);
        assert_eq!(*campaign.window_for(Channel::Voice), campaign.send_window);
    }
}
