//! Campaign API endpoints.
//!
//! The request DTOs mirror the fields the dashboard's campaign wizard
//! produces: channel mode, sending window (weekdays 0–6, Sunday = 0), rate
//! limit, retry settings, agent references, and optional absolute bounds.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    Campaign, CampaignContact, ChannelMode, RateLimitConfig, RetryConfig, SendWindow,
};
use crate::error::DispatchResult;
use crate::scheduler::CampaignStatusReport;
use crate::AppState;

/// Create the campaigns router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/campaigns", post(create_campaign).get(list_campaigns))
        .route("/v1/campaigns/{campaign_id}", get(get_campaign))
        .route("/v1/campaigns/{campaign_id}/contacts", post(add_contacts))
        .route("/v1/campaigns/{campaign_id}/start", post(start_campaign))
        .route("/v1/campaigns/{campaign_id}/pause", post(pause_campaign))
        .route("/v1/campaigns/{campaign_id}/resume", post(resume_campaign))
        .route("/v1/campaigns/{campaign_id}/cancel", post(cancel_campaign))
        .route("/v1/campaigns/{campaign_id}/status", get(campaign_status))
        .route(
            "/v1/campaigns/{campaign_id}/contacts/{contact_id}",
            get(get_contact),
        )
}

/// Sending window as configured in the dashboard wizard.
#[derive(Debug, Clone, Deserialize)]
pub struct SendWindowRequest {
    /// Whether the window restricts sending.
    #[serde(default)]
    pub enabled: bool,
    /// Local start time, e.g. "09:00:00".
    pub start_time: NaiveTime,
    /// Local end time, exclusive.
    pub end_time: NaiveTime,
    /// Allowed weekdays, 0–6 with Sunday = 0.
    pub days: Vec<u8>,
    /// IANA timezone name.
    pub timezone: String,
}

impl From<SendWindowRequest> for SendWindow {
    fn from(req: SendWindowRequest) -> Self {
        Self {
            enabled: req.enabled,
            start_time: req.start_time,
            end_time: req.end_time,
            days: req.days.into_iter().collect(),
            timezone: req.timezone,
        }
    }
}

/// Campaign creation request.
#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    /// Display name.
    pub name: String,
    /// Channel mode.
    pub channel_mode: ChannelMode,
    /// Sending window for the primary channel.
    pub send_window: Option<SendWindowRequest>,
    /// Independent SMS window for fallback attempts.
    pub sms_send_window: Option<SendWindowRequest>,
    /// Messages/calls per hour on the primary channel.
    pub messages_per_hour: u32,
    /// Independent SMS rate limit.
    pub sms_messages_per_hour: Option<u32>,
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Flat delay between attempts, in seconds.
    pub retry_delay_secs: u64,
    /// Opaque voice agent reference.
    pub voice_agent_id: Option<String>,
    /// Opaque text agent reference.
    pub text_agent_id: Option<String>,
    /// Caller/sender number reference.
    pub from_number: String,
    /// Absolute earliest dispatch instant.
    pub scheduled_start: Option<DateTime<Utc>>,
    /// Absolute latest dispatch instant.
    pub scheduled_end: Option<DateTime<Utc>>,
}

impl From<CreateCampaignRequest> for Campaign {
    fn from(req: CreateCampaignRequest) -> Self {
        let mut campaign = Campaign::new(req.name, req.channel_mode);
        if let Some(window) = req.send_window {
            campaign.send_window = window.into();
        }
        campaign.sms_send_window = req.sms_send_window.map(Into::into);
        campaign.rate_limit = RateLimitConfig {
            messages_per_hour: req.messages_per_hour,
        };
        campaign.sms_rate_limit = req.sms_messages_per_hour.map(|messages_per_hour| {
            RateLimitConfig { messages_per_hour }
        });
        campaign.retry = RetryConfig {
            max_retries: req.max_retries,
            retry_delay_secs: req.retry_delay_secs,
        };
        campaign.voice_agent_id = req.voice_agent_id;
        campaign.text_agent_id = req.text_agent_id;
        campaign.from_number = req.from_number;
        campaign.scheduled_start = req.scheduled_start;
        campaign.scheduled_end = req.scheduled_end;
        campaign
    }
}

/// Contact enqueue request.
#[derive(Debug, Deserialize)]
pub struct AddContactsRequest {
    /// Contact identifiers to enqueue. Duplicates are no-ops.
    pub contact_ids: Vec<String>,
}

/// Contact enqueue response.
#[derive(Debug, Serialize)]
pub struct AddContactsResponse {
    pub campaign_id: String,
    pub added: usize,
}

/// Lifecycle operation response.
#[derive(Debug, Serialize)]
pub struct LifecycleResponse {
    pub campaign_id: String,
    pub status: String,
}

/// Register a new campaign.
async fn create_campaign(
    State(state): State<AppState>,
    Json(req): Json<CreateCampaignRequest>,
) -> DispatchResult<Json<Campaign>> {
    let campaign = state.controller.register(req.into())?;
    Ok(Json(campaign))
}

/// List registered campaigns.
async fn list_campaigns(State(state): State<AppState>) -> Json<Vec<Campaign>> {
    Json(state.controller.list())
}

/// Get one campaign.
async fn get_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> DispatchResult<Json<Campaign>> {
    Ok(Json(state.controller.get(&campaign_id)?))
}

/// Enqueue contacts on a campaign.
async fn add_contacts(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    Json(req): Json<AddContactsRequest>,
) -> DispatchResult<Json<AddContactsResponse>> {
    let added = state.controller.add_contacts(&campaign_id, req.contact_ids)?;
    Ok(Json(AddContactsResponse { campaign_id, added }))
}

/// Start a campaign run.
async fn start_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> DispatchResult<Json<LifecycleResponse>> {
    state.controller.start(&campaign_id)?;
    lifecycle_response(&state, campaign_id)
}

/// Pause a running campaign.
async fn pause_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> DispatchResult<Json<LifecycleResponse>> {
    state.controller.pause(&campaign_id)?;
    lifecycle_response(&state, campaign_id)
}

/// Resume a paused campaign.
async fn resume_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> DispatchResult<Json<LifecycleResponse>> {
    state.controller.resume(&campaign_id)?;
    lifecycle_response(&state, campaign_id)
}

/// Cancel a campaign.
async fn cancel_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> DispatchResult<Json<LifecycleResponse>> {
    state.controller.cancel(&campaign_id)?;
    lifecycle_response(&state, campaign_id)
}

/// Aggregate status for dashboard polling.
async fn campaign_status(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> DispatchResult<Json<CampaignStatusReport>> {
    Ok(Json(state.controller.status(&campaign_id)?))
}

/// Per-contact drill-down.
async fn get_contact(
    State(state): State<AppState>,
    Path((campaign_id, contact_id)): Path<(String, String)>,
) -> DispatchResult<Json<CampaignContact>> {
    Ok(Json(state.controller.contact(&campaign_id, &contact_id)?))
}

fn lifecycle_response(
    state: &AppState,
    campaign_id: String,
) -> DispatchResult<Json<LifecycleResponse>> {
    let campaign = state.controller.get(&campaign_id)?;
    Ok(Json(LifecycleResponse {
        campaign_id,
        status: campaign.status.to_string(),
    }))
}
