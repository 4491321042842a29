//! HTTP server setup and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::api;
use crate::config::AppConfig;
use crate::events::EventBus;
use crate::logging::OpTimer;
use crate::scheduler::{CampaignRunController, SchedulerSettings};
use crate::sender::{ChannelSender, HttpChannelSender};
use crate::{log_init_step, log_init_warning, log_success, AppState};

/// Create the application with all routes and middleware.
pub async fn create_app(config: AppConfig) -> anyhow::Result<Router> {
    let overall_timer = OpTimer::new("server", "create_app");

    // [1/4] Channel sender (provider forwarding)
    let step_timer = OpTimer::new("server", "channel_sender");
    let sender = HttpChannelSender::new(&config.sender)?;
    let sender_info = match (&config.sender.voice_endpoint, &config.sender.sms_endpoint) {
        (Some(voice), Some(sms)) => format!("voice: {voice} | sms: {sms}"),
        (Some(voice), None) => format!("voice: {voice} | sms: not configured"),
        (None, Some(sms)) => format!("voice: not configured | sms: {sms}"),
        (None, None) => "no endpoints configured".to_string(),
    };
    if !sender.has_endpoints() {
        log_init_warning!(
            "No provider endpoints configured. Dispatch attempts will fail until \
             VOLLEY__SENDER__VOICE_ENDPOINT or VOLLEY__SENDER__SMS_ENDPOINT is set."
        );
    }
    let sender: Arc<dyn ChannelSender> = Arc::new(sender);
    log_init_step!(1, 4, "Channel Sender", sender_info);
    step_timer.finish();

    // [2/4] Event bus
    let step_timer = OpTimer::new("server", "event_bus");
    let events = Arc::new(EventBus::new());
    log_init_step!(2, 4, "Event Bus", "campaign event streaming ready");
    step_timer.finish();

    // [3/4] Campaign run controller
    let step_timer = OpTimer::new("server", "controller");
    let settings = SchedulerSettings::from(&config.scheduler);
    let controller = Arc::new(CampaignRunController::new(
        Arc::clone(&sender),
        Arc::clone(&events),
        settings,
    ));
    log_init_step!(
        3,
        4,
        "Run Controller",
        format!(
            "tick {}ms | {} workers/campaign",
            config.scheduler.tick_interval_ms, config.scheduler.worker_pool_size
        )
    );
    step_timer.finish();

    let state = AppState {
        config: Arc::new(config.clone()),
        controller,
        events,
    };

    // [4/4] Router with middleware
    let step_timer = OpTimer::new("server", "router");
    let app = api::create_router()
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config.server.timeout_secs,
                ))),
        )
        .with_state(state);
    log_init_step!(4, 4, "Router", "routes + middleware configured");
    step_timer.finish();

    overall_timer.finish();
    log_success!("Volley dispatch server created successfully");

    Ok(app)
}
