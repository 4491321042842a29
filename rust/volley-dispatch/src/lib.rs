//! Volley Dispatch - Campaign Dispatch Scheduler
//!
//! The engine behind the Volley outbound-campaign dashboard: it turns a
//! configured campaign plus a target contact list into an actual, paced,
//! fault-tolerant stream of outbound voice/SMS attempts over time.
//!
//! - **Sending windows**: recurring local-time windows in IANA timezones,
//!   conjunctive with optional absolute start/end bounds
//! - **Rate limiting**: per-campaign, per-channel token buckets
//! - **Retries**: flat-delay, bounded-attempt retry chains
//! - **Fallback**: exhausted voice contacts convert to one SMS attempt chain
//! - **Control**: start/pause/resume/cancel with cooperative pause and
//!   bounded-abort cancel, one independent scheduler task per campaign
//!
//! # Architecture
//!
//! The service is organized into several key modules:
//!
//! - [`config`]: Configuration management and environment loading
//! - [`domain`]: Campaign and contact models, validation, state machines
//! - [`scheduler`]: Window evaluator, rate limiter, retry/fallback policies,
//!   contact queue, dispatch engine, run controller
//! - [`sender`]: Black-box channel sender seam and HTTP forwarding
//! - [`events`]: Per-campaign lifecycle event streaming
//! - [`api`]: HTTP API endpoints for the dashboard
//!
//! # Example
//!
//! ```rust,ignore
//! use volley_dispatch::{config::AppConfig, server::create_app};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let app = create_app(config).await?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8090").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod logging;
pub mod scheduler;
pub mod sender;
pub mod server;

use std::sync::Arc;

use config::AppConfig;
use events::EventBus;
use scheduler::CampaignRunController;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Campaign lifecycle controller and scheduler arena.
    pub controller: Arc<CampaignRunController>,
    /// Campaign event bus.
    pub events: Arc<EventBus>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"AppConfig")
            .field("controller", &self.controller)
            .field("events", &self.events.active_channels())
            .finish()
    }
}
