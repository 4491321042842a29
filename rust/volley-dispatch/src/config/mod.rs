//! Configuration management for the Volley dispatch service.
//!
//! Configuration is loaded in layers: built-in defaults, then an optional
//! YAML file (`config/volley-dispatch`), then `VOLLEY__`-prefixed environment
//! variables. Loading validates the result; use [`AppConfig::load_unchecked`]
//! to handle validation separately (tests do).
//!
//! The scheduler receives its knobs as an immutable settings struct at
//! campaign start; nothing in the dispatch core reads ambient configuration
//! at runtime.

pub mod validator;

pub use validator::ConfigValidator;

use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Dispatch scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Channel sender (provider forwarding) configuration.
    #[serde(default)]
    pub sender: SenderConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from defaults, config files, and environment.
    pub fn load() -> anyhow::Result<Self> {
        let config = Self::load_unchecked()?;
        ConfigValidator::validate(&config)
            .map_err(|e| anyhow::anyhow!("Configuration validation failed:\n\n{e}"))?;
        Ok(config)
    }

    /// Load configuration without validation.
    pub fn load_unchecked() -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/volley-dispatch").required(false))
            .add_source(
                config::Environment::with_prefix("VOLLEY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize().unwrap_or_default())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// API port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_request_timeout(),
        }
    }
}

/// Dispatch scheduler configuration.
///
/// The worker pool bounds concurrency only; the per-campaign rate limiter is
/// the actual throughput governor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Scheduling loop tick interval in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Maximum concurrent dispatch workers per campaign.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Seconds an attempt may stay in flight before it is reaped as failed.
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_secs: u64,
    /// Upper bound in seconds on waiting for a sender-side abort at cancel.
    #[serde(default = "default_abort_timeout")]
    pub abort_timeout_secs: u64,
}

fn default_tick_interval_ms() -> u64 {
    250
}

fn default_worker_pool_size() -> usize {
    8
}

fn default_dispatch_timeout() -> u64 {
    120
}

fn default_abort_timeout() -> u64 {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            worker_pool_size: default_worker_pool_size(),
            dispatch_timeout_secs: default_dispatch_timeout(),
            abort_timeout_secs: default_abort_timeout(),
        }
    }
}

/// Channel sender forwarding configuration.
///
/// The provider behind each endpoint owns dialing and SMS delivery; Volley
/// only posts dispatch payloads to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Voice provider endpoint URL.
    pub voice_endpoint: Option<String>,
    /// SMS provider endpoint URL.
    pub sms_endpoint: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_sender_timeout")]
    pub request_timeout_secs: u64,
}

fn default_sender_timeout() -> u64 {
    30
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            voice_endpoint: None,
            sms_endpoint: None,
            request_timeout_secs: default_sender_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to emit JSON-formatted logs.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
