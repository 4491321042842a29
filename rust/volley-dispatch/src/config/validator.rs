//! Startup configuration validation with actionable messages.

use std::fmt;

use super::AppConfig;

/// A configuration problem with a fix hint attached.
#[derive(Debug, Clone)]
pub struct ConfigProblem {
    /// What is wrong.
    pub message: String,
    /// How to fix it.
    pub fix_hint: String,
}

/// Validation failure listing every problem found.
#[derive(Debug, Clone)]
pub struct ConfigurationError(pub Vec<ConfigProblem>);

impl std::error::Error for ConfigurationError {}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, problem) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "{}. {}", i + 1, problem.message)?;
            write!(f, "   How to fix: {}", problem.fix_hint)?;
        }
        Ok(())
    }
}

/// Validates configuration combinations before startup.
#[derive(Debug, Clone, Copy)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the full application configuration.
    pub fn validate(config: &AppConfig) -> Result<(), ConfigurationError> {
        let mut problems = Vec::new();

        if config.scheduler.tick_interval_ms == 0 {
            problems.push(ConfigProblem {
                message: "scheduler.tick_interval_ms is 0".to_string(),
                fix_hint: "Set VOLLEY__SCHEDULER__TICK_INTERVAL_MS to a positive value \
                           (default 250)"
                    .to_string(),
            });
        }

        if config.scheduler.worker_pool_size == 0 {
            problems.push(ConfigProblem {
                message: "scheduler.worker_pool_size is 0; no dispatch could ever run".to_string(),
                fix_hint: "Set VOLLEY__SCHEDULER__WORKER_POOL_SIZE to a positive value \
                           (default 8)"
                    .to_string(),
            });
        }

        if config.scheduler.dispatch_timeout_secs == 0 {
            problems.push(ConfigProblem {
                message: "scheduler.dispatch_timeout_secs is 0; every attempt would be reaped \
                          immediately"
                    .to_string(),
                fix_hint: "Set VOLLEY__SCHEDULER__DISPATCH_TIMEOUT_SECS to a positive value \
                           (default 120)"
                    .to_string(),
            });
        }

        for (name, endpoint) in [
            ("sender.voice_endpoint", &config.sender.voice_endpoint),
            ("sender.sms_endpoint", &config.sender.sms_endpoint),
        ] {
            if let Some(url) = endpoint {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    problems.push(ConfigProblem {
                        message: format!("{name} is not an http(s) URL: {url}"),
                        fix_hint: "Provider endpoints must be absolute http:// or https:// URLs"
                            .to_string(),
                    });
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError(problems))
        }
    }
}
