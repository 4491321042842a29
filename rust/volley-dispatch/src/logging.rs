//! Structured logging utilities.
//!
//! Operation timers and init-step macros used during server assembly and by
//! long-lived components. Everything funnels through `tracing`.

use std::time::Instant;

/// Operation timer that logs start and duration.
#[derive(Debug)]
pub struct OpTimer {
    /// Component being timed (e.g. "controller").
    component: String,
    /// Operation being performed (e.g. "assembly").
    operation: String,
    /// Start time.
    start: Instant,
}

impl OpTimer {
    /// Start a timer, logging the operation begin at debug level.
    #[must_use]
    pub fn new(component: impl Into<String>, operation: impl Into<String>) -> Self {
        let component = component.into();
        let operation = operation.into();

        tracing::debug!(
            component = %component,
            operation = %operation,
            "Operation started"
        );

        Self {
            component,
            operation,
            start: Instant::now(),
        }
    }

    /// Finish the timer, logging the duration.
    pub fn finish(self) {
        tracing::info!(
            component = %self.component,
            operation = %self.operation,
            duration_ms = self.start.elapsed().as_millis(),
            "Operation completed"
        );
    }
}

/// Log one numbered initialization step.
#[macro_export]
macro_rules! log_init_step {
    ($step:expr, $total:expr, $name:expr, $detail:expr) => {
        tracing::info!(step = $step, total = $total, "[{}/{}] {} - {}", $step, $total, $name, $detail);
    };
    ($step:expr, $total:expr, $name:expr) => {
        tracing::info!(step = $step, total = $total, "[{}/{}] {}", $step, $total, $name);
    };
}

/// Log a warning during initialization.
#[macro_export]
macro_rules! log_init_warning {
    ($msg:expr) => {
        tracing::warn!("⚠️  {}", $msg);
    };
    ($msg:expr, $($arg:tt)*) => {
        tracing::warn!("⚠️  {}", format!($msg, $($arg)*));
    };
}

/// Log successful completion of a major phase.
#[macro_export]
macro_rules! log_success {
    ($msg:expr) => {
        tracing::info!("✅ {}", $msg);
    };
    ($msg:expr, $($arg:tt)*) => {
        tracing::info!("✅ {}", format!($msg, $($arg)*));
    };
}
