//! Campaign dispatch scheduling.
//!
//! The scheduler turns a configured campaign plus its contact queue into a
//! paced, fault-tolerant stream of dispatch attempts:
//!
//! ```text
//! CampaignRunController (arena, one entry per campaign)
//!   └─> DispatchScheduler (tokio task per campaign)
//!         ├─> SendWindowEvaluator  ← "is this instant inside the window?"
//!         ├─> ChannelRateLimiters  ← per-channel token buckets (governor)
//!         ├─> CampaignContactQueue ← due-index + contact state machine
//!         │     └─> RetryPolicy / FallbackPolicy
//!         └─> ChannelSender        ← black-box provider (worker pool)
//! ```

pub mod controller;
pub mod engine;
pub mod queue;
pub mod rate_limit;
pub mod retry;
pub mod window;

pub use controller::{CampaignRunController, CampaignStatusReport};
pub use engine::{
    BlockedReason, DispatchScheduler, RunOutcome, RunSignal, RunState, RunStatus,
    SchedulerSettings,
};
pub use queue::CampaignContactQueue;
pub use rate_limit::ChannelRateLimiters;
pub use retry::{FallbackPolicy, RetryDecision, RetryPolicy};
pub use window::SendWindowEvaluator;
