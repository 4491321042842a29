//! Core domain models for campaigns and their contacts.

pub mod campaign;
pub mod contact;

pub use campaign::{
    Campaign, CampaignId, CampaignStatus, Channel, ChannelMode, RateLimitConfig, RetryConfig,
    SendWindow,
};
pub use contact::{CampaignContact, ContactId, ContactState, DispatchTask, StateCounts};
