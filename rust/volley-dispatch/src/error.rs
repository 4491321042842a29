//! Error types for the dispatch service.
//!
//! Library code returns typed [`DispatchError`] values; the binary and
//! server assembly use `anyhow` on top. The API layer maps each variant to
//! an HTTP status so dashboard clients can distinguish "unknown campaign"
//! from "operation not allowed in this state" from "bad configuration".

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::CampaignStatus;

/// Errors surfaced by campaign lifecycle and dispatch operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    /// No campaign registered under the given id.
    #[error("campaign not found: {0}")]
    CampaignNotFound(String),

    /// No contact with the given id exists on the campaign.
    #[error("contact {contact_id} not found on campaign {campaign_id}")]
    ContactNotFound {
        /// Campaign that was queried.
        campaign_id: String,
        /// Contact that was missing.
        contact_id: String,
    },

    /// The requested lifecycle operation is not legal from the current status.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Status the campaign is currently in.
        from: CampaignStatus,
        /// Status the operation would have moved to.
        to: CampaignStatus,
    },

    /// Campaign configuration failed start-time validation.
    ///
    /// Malformed configuration is fatal before a run begins; it is never
    /// reported as a per-contact failure mid-run.
    #[error("invalid campaign configuration: {0}")]
    Validation(String),
}

/// Result alias for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// JSON error body returned by the API layer.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            Self::CampaignNotFound(_) => (StatusCode::NOT_FOUND, "campaign_not_found"),
            Self::ContactNotFound { .. } => (StatusCode::NOT_FOUND, "contact_not_found"),
            Self::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_failed"),
        };

        let body = Json(ErrorBody {
            error: error.to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}
