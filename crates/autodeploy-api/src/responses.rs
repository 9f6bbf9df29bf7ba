//! Request payload and response types for the webhook endpoint.

use autodeploy_core::DeliveryId;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::fmt;

/// Body of `GET /`.
pub const INFO_MESSAGE: &str =
    "This is an autodeploy API webhook endpoint, really nothing interesting.";

// ============================================================================
// Request Types
// ============================================================================

/// The parts of a delivery body the endpoint reads. Everything else in the
/// payload is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebhookPayload {
    pub repository: RepositoryRef,

    /// Git ref the event refers to; absent for many event types
    #[serde(rename = "ref", default)]
    pub git_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepositoryRef {
    pub full_name: String,
}

// ============================================================================
// Response Types
// ============================================================================

/// Successful webhook outcomes, all answered with `200 OK`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookResponse {
    /// Task added to the queue
    Accepted {
        delivery_id: DeliveryId,
        repository: String,
    },

    /// `ping` delivery acknowledged
    Pong,

    /// The event is configured but its ref filter excludes this delivery
    Ignored { message: String },
}

impl fmt::Display for WebhookResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted {
                delivery_id,
                repository,
            } => write!(f, "Task {} - {} - added to queue", delivery_id, repository),
            Self::Pong => f.write_str("pong"),
            Self::Ignored { message } => f.write_str(message),
        }
    }
}

impl IntoResponse for WebhookResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, self.to_string()).into_response()
    }
}
