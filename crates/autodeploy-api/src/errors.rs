//! Error types for the HTTP service

use autodeploy_core::{QueueError, RouteError, ValidationError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{debug, error, warn};

/// Body returned when signature verification fails.
pub const SIGNATURE_VIOLATION_MESSAGE: &str = "Hash does not match or invalid - violation reported";

/// Webhook handler errors with HTTP status code mapping
///
/// Every variant is answered with a `text/plain` body:
///
/// - `400 Bad Request`: the delivery cannot be actioned (missing headers,
///   malformed payload, unconfigured repository or event, full queue)
/// - `403 Forbidden`: the signature is missing or does not match
/// - `503 Service Unavailable`: the executor is gone and nothing can be queued
///
/// Ref filter misses never become a `WebhookHandlerError`; the handler
/// answers them with [`WebhookResponse::Ignored`](crate::WebhookResponse).
#[derive(Debug, thiserror::Error)]
pub enum WebhookHandlerError {
    /// A required header is absent or not valid UTF-8
    #[error("Missing required header: {name}")]
    MissingHeader { name: &'static str },

    /// A header is present but its value is not acceptable
    #[error("Invalid headers: {0}")]
    InvalidHeaders(#[from] ValidationError),

    /// Body is not JSON or lacks `repository.full_name`
    #[error("Malformed payload: {message}")]
    MalformedPayload { message: String },

    /// Repository or event type has no configured behavior
    #[error("{0}")]
    Route(#[from] RouteError),

    /// Signature header missing or mismatched
    #[error("{}", SIGNATURE_VIOLATION_MESSAGE)]
    SignatureInvalid { repository: String },

    /// The queue refused the task
    #[error("{0}")]
    Queue(#[from] QueueError),
}

impl WebhookHandlerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingHeader { .. } | Self::InvalidHeaders(_) | Self::MalformedPayload { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::Route(_) => StatusCode::BAD_REQUEST,
            Self::SignatureInvalid { .. } => StatusCode::FORBIDDEN,
            Self::Queue(QueueError::Full { .. }) => StatusCode::BAD_REQUEST,
            Self::Queue(QueueError::Closed) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for WebhookHandlerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();

        match &self {
            Self::SignatureInvalid { repository } => {
                warn!(
                    repository = %repository,
                    status = status.as_u16(),
                    "Response: {} - {}",
                    status.as_u16(),
                    message
                );
            }
            Self::Queue(_) => {
                error!(status = status.as_u16(), "Response: {} - {}", status.as_u16(), message);
            }
            _ => {
                debug!(status = status.as_u16(), "Response: {} - {}", status.as_u16(), message);
            }
        }

        (status, message).into_response()
    }
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

/// Service configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },
}
