//! # Autodeploy Core
//!
//! Core business logic for the Autodeploy webhook-to-command pipeline.
//!
//! This crate contains the parts of the system that decide what happens to an
//! inbound webhook delivery:
//! - [`signature`] verifies the HMAC-SHA256 signature of the raw body
//! - [`routing`] maps (repository, event type, ref) to a configured script
//! - [`queue`] buffers accepted tasks with a capacity bound
//! - [`executor`] runs queued scripts one at a time and logs their outcome
//!
//! ## Architecture
//!
//! Configuration is loaded and validated once ([`config::DeployConfig`]) and
//! then shared read-only. The task queue is the only shared mutable state
//! between request handlers and the executor.
//!
//! ## Usage
//!
//! ```rust
//! use autodeploy_core::DeliveryId;
//!
//! let delivery_id = DeliveryId::new("72d3162e-cc78-11e3-81ab-4c9367dc0958").unwrap();
//! assert_eq!(delivery_id.as_str(), "72d3162e-cc78-11e3-81ab-4c9367dc0958");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub mod config;
pub mod executor;
pub mod queue;
pub mod routing;
pub mod signature;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Identifier attached to one webhook delivery by the source-control host.
///
/// Used only to correlate log lines for a task; never used for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(String);

impl DeliveryId {
    /// Maximum accepted length of a delivery identifier.
    pub const MAX_LENGTH: usize = 128;

    /// Create new delivery ID with validation
    ///
    /// # Validation Rules
    /// - Must not be empty
    /// - Must be at most [`DeliveryId::MAX_LENGTH`] characters
    /// - Must contain only printable ASCII without whitespace
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();

        if value.is_empty() {
            return Err(ValidationError::Required {
                field: "delivery_id".to_string(),
            });
        }

        if value.len() > Self::MAX_LENGTH {
            return Err(ValidationError::TooLong {
                field: "delivery_id".to_string(),
                max_length: Self::MAX_LENGTH,
            });
        }

        if !value.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ValidationError::InvalidCharacters {
                field: "delivery_id".to_string(),
                invalid_chars: "non-ASCII or whitespace".to_string(),
            });
        }

        Ok(Self(value))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeliveryId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ============================================================================
// Time Types
// ============================================================================

/// UTC instant, used for how long tasks wait in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Time elapsed between `other` and `self`; zero if `other` is later.
    pub fn duration_since(&self, other: Self) -> Duration {
        self.0
            .signed_duration_since(other.0)
            .to_std()
            .unwrap_or_default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Validation failure for a single input field
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    TooLong { field: String, max_length: usize },

    #[error("Field '{field}' contains invalid characters: {invalid_chars}")]
    InvalidCharacters {
        field: String,
        invalid_chars: String,
    },
}

// Re-export commonly used types
pub use config::{ConfigError, DeployConfig, RepositoryConfig, ScriptConfig, WebhookSecret};
pub use executor::{
    CommandOutput, CommandRunner, ExecutionError, Executor, ProcessRunner, TaskOutcome, TaskStatus,
};
pub use queue::{QueueError, QueuedTask, Task, TaskQueue, TaskReceiver};
pub use routing::RouteError;
pub use signature::{compute_signature, verify};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
