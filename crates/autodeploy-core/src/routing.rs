//! Resolution of (repository, event type, ref) to a configured script.

use crate::config::{DeployConfig, RepositoryConfig, ScriptConfig};
use tracing::debug;

/// Reasons a delivery does not map to a script
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("Repository '{repository}' has no configured behavior")]
    RepositoryUndefined { repository: String },

    #[error("Event type '{event_type}' has no configured behavior for '{repository}'")]
    EventUndefined {
        repository: String,
        event_type: String,
    },

    /// The delivery is well-formed but intentionally not actioned.
    #[error("Ref '{}' not associated with '{event_type}' event task", .git_ref.as_deref().unwrap_or(""))]
    RefNotApplicable {
        event_type: String,
        git_ref: Option<String>,
    },
}

impl RouteError {
    /// Informational outcomes are answered as success; everything else is a
    /// client error.
    pub fn is_informational(&self) -> bool {
        matches!(self, Self::RefNotApplicable { .. })
    }
}

impl DeployConfig {
    /// Look up the settings of one repository
    pub fn repository(&self, full_name: &str) -> Result<&RepositoryConfig, RouteError> {
        self.repos
            .get(full_name)
            .ok_or_else(|| RouteError::RepositoryUndefined {
                repository: full_name.to_string(),
            })
    }

    /// Resolve the script a delivery should trigger
    ///
    /// Lookups happen in order: repository, event type, ref filter. The first
    /// miss decides the error.
    pub fn resolve(
        &self,
        full_name: &str,
        event_type: &str,
        git_ref: Option<&str>,
    ) -> Result<&ScriptConfig, RouteError> {
        let repo = self.repository(full_name)?;

        let script = repo
            .events
            .get(event_type)
            .ok_or_else(|| RouteError::EventUndefined {
                repository: full_name.to_string(),
                event_type: event_type.to_string(),
            })?;

        if !script.accepts_ref(git_ref) {
            debug!(
                repository = %full_name,
                event_type = %event_type,
                git_ref = ?git_ref,
                "Ref filtered out"
            );
            return Err(RouteError::RefNotApplicable {
                event_type: event_type.to_string(),
                git_ref: git_ref.map(str::to_string),
            });
        }

        Ok(script)
    }
}

#[cfg(test)]
#[path = "routing_tests.rs"]
mod tests;
