//! # Deploy Configuration Module
//!
//! Defines which repositories Autodeploy accepts deliveries for, which script
//! runs for each event type, and how many tasks may wait for execution.
//!
//! Configuration is loaded once at startup, validated eagerly, and treated as
//! immutable afterwards. Any problem found during validation is fatal: the
//! service must refuse to start rather than fail on the first delivery.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

// ============================================================================
// Secrets
// ============================================================================

/// Shared secret used to sign deliveries for one repository.
///
/// The value is wiped from memory when dropped and never appears in `Debug`
/// output.
#[derive(Clone, PartialEq, Eq, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct WebhookSecret(String);

impl WebhookSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get secret as string (only for immediate use)
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WebhookSecret(<REDACTED>)")
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Complete deploy configuration loaded at startup
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployConfig {
    /// Repository full name (`owner/name`) to repository settings
    pub repos: BTreeMap<String, RepositoryConfig>,

    /// Maximum number of accepted, not yet completed tasks (0 = unbounded)
    #[serde(default, alias = "maxQueueLength")]
    pub max_queue_length: usize,
}

/// Settings for one repository
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Secret shared with the source-control host for this repository
    pub secret: WebhookSecret,

    /// Event type (`push`, `release`, ...) to the script it triggers
    pub events: BTreeMap<String, ScriptConfig>,
}

/// Command descriptor for one (repository, event type) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptConfig {
    /// Executable to launch
    pub run: PathBuf,

    /// Working directory; the parent directory of `run` when unset
    #[serde(default, alias = "workDir")]
    pub work_dir: Option<PathBuf>,

    /// Refs that trigger the script; every ref matches when unset
    #[serde(default)]
    pub refs: Option<Vec<String>>,
}

impl ScriptConfig {
    pub fn new(run: impl Into<PathBuf>) -> Self {
        Self {
            run: run.into(),
            work_dir: None,
            refs: None,
        }
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(work_dir.into());
        self
    }

    pub fn with_refs<I, S>(mut self, refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.refs = Some(refs.into_iter().map(Into::into).collect());
        self
    }

    /// Directory the script runs in.
    ///
    /// Without an explicit `work_dir` this is the directory containing `run`,
    /// or `.` for a bare file name.
    pub fn working_directory(&self) -> &Path {
        match self.work_dir.as_deref() {
            Some(dir) => dir,
            None => self
                .run
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new(".")),
        }
    }

    /// Anchor relative `run` and `work_dir` paths at the current directory,
    /// so the child is launched with the same file that was validated.
    fn make_paths_absolute(&mut self) -> Result<(), ConfigError> {
        self.run = absolute_path(&self.run)?;
        if let Some(dir) = &self.work_dir {
            self.work_dir = Some(absolute_path(dir)?);
        }
        Ok(())
    }

    /// Check whether a delivery for `git_ref` should trigger this script.
    ///
    /// Without a ref filter every delivery matches, including ones that carry
    /// no ref at all. With a filter the ref must be present and equal to one
    /// of the listed entries.
    pub fn accepts_ref(&self, git_ref: Option<&str>) -> bool {
        match (&self.refs, git_ref) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(refs), Some(git_ref)) => refs.iter().any(|r| r == git_ref),
        }
    }
}

// ============================================================================
// Loading and validation
// ============================================================================

impl DeployConfig {
    /// Load configuration from file path
    ///
    /// `.yaml`/`.yml` files are parsed as YAML, everything else as JSON.
    ///
    /// # Errors
    /// - `ConfigError::FileNotFound` - Configuration file missing
    /// - `ConfigError::Read` - File exists but could not be read
    /// - `ConfigError::Parse` - Invalid JSON/YAML or unknown fields
    /// - `ConfigError::Validation` - Referenced paths missing or values invalid
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = match extension.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml_str(&contents)?,
            _ => Self::from_json_str(&contents)?,
        };

        info!(
            path = %path.display(),
            repositories = config.repos.len(),
            max_queue_length = config.max_queue_length,
            "Loaded deploy configuration"
        );

        Ok(config)
    }

    /// Parse and validate configuration from a JSON document
    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        let config: DeployConfig =
            serde_json::from_str(contents).map_err(|e| ConfigError::Parse {
                message: format!("Invalid JSON: {}", e),
            })?;
        config.validated()
    }

    /// Parse and validate configuration from a YAML document
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: DeployConfig =
            serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
                message: format!("Invalid YAML: {}", e),
            })?;
        config.validated()
    }

    /// Resolve relative paths, validate, then fill in every default that
    /// depends on the filesystem.
    fn validated(mut self) -> Result<Self, ConfigError> {
        for repo in self.repos.values_mut() {
            for script in repo.events.values_mut() {
                script.make_paths_absolute()?;
            }
        }

        self.validate()?;

        for repo in self.repos.values_mut() {
            for script in repo.events.values_mut() {
                if script.work_dir.is_none() {
                    script.work_dir = Some(script.working_directory().to_path_buf());
                }
            }
        }

        Ok(self)
    }

    /// Validate configuration structure and referenced paths
    ///
    /// All problems are collected so a single run reports every mistake.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        for (name, repo) in &self.repos {
            if !is_repository_full_name(name) {
                errors.push(format!(
                    "Repository '{}': name must have the form 'owner/name'",
                    name
                ));
            }

            if repo.secret.is_empty() {
                errors.push(format!("Repository '{}': secret must not be empty", name));
            }

            for (event, script) in &repo.events {
                if event.trim().is_empty() {
                    errors.push(format!("Repository '{}': event type must not be empty", name));
                }

                validate_script(name, event, script, &mut errors);
            }
        }

        if !errors.is_empty() {
            return Err(ConfigError::Validation { errors });
        }

        debug!(repositories = self.repos.len(), "Deploy configuration is valid");
        Ok(())
    }

    /// Queue capacity bound, `None` when unbounded.
    pub fn queue_capacity(&self) -> Option<usize> {
        match self.max_queue_length {
            0 => None,
            n => Some(n),
        }
    }
}

fn validate_script(repo: &str, event: &str, script: &ScriptConfig, errors: &mut Vec<String>) {
    let run = &script.run;
    if !run.is_file() {
        errors.push(format!(
            "Repository '{}', event '{}': script '{}' does not exist or is not a file",
            repo,
            event,
            run.display()
        ));
    } else if !is_executable(run) {
        errors.push(format!(
            "Repository '{}', event '{}': script '{}' is not executable",
            repo,
            event,
            run.display()
        ));
    }

    let work_dir = script.working_directory();
    if !work_dir.is_dir() {
        errors.push(format!(
            "Repository '{}', event '{}': working directory '{}' does not exist",
            repo,
            event,
            work_dir.display()
        ));
    }

    if let Some(refs) = &script.refs {
        if refs.is_empty() {
            errors.push(format!(
                "Repository '{}', event '{}': refs must not be empty; omit it to match every ref",
                repo, event
            ));
        }
    }
}

fn absolute_path(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }

    std::path::absolute(path).map_err(|e| ConfigError::InvalidPath {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn is_repository_full_name(name: &str) -> bool {
    match name.split_once('/') {
        Some((owner, repo)) => !owner.is_empty() && !repo.is_empty() && !repo.contains('/'),
        None => false,
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while loading deploy configuration. All of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to read configuration file {path}: {message}")]
    Read { path: String, message: String },

    #[error("Cannot resolve path '{path}': {message}")]
    InvalidPath { path: String, message: String },

    #[error("Configuration parsing failed: {message}")]
    Parse { message: String },

    #[error("Invalid configuration: {}", .errors.join("; "))]
    Validation { errors: Vec<String> },
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
