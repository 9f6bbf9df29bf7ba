//! Configuration types for the HTTP service
//!
//! These settings control how the service runs (listener, logging, where the
//! deploy configuration lives). What the service deploys is described by
//! [`autodeploy_core::DeployConfig`].

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Path of the deploy configuration file (JSON or YAML)
    pub deploy_config_path: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            deploy_config_path: PathBuf::from("config.json"),
        }
    }
}

impl ServiceConfig {
    /// Check values serde cannot reject on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "server.host must not be empty".to_string(),
            });
        }

        if self.server.max_body_size == 0 {
            return Err(ConfigError::Invalid {
                message: "server.max_body_size must be greater than zero".to_string(),
            });
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "logging.level must not be empty".to_string(),
            });
        }

        if self.deploy_config_path.as_os_str().is_empty() {
            return Err(ConfigError::Missing {
                key: "deploy_config_path".to_string(),
            });
        }

        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,

    /// Maximum request size in bytes
    pub max_body_size: usize,
}

impl ServerConfig {
    /// Address the listener binds to, in `host:port` form.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
            max_body_size: 5 * 1024 * 1024, // 5MB
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level, or any `EnvFilter` directive string
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,

    /// Append log output to this file as well as stdout
    pub file_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            file_path: None,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
