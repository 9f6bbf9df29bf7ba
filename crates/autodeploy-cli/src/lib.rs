//! # Autodeploy CLI
//!
//! Command-line interface for the Autodeploy service.
//!
//! This module provides CLI commands for:
//! - Running the webhook service (`serve`)
//! - Checking a deploy configuration before rollout (`validate`)
//! - Producing signature headers for manual test deliveries (`sign`)

use autodeploy_api::{
    bind, shutdown_signal, start_server, AppState, LoggingConfig, ServiceConfig, ServiceError,
};
use autodeploy_core::{
    compute_signature, ConfigError, DeployConfig, Executor, TaskQueue, WebhookSecret,
};
use clap::{Parser, Subcommand};
use std::{
    fmt::Write as _,
    fs::OpenOptions,
    io::Read,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable naming an explicit service settings file
pub const SETTINGS_FILE_ENV: &str = "AUTODEPLOY_SETTINGS_FILE";

/// Prefix of environment variables overriding service settings, e.g.
/// `AUTODEPLOY__SERVER__PORT=9090`
pub const SETTINGS_ENV_PREFIX: &str = "AUTODEPLOY";

// ============================================================================
// CLI Structure
// ============================================================================

/// Autodeploy - run deployment scripts on signed webhook deliveries
#[derive(Parser, Debug)]
#[command(name = "autodeploy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run deployment scripts when signed webhooks arrive")]
pub struct Cli {
    /// Service settings file (YAML, TOML or JSON)
    #[arg(short, long, env = SETTINGS_FILE_ENV)]
    pub settings: Option<PathBuf>,

    /// Logging level or filter directive; overrides the settings file
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the webhook service and the executor
    Serve {
        /// Deploy configuration file (JSON or YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Host to bind HTTP server
        #[arg(long)]
        host: Option<String>,

        /// Port to bind HTTP server
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Load and validate a deploy configuration
    Validate {
        /// Deploy configuration file (JSON or YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the X-Hub-Signature-256 header value for a payload
    Sign {
        /// Shared secret of the repository
        #[arg(long, env = "AUTODEPLOY_WEBHOOK_SECRET", hide_env_values = true)]
        secret: String,

        /// Payload file; `-` reads standard input
        payload: PathBuf,
    },
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Service settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("Deploy configuration error: {0}")]
    DeployConfig(#[from] ConfigError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Executor stopped unexpectedly: {message}")]
    ExecutorStopped { message: String },

    #[error("Logging setup failed: {message}")]
    Logging { message: String },

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::CommandFailed { .. } | Self::Logging { .. } => 1,
            Self::Service(_) | Self::ExecutorStopped { .. } => 2,
            Self::Settings(_) | Self::DeployConfig(_) => 3,
            Self::Io(_) => 5,
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    run(Cli::parse()).await
}

/// Execute an already parsed command line.
pub async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Serve { config, host, port } => {
            let mut settings = load_settings(cli.settings.as_deref())?;
            if let Some(level) = cli.log_level {
                settings.logging.level = level;
            }
            if cli.json_logs {
                settings.logging.json_format = true;
            }
            apply_serve_overrides(&mut settings, config, host, port);
            settings.validate().map_err(ServiceError::from)?;

            init_logging(&settings.logging)?;
            execute_serve_command(settings).await
        }
        Commands::Validate { config } => {
            let path = match config {
                Some(path) => path,
                None => load_settings(cli.settings.as_deref())?.deploy_config_path,
            };
            let summary = execute_validate_command(&path)?;
            print!("{}", summary);
            Ok(())
        }
        Commands::Sign { secret, payload } => {
            let secret = WebhookSecret::new(secret);
            let signature = execute_sign_command(&secret, &payload)?;
            println!("{}", signature);
            Ok(())
        }
    }
}

// ============================================================================
// Settings and Logging
// ============================================================================

/// Build service settings from layered sources
///
/// Sources, later ones overriding earlier ones:
/// 1. `/etc/autodeploy/service.{yaml,toml,json}` (optional)
/// 2. `./config/service.{yaml,toml,json}` (optional)
/// 3. `explicit` (required when given)
/// 4. `AUTODEPLOY__` environment variables, `__` separating nested keys
pub fn load_settings(explicit: Option<&Path>) -> Result<ServiceConfig, CliError> {
    let mut builder = config::Config::builder()
        .add_source(config::File::with_name("/etc/autodeploy/service").required(false))
        .add_source(config::File::with_name("config/service").required(false));

    if let Some(path) = explicit {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix(SETTINGS_ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    Ok(settings)
}

/// Apply `serve` flags on top of the loaded settings.
pub fn apply_serve_overrides(
    settings: &mut ServiceConfig,
    config: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
) {
    if let Some(config) = config {
        settings.deploy_config_path = config;
    }
    if let Some(host) = host {
        settings.server.host = host;
    }
    if let Some(port) = port {
        settings.server.port = port;
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level. Output goes to
/// stdout, and is appended to `file_path` as well when one is configured.
pub fn init_logging(logging: &LoggingConfig) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .map_err(|e| CliError::Logging {
            message: format!("invalid log level '{}': {}", logging.level, e),
        })?;

    let (json_layer, text_layer) = if logging.json_format {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };

    let file_layer = match &logging.file_path {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| CliError::Logging {
            message: e.to_string(),
        })
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Run the service until a shutdown signal arrives or the executor dies
async fn execute_serve_command(settings: ServiceConfig) -> Result<(), CliError> {
    info!(
        deploy_config = %settings.deploy_config_path.display(),
        "Starting Autodeploy service"
    );

    let deploy_config = Arc::new(DeployConfig::load_from_file(&settings.deploy_config_path)?);
    let (queue, receiver) = TaskQueue::new(deploy_config.queue_capacity());
    let mut executor = Executor::new(receiver).spawn();

    let listener = bind(&settings.server).await?;
    let shutdown_timeout = Duration::from_secs(settings.server.shutdown_timeout_seconds);
    let state = AppState::new(settings.server, deploy_config, queue);

    tokio::select! {
        result = start_server(listener, state, shutdown_signal()) => result?,
        joined = &mut executor => {
            let message = match joined {
                Ok(()) => "task queue closed".to_string(),
                Err(e) => e.to_string(),
            };
            error!(error = %message, "Executor stopped, shutting down");
            return Err(CliError::ExecutorStopped { message });
        }
    }

    // Every queue handle is gone now, so the executor exits once the tasks
    // already accepted have run.
    match tokio::time::timeout(shutdown_timeout, executor).await {
        Ok(_) => info!("Executor drained, shutdown complete"),
        Err(_) => warn!(
            timeout_seconds = shutdown_timeout.as_secs(),
            "Executor still busy at shutdown, remaining queued tasks are abandoned"
        ),
    }

    Ok(())
}

/// Validate a deploy configuration and describe what it routes
pub fn execute_validate_command(path: &Path) -> Result<String, CliError> {
    let config = DeployConfig::load_from_file(path)?;
    Ok(summarize(path, &config))
}

/// Human-readable overview of a validated configuration
pub fn summarize(path: &Path, config: &DeployConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Configuration OK: {}", path.display());
    let _ = match config.queue_capacity() {
        Some(capacity) => writeln!(out, "Max queue length: {}", capacity),
        None => writeln!(out, "Max queue length: unbounded"),
    };

    for (name, repo) in &config.repos {
        let _ = writeln!(out, "{}", name);
        for (event, script) in &repo.events {
            let refs = match &script.refs {
                Some(refs) => refs.join(", "),
                None => "all".to_string(),
            };
            let _ = writeln!(
                out,
                "  {} -> {} (cwd {}, refs: {})",
                event,
                script.run.display(),
                script.working_directory().display(),
                refs
            );
        }
    }

    out
}

/// Compute the signature header for a payload file or standard input
pub fn execute_sign_command(secret: &WebhookSecret, payload: &Path) -> Result<String, CliError> {
    let body = if payload == Path::new("-") {
        let mut buffer = Vec::new();
        std::io::stdin().read_to_end(&mut buffer)?;
        buffer
    } else {
        std::fs::read(payload)?
    };

    compute_signature(&body, secret.expose_secret()).map_err(|e| CliError::CommandFailed {
        message: e.to_string(),
    })
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
