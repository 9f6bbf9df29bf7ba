//! # Autodeploy HTTP Service
//!
//! HTTP front end of the Autodeploy pipeline.
//!
//! This crate provides:
//! - `GET /`: informational text, useful as a liveness probe
//! - `POST /`: webhook delivery endpoint
//!
//! A delivery is checked in a fixed order (headers, payload, repository,
//! signature, event type, ref filter, queue capacity) and the first failing
//! check decides the response. Accepted deliveries become tasks on the
//! shared [`TaskQueue`]; the response is sent before the script runs.

pub mod config;
pub mod errors;
pub mod responses;

use autodeploy_core::{verify, DeliveryId, DeployConfig, Task, TaskQueue};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::HeaderMap,
    middleware,
    response::Response,
    routing::get,
    Router,
};
use bytes::Bytes;
use std::{future::Future, future::IntoFuture, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument, warn};

pub use config::{LoggingConfig, ServerConfig, ServiceConfig};
pub use errors::{ConfigError, ServiceError, WebhookHandlerError};
pub use responses::{WebhookPayload, WebhookResponse, INFO_MESSAGE};

/// Header naming the event type (`push`, `release`, ...)
pub const EVENT_HEADER: &str = "x-github-event";

/// Header carrying the unique delivery identifier
pub const DELIVERY_HEADER: &str = "x-github-delivery";

/// Header carrying the `sha256=` HMAC signature of the body
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Event sent by the source-control host when a webhook is created
pub const PING_EVENT: &str = "ping";

/// Correlation ID header, echoed back or generated per request
pub const CORRELATION_HEADER: &str = "x-correlation-id";

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Validated deploy configuration, read-only for the process lifetime
    pub deploy_config: Arc<DeployConfig>,

    /// Producer side of the task queue
    pub queue: TaskQueue,
}

impl AppState {
    pub fn new(server: ServerConfig, deploy_config: Arc<DeployConfig>, queue: TaskQueue) -> Self {
        Self {
            server,
            deploy_config,
            queue,
        }
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let max_body_size = state.server.max_body_size;

    Router::new()
        .route("/", get(handle_info).post(handle_webhook))
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_logging_middleware))
                .into_inner(),
        )
        .with_state(state)
}

/// Bind the listener described by `server`.
pub async fn bind(server: &ServerConfig) -> Result<TcpListener, ServiceError> {
    let address = server.bind_address();
    TcpListener::bind(&address)
        .await
        .map_err(|e| ServiceError::BindFailed {
            address,
            message: e.to_string(),
        })
}

/// Serve requests on `listener` until `shutdown` resolves.
///
/// After the shutdown signal the listener stops accepting connections and
/// in-flight requests get `server.shutdown_timeout_seconds` to finish.
pub async fn start_server<F>(
    listener: TcpListener,
    state: AppState,
    shutdown: F,
) -> Result<(), ServiceError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let shutdown_timeout = Duration::from_secs(state.server.shutdown_timeout_seconds);
    let app = create_router(state);

    match listener.local_addr() {
        Ok(addr) => info!("Starting HTTP server on {}", addr),
        Err(e) => warn!(error = %e, "Starting HTTP server on unknown address"),
    }

    let (fired_tx, fired_rx) = tokio::sync::oneshot::channel::<()>();
    let signal = async move {
        shutdown.await;
        info!(
            "Shutdown requested, waiting up to {}s for in-flight requests",
            shutdown_timeout.as_secs()
        );
        let _ = fired_tx.send(());
    };

    let deadline = async move {
        match fired_rx.await {
            Ok(()) => tokio::time::sleep(shutdown_timeout).await,
            // Server ended without a shutdown request.
            Err(_) => std::future::pending::<()>().await,
        }
    };

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .into_future();

    tokio::select! {
        result = server => {
            result.map_err(|e| ServiceError::ServerFailed {
                message: e.to_string(),
            })?;
        }
        _ = deadline => {
            warn!(
                timeout_seconds = shutdown_timeout.as_secs(),
                "Graceful shutdown timed out, dropping remaining connections"
            );
        }
    }

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Resolves on SIGINT (Ctrl+C) or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Informational response for curious visitors and liveness probes
async fn handle_info() -> &'static str {
    INFO_MESSAGE
}

/// Handle a webhook delivery
///
/// Order of checks:
/// 1. `X-GitHub-Event` and `X-GitHub-Delivery` headers present
/// 2. Body is JSON with `repository.full_name`
/// 3. Repository is configured (provides the secret)
/// 4. `X-Hub-Signature-256` matches the body
/// 5. Event type is configured for the repository (`ping` is acknowledged)
/// 6. Ref passes the script's ref filter
/// 7. Queue has room
#[instrument(skip(state, headers, body), fields(delivery_id, event_type, repository))]
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<WebhookResponse, WebhookHandlerError> {
    let event_type = required_header(&headers, EVENT_HEADER)?;
    let delivery_id = DeliveryId::new(required_header(&headers, DELIVERY_HEADER)?)?;

    let span = tracing::Span::current();
    span.record("delivery_id", delivery_id.as_str());
    span.record("event_type", event_type);

    let payload: WebhookPayload =
        serde_json::from_slice(&body).map_err(|e| WebhookHandlerError::MalformedPayload {
            message: e.to_string(),
        })?;
    let repository = payload.repository.full_name.as_str();
    span.record("repository", repository);

    let repo_config = state.deploy_config.repository(repository)?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    if !verify(&body, repo_config.secret.expose_secret(), signature) {
        return Err(WebhookHandlerError::SignatureInvalid {
            repository: repository.to_string(),
        });
    }

    if event_type == PING_EVENT {
        info!(delivery_id = %delivery_id, repository = %repository, "Ping delivery acknowledged");
        return Ok(WebhookResponse::Pong);
    }

    let script = match state.deploy_config.resolve(
        repository,
        event_type,
        payload.git_ref.as_deref(),
    ) {
        Ok(script) => script,
        Err(e) if e.is_informational() => {
            debug!("Response: 200 - {}", e);
            return Ok(WebhookResponse::Ignored {
                message: e.to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    let task = Task::new(delivery_id.clone(), repository, event_type, script.clone());
    let depth = state.queue.enqueue(task)?;

    let response = WebhookResponse::Accepted {
        delivery_id,
        repository: repository.to_string(),
    };
    info!(
        queue_depth = depth,
        queue_capacity = ?state.queue.capacity(),
        "Response: 200 - {}",
        response
    );

    Ok(response)
}

/// Read a header that must be present, non-empty and valid UTF-8.
fn required_header<'a>(
    headers: &'a HeaderMap,
    name: &'static str,
) -> Result<&'a str, WebhookHandlerError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(WebhookHandlerError::MissingHeader { name })
}

// ============================================================================
// Middleware
// ============================================================================

/// Tags every request with a correlation ID and logs its completion together
/// with the delivery it carried, if any.
async fn request_logging_middleware(
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let start = std::time::Instant::now();
    let method = request.method().clone();
    let delivery_id = request
        .headers()
        .get(DELIVERY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let correlation_id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    request.extensions_mut().insert(correlation_id.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = correlation_id.parse() {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }

    let status = response.status();
    let duration_ms = start.elapsed().as_millis() as u64;
    if status.is_server_error() {
        error!(%correlation_id, %delivery_id, %method, %status, duration_ms, "Request failed");
    } else if status.is_client_error() {
        warn!(%correlation_id, %delivery_id, %method, %status, duration_ms, "Request rejected");
    } else {
        info!(%correlation_id, %delivery_id, %method, %status, duration_ms, "Request completed");
    }

    response
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
