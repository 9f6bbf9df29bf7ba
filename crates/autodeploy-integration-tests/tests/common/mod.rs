//! Common test utilities for Autodeploy integration tests
//!
//! This module provides:
//! - A harness wiring a real router, queue and executor around scripts
//!   written into a temporary directory
//! - Signed request builders
//! - Log capture for asserting on emitted log lines

#![allow(dead_code)]

use anyhow::Context;
use autodeploy_api::{
    create_router, AppState, ServerConfig, DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER,
};
use autodeploy_core::{compute_signature, DeployConfig, Executor, TaskOutcome, TaskQueue};
use axum::{
    body::Body,
    http::{header, Request},
    response::Response,
    Router,
};
use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};
use tempfile::TempDir;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing_subscriber::fmt::MakeWriter;

pub const REPO: &str = "acme/widgets";
pub const SECRET: &str = "integration-secret";

// ============================================================================
// Harness
// ============================================================================

/// A running pipeline: router, queue and executor sharing one configuration
pub struct TestHarness {
    pub dir: TempDir,
    pub app: Router,
    pub queue: TaskQueue,
    pub outcomes: mpsc::UnboundedReceiver<TaskOutcome>,
    pub executor: JoinHandle<()>,
}

impl TestHarness {
    /// Build a harness whose `acme/widgets` repository maps each
    /// `(event, script body, refs)` entry to a generated shell script.
    pub fn new(
        events: &[(&str, &str, Option<&[&str]>)],
        max_queue_length: usize,
    ) -> anyhow::Result<Self> {
        let dir = TempDir::new().context("creating temp dir")?;

        let mut event_map = serde_json::Map::new();
        for (event, body, refs) in events {
            let script = write_script(dir.path(), &format!("{}.sh", event), body)?;
            let mut entry = serde_json::json!({ "run": script });
            if let Some(refs) = refs {
                entry["refs"] = serde_json::json!(refs);
            }
            event_map.insert(event.to_string(), entry);
        }

        let document = serde_json::json!({
            "repos": {
                REPO: { "secret": SECRET, "events": event_map }
            },
            "maxQueueLength": max_queue_length,
        });

        Self::from_document(dir, &document)
    }

    /// Build a harness from a complete deploy configuration document.
    pub fn from_document(dir: TempDir, document: &serde_json::Value) -> anyhow::Result<Self> {
        let deploy_config = Arc::new(
            DeployConfig::from_json_str(&document.to_string())
                .context("building deploy configuration")?,
        );

        let (queue, receiver) = TaskQueue::new(deploy_config.queue_capacity());
        let (observer, outcomes) = mpsc::unbounded_channel();
        let executor = Executor::new(receiver)
            .with_outcome_observer(observer)
            .spawn();

        let state = AppState::new(ServerConfig::default(), deploy_config, queue.clone());

        Ok(Self {
            dir,
            app: create_router(state),
            queue,
            outcomes,
            executor,
        })
    }

    /// Wait for the next finished task.
    pub async fn next_outcome(&mut self) -> TaskOutcome {
        tokio::time::timeout(Duration::from_secs(30), self.outcomes.recv())
            .await
            .expect("timed out waiting for task outcome")
            .expect("executor stopped")
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// Write an executable `/bin/sh` script.
pub fn write_script(dir: &Path, name: &str, body: &str) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body))
        .with_context(|| format!("writing {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .with_context(|| format!("marking {} executable", path.display()))?;
    }

    Ok(path)
}

// ============================================================================
// Requests
// ============================================================================

pub fn push_payload(git_ref: &str) -> String {
    serde_json::json!({
        "ref": git_ref,
        "repository": { "full_name": REPO, "private": true },
        "pusher": { "name": "octocat" },
    })
    .to_string()
}

/// POST request signed with the repository secret
pub fn signed_request(event: &str, delivery: &str, body: &str) -> Request<Body> {
    let signature = compute_signature(body.as_bytes(), SECRET).expect("HMAC accepts any key");
    request_builder(event, delivery)
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// POST request builder with event and delivery headers but no signature
pub fn request_builder(event: &str, delivery: &str) -> axum::http::request::Builder {
    Request::builder()
        .method("POST")
        .uri("/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(EVENT_HEADER, event)
        .header(DELIVERY_HEADER, delivery)
}

pub async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ============================================================================
// Log capture
// ============================================================================

/// In-memory log sink for the current thread
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Route this thread's log output into a fresh buffer until the guard
    /// drops. Use with a current-thread runtime so spawned tasks log here too.
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Lines containing `needle`
    pub fn lines_with(&self, needle: &str) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }
}

pub struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter(self.0.clone())
    }
}
