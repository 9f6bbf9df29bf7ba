//! # Executor
//!
//! Single consumer of the task queue. Runs one script at a time, in the
//! order tasks were accepted, and logs the outcome of each.
//!
//! A failing script is logged and forgotten: it is never retried or
//! re-enqueued and never stops the loop. There is no execution timeout, so
//! a script that never exits blocks every task behind it.

use crate::{
    config::ScriptConfig,
    queue::{Task, TaskReceiver},
    DeliveryId, Timestamp,
};
use async_trait::async_trait;
use std::{path::Path, process::Stdio, time::Duration, time::Instant};
use tokio::{process::Command, sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, instrument, warn};

/// Log line opening the captured standard error of a failed task.
pub const STDERR_START_MARKER: &str = "START OF ERROR:";

/// Log line closing the captured standard error of a failed task.
pub const STDERR_END_MARKER: &str = "END OF ERROR";

// ============================================================================
// Command execution
// ============================================================================

/// Exit status and captured standard error of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Interface for launching a configured script and waiting for it to finish
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, script: &ScriptConfig) -> Result<CommandOutput, ExecutionError>;
}

/// Runs scripts as child processes.
///
/// Standard input is closed, standard output is discarded and standard error
/// is captured. A file the kernel refuses to execute (no `#!` line) is run
/// by [`ProcessRunner::SHELL`] instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Interpreter for executable scripts without a `#!` line
    pub const SHELL: &'static str = "/bin/sh";

    fn command(program: &Path, args: &[&Path], script: &ScriptConfig) -> Command {
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(script.working_directory())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        command
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, script: &ScriptConfig) -> Result<CommandOutput, ExecutionError> {
        let output = match Self::command(&script.run, &[], script).output().await {
            Err(e) if is_exec_format_error(&e) => {
                debug!(
                    script = %script.run.display(),
                    "No interpreter line, running with {}",
                    Self::SHELL
                );
                Self::command(Path::new(Self::SHELL), &[script.run.as_path()], script)
                    .output()
                    .await
            }
            other => other,
        }
        .map_err(|e| ExecutionError::Spawn {
            program: script.run.display().to_string(),
            message: e.to_string(),
        })?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stderr: output.stderr,
        })
    }
}

/// `ENOEXEC`: the file is executable but has no recognised binary format.
fn is_exec_format_error(error: &std::io::Error) -> bool {
    const ENOEXEC: i32 = 8;
    cfg!(unix) && error.raw_os_error() == Some(ENOEXEC)
}

// ============================================================================
// Outcomes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Succeeded,
    Failed { exit_code: Option<i32> },
    NotStarted { message: String },
}

/// Result of processing one task, published to the outcome observer
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub delivery_id: DeliveryId,
    pub repository: String,
    pub event_type: String,
    pub status: TaskStatus,
    /// Captured standard error, lossily decoded
    pub stderr: String,
    /// Time between acceptance and start of execution
    pub queued: Duration,
    /// Time spent running the script
    pub duration: Duration,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Queue consumer loop
pub struct Executor<R = ProcessRunner> {
    receiver: TaskReceiver,
    runner: R,
    observer: Option<mpsc::UnboundedSender<TaskOutcome>>,
}

impl Executor<ProcessRunner> {
    /// Create an executor that runs scripts as child processes
    pub fn new(receiver: TaskReceiver) -> Self {
        Self::with_runner(receiver, ProcessRunner)
    }
}

impl<R: CommandRunner + 'static> Executor<R> {
    pub fn with_runner(receiver: TaskReceiver, runner: R) -> Self {
        Self {
            receiver,
            runner,
            observer: None,
        }
    }

    /// Publish every finished task's outcome to `observer`.
    pub fn with_outcome_observer(mut self, observer: mpsc::UnboundedSender<TaskOutcome>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Spawn the consumer loop onto the current tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process tasks until every producer handle has been dropped.
    pub async fn run(mut self) {
        info!("Executor started");

        while let Some(queued) = self.receiver.dequeue().await {
            let outcome = self.execute(queued.task()).await;

            // Completes the task and frees its queue slot.
            drop(queued);

            if let Some(observer) = &self.observer {
                if observer.send(outcome).is_err() {
                    warn!("Outcome observer dropped; outcomes will no longer be published");
                    self.observer = None;
                }
            }
        }

        info!("Task queue closed, executor stopping");
    }

    /// Run one task's script and log the result.
    #[instrument(skip(self, task), fields(delivery_id = %task.delivery_id))]
    pub async fn execute(&self, task: &Task) -> TaskOutcome {
        let id = &task.delivery_id;
        let queued = Timestamp::now().duration_since(task.enqueued_at);
        info!(
            delivery_id = %id,
            repository = %task.repository,
            event_type = %task.event_type,
            script = %task.script.run.display(),
            enqueued_at = %task.enqueued_at,
            queued_ms = queued.as_millis() as u64,
            "Task {} - started processing",
            id
        );

        let started = Instant::now();
        let result = self.runner.run(&task.script).await;
        let duration = started.elapsed();

        let (status, stderr) = match result {
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                if output.success() {
                    info!(
                        delivery_id = %id,
                        duration_ms = duration.as_millis() as u64,
                        "Task {} - successfully completed",
                        id
                    );
                    (TaskStatus::Succeeded, stderr)
                } else {
                    error!(
                        delivery_id = %id,
                        exit_code = ?output.exit_code,
                        duration_ms = duration.as_millis() as u64,
                        "Task {} - ended with an error!",
                        id
                    );
                    log_stderr(id, &stderr);
                    (
                        TaskStatus::Failed {
                            exit_code: output.exit_code,
                        },
                        stderr,
                    )
                }
            }
            Err(e) => {
                error!(delivery_id = %id, error = %e, "Task {} - could not be started", id);
                (
                    TaskStatus::NotStarted {
                        message: e.to_string(),
                    },
                    String::new(),
                )
            }
        };

        TaskOutcome {
            delivery_id: id.clone(),
            repository: task.repository.clone(),
            event_type: task.event_type.clone(),
            status,
            stderr,
            queued,
            duration,
        }
    }
}

/// Lines logged for a failed task's standard error, markers included.
///
/// Empty when the script wrote nothing but whitespace.
pub fn stderr_report(delivery_id: &DeliveryId, stderr: &str) -> Vec<String> {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let mut lines = Vec::with_capacity(trimmed.lines().count() + 2);
    lines.push(format!("Task {} - {}", delivery_id, STDERR_START_MARKER));
    lines.extend(
        trimmed
            .lines()
            .map(|line| format!("Task {} - {}", delivery_id, line)),
    );
    lines.push(format!("Task {} - {}", delivery_id, STDERR_END_MARKER));
    lines
}

fn log_stderr(delivery_id: &DeliveryId, stderr: &str) {
    for line in stderr_report(delivery_id, stderr) {
        error!(delivery_id = %delivery_id, "{}", line);
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("Failed to start '{program}': {message}")]
    Spawn { program: String, message: String },
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
