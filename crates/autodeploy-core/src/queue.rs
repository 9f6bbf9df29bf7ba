//! # Task Queue
//!
//! Bounded FIFO buffer between request handlers (producers) and the single
//! executor (consumer).
//!
//! Ordering comes from an unbounded `tokio::sync::mpsc` channel. The capacity
//! bound comes from a semaphore: every accepted task carries one permit until
//! the executor finishes with it, so a task occupies its slot from a
//! successful [`TaskQueue::enqueue`] until the [`QueuedTask`] is dropped.
//! Producers never wait; a full queue rejects the task immediately.

use crate::{config::ScriptConfig, DeliveryId, Timestamp};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

// ============================================================================
// Task
// ============================================================================

/// A request to run one script, created after a delivery was verified and
/// routed.
#[derive(Debug, Clone)]
pub struct Task {
    pub delivery_id: DeliveryId,
    pub repository: String,
    pub event_type: String,
    pub script: ScriptConfig,
    pub enqueued_at: Timestamp,
}

impl Task {
    pub fn new(
        delivery_id: DeliveryId,
        repository: impl Into<String>,
        event_type: impl Into<String>,
        script: ScriptConfig,
    ) -> Self {
        Self {
            delivery_id,
            repository: repository.into(),
            event_type: event_type.into(),
            script,
            enqueued_at: Timestamp::now(),
        }
    }
}

/// Task handed to the consumer together with its queue slot.
///
/// Dropping the value marks the task complete and frees the slot.
#[derive(Debug)]
pub struct QueuedTask {
    task: Task,
    _slot: Slot,
}

impl QueuedTask {
    pub fn task(&self) -> &Task {
        &self.task
    }
}

#[derive(Debug)]
struct Slot {
    _permit: Option<OwnedSemaphorePermit>,
    outstanding: Arc<AtomicUsize>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

// ============================================================================
// Queue handles
// ============================================================================

/// Producer handle. Cheap to clone; every request handler may hold one.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    sender: mpsc::UnboundedSender<QueuedTask>,
    slots: Option<Arc<Semaphore>>,
    capacity: Option<usize>,
    outstanding: Arc<AtomicUsize>,
}

/// Consumer handle. Owned by the executor.
#[derive(Debug)]
pub struct TaskReceiver {
    receiver: mpsc::UnboundedReceiver<QueuedTask>,
}

impl TaskQueue {
    /// Create a queue holding at most `capacity` tasks (`None` = unbounded).
    ///
    /// A capacity of `Some(0)` is treated as unbounded, matching the meaning
    /// of `max_queue_length: 0` in the deploy configuration.
    pub fn new(capacity: Option<usize>) -> (Self, TaskReceiver) {
        let capacity = capacity.filter(|c| *c > 0);
        let (sender, receiver) = mpsc::unbounded_channel();

        let queue = Self {
            sender,
            slots: capacity.map(|c| Arc::new(Semaphore::new(c))),
            capacity,
            outstanding: Arc::new(AtomicUsize::new(0)),
        };

        (queue, TaskReceiver { receiver })
    }

    /// Add a task at the tail of the queue without waiting.
    ///
    /// Returns the number of outstanding tasks (including this one) on success.
    ///
    /// # Errors
    /// - `QueueError::Full` - capacity reached; the task is not stored
    /// - `QueueError::Closed` - the consumer is gone
    pub fn enqueue(&self, task: Task) -> Result<usize, QueueError> {
        let permit = match &self.slots {
            Some(slots) => Some(slots.clone().try_acquire_owned().map_err(|_| {
                QueueError::Full {
                    capacity: self.capacity.unwrap_or_default(),
                }
            })?),
            None => None,
        };

        let depth = self.outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        let slot = Slot {
            _permit: permit,
            outstanding: self.outstanding.clone(),
        };

        let delivery_id = task.delivery_id.clone();
        self.sender
            .send(QueuedTask { task, _slot: slot })
            .map_err(|_| QueueError::Closed)?;

        debug!(delivery_id = %delivery_id, depth, "Task enqueued");
        Ok(depth)
    }

    /// Number of accepted tasks that have not completed yet.
    pub fn len(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity bound, `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl TaskReceiver {
    /// Remove the task at the head of the queue, waiting until one exists.
    ///
    /// Returns `None` once every producer handle has been dropped and the
    /// queue is drained.
    pub async fn dequeue(&mut self) -> Option<QueuedTask> {
        self.receiver.recv().await
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Task queue is full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("Task queue is closed")]
    Closed,
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
