//! FIFO hand-off of task identifiers from producers to workers (C2).
//!
//! A thin wrapper over `tokio::sync::mpsc::unbounded_channel`: ordering
//! comes from the channel itself, and at-least-once delivery falls out of
//! letting a caller `push` the same id again (worker-loss recovery, the
//! sweep in [`crate::worker_pool`]) rather than anything in this module
//! tracking in-flight state.

use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// Producer/consumer handle onto the task queue. Cheaply cloneable; every
/// clone's `push` feeds the same consumer.
#[derive(Clone)]
pub struct Queue {
    sender: mpsc::UnboundedSender<String>,
}

/// The consuming half, held by exactly one task (typically fanned out to
/// `worker_count` pop loops sharing the same receiver behind a mutex would
/// defeat the point of a channel, so each worker calls `pop` on its own
/// clone of the queue and they race for items via the channel itself).
pub struct QueueHandle {
    queue: Queue,
    receiver: mpsc::UnboundedReceiver<String>,
}

impl Queue {
    pub fn new() -> QueueHandle {
        let (sender, receiver) = mpsc::unbounded_channel();
        QueueHandle {
            queue: Queue { sender },
            receiver,
        }
    }

    /// Enqueue a task id. Never blocks, never fails while the receiver is
    /// alive.
    pub fn push(&self, task_id: impl Into<String>) {
        // An error here only happens if every receiver has been dropped,
        // which only happens at shutdown; there is nothing to recover.
        let _ = self.sender.send(task_id.into());
    }
}

impl QueueHandle {
    pub fn sender(&self) -> Queue {
        self.queue.clone()
    }

    pub fn push(&self, task_id: impl Into<String>) {
        self.queue.push(task_id);
    }

    /// Wait up to `wait` for the next task id. `Ok(None)` on timeout,
    /// `Err(())` once every sender has been dropped.
    pub async fn pop(&mut self, wait: Duration) -> Result<Option<String>, ()> {
        match timeout(wait, self.receiver.recv()).await {
            Ok(Some(task_id)) => Ok(Some(task_id)),
            Ok(None) => Err(()),
            Err(_) => Ok(None),
        }
    }
}

impl Default for QueueHandle {
    fn default() -> Self {
        Queue::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_then_pop_round_trips_in_order() {
        let mut handle = Queue::new();
        let queue = handle.sender();
        queue.push("task-1");
        queue.push("task-2");

        assert_eq!(
            handle.pop(Duration::from_millis(50)).await,
            Ok(Some("task-1".to_string()))
        );
        assert_eq!(
            handle.pop(Duration::from_millis(50)).await,
            Ok(Some("task-2".to_string()))
        );
    }

    #[tokio::test]
    async fn pop_times_out_when_empty() {
        let mut handle = Queue::new();
        assert_eq!(handle.pop(Duration::from_millis(10)).await, Ok(None));
    }

    #[tokio::test]
    async fn redelivery_is_just_another_push() {
        let mut handle = Queue::new();
        let queue = handle.sender();
        queue.push("lost-task");
        let _ = handle.pop(Duration::from_millis(10)).await;
        queue.push("lost-task");
        assert_eq!(
            handle.pop(Duration::from_millis(10)).await,
            Ok(Some("lost-task".to_string()))
        );
    }
}
