//! Real-time per-task output fan-out (C3).
//!
//! Keyed by task id: each task gets a `broadcast::Sender<HubEvent>` plus a
//! ring buffer of recent events so a subscriber attaching mid-task (a
//! WebSocket reconnect) gets caught up before joining the live stream
//! (§4.3). The map itself is a `RwLock<HashMap<..>>` — reads (subscribe)
//! are far more frequent than writes (a task's first publish).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Wire shape of every event published through the hub (§6.2). Hand-
/// written `Serialize` rather than a derived tagged enum: the envelope's
/// `task_id`/`session_id`/`timestamp`/`seq` fields sit as siblings of
/// `data`, one level shallower than a `#[serde(tag, content)]` enum would
/// place them.
#[derive(Debug, Clone)]
pub struct HubEvent {
    pub kind: HubEventKind,
    pub task_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub seq: u64,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubEventKind {
    Created,
    Running,
    Output,
    Completed,
    Failed,
    Cancelled,
}

impl HubEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HubEventKind::Created => "task.created",
            HubEventKind::Running => "task.running",
            HubEventKind::Output => "task.output",
            HubEventKind::Completed => "task.completed",
            HubEventKind::Failed => "task.failed",
            HubEventKind::Cancelled => "task.cancelled",
        }
    }
}

impl Serialize for HubEvent {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("HubEvent", 6)?;
        state.serialize_field("type", self.kind.as_str())?;
        state.serialize_field("task_id", &self.task_id)?;
        state.serialize_field("session_id", &self.session_id)?;
        state.serialize_field("timestamp", &self.timestamp.to_rfc3339())?;
        state.serialize_field("seq", &self.seq)?;
        state.serialize_field("data", &self.data)?;
        state.end()
    }
}

const BROADCAST_CAPACITY: usize = 1024;

struct TaskChannel {
    sender: broadcast::Sender<HubEvent>,
    ring: VecDeque<HubEvent>,
    ring_capacity: usize,
    next_seq: u64,
}

impl TaskChannel {
    fn new(ring_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            sender,
            ring: VecDeque::with_capacity(ring_capacity.min(64)),
            ring_capacity,
            next_seq: 0,
        }
    }

    fn publish(&mut self, mut event: HubEvent) {
        event.seq = self.next_seq;
        self.next_seq += 1;
        self.ring.push_back(event.clone());
        while self.ring.len() > self.ring_capacity {
            self.ring.pop_front();
        }
        // No receivers subscribed yet is not an error; the event still
        // lives in the ring for the next subscriber.
        let _ = self.sender.send(event);
    }
}

/// Process-wide publish/subscribe hub, one entry per active task.
pub struct Hub {
    channels: RwLock<HashMap<String, TaskChannel>>,
    ring_capacity: usize,
}

/// A live subscription: replayed ring-buffer events followed by the live
/// broadcast stream.
pub struct Subscription {
    backlog: VecDeque<HubEvent>,
    receiver: broadcast::Receiver<HubEvent>,
}

impl Subscription {
    /// Next event, draining the replayed backlog before the live stream.
    /// `None` once the channel closes, or once this subscriber falls
    /// behind the ring buffer (`RecvError::Lagged`) — a lagged subscriber
    /// is disconnected rather than resumed, since silently skipping ahead
    /// would desynchronize it from the sequence it already observed.
    pub async fn next(&mut self) -> Option<HubEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("hub subscriber lagged, dropped {skipped} events, disconnecting");
                None
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

impl Hub {
    pub fn new(ring_capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            ring_capacity,
        }
    }

    /// Publish an event for `task_id`, creating its channel on first use.
    pub fn publish(
        &self,
        task_id: &str,
        session_id: &str,
        kind: HubEventKind,
        data: serde_json::Value,
    ) {
        let mut channels = self.channels.write().expect("hub lock poisoned");
        let channel = channels
            .entry(task_id.to_string())
            .or_insert_with(|| TaskChannel::new(self.ring_capacity));
        channel.publish(HubEvent {
            kind,
            task_id: task_id.to_string(),
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            seq: 0,
            data,
        });
    }

    /// Subscribe to a task's channel, creating it if this is the first
    /// subscriber to arrive before any publish.
    pub fn subscribe(&self, task_id: &str) -> Subscription {
        let mut channels = self.channels.write().expect("hub lock poisoned");
        let channel = channels
            .entry(task_id.to_string())
            .or_insert_with(|| TaskChannel::new(self.ring_capacity));
        Subscription {
            backlog: channel.ring.clone(),
            receiver: channel.sender.subscribe(),
        }
    }

    /// Drop a task's channel once it is terminal and no longer needs
    /// replay history retained indefinitely.
    pub fn retire(&self, task_id: &str) {
        self.channels.write().expect("hub lock poisoned").remove(task_id);
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(256)
    }
}

pub type SharedHub = Arc<Hub>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_replays_ring_buffer_before_live_events() {
        let hub = Hub::new(256);
        hub.publish(
            "task-1",
            "session-1",
            HubEventKind::Created,
            serde_json::json!({}),
        );
        hub.publish(
            "task-1",
            "session-1",
            HubEventKind::Running,
            serde_json::json!({}),
        );

        let mut sub = hub.subscribe("task-1");
        let first = sub.next().await.unwrap();
        assert_eq!(first.kind, HubEventKind::Created);
        let second = sub.next().await.unwrap();
        assert_eq!(second.kind, HubEventKind::Running);

        hub.publish(
            "task-1",
            "session-1",
            HubEventKind::Completed,
            serde_json::json!({"cost_usd": 0.01}),
        );
        let third = sub.next().await.unwrap();
        assert_eq!(third.kind, HubEventKind::Completed);
    }

    #[tokio::test]
    async fn ring_buffer_evicts_oldest_past_capacity() {
        let hub = Hub::new(2);
        for _ in 0..5 {
            hub.publish(
                "task-1",
                "session-1",
                HubEventKind::Output,
                serde_json::json!({"chunk": "x"}),
            );
        }
        let mut sub = hub.subscribe("task-1");
        let first = sub.next().await.unwrap();
        // Only the last 2 of 5 published events survive in the ring.
        assert_eq!(first.seq, 3);
    }

    #[tokio::test]
    async fn seq_is_monotonic_per_task() {
        let hub = Hub::new(256);
        hub.publish("task-1", "s", HubEventKind::Created, serde_json::json!({}));
        hub.publish("task-1", "s", HubEventKind::Running, serde_json::json!({}));
        let mut sub = hub.subscribe("task-1");
        assert_eq!(sub.next().await.unwrap().seq, 0);
        assert_eq!(sub.next().await.unwrap().seq, 1);
    }
}
