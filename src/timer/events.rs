use chrono::{DateTime, Utc};
use log::debug;
use tokio::sync::broadcast;

use crate::db::models::Direction;

/// Typed notifications for UI-facing consumers. Replaces ad hoc broadcast
/// names with one enum carried over a `tokio::sync::broadcast` channel;
/// emitting with no subscribers is fine.
#[derive(Debug, Clone)]
pub enum StopwatchEvent {
    /// The accumulated total changed (sync, consolidation or a local pause).
    BaseTimeUpdated(f64),
    RemoteSessionStarted {
        device: String,
        started_at: DateTime<Utc>,
        direction: Direction,
    },
    RemoteSessionStopped {
        device: String,
    },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StopwatchEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StopwatchEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: StopwatchEvent) {
        if self.sender.send(event).is_err() {
            debug!("Event emitted with no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
