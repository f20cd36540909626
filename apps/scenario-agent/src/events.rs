use serde::Serialize;
use tokio::sync::broadcast;

use crate::lifecycle::ScenarioState;

/// Event pushed to locally connected UI subscribers over the log-stream
/// channel. Transient; never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// One line of scenario output.
    Log { scenario: String, line: String },
    /// A lifecycle state transition.
    Status { state: ScenarioState, message: String },
    /// Best-effort diagnostic for a background failure (relay, proxy).
    Diagnostic { message: String },
}

/// Fan-out of agent events to local UI subscribers.
///
/// Built on a broadcast channel so a slow or disconnected subscriber can
/// never stall delivery to others: subscribers that fall behind skip the
/// lagged events and keep receiving.
#[derive(Clone)]
pub struct LocalEventBroadcaster {
    tx: broadcast::Sender<AgentEvent>,
}

impl LocalEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    /// Deliver an event to all current subscribers. A send with no
    /// subscribers is not an error.
    pub fn publish(&self, event: AgentEvent) {
        let _ = self.tx.send(event);
    }
}
