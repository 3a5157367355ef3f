//! # Event Bus
//!
//! Everything the engine observes or does is published here: membership
//! changes, confirmed state changes, query and discovery failures, and the
//! life of every transition request. The dashboard websocket forwards these
//! events verbatim; tests subscribe to them instead of sleeping.

use lifecycle_protocol::{LifecycleState, TransitionOutcome, TransitionRequest};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ManagerEvent {
    /// A directory poll reported a node for the first time.
    NodeDiscovered { node: String },

    /// A directory poll no longer reports the node.
    NodeRemoved { node: String },

    /// A state poll confirmed a new state.
    StateChanged {
        node: String,
        from: LifecycleState,
        to: LifecycleState,
    },

    /// The node's state query started failing; its state is now stale.
    QueryFailed { node: String, error: String },

    /// A stale node answered again with an unchanged state.
    NodeRecovered { node: String, state: LifecycleState },

    /// Membership was kept because discovery failed.
    DiscoveryFailed { error: String, consecutive: u32 },

    TransitionSubmitted { request: TransitionRequest },

    TransitionCompleted { outcome: TransitionOutcome },
}

/// A wrapper around a tokio broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ManagerEvent>,
}

impl EventBus {
    /// Slow subscribers skip old events (`Lagged`) instead of blocking publishers.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    pub fn publish(&self, event: ManagerEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
