//! Notifications for the presentation layer and debugger panels
//!
//! The engine never calls into UI code directly. Canvas focus requests,
//! halted-node changes and link errors are published on a broadcast bus and
//! whoever renders the graph subscribes to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::LinkErrorKind;
use crate::node::NodeId;
use crate::port::ExecutionMode;

/// Engine event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GraphEvent {
    /// A node halted at its breakpoint
    #[serde(rename = "node.paused")]
    NodePaused { node: NodeId, title: String },

    /// A halted node was resumed
    #[serde(rename = "node.resumed")]
    NodeResumed { node: NodeId },

    /// Best-effort request to center the canvas on a node
    #[serde(rename = "canvas.focus")]
    FocusRequested { node: NodeId },

    /// A compute step returned an error or panicked
    #[serde(rename = "node.compute_failed")]
    ComputeFailed { node: NodeId, error: String },

    /// A node's execution mode changed after a connection change
    #[serde(rename = "node.mode_changed")]
    ModeChanged { node: NodeId, mode: ExecutionMode },

    /// A link was refused by a structural rule
    #[serde(rename = "link.rejected")]
    LinkRejected {
        kind: LinkErrorKind,
        origin: NodeId,
        origin_slot: usize,
        target: NodeId,
    },

    #[serde(rename = "session.started")]
    SessionStarted,

    #[serde(rename = "session.stopped")]
    SessionStopped,
}

/// Event with the time it was published
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    pub at: DateTime<Utc>,
    pub event: GraphEvent,
}

/// Broadcast bus shared by a graph and its sessions
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event; dropped silently when nobody listens
    pub fn publish(&self, event: GraphEvent) {
        let _ = self.tx.send(EngineEvent {
            at: Utc::now(),
            event,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
