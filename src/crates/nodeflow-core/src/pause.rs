//! Graph-wide pause flag and pending resume continuations
//!
//! While any node is halted at a breakpoint the graph is frozen: every other
//! node parks at its next execution checkpoint until the flag clears.
//!
//! ```text
//!   request_pause(N) ──► paused = [.., N]   flag = true   ──► N parks on its ResumeWaiter
//!   resume(N)        ──► paused = [..]      flag = !empty ──► N's waiter fires
//!   clear()          ──► paused = []        flag = false  ──► every waiter is dropped
//! ```
//!
//! Continuations are keyed by node id, so two nodes halting at the same time
//! each keep their own waiter; [`PauseController::paused_node`] reports the
//! most recent one.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{oneshot, watch};

use crate::node::{GraphNode, NodeId};

/// How a halted node was released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeSignal {
    /// `resume` was called for the node
    Resumed,
    /// The node was removed from its graph; nobody is left to resume it
    Detached,
    /// The pause state was cleared by a session stop
    Cancelled,
}

/// Suspension point handed to a node when it halts
#[derive(Debug)]
pub struct ResumeWaiter {
    rx: oneshot::Receiver<ResumeSignal>,
}

impl ResumeWaiter {
    /// Wait for the continuation; a dropped continuation counts as cancelled
    pub async fn wait(self) -> ResumeSignal {
        self.rx.await.unwrap_or(ResumeSignal::Cancelled)
    }
}

struct PausedEntry {
    node: Weak<GraphNode>,
    continuation: oneshot::Sender<ResumeSignal>,
}

#[derive(Default)]
struct PauseState {
    /// Halted nodes in halt order
    order: Vec<NodeId>,
    entries: HashMap<NodeId, PausedEntry>,
}

impl PauseState {
    fn take(&mut self, node: NodeId) -> Option<PausedEntry> {
        let entry = self.entries.remove(&node)?;
        self.order.retain(|id| *id != node);
        Some(entry)
    }
}

/// Owner of the `hasPaused` flag for one session
pub struct PauseController {
    state: Mutex<PauseState>,
    flag: watch::Sender<bool>,
}

impl PauseController {
    pub fn new() -> Self {
        let (flag, _rx) = watch::channel(false);
        Self {
            state: Mutex::new(PauseState::default()),
            flag,
        }
    }

    /// Whether any node is halted
    pub fn has_paused(&self) -> bool {
        !self.state.lock().order.is_empty()
    }

    /// Most recently halted node
    pub fn paused_node(&self) -> Option<NodeId> {
        self.state.lock().order.last().copied()
    }

    /// All halted nodes, oldest first
    pub fn paused_nodes(&self) -> Vec<NodeId> {
        self.state.lock().order.clone()
    }

    pub fn is_paused(&self, node: NodeId) -> bool {
        self.state.lock().entries.contains_key(&node)
    }

    /// Receiver that observes every change of the pause flag
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.flag.subscribe()
    }

    /// Mark `node` as halted and store its continuation.
    ///
    /// The returned waiter completes once [`resume`](Self::resume) is called
    /// for the node.
    pub fn request_pause(&self, node: &Arc<GraphNode>) -> ResumeWaiter {
        let (tx, rx) = oneshot::channel();
        let id = node.id();
        {
            let mut state = self.state.lock();
            state.take(id);
            state.order.push(id);
            state.entries.insert(
                id,
                PausedEntry {
                    node: Arc::downgrade(node),
                    continuation: tx,
                },
            );
            self.flag.send_replace(true);
        }
        node.set_paused_on_breakpoint(true);
        ResumeWaiter { rx }
    }

    /// Fire the stored continuation for `node`.
    ///
    /// Returns `false` without touching any state when nothing is pending.
    pub fn resume(&self, node: NodeId) -> bool {
        self.release(node, ResumeSignal::Resumed)
    }

    /// Release `node` with the given signal
    pub(crate) fn release(&self, node: NodeId, signal: ResumeSignal) -> bool {
        let entry = {
            let mut state = self.state.lock();
            let entry = state.take(node);
            if entry.is_some() {
                self.flag.send_replace(!state.order.is_empty());
            }
            entry
        };
        let Some(entry) = entry else {
            return false;
        };
        if let Some(handle) = entry.node.upgrade() {
            handle.set_paused_on_breakpoint(false);
        }
        // The waiter may already be gone if its execution was dropped.
        let _ = entry.continuation.send(signal);
        true
    }

    /// Drop every pending continuation and clear the flag.
    ///
    /// Waiting nodes observe [`ResumeSignal::Cancelled`].
    pub fn clear(&self) -> usize {
        let entries: Vec<PausedEntry> = {
            let mut state = self.state.lock();
            state.order.clear();
            let drained = state.entries.drain().map(|(_, entry)| entry).collect();
            self.flag.send_replace(false);
            drained
        };
        let count = entries.len();
        for entry in entries {
            if let Some(handle) = entry.node.upgrade() {
                handle.set_paused_on_breakpoint(false);
            }
        }
        count
    }
}

impl Default for PauseController {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PauseController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PauseController")
            .field("paused", &self.paused_nodes())
            .finish()
    }
}
