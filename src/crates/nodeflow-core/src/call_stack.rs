//! Live stack of executing nodes, innermost last
//!
//! Debugger panels read it to show where execution currently is. Only the
//! node execution loop pushes and pops; a session stop clears it wholesale.

use serde::{Deserialize, Serialize};

use crate::node::NodeId;

/// One entry on the call stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFrame {
    pub node: NodeId,
    pub title: String,
}

/// Ordered frames in nesting order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallStack {
    frames: Vec<CallFrame>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: CallFrame) {
        self.frames.push(frame);
    }

    /// Remove the innermost frame belonging to `node`.
    ///
    /// Under strict nesting this is the last element. Top-level executions
    /// interleaved by the cooperative scheduler can exit out of order, in
    /// which case the node's own frame is removed rather than someone else's.
    pub fn pop(&mut self, node: NodeId) -> Option<CallFrame> {
        let index = self.frames.iter().rposition(|f| f.node == node)?;
        if index + 1 != self.frames.len() {
            tracing::debug!(
                node = %node,
                depth = self.frames.len(),
                position = index,
                "Popping call frame out of nesting order"
            );
        }
        Some(self.frames.remove(index))
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    pub fn top(&self) -> Option<&CallFrame> {
        self.frames.last()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.frames.iter().any(|f| f.node == node)
    }

    /// Number of frames owned by `node`
    pub fn depth_of(&self, node: NodeId) -> usize {
        self.frames.iter().filter(|f| f.node == node).count()
    }
}
