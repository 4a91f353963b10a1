//! Handle given to a compute step while it runs

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{GraphError, Result};
use crate::node::{ExecutionOutcome, GraphNode, NodeId};
use crate::port::ExecutionMode;
use crate::session::GraphSession;

/// Access to the running node's ports and to the session it runs in
pub struct ExecutionContext<'a> {
    node: &'a Arc<GraphNode>,
    session: &'a GraphSession,
    /// Session generation the compute step was started in
    generation: u64,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn new(node: &'a Arc<GraphNode>, session: &'a GraphSession, generation: u64) -> Self {
        Self {
            node,
            session,
            generation,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node.id()
    }

    pub fn title(&self) -> &str {
        self.node.title()
    }

    pub fn node(&self) -> &Arc<GraphNode> {
        self.node
    }

    pub fn session(&self) -> &GraphSession {
        self.session
    }

    /// Value currently held by the output feeding input `slot`.
    ///
    /// `None` when the input is unconnected or upstream has not produced yet.
    pub fn input(&self, slot: usize) -> Option<Value> {
        let (source, source_slot) = self.session.graph().input_source(self.node.id(), slot)?;
        source.output_value(source_slot)
    }

    /// Typed view of [`input`](Self::input)
    pub fn input_as<T: DeserializeOwned>(&self, slot: usize) -> Result<Option<T>> {
        match self.input(slot) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn set_output(&mut self, slot: usize, value: impl Into<Value>) -> Result<()> {
        self.node.set_output_value(slot, value.into())
    }

    /// Whether the session was stopped since this compute step started
    pub fn is_stale(&self) -> bool {
        self.session.generation() != self.generation
    }

    /// Fire event output `slot`, running every connected node nested inside
    /// this one. Muted targets are skipped, and nothing runs once the session
    /// has been stopped since this compute step started.
    pub async fn trigger(&mut self, slot: usize) -> Result<Vec<ExecutionOutcome>> {
        let port = self.node.output_port(slot)?;
        if !port.is_event() {
            return Err(GraphError::incompatible(
                format!("{}[{}]", self.node.title(), slot),
                "trigger",
                "only event outputs can be triggered",
            ));
        }

        let targets = self.session.graph().event_targets(self.node.id(), slot);
        tracing::debug!(slot, targets = targets.len(), "Triggering event output");

        let mut outcomes = Vec::with_capacity(targets.len());
        for target in targets {
            if self.is_stale() {
                tracing::debug!(slot, "Session stopped since compute started, trigger dropped");
                break;
            }
            if target.mode() == ExecutionMode::Never {
                continue;
            }
            outcomes.push(target.execute(self.session).await);
        }
        Ok(outcomes)
    }
}
