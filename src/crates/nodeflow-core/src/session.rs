//! Graph session: run status, call stack and pause state for one graph
//!
//! A session is the explicit owner of everything that is shared between the
//! nodes of a running graph. It is cheap to clone; every clone refers to the
//! same state.
//!
//! # Example
//!
//! ```rust,no_run
//! use nodeflow_core::{compute_fn, EngineConfig, GraphNode, GraphSession, NodeGraph};
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let graph = Arc::new(NodeGraph::new());
//! let node = graph.add_node(GraphNode::new("hello", compute_fn(|ctx| {
//!     tracing::info!(title = ctx.title(), "running");
//!     Ok(())
//! })));
//!
//! let session = GraphSession::new(graph, EngineConfig::default());
//! session.execute(node.id()).await.unwrap();
//! # }
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::call_stack::{CallFrame, CallStack};
use crate::config::EngineConfig;
use crate::error::{GraphError, Result};
use crate::events::{EngineEvent, GraphEvent};
use crate::graph::NodeGraph;
use crate::interaction::{BreakpointAction, Cursor, InteractionOutcome, PointerEvent};
use crate::node::{ExecutionOutcome, GraphNode, NodeId};
use crate::pause::{PauseController, ResumeSignal};
use crate::port::ExecutionMode;
use crate::token::ExecutionPhase;

struct SessionInner {
    graph: Arc<NodeGraph>,
    config: EngineConfig,
    call_stack: Mutex<CallStack>,
    pause: PauseController,
    running: AtomicBool,
    /// Bumped on every stop; suspended executions from an older generation
    /// are abandoned when they wake
    generation: AtomicU64,
}

/// Shared execution state of one running graph
#[derive(Clone)]
pub struct GraphSession {
    inner: Arc<SessionInner>,
}

/// Inspector view of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: NodeId,
    pub title: String,
    pub kind: String,
    pub mode: ExecutionMode,
    pub phase: ExecutionPhase,
    pub has_breakpoint: bool,
    pub paused_on_breakpoint: bool,
    pub is_executing: bool,
}

impl NodeStatus {
    fn of(node: &GraphNode) -> Self {
        let token = node.token();
        Self {
            id: node.id(),
            title: node.title().to_string(),
            kind: node.kind().to_string(),
            mode: node.mode(),
            phase: token.phase,
            has_breakpoint: token.has_breakpoint,
            paused_on_breakpoint: token.paused_on_breakpoint,
            is_executing: token.is_executing(),
        }
    }
}

/// Serializable picture of a session for debugger panels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub running: bool,
    pub has_paused: bool,
    pub paused_node: Option<NodeId>,
    pub paused_nodes: Vec<NodeId>,
    pub call_stack: Vec<CallFrame>,
    pub nodes: Vec<NodeStatus>,
}

/// Result of one driver step
#[derive(Debug, Clone, Default)]
pub struct StepReport {
    /// Nodes the driver executed, in order
    pub executed: Vec<(NodeId, ExecutionOutcome)>,
    /// Nodes skipped because of their mode
    pub skipped: Vec<NodeId>,
}

impl StepReport {
    pub fn failures(&self) -> usize {
        self.executed
            .iter()
            .filter(|(_, outcome)| matches!(outcome, ExecutionOutcome::Failed { .. }))
            .count()
    }

    /// Whether the step was cut short by a session stop
    pub fn interrupted(&self) -> bool {
        self.executed.iter().any(|(_, outcome)| {
            matches!(
                outcome,
                ExecutionOutcome::Abandoned | ExecutionOutcome::Stopped
            )
        })
    }
}

impl GraphSession {
    /// Create a running session for `graph`
    pub fn new(graph: Arc<NodeGraph>, config: EngineConfig) -> Self {
        let session = Self {
            inner: Arc::new(SessionInner {
                graph,
                config,
                call_stack: Mutex::new(CallStack::new()),
                pause: PauseController::new(),
                running: AtomicBool::new(true),
                generation: AtomicU64::new(0),
            }),
        };
        session.publish(GraphEvent::SessionStarted);
        session
    }

    pub fn graph(&self) -> &Arc<NodeGraph> {
        &self.inner.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn pause_controller(&self) -> &PauseController {
        &self.inner.pause
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.graph.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Stop counter; changes every time the session stops
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Start a stopped session. Returns `false` if it was already running.
    pub fn start(&self) -> bool {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return false;
        }
        tracing::info!("Session started");
        self.publish(GraphEvent::SessionStarted);
        true
    }

    /// Stop the session and reset all shared execution state.
    ///
    /// Executions suspended at a checkpoint are abandoned: they wake, notice
    /// the stop and return [`ExecutionOutcome::Abandoned`] without touching
    /// the call stack again.
    pub fn stop(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        self.inner.running.store(false, Ordering::Release);

        let frames = {
            let mut stack = self.inner.call_stack.lock();
            let len = stack.len();
            stack.clear();
            len
        };
        let cancelled = self.inner.pause.clear();

        let clear_breakpoints = self.inner.config.clear_breakpoints_on_stop;
        for node in self.inner.graph.nodes() {
            node.reset_after_stop(clear_breakpoints);
        }

        tracing::info!(frames, cancelled, "Session stopped");
        self.publish(GraphEvent::SessionStopped);
    }

    /// Execute one node by id
    pub async fn execute(&self, node: NodeId) -> Result<ExecutionOutcome> {
        let node = self.require(node)?;
        Ok(node.execute(self).await)
    }

    /// Run every `Always` node once in execution order.
    ///
    /// `OnTrigger` nodes only run when an upstream compute step fires one of
    /// their event inputs; `Never` nodes are skipped.
    pub async fn run_step(&self) -> StepReport {
        let mut report = StepReport::default();
        for node in self.inner.graph.execution_order() {
            if node.mode() != ExecutionMode::Always || !node.is_attached() {
                report.skipped.push(node.id());
                continue;
            }
            let outcome = node.execute(self).await;
            let stop = matches!(
                outcome,
                ExecutionOutcome::Abandoned | ExecutionOutcome::Stopped
            );
            report.executed.push((node.id(), outcome));
            if stop {
                tracing::debug!("Session stopped mid-step");
                break;
            }
        }
        report
    }

    /// Resume a halted node. A no-op returning `false` when it is not halted.
    pub fn resume(&self, node: NodeId) -> bool {
        if !self.inner.pause.resume(node) {
            tracing::debug!(node = %node, "Resume ignored, node is not halted");
            return false;
        }
        tracing::info!(node = %node, "Resumed");
        self.publish(GraphEvent::NodeResumed { node });
        true
    }

    /// Resume the most recently halted node
    pub fn resume_current(&self) -> Option<NodeId> {
        let node = self.inner.pause.paused_node()?;
        self.resume(node).then_some(node)
    }

    /// Resume every halted node, oldest first
    pub fn resume_all(&self) -> usize {
        self.inner
            .pause
            .paused_nodes()
            .into_iter()
            .filter(|node| self.resume(*node))
            .count()
    }

    pub fn has_paused(&self) -> bool {
        self.inner.pause.has_paused()
    }

    pub fn paused_node(&self) -> Option<NodeId> {
        self.inner.pause.paused_node()
    }

    pub fn paused_nodes(&self) -> Vec<NodeId> {
        self.inner.pause.paused_nodes()
    }

    /// Copy of the current call stack, innermost last
    pub fn call_stack(&self) -> Vec<CallFrame> {
        self.inner.call_stack.lock().frames().to_vec()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            running: self.is_running(),
            has_paused: self.has_paused(),
            paused_node: self.paused_node(),
            paused_nodes: self.paused_nodes(),
            call_stack: self.call_stack(),
            nodes: self
                .inner
                .graph
                .nodes()
                .iter()
                .map(|n| NodeStatus::of(n))
                .collect(),
        }
    }

    /// Remove a node from the graph.
    ///
    /// If the node is halted it is released as if resumed, since nobody can
    /// reach it to resume it any more.
    pub fn remove_node(&self, node: NodeId) -> Result<Arc<GraphNode>> {
        let removed = self.inner.graph.remove_node(node)?;
        if self.inner.pause.release(node, ResumeSignal::Detached) {
            tracing::debug!(node = %node, "Released halted node on removal");
            self.publish(GraphEvent::NodeResumed { node });
        }
        Ok(removed)
    }

    /// Route a pointer event in node-local coordinates to the breakpoint
    /// region of a node `width` units wide
    pub fn handle_pointer(
        &self,
        node: NodeId,
        width: f32,
        event: PointerEvent,
    ) -> Result<InteractionOutcome> {
        let target = self.require(node)?;
        let region = &self.inner.config.breakpoint_region;

        let outcome = match event {
            PointerEvent::Down { pos } if region.contains(width, pos) => {
                let action = if target.paused_on_breakpoint() {
                    self.resume(node);
                    BreakpointAction::Resumed
                } else if target.toggle_breakpoint() {
                    BreakpointAction::Armed
                } else {
                    BreakpointAction::Disarmed
                };
                tracing::debug!(node = %node, action = ?action, "Breakpoint region clicked");
                InteractionOutcome {
                    handled: true,
                    cursor: None,
                    action: Some(action),
                }
            }
            PointerEvent::Down { .. } | PointerEvent::Enter => InteractionOutcome::default(),
            PointerEvent::Move { pos } => {
                let inside = region.contains(width, pos);
                let was_inside = target.is_hovered();
                target.set_hovered(inside);
                InteractionOutcome {
                    handled: false,
                    cursor: (inside != was_inside).then(|| {
                        if inside {
                            Cursor::Pointer
                        } else {
                            Cursor::Default
                        }
                    }),
                    action: None,
                }
            }
            PointerEvent::Leave => {
                target.set_hovered(false);
                InteractionOutcome {
                    handled: false,
                    cursor: Some(Cursor::Default),
                    action: None,
                }
            }
        };
        Ok(outcome)
    }

    pub(crate) fn publish(&self, event: GraphEvent) {
        self.inner.graph.events().publish(event);
    }

    pub(crate) fn push_frame(&self, frame: CallFrame) {
        self.inner.call_stack.lock().push(frame);
    }

    pub(crate) fn pop_frame(&self, node: NodeId) {
        self.inner.call_stack.lock().pop(node);
    }

    /// Park until no node is halted.
    ///
    /// Returns `false` if the session stopped while waiting.
    pub(crate) async fn wait_while_paused(&self, generation: u64) -> bool {
        let mut flag = self.inner.pause.subscribe();
        loop {
            if self.generation() != generation {
                return false;
            }
            if !*flag.borrow_and_update() {
                return true;
            }
            tracing::trace!("Graph paused, waiting at checkpoint");
            if flag.changed().await.is_err() {
                return false;
            }
        }
    }

    fn require(&self, node: NodeId) -> Result<Arc<GraphNode>> {
        self.inner
            .graph
            .node(node)
            .ok_or_else(|| GraphError::NodeNotFound(node.to_string()))
    }
}

impl std::fmt::Debug for GraphSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphSession")
            .field("running", &self.is_running())
            .field("generation", &self.generation())
            .field("pause", &self.inner.pause)
            .finish()
    }
}
