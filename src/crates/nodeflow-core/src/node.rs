//! Graph nodes and the breakpoint-aware execution loop
//!
//! A [`GraphNode`] wraps a user-supplied [`ComputeStep`] with the bookkeeping
//! every node shares: identity, ports, breakpoint flags and the execution
//! state machine. Executing a node goes through three cooperative
//! checkpoints:
//!
//! ```text
//!  execute()
//!     │  not Idle, or a stopped run's compute still going ──► AlreadyExecuting
//!     ▼
//!  [entry gate]      park while the graph is paused
//!     │  push call frame
//!     ▼
//!  [breakpoint]      halt, publish NodePaused, wait for resume
//!     ▼
//!  compute step      errors and panics are logged, never propagated
//!     ▼
//!  [post-run drain]  park while a pause raised during compute is active
//!     │  pop call frame
//!     ▼
//!  Completed / Failed
//! ```
//!
//! Stopping the session while a node is parked at any checkpoint abandons
//! that execution: it returns [`ExecutionOutcome::Abandoned`] without
//! touching the call stack, which the stop already cleared.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::call_stack::CallFrame;
use crate::context::ExecutionContext;
use crate::error::{ComputeError, GraphError, Result, SlotDirection};
use crate::events::GraphEvent;
use crate::interaction::{glyph_for, BreakpointGlyph};
use crate::pause::ResumeSignal;
use crate::port::{ExecutionMode, PortSpec};
use crate::session::GraphSession;
use crate::token::{ExecutionPhase, ExecutionToken};

/// Opaque node identity, assigned at construction and never changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The unit of work a node performs each time it runs
#[async_trait]
pub trait ComputeStep: Send + Sync {
    async fn compute(&self, ctx: &mut ExecutionContext<'_>) -> std::result::Result<(), ComputeError>;
}

/// Adapter turning a synchronous closure into a [`ComputeStep`]
pub struct FnCompute<F>(F);

#[async_trait]
impl<F> ComputeStep for FnCompute<F>
where
    F: Fn(&mut ExecutionContext<'_>) -> std::result::Result<(), ComputeError> + Send + Sync,
{
    async fn compute(&self, ctx: &mut ExecutionContext<'_>) -> std::result::Result<(), ComputeError> {
        (self.0)(ctx)
    }
}

/// Wrap a synchronous closure as a shareable compute step
pub fn compute_fn<F>(f: F) -> Arc<dyn ComputeStep>
where
    F: Fn(&mut ExecutionContext<'_>) -> std::result::Result<(), ComputeError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnCompute(f))
}

/// Result of one `execute` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The compute step ran and succeeded
    Completed,
    /// The compute step ran and failed; bookkeeping still completed
    Failed { error: String },
    /// Another execution of this node was already in flight
    AlreadyExecuting,
    /// The session stopped while this execution was suspended
    Abandoned,
    /// The session was not running when execution was requested
    Stopped,
}

impl ExecutionOutcome {
    /// Whether the compute step was invoked
    pub fn ran(&self) -> bool {
        matches!(
            self,
            ExecutionOutcome::Completed | ExecutionOutcome::Failed { .. }
        )
    }
}

/// One vertex of an executable graph
pub struct GraphNode {
    id: NodeId,
    title: String,
    kind: String,
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
    compute: Arc<dyn ComputeStep>,
    token: Mutex<ExecutionToken>,
    mode: Mutex<ExecutionMode>,
    output_values: Mutex<Vec<Option<Value>>>,
    hovered: AtomicBool,
    attached: AtomicBool,
}

impl GraphNode {
    pub fn new(title: impl Into<String>, compute: Arc<dyn ComputeStep>) -> Self {
        Self {
            id: NodeId::new(),
            title: title.into(),
            kind: String::from("custom"),
            inputs: Vec::new(),
            outputs: Vec::new(),
            compute,
            token: Mutex::new(ExecutionToken::default()),
            mode: Mutex::new(ExecutionMode::Always),
            output_values: Mutex::new(Vec::new()),
            hovered: AtomicBool::new(false),
            attached: AtomicBool::new(false),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_input(mut self, port: PortSpec) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn with_output(mut self, port: PortSpec) -> Self {
        self.outputs.push(port);
        self.output_values.get_mut().push(None);
        self
    }

    pub fn with_inputs(self, ports: impl IntoIterator<Item = PortSpec>) -> Self {
        ports.into_iter().fold(self, |node, port| node.with_input(port))
    }

    pub fn with_outputs(self, ports: impl IntoIterator<Item = PortSpec>) -> Self {
        ports.into_iter().fold(self, |node, port| node.with_output(port))
    }

    pub fn with_breakpoint(self, armed: bool) -> Self {
        self.token.lock().has_breakpoint = armed;
        self
    }

    pub fn with_mode(self, mode: ExecutionMode) -> Self {
        *self.mode.lock() = mode;
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn inputs(&self) -> &[PortSpec] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PortSpec] {
        &self.outputs
    }

    pub fn input_port(&self, slot: usize) -> Result<&PortSpec> {
        self.inputs.get(slot).ok_or(GraphError::SlotNotFound {
            node: self.id,
            direction: SlotDirection::Input,
            slot,
        })
    }

    pub fn output_port(&self, slot: usize) -> Result<&PortSpec> {
        self.outputs.get(slot).ok_or(GraphError::SlotNotFound {
            node: self.id,
            direction: SlotDirection::Output,
            slot,
        })
    }

    pub fn mode(&self) -> ExecutionMode {
        *self.mode.lock()
    }

    pub fn set_mode(&self, mode: ExecutionMode) {
        *self.mode.lock() = mode;
    }

    pub fn has_breakpoint(&self) -> bool {
        self.token.lock().has_breakpoint
    }

    pub fn set_breakpoint(&self, armed: bool) {
        self.token.lock().has_breakpoint = armed;
    }

    /// Flip the breakpoint flag, returning the new value
    pub fn toggle_breakpoint(&self) -> bool {
        let mut token = self.token.lock();
        token.has_breakpoint = !token.has_breakpoint;
        token.has_breakpoint
    }

    pub fn paused_on_breakpoint(&self) -> bool {
        self.token.lock().paused_on_breakpoint
    }

    pub(crate) fn set_paused_on_breakpoint(&self, paused: bool) {
        self.token.lock().paused_on_breakpoint = paused;
    }

    pub fn is_executing(&self) -> bool {
        self.token.lock().is_executing()
    }

    pub fn phase(&self) -> ExecutionPhase {
        self.token.lock().phase
    }

    /// Copy of the flag state for inspectors
    pub fn token(&self) -> ExecutionToken {
        self.token.lock().clone()
    }

    /// Last value written to an output slot
    pub fn output_value(&self, slot: usize) -> Option<Value> {
        self.output_values.lock().get(slot).cloned().flatten()
    }

    pub(crate) fn set_output_value(&self, slot: usize, value: Value) -> Result<()> {
        self.output_port(slot)?;
        if let Some(entry) = self.output_values.lock().get_mut(slot) {
            *entry = Some(value);
        }
        Ok(())
    }

    pub fn is_hovered(&self) -> bool {
        self.hovered.load(Ordering::Relaxed)
    }

    pub(crate) fn set_hovered(&self, hovered: bool) {
        self.hovered.store(hovered, Ordering::Relaxed);
    }

    pub fn glyph(&self) -> BreakpointGlyph {
        let token = self.token.lock();
        glyph_for(
            token.has_breakpoint,
            token.paused_on_breakpoint,
            self.is_hovered(),
        )
    }

    /// Whether the node currently belongs to a graph
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub(crate) fn set_attached(&self, attached: bool) {
        self.attached.store(attached, Ordering::Release);
    }

    /// Reset execution flags after a session stop
    pub(crate) fn reset_after_stop(&self, clear_breakpoint: bool) {
        let mut token = self.token.lock();
        token.reset();
        if clear_breakpoint {
            token.has_breakpoint = false;
        }
    }

    pub(crate) fn frame(&self) -> CallFrame {
        CallFrame {
            node: self.id,
            title: self.title.clone(),
        }
    }

    /// Execute this node within `session`.
    ///
    /// The returned future owns everything it needs, so it can be awaited
    /// inline or spawned.
    pub fn execute(self: &Arc<Self>, session: &GraphSession) -> BoxFuture<'static, ExecutionOutcome> {
        let node = Arc::clone(self);
        let session = session.clone();
        let span = tracing::debug_span!("execute", node = %node.id, title = %node.title);
        async move { node.run(session).await }
            .instrument(span)
            .boxed()
    }

    async fn run(self: Arc<Self>, session: GraphSession) -> ExecutionOutcome {
        if !session.is_running() {
            tracing::debug!("Session is stopped, execution skipped");
            return ExecutionOutcome::Stopped;
        }
        let generation = session.generation();

        let Some(run) = self.token.lock().begin() else {
            tracing::debug!("Already executing, re-entrant call ignored");
            return ExecutionOutcome::AlreadyExecuting;
        };

        if !session.wait_while_paused(generation).await {
            return self.abandon(run);
        }

        session.push_frame(self.frame());
        self.token.lock().phase = ExecutionPhase::Running;

        if self.has_breakpoint() {
            let signal = self.halt_at_breakpoint(&session).await;
            if session.generation() != generation {
                return self.abandon(run);
            }
            tracing::debug!(signal = ?signal, "Continuing after breakpoint");
            self.token.lock().phase = ExecutionPhase::Running;
        }

        let outcome = self.run_compute(&session, generation).await;
        if session.generation() != generation {
            return self.abandon(run);
        }

        if session.has_paused() {
            self.token.lock().phase = ExecutionPhase::HaltedPostRun;
            tracing::debug!("Graph paused during compute, draining before exit");
            if !session.wait_while_paused(generation).await {
                return self.abandon(run);
            }
        }

        {
            let mut token = self.token.lock();
            if token.run == run {
                token.phase = ExecutionPhase::Idle;
            }
        }
        session.pop_frame(self.id);
        outcome
    }

    async fn halt_at_breakpoint(self: &Arc<Self>, session: &GraphSession) -> ResumeSignal {
        if !self.is_attached() {
            tracing::debug!("Node is detached, breakpoint ignored");
            return ResumeSignal::Detached;
        }

        self.token.lock().phase = ExecutionPhase::HaltedAtBreakpoint;
        let waiter = session.pause_controller().request_pause(self);
        tracing::info!(node = %self.id, title = %self.title, "Halted at breakpoint");

        session.publish(GraphEvent::NodePaused {
            node: self.id,
            title: self.title.clone(),
        });
        if session.config().focus_on_pause {
            session.publish(GraphEvent::FocusRequested { node: self.id });
        }

        waiter.wait().await
    }

    async fn run_compute(
        self: &Arc<Self>,
        session: &GraphSession,
        generation: u64,
    ) -> ExecutionOutcome {
        let _computing = ComputeGuard::enter(&self.token);
        let started = Instant::now();
        let mut ctx = ExecutionContext::new(self, session, generation);
        let result = AssertUnwindSafe(self.compute.compute(&mut ctx))
            .catch_unwind()
            .await;

        let error = match result {
            Ok(Ok(())) => {
                tracing::debug!(
                    elapsed_ms = started.elapsed().as_millis(),
                    "Compute step completed"
                );
                return ExecutionOutcome::Completed;
            }
            Ok(Err(e)) => e.to_string(),
            Err(panic) => format!("compute step panicked: {}", panic_message(panic.as_ref())),
        };

        tracing::error!(
            node = %self.id,
            title = %self.title,
            error = %error,
            "Compute step failed"
        );
        if session.generation() == generation {
            session.publish(GraphEvent::ComputeFailed {
                node: self.id,
                error: error.clone(),
            });
        }
        ExecutionOutcome::Failed { error }
    }

    fn abandon(&self, run: u64) -> ExecutionOutcome {
        let mut token = self.token.lock();
        if token.run == run {
            token.reset();
        }
        tracing::debug!("Execution abandoned by session stop");
        ExecutionOutcome::Abandoned
    }
}

impl fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphNode")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("kind", &self.kind)
            .field("mode", &self.mode())
            .field("token", &self.token())
            .finish()
    }
}

/// Marks the token as computing until dropped, even if the compute future is
/// dropped mid-flight
struct ComputeGuard<'a> {
    token: &'a Mutex<ExecutionToken>,
}

impl<'a> ComputeGuard<'a> {
    fn enter(token: &'a Mutex<ExecutionToken>) -> Self {
        token.lock().computing = true;
        Self { token }
    }
}

impl Drop for ComputeGuard<'_> {
    fn drop(&mut self) {
        self.token.lock().computing = false;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
