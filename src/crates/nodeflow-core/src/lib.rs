//! # nodeflow-core - Breakpoint-Aware Node Graph Execution
//!
//! Cooperative execution engine for visual-scripting node graphs, with a
//! debugger built into every node.
//!
//! ## Overview
//!
//! - **Breakpoints on any node** - halt before the compute step runs
//! - **Graph-wide freeze** - while one node is halted, every other node parks
//!   at its next checkpoint
//! - **Live call stack** - nested executions push and pop frames innermost last
//! - **Event ports** - event outputs trigger downstream nodes, and connecting
//!   an event input switches the node to on-trigger mode
//! - **Inspector events** - halts, resumes, failures and link errors are
//!   broadcast to whoever renders the graph
//!
//! ## Core Concepts
//!
//! ### 1. NodeGraph and GraphNode
//!
//! [`NodeGraph`] holds [`GraphNode`]s and the [`Link`]s between their ports.
//! A node is a title, a set of [`PortSpec`]s and a [`ComputeStep`]: the
//! engine supplies the execution protocol, the compute step supplies the work.
//!
//! ### 2. GraphSession
//!
//! [`GraphSession`] owns the state shared by one running graph: run status,
//! the call stack and the pause controller. Nodes execute through it, and
//! stopping it abandons every suspended execution.
//!
//! ### 3. Execution checkpoints
//!
//! Each execution passes three suspension points: the entry gate, the
//! breakpoint halt and the post-run drain. See [`node`] for the state machine.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nodeflow_core::{compute_fn, EngineConfig, GraphNode, GraphSession, NodeGraph, PortSpec};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> nodeflow_core::Result<()> {
//!     let graph = Arc::new(NodeGraph::new());
//!     let answer = graph.add_node(
//!         GraphNode::new("answer", compute_fn(|ctx| {
//!             ctx.set_output(0, 42)?;
//!             Ok(())
//!         }))
//!         .with_output(PortSpec::data("value"))
//!         .with_breakpoint(true),
//!     );
//!
//!     let session = GraphSession::new(graph, EngineConfig::default());
//!     let run = tokio::spawn(answer.execute(&session));
//!
//!     tokio::task::yield_now().await;
//!     assert_eq!(session.paused_node(), Some(answer.id()));
//!     session.resume(answer.id());
//!
//!     run.await.ok();
//!     assert_eq!(answer.output_value(0), Some(42.into()));
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!   GraphDefinition ──build──► NodeGraph ◄──── GraphSession ────► EventBus ──► inspectors
//!     (YAML/JSON)                 │             │  CallStack
//!                                 │             │  PauseController
//!                                 ▼             ▼
//!                            GraphNode ──execute──► ComputeStep
//! ```

pub mod call_stack;
pub mod config;
pub mod context;
pub mod definition;
pub mod error;
pub mod events;
pub mod graph;
pub mod interaction;
pub mod node;
pub mod pause;
pub mod port;
pub mod session;
pub mod token;

pub use call_stack::{CallFrame, CallStack};
pub use config::{ConfigBuilder, EngineConfig, EnvOverrides, ENV_PREFIX};
pub use context::ExecutionContext;
pub use definition::{
    GraphDefinition, LinkDefinition, LoadedGraph, NodeDefinition, NodeRegistry, NodeTemplate,
};
pub use error::{ComputeError, GraphError, LinkErrorKind, Result, SlotDirection};
pub use events::{EngineEvent, EventBus, GraphEvent};
pub use graph::{Link, LinkId, NodeGraph};
pub use interaction::{
    BreakpointAction, BreakpointGlyph, BreakpointRegion, Cursor, InteractionOutcome, PointerEvent,
};
pub use node::{compute_fn, ComputeStep, ExecutionOutcome, FnCompute, GraphNode, NodeId};
pub use pause::{PauseController, ResumeSignal, ResumeWaiter};
pub use port::{infer_mode, ExecutionMode, PortKind, PortSpec, ANY_TYPE};
pub use session::{GraphSession, NodeStatus, SessionSnapshot, StepReport};
pub use token::{ExecutionPhase, ExecutionToken};

// Compute steps implement an async trait; re-export the macro for them
pub use async_trait::async_trait;
