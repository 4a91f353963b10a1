//! Error types for graph construction, loading and configuration
//!
//! Execution itself never returns these: a failing compute step is logged and
//! reported through [`ExecutionOutcome::Failed`](crate::node::ExecutionOutcome),
//! so no error crosses the execution loop back into the graph driver.
//!
//! # Error Hierarchy
//!
//! ```text
//! GraphError
//! ├── Validation         - Definition file / graph structure errors
//! ├── NodeNotFound       - Unknown node id or name
//! ├── SlotNotFound       - Port index out of range
//! ├── LinkNotFound       - Unknown link id
//! ├── IncompatiblePorts  - Data/Event or type-name mismatch
//! ├── LinkRejected       - Structural rule violation (e.g. MultipleEvent)
//! ├── UnknownNodeKind    - Definition references an unregistered kind
//! ├── Configuration      - Invalid engine configuration
//! ├── Serialization      - JSON errors
//! ├── Yaml               - YAML errors
//! └── Io                 - File access errors
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::node::NodeId;

/// Convenience result type using [`GraphError`]
pub type Result<T> = std::result::Result<T, GraphError>;

/// Error returned by a compute step.
///
/// Compute steps are user code, so any error type is accepted.
pub type ComputeError = Box<dyn std::error::Error + Send + Sync>;

/// Which side of a link a slot belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotDirection {
    Input,
    Output,
}

impl fmt::Display for SlotDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotDirection::Input => write!(f, "input"),
            SlotDirection::Output => write!(f, "output"),
        }
    }
}

/// Enumerated structural violations reported to the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkErrorKind {
    /// An event output slot already drives a different target node
    MultipleEvent,
    /// A node cannot be linked to itself
    SelfLink,
}

impl fmt::Display for LinkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkErrorKind::MultipleEvent => {
                write!(f, "event output is already connected to another node")
            }
            LinkErrorKind::SelfLink => write!(f, "node cannot be linked to itself"),
        }
    }
}

/// Error type for all fallible graph operations
#[derive(Error, Debug)]
pub enum GraphError {
    /// Graph definition or structure is invalid
    #[error("Graph validation failed: {0}")]
    Validation(String),

    /// Referenced node does not exist in the graph
    #[error("Node '{0}' not found")]
    NodeNotFound(String),

    /// Referenced slot index is out of range for the node
    #[error("Node '{node}' has no {direction} slot {slot}")]
    SlotNotFound {
        node: NodeId,
        direction: SlotDirection,
        slot: usize,
    },

    #[error("Link {0} not found")]
    LinkNotFound(u64),

    /// The two ports cannot be linked
    #[error("Cannot link {from} to {to}: {reason}")]
    IncompatiblePorts {
        from: String,
        to: String,
        reason: String,
    },

    /// A structural rule rejected the link; the graph was left unchanged
    #[error("Link rejected: {kind}")]
    LinkRejected { kind: LinkErrorKind },

    /// A definition file references a node kind nobody registered
    #[error("Unknown node kind '{0}'")]
    UnknownNodeKind(String),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GraphError {
    /// Create an incompatible-ports error with context
    pub fn incompatible(
        from: impl Into<String>,
        to: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::IncompatiblePorts {
            from: from.into(),
            to: to.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error is a structural rule violation
    pub fn is_link_rejection(&self) -> bool {
        matches!(self, GraphError::LinkRejected { .. })
    }
}
