//! Port kinds and execution-mode inference
//!
//! Every input and output slot of a node is either a **data** port carrying a
//! value or an **event** port carrying a trigger. A node whose event input is
//! connected only runs when something fires that input; otherwise it runs on
//! every driver step.
//!
//! ```text
//!   ┌──────────┐ event  ┌──────────┐
//!   │  ticker  │───────►│  print   │   print: OnTrigger
//!   └──────────┘        └──────────┘
//!   ┌──────────┐  data  ┌──────────┐
//!   │ constant │───────►│   add    │   add: Always
//!   └──────────┘        └──────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wildcard data type accepted by any data port
pub const ANY_TYPE: &str = "*";

/// Classification of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    /// Carries a value read by the downstream compute step
    Data,
    /// Carries a trigger signal; subject to the one-source-per-target rule
    Event,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortKind::Data => write!(f, "data"),
            PortKind::Event => write!(f, "event"),
        }
    }
}

/// Declaration of one input or output slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    pub kind: PortKind,

    /// Optional data type name; `"*"` or `None` accept anything
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

impl PortSpec {
    /// Untyped data port
    pub fn data(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PortKind::Data,
            type_name: None,
        }
    }

    /// Data port with a declared type name
    pub fn typed(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PortKind::Data,
            type_name: Some(type_name.into()),
        }
    }

    /// Event port
    pub fn event(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PortKind::Event,
            type_name: None,
        }
    }

    pub fn is_event(&self) -> bool {
        self.kind == PortKind::Event
    }

    /// Check whether an output declared as `self` may feed `input`.
    ///
    /// Returns the reason on mismatch.
    pub fn accepts(&self, input: &PortSpec) -> std::result::Result<(), String> {
        if self.kind != input.kind {
            return Err(format!(
                "{} output cannot feed {} input",
                self.kind, input.kind
            ));
        }
        match (self.type_name.as_deref(), input.type_name.as_deref()) {
            (Some(out), Some(inp)) if out != ANY_TYPE && inp != ANY_TYPE && out != inp => {
                Err(format!("type '{}' does not match '{}'", out, inp))
            }
            _ => Ok(()),
        }
    }
}

/// When a node's compute step runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Runs on every driver step
    #[default]
    Always,
    /// Runs only when an event input fires
    OnTrigger,
    /// Muted by the user; never runs
    Never,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Always => write!(f, "always"),
            ExecutionMode::OnTrigger => write!(f, "on_trigger"),
            ExecutionMode::Never => write!(f, "never"),
        }
    }
}

/// Derive a node's mode from its current mode and event-input connectivity.
///
/// `Never` is a user decision and survives connection changes.
pub fn infer_mode(current: ExecutionMode, event_input_connected: bool) -> ExecutionMode {
    match current {
        ExecutionMode::Never => ExecutionMode::Never,
        _ if event_input_connected => ExecutionMode::OnTrigger,
        _ => ExecutionMode::Always,
    }
}
