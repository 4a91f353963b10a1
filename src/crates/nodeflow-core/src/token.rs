//! Per-node execution flags

use serde::{Deserialize, Serialize};

/// Where a node currently is in its execution state machine
///
/// ```text
/// Idle ─► Entering ─┬─────────────────────────┬─► Running ─┬──────────────────┬─► Idle
///                   └─► HaltedAtBreakpoint ───┘            └─► HaltedPostRun ─┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    #[default]
    Idle,
    /// Accepted, waiting at the entry gate; not yet on the call stack
    Entering,
    HaltedAtBreakpoint,
    Running,
    /// Compute finished while some node was halted; draining the pause
    HaltedPostRun,
}

impl ExecutionPhase {
    /// Whether a node in this phase owns a call-stack frame
    pub fn is_executing(self) -> bool {
        matches!(
            self,
            ExecutionPhase::HaltedAtBreakpoint
                | ExecutionPhase::Running
                | ExecutionPhase::HaltedPostRun
        )
    }
}

/// Mutable flag state owned by one node.
///
/// Only the node's own execution loop moves `phase` and sets
/// `paused_on_breakpoint`; `has_breakpoint` is a user toggle.
#[derive(Debug, Clone, Default)]
pub struct ExecutionToken {
    pub has_breakpoint: bool,
    pub paused_on_breakpoint: bool,
    pub phase: ExecutionPhase,

    /// Incremented every time an execution is accepted. Lets a stale,
    /// abandoned execution recognise that the token now belongs to a newer run.
    pub run: u64,

    /// Set while a compute step is running. Survives `reset`, so a compute
    /// abandoned by a stop still blocks new executions until it returns.
    pub computing: bool,
}

impl ExecutionToken {
    pub fn is_executing(&self) -> bool {
        self.phase.is_executing()
    }

    pub fn is_idle(&self) -> bool {
        self.phase == ExecutionPhase::Idle
    }

    /// Claim the token for a new execution; `None` when one is already in flight.
    pub fn begin(&mut self) -> Option<u64> {
        if !self.is_idle() || self.computing {
            return None;
        }
        self.run += 1;
        self.phase = ExecutionPhase::Entering;
        Some(self.run)
    }

    /// Return to idle, dropping any halted marker
    pub fn reset(&mut self) {
        self.phase = ExecutionPhase::Idle;
        self.paused_on_breakpoint = false;
    }
}
