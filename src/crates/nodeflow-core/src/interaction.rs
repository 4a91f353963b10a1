//! Breakpoint hit-region in a node's header
//!
//! Coordinates are node-local: `(0, 0)` is the top-left corner of the node
//! body and the title bar occupies `y ∈ [-title_height, 0)`. The breakpoint
//! glyph sits at the right end of the title bar.
//!
//! ```text
//!  -title_height ┌──────────────────────────[●]─┐
//!                │ Title                   ^    │
//!              0 ├─────────────────────────┼────┤
//!                │                      region  │
//!                └──────────────────────────────┘
//! ```
//!
//! Drawing is left to the renderer; this module only decides what a pointer
//! event means and which glyph to show.

use serde::{Deserialize, Serialize};

/// Geometry of the clickable breakpoint square
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakpointRegion {
    /// Side length of the square
    pub size: f32,
    /// Gap between the square and the node's right edge
    pub margin: f32,
    /// Height of the node's title bar
    pub title_height: f32,
}

impl Default for BreakpointRegion {
    fn default() -> Self {
        Self {
            size: 14.0,
            margin: 8.0,
            title_height: 30.0,
        }
    }
}

impl BreakpointRegion {
    /// Top-left corner and size of the square for a node `node_width` wide
    pub fn bounds(&self, node_width: f32) -> [f32; 4] {
        let x = node_width - self.margin - self.size;
        let y = -(self.title_height + self.size) / 2.0;
        [x, y, self.size, self.size]
    }

    /// Whether a node-local point falls inside the square
    pub fn contains(&self, node_width: f32, pos: [f32; 2]) -> bool {
        let [x, y, w, h] = self.bounds(node_width);
        pos[0] >= x && pos[0] <= x + w && pos[1] >= y && pos[1] <= y + h
    }
}

/// Pointer input forwarded by the canvas, in node-local coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Down { pos: [f32; 2] },
    Move { pos: [f32; 2] },
    Enter,
    Leave,
}

/// Cursor the canvas should display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cursor {
    Default,
    Pointer,
}

/// What the engine did with a pointer event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InteractionOutcome {
    /// The event hit the breakpoint region and should not reach the canvas
    pub handled: bool,
    /// Requested cursor change, if any
    pub cursor: Option<Cursor>,
    pub action: Option<BreakpointAction>,
}

/// Effect of a click inside the region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointAction {
    Armed,
    Disarmed,
    Resumed,
}

/// Glyph to draw in the region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointGlyph {
    Hidden,
    /// Outline ring shown while hovering an unarmed region
    HoverHint,
    /// Filled ring
    Armed,
    /// Triangle shown while the node is halted
    Halted,
}

/// Pick the glyph for a node's current flags
pub fn glyph_for(has_breakpoint: bool, paused_on_breakpoint: bool, hovered: bool) -> BreakpointGlyph {
    if paused_on_breakpoint {
        BreakpointGlyph::Halted
    } else if has_breakpoint {
        BreakpointGlyph::Armed
    } else if hovered {
        BreakpointGlyph::HoverHint
    } else {
        BreakpointGlyph::Hidden
    }
}
