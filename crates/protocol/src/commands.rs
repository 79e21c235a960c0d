use serde::{Deserialize, Serialize};

use crate::shared_str::SharedStr;
use crate::types::{Color, Rect};

/// A single, stateless render instruction.
///
/// The core lays a profile tree out into a `Vec<RenderCommand>`; renderers
/// (terminal, SVG, browser) consume the list front to back. Colors are
/// already resolved, so a renderer never needs to know about thresholds or
/// color scales.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RenderCommand {
    /// Draw a filled rectangle for one profile node.
    DrawRect {
        rect: Rect,
        fill: Color,
        label: Option<SharedStr>,
        /// Arena index of the node, so exported drawings can be traced back.
        node_id: Option<usize>,
    },

    /// Begin a logical group. Renderers may use this for layering.
    BeginGroup {
        id: SharedStr,
        label: Option<SharedStr>,
    },

    /// End the current group.
    EndGroup,
}
