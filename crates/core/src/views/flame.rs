use std::collections::HashSet;

use ratioflame_protocol::{Point, Rect, RenderCommand, SharedStr, Viewport};

use crate::color::ColorPolicy;
use crate::config::LayoutOptions;
use crate::derive::Annotations;
use crate::model::{NodeId, ProfileTree};

/// One positioned rectangle of the icicle layout.
#[derive(Debug, Clone, PartialEq)]
pub struct LaidOutFrame {
    pub node: NodeId,
    /// In layout space: x from 0 to the viewport width, y growing with
    /// depth from 0.
    pub rect: Rect,
    pub depth: u32,
}

/// Geometry of an annotated tree, root on top.
///
/// Widths come from the derived weights only, so the layout survives any
/// number of threshold changes; `paint` just re-resolves colors.
///
/// Each node is drawn at most once, under the first parent that reaches it
/// in depth-first order. Shared children and cycles therefore cannot make
/// the layout larger than the tree.
#[derive(Debug, Clone, Default)]
pub struct FlameLayout {
    frames: Vec<LaidOutFrame>,
    cell_height: f64,
    max_depth: u32,
}

impl FlameLayout {
    pub fn compute(
        tree: &ProfileTree,
        annotations: &Annotations,
        width: f64,
        options: &LayoutOptions,
    ) -> Self {
        let mut layout = Self {
            frames: Vec::new(),
            cell_height: options.cell_height,
            max_depth: 0,
        };

        let root = tree.root();
        let root_weight = annotations.get(root).map_or(0.0, |a| a.weight);
        if !(root_weight > 0.0 && width > 0.0) {
            return layout;
        }
        let x_scale = width / root_weight;
        let weight_of = |id: NodeId| annotations.get(id).map_or(0.0, |a| a.weight);
        let name_of = |id: NodeId| tree.node(id).map_or("", |n| n.name.as_str());

        let mut placed = HashSet::new();
        let mut stack: Vec<(NodeId, u32, f64)> = vec![(root, 0, 0.0)];
        while let Some((id, depth, x)) = stack.pop() {
            let Some(node) = tree.node(id) else {
                continue;
            };
            let w = weight_of(id) * x_scale;
            if w < options.min_frame_width || annotations.get(id).is_none() {
                continue;
            }
            if !placed.insert(id) {
                continue;
            }

            layout.frames.push(LaidOutFrame {
                node: id,
                rect: Rect::new(
                    x,
                    f64::from(depth) * layout.cell_height,
                    w,
                    layout.cell_height - 1.0,
                ),
                depth,
            });
            layout.max_depth = layout.max_depth.max(depth);

            let mut children: Vec<NodeId> = node.children().to_vec();
            children.sort_by(|a, b| name_of(*a).cmp(name_of(*b)));
            let mut child_x = x;
            let mut next = Vec::with_capacity(children.len());
            for child in children {
                next.push((child, depth + 1, child_x));
                child_x += weight_of(child) * x_scale;
            }
            // Reversed so the first sibling is laid out first.
            stack.extend(next.into_iter().rev());
        }
        layout
    }

    pub fn frames(&self) -> &[LaidOutFrame] {
        &self.frames
    }

    /// Total height of all levels.
    pub fn height(&self) -> f64 {
        if self.frames.is_empty() {
            0.0
        } else {
            f64::from(self.max_depth + 1) * self.cell_height
        }
    }

    /// Resolve colors for the current threshold and emit draw commands for
    /// the frames visible in `viewport` (whose `x`/`y` scroll the layout).
    pub fn paint(
        &self,
        tree: &ProfileTree,
        annotations: &Annotations,
        policy: &ColorPolicy,
        threshold: f64,
        viewport: &Viewport,
    ) -> Vec<RenderCommand> {
        let mut commands = Vec::with_capacity(self.frames.len() + 2);
        commands.push(RenderCommand::BeginGroup {
            id: "flame".into(),
            label: Some(SharedStr::from(annotations.metric())),
        });

        for frame in &self.frames {
            let rect = Rect::new(
                frame.rect.x - viewport.x,
                frame.rect.y - viewport.y,
                frame.rect.w,
                frame.rect.h,
            );
            let visible = rect.y + rect.h >= 0.0
                && rect.y <= viewport.height
                && rect.x + rect.w >= 0.0
                && rect.x <= viewport.width;
            if !visible {
                continue;
            }
            let ratio = annotations.get(frame.node).map_or(f64::NAN, |a| a.ratio);
            commands.push(RenderCommand::DrawRect {
                rect,
                fill: policy.color_for(ratio, threshold),
                label: tree.node(frame.node).map(|n| n.name.clone()),
                node_id: Some(frame.node.index()),
            });
        }

        commands.push(RenderCommand::EndGroup);
        commands
    }

    /// The deepest frame under `point` (viewport coordinates).
    pub fn node_at(&self, point: Point, viewport: &Viewport) -> Option<NodeId> {
        let p = Point::new(point.x + viewport.x, point.y + viewport.y);
        self.frames
            .iter()
            .filter(|f| f.rect.contains(p))
            .max_by_key(|f| f.depth)
            .map(|f| f.node)
    }
}
