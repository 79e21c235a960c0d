use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::{NodeId, ProfileTree, TreeBuilder, TreeError};

/// Keys written back into a node by annotating viewers; never counters.
const COMPUTED_KEYS: [&str; 2] = ["value", "metricVal"];

/// Deepest call stack accepted, in frames.
pub const MAX_DEPTH: usize = 2048;

/// Each frame is an object plus its `children` array; one more level for a
/// nested `counters` object.
const MAX_NESTING: usize = 2 * MAX_DEPTH + 1;

#[derive(Debug, Error)]
pub enum CounterJsonError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("profile nests deeper than {limit} frames")]
    TooDeep { limit: usize },
    #[error("counter {key:?} on node {name:?} is negative or not finite: {value}")]
    InvalidCounter {
        name: String,
        key: String,
        value: f64,
    },
    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// One node of the on-disk tree. Counters are either flat numeric keys
/// (`{"name": "main", "cpu-cycles": 100, "children": [...]}`) or nested
/// under `"counters"`; both are accepted and merged.
#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(default)]
    name: String,
    #[serde(default)]
    children: Vec<RawNode>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Drop for RawNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

/// Parse a JSON counter tree into an immutable `ProfileTree`.
///
/// Nesting is checked up front against [`MAX_DEPTH`]. Below that, serde's
/// recursion runs on a growable stack and the arena is built with an
/// explicit work list.
pub fn parse_counter_tree(data: &[u8]) -> Result<ProfileTree, CounterJsonError> {
    if nesting_exceeds(data, MAX_NESTING) {
        return Err(CounterJsonError::TooDeep { limit: MAX_DEPTH });
    }
    let mut de = serde_json::Deserializer::from_slice(data);
    de.disable_recursion_limit();
    let raw = RawNode::deserialize(serde_stacker::Deserializer::new(&mut de))?;
    de.end()?;

    let mut builder = TreeBuilder::new();
    let mut root: Option<NodeId> = None;
    let mut stack: Vec<(RawNode, Option<NodeId>)> = vec![(raw, None)];

    while let Some((mut node, parent)) = stack.pop() {
        let counters = collect_counters(&node.name, &node.fields)?;
        let id = builder.add_node(std::mem::take(&mut node.name), counters);
        match parent {
            Some(parent) => builder.link(parent, id)?,
            None => root = Some(id),
        }
        // Reversed so siblings are popped, and therefore linked, in order.
        let children = std::mem::take(&mut node.children);
        stack.extend(children.into_iter().rev().map(|c| (c, Some(id))));
    }

    let root = root.ok_or(TreeError::Empty)?;
    Ok(builder.build(root)?)
}

/// True once `{`/`[` nesting outside string literals goes past `limit`.
fn nesting_exceeds(data: &[u8], limit: usize) -> bool {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for &b in data {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                if depth > limit {
                    return true;
                }
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    false
}

fn collect_counters(
    name: &str,
    fields: &Map<String, Value>,
) -> Result<Vec<(String, f64)>, CounterJsonError> {
    let mut counters: Vec<(String, f64)> = Vec::new();
    let mut push = |key: &str, value: &Value| -> Result<(), CounterJsonError> {
        let Some(v) = value.as_f64() else {
            return Ok(());
        };
        if !v.is_finite() || v < 0.0 {
            return Err(CounterJsonError::InvalidCounter {
                name: name.to_string(),
                key: key.to_string(),
                value: v,
            });
        }
        counters.push((key.to_string(), v));
        Ok(())
    };

    for (key, value) in fields {
        if key == "counters" || COMPUTED_KEYS.contains(&key.as_str()) {
            continue;
        }
        push(key, value)?;
    }
    // Nested counters are pushed last so they win over flat duplicates.
    if let Some(nested) = fields.get("counters").and_then(Value::as_object) {
        for (key, value) in nested {
            push(key, value)?;
        }
    }
    Ok(counters)
}
