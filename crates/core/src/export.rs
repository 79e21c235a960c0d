//! Data handed to external collaborators: the hover details panel and the
//! hierarchy consumed by a browser flamegraph widget.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::derive::Annotations;
use crate::model::{NodeId, ProfileTree};

/// What the details panel shows for a hovered node: its label and raw
/// counters. Derived values and children are deliberately absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeDetails {
    pub name: String,
    pub counters: BTreeMap<String, f64>,
}

impl NodeDetails {
    pub fn of(tree: &ProfileTree, id: NodeId) -> Option<Self> {
        let node = tree.node(id)?;
        Some(Self {
            name: node.name.to_string(),
            counters: node.counters.clone(),
        })
    }

    /// Counters as one compact JSON object, e.g. `{"cpu-cycles":40,...}`.
    pub fn counters_json(&self) -> String {
        let counters: Map<String, Value> = self
            .counters
            .iter()
            .map(|(k, v)| (k.clone(), number(*v)))
            .collect();
        Value::Object(counters).to_string()
    }
}

/// JSON numbers have no NaN or infinity; those become `null`.
fn number(v: f64) -> Value {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15 {
        json!(v as i64)
    } else {
        serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
    }
}

/// The annotated tree as nested `{id, name, value, metricVal, children}`
/// objects. `id` is the arena index to pass back for colors and details.
///
/// Like the flame layout, each node appears once, under the first parent
/// that reaches it depth-first; edges back to an ancestor are dropped.
pub fn hierarchy_json(tree: &ProfileTree, annotations: &Annotations) -> Value {
    // Pre-order walk recording which parent adopted each node.
    let mut order: Vec<NodeId> = Vec::new();
    let mut adopted: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut seen = HashSet::new();
    let mut stack: Vec<(NodeId, Option<NodeId>)> = vec![(tree.root(), None)];
    while let Some((id, parent)) = stack.pop() {
        let Some(node) = tree.node(id) else {
            continue;
        };
        if annotations.get(id).is_none() || !seen.insert(id) {
            continue;
        }
        if let Some(parent) = parent {
            adopted.entry(parent).or_default().push(id);
        }
        order.push(id);
        stack.extend(node.children().iter().rev().map(|c| (*c, Some(id))));
    }

    // Children always follow their parent in `order`, so building in
    // reverse has every child ready when its parent is assembled.
    let mut built: HashMap<NodeId, Value> = HashMap::new();
    for &id in order.iter().rev() {
        let (Some(node), Some(ann)) = (tree.node(id), annotations.get(id)) else {
            continue;
        };
        let children: Vec<Value> = adopted
            .remove(&id)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|child| built.remove(&child))
            .collect();
        built.insert(
            id,
            json!({
                "id": id.index(),
                "name": node.name.as_str(),
                "value": number(ann.weight),
                "metricVal": number(ann.ratio),
                "children": children,
            }),
        );
    }
    built.remove(&tree.root()).unwrap_or(Value::Null)
}
