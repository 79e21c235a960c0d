use std::collections::{HashSet, VecDeque};

use serde::Serialize;
use tracing::debug;

use crate::config::CounterKeys;
use crate::model::{NodeId, ProfileTree};

/// Values computed for one node under one metric selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Annotation {
    /// Rendering weight (the weight counter, 0 if absent).
    pub weight: f64,
    /// `metric / normalizer`. NaN or infinite when not applicable.
    pub ratio: f64,
}

impl Annotation {
    pub fn is_applicable(&self) -> bool {
        self.ratio.is_finite()
    }
}

/// Side table of derived values, indexed by node identity.
///
/// The tree itself is never touched, so re-deriving for another metric
/// simply produces a new table with no stale fields.
#[derive(Debug, Clone)]
pub struct Annotations {
    metric: String,
    slots: Vec<Option<Annotation>>,
    order: Vec<NodeId>,
}

impl Annotations {
    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// `None` for nodes not reachable from the root.
    pub fn get(&self, id: NodeId) -> Option<Annotation> {
        self.slots.get(id.0).copied().flatten()
    }

    /// Nodes in breadth-first visit order, each exactly once.
    pub fn visit_order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Every derived ratio, one per visited node.
    pub fn ratios(&self) -> impl Iterator<Item = f64> + '_ {
        self.order
            .iter()
            .filter_map(|id| self.get(*id))
            .map(|a| a.ratio)
    }
}

/// Walk the tree once, breadth-first, and compute weight and ratio for
/// every reachable node.
///
/// Nodes are deduplicated by identity: a node linked under several parents
/// (or under its own descendant) is annotated once, and cyclic input
/// terminates.
pub fn derive(tree: &ProfileTree, metric: &str, keys: &CounterKeys) -> Annotations {
    let mut slots: Vec<Option<Annotation>> = vec![None; tree.len()];
    let mut order = Vec::with_capacity(tree.len());

    let mut queue = VecDeque::from([tree.root()]);
    let mut enqueued: HashSet<NodeId> = HashSet::from([tree.root()]);

    while let Some(id) = queue.pop_front() {
        let Some(node) = tree.node(id) else {
            continue;
        };

        let weight = node.counter(&keys.weight).unwrap_or(0.0);
        // A zero normalizer is expected input: x/0 is inf, 0/0 is NaN.
        let ratio = match (node.counter(metric), node.counter(&keys.normalizer)) {
            (Some(m), Some(n)) => m / n,
            _ => f64::NAN,
        };
        slots[id.0] = Some(Annotation { weight, ratio });
        order.push(id);

        for &child in node.children() {
            if enqueued.insert(child) {
                queue.push_back(child);
            }
        }
    }

    debug!(metric, nodes = order.len(), "derived ratios");
    Annotations {
        metric: metric.to_string(),
        slots,
        order,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TreeBuilder;

    fn keys() -> CounterKeys {
        CounterKeys::default()
    }

    #[test]
    fn zero_normalizer_is_not_applicable() {
        let mut b = TreeBuilder::new();
        let root = b.add_node("root", [("cpu-cycles", 100.0), ("instructions", 50.0)]);
        let child = b.add_node("child", [("cpu-cycles", 40.0), ("instructions", 0.0)]);
        b.link(root, child).unwrap();
        let tree = b.build(root).unwrap();

        let ann = derive(&tree, "cpu-cycles", &keys());
        let r = ann.get(root).unwrap();
        assert_eq!(r.weight, 100.0);
        assert_eq!(r.ratio, 2.0);
        let c = ann.get(child).unwrap();
        assert_eq!(c.weight, 40.0);
        assert_eq!(c.ratio, f64::INFINITY);
        assert!(!c.is_applicable());
    }

    #[test]
    fn zero_over_zero_is_nan() {
        let mut b = TreeBuilder::new();
        let root = b.add_node("idle", [("cpu-cycles", 0.0), ("instructions", 0.0)]);
        let tree = b.build(root).unwrap();
        assert!(derive(&tree, "cpu-cycles", &keys()).get(root).unwrap().ratio.is_nan());
    }

    #[test]
    fn missing_counters_yield_nan() {
        let mut b = TreeBuilder::new();
        let root = b.add_node("root", [("cpu-cycles", 10.0), ("instructions", 5.0)]);
        let no_metric = b.add_node("a", [("cpu-cycles", 1.0), ("instructions", 1.0)]);
        let no_norm = b.add_node("b", [("cpu-cycles", 1.0), ("cache-misses", 3.0)]);
        b.link(root, no_metric).unwrap();
        b.link(root, no_norm).unwrap();
        let tree = b.build(root).unwrap();

        let ann = derive(&tree, "cache-misses", &keys());
        assert!(ann.get(root).unwrap().ratio.is_nan());
        assert!(ann.get(no_metric).unwrap().ratio.is_nan());
        assert!(ann.get(no_norm).unwrap().ratio.is_nan());
        // Weight is still known.
        assert_eq!(ann.get(no_norm).unwrap().weight, 1.0);
    }

    #[test]
    fn missing_weight_is_zero() {
        let mut b = TreeBuilder::new();
        let root = b.add_node("root", [("instructions", 5.0)]);
        let tree = b.build(root).unwrap();
        assert_eq!(derive(&tree, "instructions", &keys()).get(root).unwrap().weight, 0.0);
    }

    #[test]
    fn shared_child_is_visited_once() {
        let mut b = TreeBuilder::new();
        let root = b.add_node("root", [("cpu-cycles", 4.0), ("instructions", 4.0)]);
        let left = b.add_node("left", [("cpu-cycles", 2.0), ("instructions", 2.0)]);
        let right = b.add_node("right", [("cpu-cycles", 2.0), ("instructions", 2.0)]);
        let shared = b.add_node("memcpy", [("cpu-cycles", 1.0), ("instructions", 4.0)]);
        b.link(root, left).unwrap();
        b.link(root, right).unwrap();
        b.link(left, shared).unwrap();
        b.link(right, shared).unwrap();
        b.link(right, shared).unwrap();
        let tree = b.build(root).unwrap();

        let ann = derive(&tree, "cpu-cycles", &keys());
        assert_eq!(ann.len(), 4);
        assert_eq!(ann.visit_order().iter().filter(|id| **id == shared).count(), 1);
        assert_eq!(ann.get(shared).unwrap().ratio, 0.25);
    }

    #[test]
    fn cycles_terminate() {
        let mut b = TreeBuilder::new();
        let root = b.add_node("root", [("cpu-cycles", 1.0), ("instructions", 1.0)]);
        let a = b.add_node("a", [("cpu-cycles", 1.0), ("instructions", 1.0)]);
        b.link(root, a).unwrap();
        b.link(a, root).unwrap();
        b.link(a, a).unwrap();
        let tree = b.build(root).unwrap();

        let ann = derive(&tree, "cpu-cycles", &keys());
        assert_eq!(ann.visit_order(), &[root, a]);
    }

    #[test]
    fn identical_values_are_distinct_nodes() {
        let mut b = TreeBuilder::new();
        let root = b.add_node("f", [("cpu-cycles", 1.0), ("instructions", 1.0)]);
        let twin = b.add_node("f", [("cpu-cycles", 1.0), ("instructions", 1.0)]);
        b.link(root, twin).unwrap();
        let tree = b.build(root).unwrap();
        assert_eq!(derive(&tree, "cpu-cycles", &keys()).len(), 2);
    }

    #[test]
    fn unreachable_nodes_are_not_annotated() {
        let mut b = TreeBuilder::new();
        let root = b.add_node("root", [("cpu-cycles", 1.0), ("instructions", 1.0)]);
        let orphan = b.add_node("orphan", [("cpu-cycles", 1.0), ("instructions", 1.0)]);
        let tree = b.build(root).unwrap();
        let ann = derive(&tree, "cpu-cycles", &keys());
        assert!(ann.get(orphan).is_none());
        assert_eq!(ann.len(), 1);
    }

    #[test]
    fn rederiving_leaves_tree_untouched() {
        let mut b = TreeBuilder::new();
        let root = b.add_node("root", [("cpu-cycles", 9.0), ("instructions", 3.0), ("x", 1.0)]);
        let tree = b.build(root).unwrap();
        let before = tree.node(root).unwrap().counters.clone();

        let first = derive(&tree, "cpu-cycles", &keys());
        let second = derive(&tree, "x", &keys());
        assert_eq!(first.get(root).unwrap().ratio, 3.0);
        assert!((second.get(root).unwrap().ratio - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(second.metric(), "x");
        assert_eq!(tree.node(root).unwrap().counters, before);
    }
}
