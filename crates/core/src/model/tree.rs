use std::collections::{BTreeMap, BTreeSet};

use ratioflame_protocol::SharedStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of a node inside one `ProfileTree`.
///
/// Two nodes with identical names and counters are still different nodes;
/// everything that deduplicates (derivation, layout) compares ids, never
/// values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One call-tree frame with its raw counter samples.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileNode {
    /// Display label; not unique.
    pub name: SharedStr,
    /// Counter name to sample count.
    pub counters: BTreeMap<String, f64>,
    /// Render order only.
    children: Vec<NodeId>,
}

impl ProfileNode {
    pub fn counter(&self, key: &str) -> Option<f64> {
        self.counters.get(key).copied()
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("node {0} does not exist")]
    UnknownNode(usize),
    #[error("tree has no nodes")]
    Empty,
}

/// An immutable profile tree stored as an arena.
///
/// Once built, nothing can change the node set, the edges or any counter
/// map: all accessors take `&self`. Selecting another data file means
/// building another tree.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileTree {
    nodes: Vec<ProfileNode>,
    root: NodeId,
}

impl ProfileTree {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&ProfileNode> {
        self.nodes.get(id.0)
    }

    /// Number of node objects in the arena (shared nodes count once).
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &ProfileNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Sorted union of every counter key in the tree. Populates the metric
    /// selector.
    pub fn counter_names(&self) -> Vec<String> {
        let names: BTreeSet<&str> = self
            .nodes
            .iter()
            .flat_map(|n| n.counters.keys().map(String::as_str))
            .collect();
        names.into_iter().map(str::to_string).collect()
    }
}

/// Incremental constructor for `ProfileTree`.
///
/// Unlike the JSON loader, the builder can attach one node under several
/// parents (or even under its own descendant), which is how malformed,
/// graph-shaped input is represented.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    nodes: Vec<ProfileNode>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node<I, K>(&mut self, name: impl Into<SharedStr>, counters: I) -> NodeId
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        let id = NodeId(self.nodes.len());
        self.nodes.push(ProfileNode {
            name: name.into(),
            counters: counters.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            children: Vec::new(),
        });
        id
    }

    /// Append `child` to `parent`'s children.
    pub fn link(&mut self, parent: NodeId, child: NodeId) -> Result<(), TreeError> {
        if child.0 >= self.nodes.len() {
            return Err(TreeError::UnknownNode(child.0));
        }
        let parent_node = self
            .nodes
            .get_mut(parent.0)
            .ok_or(TreeError::UnknownNode(parent.0))?;
        parent_node.children.push(child);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn build(self, root: NodeId) -> Result<ProfileTree, TreeError> {
        if self.nodes.is_empty() {
            return Err(TreeError::Empty);
        }
        if root.0 >= self.nodes.len() {
            return Err(TreeError::UnknownNode(root.0));
        }
        Ok(ProfileTree {
            nodes: self.nodes,
            root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_and_links() {
        let mut b = TreeBuilder::new();
        let root = b.add_node("root", [("cpu-cycles", 10.0)]);
        let child = b.add_node("child", [("cpu-cycles", 4.0), ("instructions", 2.0)]);
        b.link(root, child).unwrap();
        let tree = b.build(root).unwrap();

        assert_eq!(tree.len(), 2);
        assert_eq!(tree.root(), root);
        let root_node = tree.node(root).unwrap();
        assert_eq!(root_node.children(), &[child]);
        assert_eq!(tree.node(child).unwrap().counter("instructions"), Some(2.0));
        assert_eq!(tree.node(child).unwrap().counter("branch-misses"), None);
    }

    #[test]
    fn link_rejects_unknown_nodes() {
        let mut b = TreeBuilder::new();
        let root = b.add_node("root", [("cpu-cycles", 1.0)]);
        assert_eq!(b.link(root, NodeId(7)), Err(TreeError::UnknownNode(7)));
        assert_eq!(b.link(NodeId(3), root), Err(TreeError::UnknownNode(3)));
    }

    #[test]
    fn empty_builder_fails() {
        assert_eq!(TreeBuilder::new().build(NodeId(0)).err(), Some(TreeError::Empty));
    }

    #[test]
    fn counter_names_are_sorted_union() {
        let mut b = TreeBuilder::new();
        let root = b.add_node("root", [("instructions", 1.0), ("cpu-cycles", 1.0)]);
        let child = b.add_node("c", [("cache-misses", 1.0), ("cpu-cycles", 1.0)]);
        b.link(root, child).unwrap();
        let tree = b.build(root).unwrap();
        assert_eq!(
            tree.counter_names(),
            vec!["cache-misses", "cpu-cycles", "instructions"]
        );
    }
}
