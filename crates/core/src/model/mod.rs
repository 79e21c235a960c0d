pub mod tree;

pub use tree::{NodeId, ProfileNode, ProfileTree, TreeBuilder, TreeError};
