//! Arena-resident tree nodes. A [`Node`] never owns its children or parent
//! directly — it holds [`NodeId`] handles into the owning [`crate::tree::BaseTree`]'s
//! slot map, the same indirection a `slotmap`-backed arena gives any graph
//! that needs cheap structural edits (attach/detach a subtree) without
//! fighting the borrow checker over a `Rc<RefCell<_>>` graph.

use popgen::Split;
use slotmap::new_key_type;

new_key_type! {
    pub struct NodeId;
}

#[derive(Debug, Clone)]
pub struct Node {
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Index into the tree's height table. `None` only for leaves, which are
    /// pinned at age zero and never get their own height parameter.
    pub height_index: Option<usize>,
    /// Index into the tree's leaf-label table; `Some` only for leaves.
    pub leaf_index: Option<usize>,
    pub label: Option<String>,
    pub split: Split,
    /// Set whenever a move touches this node's subtree; the likelihood
    /// engine uses it to skip re-peeling clades that haven't changed.
    pub dirty: bool,
}

impl Node {
    pub fn new_leaf(leaf_index: usize, label: String, split: Split) -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            height_index: None,
            leaf_index: Some(leaf_index),
            label: Some(label),
            split,
            dirty: true,
        }
    }

    pub fn new_internal(height_index: usize, split: Split) -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            height_index: Some(height_index),
            leaf_index: None,
            label: None,
            split,
            dirty: true,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}
