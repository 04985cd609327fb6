use crate::Hash32;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct NodeId {
    /// 0 = leaf, depth = root
    pub height: u16,
    /// Position among the nodes of this height, left to right
    pub index: u64,
}

impl NodeId {
    pub fn sibling(self) -> Self {
        Self { height: self.height, index: self.index ^ 1 }
    }

    pub fn parent(self) -> Self {
        Self { height: self.height + 1, index: self.index >> 1 }
    }
}

/// Storage for non-default tree nodes. A missing node is the default hash of its height.
pub trait NodeStore: Send + Sync {
    fn get(&self, id: &NodeId) -> Option<Hash32>;
    fn insert(&mut self, id: NodeId, hash: Hash32);
    fn remove(&mut self, id: &NodeId);
    fn clear(&mut self);
}

/// Simple in-memory store
#[derive(Default, Clone, Debug)]
pub struct InMemoryNodeStore {
    nodes: HashMap<NodeId, Hash32>,
}

impl InMemoryNodeStore {
    pub fn new() -> Self {
        Self { nodes: HashMap::new() }
    }

    /// Only for tests / debugging
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl NodeStore for InMemoryNodeStore {
    fn get(&self, id: &NodeId) -> Option<Hash32> {
        self.nodes.get(id).copied()
    }

    fn insert(&mut self, id: NodeId, hash: Hash32) {
        self.nodes.insert(id, hash);
    }

    fn remove(&mut self, id: &NodeId) {
        self.nodes.remove(id);
    }

    fn clear(&mut self) {
        self.nodes.clear();
    }
}
