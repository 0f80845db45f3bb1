//! Id-keyed arena over a conversation's nodes

use super::types::Node;
use std::collections::HashMap;

/// Nodes stored in sequence order with O(1) lookup by id.
///
/// Traversal code works with arena positions so cycle guards can use a
/// plain visited bitmap instead of hashing ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphIndex {
    nodes: Vec<Node>,
    by_id: HashMap<String, usize>,
}

impl GraphIndex {
    /// Build from an unordered node set. Duplicate ids are folded together
    /// with field-merge semantics.
    pub fn new(nodes: impl IntoIterator<Item = Node>) -> Self {
        let mut index = Self::default();
        for node in nodes {
            index.insert_unsorted(node);
        }
        index.reorder();
        index
    }

    fn insert_unsorted(&mut self, node: Node) {
        match self.by_id.get(&node.id) {
            Some(&pos) => self.nodes[pos].absorb(node),
            None => {
                self.by_id.insert(node.id.clone(), self.nodes.len());
                self.nodes.push(node);
            }
        }
    }

    fn reorder(&mut self) {
        self.nodes
            .sort_by(|a, b| a.sequence.cmp(&b.sequence).then_with(|| a.created_at.cmp(&b.created_at)));
        self.by_id = self
            .nodes
            .iter()
            .enumerate()
            .map(|(pos, node)| (node.id.clone(), pos))
            .collect();
    }

    /// Insert a node or merge it into the existing copy
    pub fn upsert(&mut self, node: Node) {
        let known = self.by_id.contains_key(&node.id);
        self.insert_unsorted(node);
        if !known {
            self.reorder();
        }
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.position(id).map(|pos| &self.nodes[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub(crate) fn position(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub(crate) fn at(&self, pos: usize) -> &Node {
        &self.nodes[pos]
    }

    /// All nodes ordered by sequence
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
