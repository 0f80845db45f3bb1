//! Primary-parent traversal over a [`GraphIndex`]
//!
//! The store is not trusted to be acyclic: every walk carries a visited
//! bitmap and stops at the first repeated node.

use super::index::GraphIndex;
use super::types::{Branch, Node};
use std::collections::HashSet;

/// Follow `parent_ids[0]` from `start_id` to the root.
///
/// Returns `[start, parent, ..., root]`. An unknown start id yields an empty
/// path; a dangling parent reference ends the walk at the last known node.
pub fn walk_to_root<'a>(index: &'a GraphIndex, start_id: &str) -> Vec<&'a Node> {
    let mut visited = vec![false; index.len()];
    let mut path = Vec::new();
    let mut cursor = index.position(start_id);

    while let Some(pos) = cursor {
        if visited[pos] {
            tracing::warn!(node_id = %index.at(pos).id, "Cycle in node ancestry, stopping walk");
            break;
        }
        visited[pos] = true;
        let node = index.at(pos);
        path.push(node);
        cursor = node.primary_parent().and_then(|id| index.position(id));
    }

    path
}

/// Nodes whose `branch_id` equals `branch_id` (None selects the trunk),
/// in sequence order
pub fn branch_members<'a>(index: &'a GraphIndex, branch_id: Option<&str>) -> Vec<&'a Node> {
    index
        .nodes()
        .iter()
        .filter(|n| n.on_branch(branch_id))
        .collect()
}

pub fn latest_node<'a>(index: &'a GraphIndex, branch_id: Option<&str>) -> Option<&'a Node> {
    index
        .nodes()
        .iter()
        .rev()
        .find(|n| n.on_branch(branch_id))
}

/// First node on `b`'s path to root that also lies on `a`'s path
pub fn common_ancestor<'a>(index: &'a GraphIndex, a: &str, b: &str) -> Option<&'a Node> {
    let on_a: HashSet<&str> = walk_to_root(index, a)
        .into_iter()
        .map(|n| n.id.as_str())
        .collect();
    walk_to_root(index, b)
        .into_iter()
        .find(|n| on_a.contains(n.id.as_str()))
}

/// Nodes shown for a view: the trunk as-is, or for a branch the shared
/// history up to its fork followed by the branch's own nodes.
pub fn display_nodes<'a>(index: &'a GraphIndex, branch_id: Option<&str>) -> Vec<&'a Node> {
    let members = branch_members(index, branch_id);
    if branch_id.is_none() {
        return members;
    }
    let Some(first) = members.first() else {
        return Vec::new();
    };
    let Some(fork) = first.primary_parent() else {
        return members;
    };

    let mut shared = walk_to_root(index, fork);
    shared.reverse();
    // A malformed graph may route a branch's ancestry back through itself
    shared.retain(|n| !n.on_branch(branch_id));
    shared.extend(members);
    shared
}

/// The first node of a branch: the recorded root when it exists, otherwise
/// re-derived from the nodes carrying the branch id.
pub fn resolve_branch_root<'a>(index: &'a GraphIndex, branch: &Branch) -> Option<&'a Node> {
    branch
        .root_node_id
        .as_deref()
        .and_then(|id| index.get(id))
        .or_else(|| {
            index
                .nodes()
                .iter()
                .find(|n| n.on_branch(Some(&branch.id)))
        })
}

/// A branch whose two-step creation never finished: no root recorded and
/// no node pointing at it
pub fn is_dangling(index: &GraphIndex, branch: &Branch) -> bool {
    branch.is_active()
        && branch.root_node_id.is_none()
        && resolve_branch_root(index, branch).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::fixtures;
    use crate::graph::types::Role;

    fn ids(nodes: &[&Node]) -> Vec<String> {
        nodes.iter().map(|n| n.id.clone()).collect()
    }

    #[test]
    fn test_walk_to_root_follows_primary_parent() {
        let (nodes, _) = fixtures::explored();
        let index = GraphIndex::new(nodes);
        assert_eq!(
            ids(&walk_to_root(&index, "F1")),
            vec!["F1", "E", "D", "C", "B", "A"]
        );
        assert!(walk_to_root(&index, "missing").is_empty());
    }

    #[test]
    fn test_walk_to_root_stops_on_cycle() {
        let index = GraphIndex::new(vec![
            fixtures::node("a", 0, &["c"], None, Role::User),
            fixtures::node("b", 1, &["a"], None, Role::Assistant),
            fixtures::node("c", 2, &["b"], None, Role::User),
        ]);
        assert_eq!(ids(&walk_to_root(&index, "c")), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_walk_to_root_ignores_secondary_parents() {
        let mut nodes = fixtures::explored().0;
        nodes.push(fixtures::node("M", 7, &["F1", "G1"], None, Role::Assistant));
        let index = GraphIndex::new(nodes);
        let path = ids(&walk_to_root(&index, "M"));
        assert!(path.contains(&"F1".to_string()));
        assert!(!path.contains(&"G1".to_string()));
    }

    #[test]
    fn test_branch_members_and_latest() {
        let (nodes, _) = fixtures::explored();
        let index = GraphIndex::new(nodes);
        assert_eq!(
            ids(&branch_members(&index, None)),
            vec!["A", "B", "C", "D", "E"]
        );
        assert_eq!(ids(&branch_members(&index, Some("F"))), vec!["F1"]);
        assert_eq!(latest_node(&index, None).unwrap().id, "E");
        assert_eq!(latest_node(&index, Some("G")).unwrap().id, "G1");
        assert!(latest_node(&index, Some("nope")).is_none());
    }

    #[test]
    fn test_common_ancestor() {
        let (nodes, _) = fixtures::explored();
        let index = GraphIndex::new(nodes);
        assert_eq!(common_ancestor(&index, "F1", "G1").unwrap().id, "E");
        assert_eq!(common_ancestor(&index, "F1", "C").unwrap().id, "C");

        let disjoint = GraphIndex::new(vec![
            fixtures::node("x", 0, &[], None, Role::User),
            fixtures::node("y", 1, &[], None, Role::User),
        ]);
        assert!(common_ancestor(&disjoint, "x", "y").is_none());
    }

    #[test]
    fn test_display_nodes_for_branch() {
        let (nodes, _) = fixtures::explored();
        let index = GraphIndex::new(nodes);
        assert_eq!(
            ids(&display_nodes(&index, Some("F"))),
            vec!["A", "B", "C", "D", "E", "F1"]
        );
        assert_eq!(
            ids(&display_nodes(&index, None)),
            vec!["A", "B", "C", "D", "E"]
        );
        assert!(display_nodes(&index, Some("empty")).is_empty());
    }

    #[test]
    fn test_resolve_root_of_dangling_branch() {
        let (nodes, _) = fixtures::explored();
        let index = GraphIndex::new(nodes);

        let interrupted = fixtures::branch("F", "E", None);
        assert_eq!(resolve_branch_root(&index, &interrupted).unwrap().id, "F1");
        assert!(!is_dangling(&index, &interrupted));

        let orphan = fixtures::branch("H", "E", None);
        assert!(resolve_branch_root(&index, &orphan).is_none());
        assert!(is_dangling(&index, &orphan));
    }
}
