//! Property-based tests for graph traversal and context assembly

use super::context::{assemble_context, RECENT_WINDOW};
use super::fixtures;
use super::index::GraphIndex;
use super::traverse::{branch_members, display_nodes, walk_to_root};
use super::types::{Node, Role};
use proptest::prelude::*;
use std::collections::HashSet;

// ============================================================================
// Arbitrary Generators
// ============================================================================

/// Up to 40 nodes where each may point at any node, cycles included
fn arb_wild_graph() -> impl Strategy<Value = Vec<Node>> {
    (1usize..40).prop_flat_map(|n| {
        proptest::collection::vec(proptest::option::of(0..n), n).prop_map(|parents| {
            parents
                .into_iter()
                .enumerate()
                .map(|(i, parent)| {
                    let parent = parent.map(|p| format!("n{p}"));
                    let parents: Vec<&str> = parent.iter().map(String::as_str).collect();
                    fixtures::node(&format!("n{i}"), seq(i), &parents, None, Role::User)
                })
                .collect()
        })
    })
}

/// A trunk plus branches, each forking from some earlier node
fn arb_branched_graph() -> impl Strategy<Value = Vec<Node>> {
    (
        1usize..8,
        proptest::collection::vec((any::<prop::sample::Index>(), 1usize..5), 0..6),
    )
        .prop_map(|(trunk_len, forks)| {
            let mut nodes = fixtures::trunk(trunk_len);
            for (b, (fork_at, len)) in forks.into_iter().enumerate() {
                let branch = format!("b{b}");
                let mut parent = nodes[fork_at.index(nodes.len())].id.clone();
                for step in 0..len {
                    let id = format!("{branch}-{step}");
                    let node = fixtures::node(
                        &id,
                        seq(nodes.len()),
                        &[parent.as_str()],
                        Some(&branch),
                        Role::User,
                    );
                    nodes.push(node);
                    parent = id;
                }
            }
            nodes
        })
}

fn seq(i: usize) -> i64 {
    i64::try_from(i).unwrap_or(i64::MAX)
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Walks terminate and never repeat a node, even through cycles
    #[test]
    fn prop_walk_terminates_without_repeats(
        nodes in arb_wild_graph(),
        start in any::<prop::sample::Index>()
    ) {
        let index = GraphIndex::new(nodes);
        let start_id = index.nodes()[start.index(index.len())].id.clone();
        let path = walk_to_root(&index, &start_id);

        prop_assert!(path.len() <= index.len());
        let unique: HashSet<&str> = path.iter().map(|n| n.id.as_str()).collect();
        prop_assert_eq!(unique.len(), path.len());
        prop_assert_eq!(path[0].id.as_str(), start_id.as_str());
    }

    // Context size is bounded regardless of depth
    #[test]
    fn prop_context_is_bounded(len in 1usize..200) {
        let index = GraphIndex::new(fixtures::trunk(len));
        let target = format!("n{}", len - 1);
        let messages = assemble_context(&index, &target);
        prop_assert!(messages.len() <= RECENT_WINDOW + 2);
        let synthetic = if len > RECENT_WINDOW { 2 } else { 0 };
        prop_assert_eq!(messages.len(), len.min(RECENT_WINDOW) + synthetic);
    }

    // Trunk view plus every branch's own continuation covers each node once
    #[test]
    fn prop_display_partitions_nodes(nodes in arb_branched_graph()) {
        let index = GraphIndex::new(nodes);
        let branch_ids: HashSet<String> = index
            .nodes()
            .iter()
            .filter_map(|n| n.branch_id.clone())
            .collect();

        let mut seen: Vec<&str> = display_nodes(&index, None)
            .into_iter()
            .map(|n| n.id.as_str())
            .collect();
        for branch in &branch_ids {
            let display = display_nodes(&index, Some(branch));
            let own = branch_members(&index, Some(branch)).len();
            prop_assert!(display.len() >= own);
            let prefix = display.len() - own;
            // The shared prefix never contains the branch's own nodes
            prop_assert!(display.iter().take(prefix).all(|n| !n.on_branch(Some(branch))));
            seen.extend(display.into_iter().skip(prefix).map(|n| n.id.as_str()));
        }

        let unique: HashSet<&str> = seen.iter().copied().collect();
        prop_assert_eq!(unique.len(), seen.len(), "duplicate node in views");
        prop_assert_eq!(seen.len(), index.len(), "node missing from views");
    }
}
