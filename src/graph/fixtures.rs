//! Node and branch builders for tests

use super::types::{Branch, BranchStatus, Metadata, Node, NodeStatus, NodeType, Role};
use chrono::Utc;

pub fn node(id: &str, sequence: i64, parents: &[&str], branch: Option<&str>, role: Role) -> Node {
    let now = Utc::now();
    Node {
        id: id.to_string(),
        conversation_id: "conv".to_string(),
        parent_ids: parents.iter().map(ToString::to_string).collect(),
        node_type: match role {
            Role::User => NodeType::User,
            Role::Assistant | Role::System => NodeType::Assistant,
        },
        status: NodeStatus::Completed,
        role,
        input: format!("{id} input"),
        output: Some(format!("{id} output")),
        reasoning: None,
        summary: None,
        branch_label: None,
        branch_id: branch.map(String::from),
        merge_strategy: None,
        sequence,
        metadata: Metadata::new(),
        created_at: now,
        updated_at: now,
    }
}

/// Linear trunk of `len` nodes alternating user/assistant, ids `n0..`
pub fn trunk(len: usize) -> Vec<Node> {
    (0..len)
        .map(|i| {
            let id = format!("n{i}");
            let parent = (i > 0).then(|| format!("n{}", i - 1));
            let parents: Vec<&str> = parent.iter().map(String::as_str).collect();
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            node(&id, i64::try_from(i).unwrap_or(i64::MAX), &parents, None, role)
        })
        .collect()
}

pub fn branch(id: &str, parent_node_id: &str, root: Option<&str>) -> Branch {
    let now = Utc::now();
    Branch {
        id: id.to_string(),
        conversation_id: "conv".to_string(),
        label: format!("Branch {id}"),
        description: None,
        parent_node_id: parent_node_id.to_string(),
        root_node_id: root.map(String::from),
        status: BranchStatus::Active,
        created_at: now,
        updated_at: now,
    }
}

/// The A..D trunk, explore root E and two one-node branches F and G
pub fn explored() -> (Vec<Node>, Vec<Branch>) {
    let mut nodes = vec![
        node("A", 0, &[], None, Role::User),
        node("B", 1, &["A"], None, Role::Assistant),
        node("C", 2, &["B"], None, Role::User),
        node("D", 3, &["C"], None, Role::Assistant),
        node("E", 4, &["D"], None, Role::Assistant),
        node("F1", 5, &["E"], Some("F"), Role::Assistant),
        node("G1", 6, &["E"], Some("G"), Role::Assistant),
    ];
    nodes[4].node_type = NodeType::ExploreRoot;
    nodes[5].node_type = NodeType::ExploreBranch;
    nodes[6].node_type = NodeType::ExploreBranch;
    let branches = vec![branch("F", "E", Some("F1")), branch("G", "E", Some("G1"))];
    (nodes, branches)
}
