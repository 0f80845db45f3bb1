//! Immutable view of one conversation
//!
//! Every transition returns a new snapshot. Feed events are folded in with
//! field-merge semantics, so duplicated or reordered deliveries converge to
//! the same state.

use super::index::GraphIndex;
use super::traverse;
use super::types::{Branch, BranchStatus, Conversation, FeedEvent, Node};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSnapshot {
    conversation: Conversation,
    index: GraphIndex,
    branches: Vec<Branch>,
    active_branch: Option<String>,
}

impl ConversationSnapshot {
    pub fn new(conversation: Conversation, nodes: Vec<Node>, branches: Vec<Branch>) -> Self {
        let mut snapshot = Self {
            conversation,
            index: GraphIndex::new(nodes),
            branches: Vec::with_capacity(branches.len()),
            active_branch: None,
        };
        for branch in branches {
            snapshot.upsert_branch(branch);
        }
        snapshot
    }

    pub fn index(&self) -> &GraphIndex {
        &self.index
    }

    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    pub fn branch(&self, id: &str) -> Option<&Branch> {
        self.branches.iter().find(|b| b.id == id)
    }

    pub fn active_branch_id(&self) -> Option<&str> {
        self.active_branch.as_deref()
    }

    /// Fold one realtime event into a new snapshot
    #[must_use]
    pub fn apply(&self, event: &FeedEvent) -> Self {
        let mut next = self.clone();
        match event {
            FeedEvent::NodeCreated { node } | FeedEvent::NodeUpdated { node } => {
                if node.conversation_id == self.conversation.id {
                    next.index.upsert(node.clone());
                }
            }
            FeedEvent::BranchUpserted { branch } => {
                if branch.conversation_id == self.conversation.id {
                    next.upsert_branch(branch.clone());
                }
            }
        }
        next
    }

    /// Select the branch to display; `None` is the trunk
    #[must_use]
    pub fn switch_branch(&self, branch_id: Option<&str>) -> Self {
        Self {
            active_branch: branch_id.map(String::from),
            ..self.clone()
        }
    }

    /// Record a finished merge: the merge node joins the trunk, the merged
    /// branches close, and the view returns to the trunk
    #[must_use]
    pub fn complete_merge(&self, merge_node: &Node, merged_branch_ids: &[String]) -> Self {
        let mut next = self.apply(&FeedEvent::NodeCreated {
            node: merge_node.clone(),
        });
        for branch in &mut next.branches {
            if merged_branch_ids.contains(&branch.id) && branch.is_active() {
                branch.status = BranchStatus::Merged;
                branch.updated_at = merge_node.created_at;
            }
        }
        next.active_branch = None;
        next
    }

    pub fn display_nodes(&self) -> Vec<&Node> {
        traverse::display_nodes(&self.index, self.active_branch.as_deref())
    }

    pub fn latest_node(&self) -> Option<&Node> {
        traverse::latest_node(&self.index, self.active_branch.as_deref())
    }

    /// Branches whose creation was interrupted before any node was written
    pub fn dangling_branches(&self) -> Vec<&Branch> {
        self.branches
            .iter()
            .filter(|b| traverse::is_dangling(&self.index, b))
            .collect()
    }

    /// Serializable form of the current view
    pub fn view(&self) -> SnapshotView<'_> {
        SnapshotView {
            conversation: &self.conversation,
            branches: &self.branches,
            active_branch_id: self.active_branch_id(),
            display_nodes: self.display_nodes(),
            latest_node: self.latest_node(),
        }
    }

    fn upsert_branch(&mut self, branch: Branch) {
        match self.branches.iter_mut().find(|b| b.id == branch.id) {
            Some(existing) => existing.absorb(branch),
            None => self.branches.push(branch),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotView<'a> {
    pub conversation: &'a Conversation,
    pub branches: &'a [Branch],
    pub active_branch_id: Option<&'a str>,
    pub display_nodes: Vec<&'a Node>,
    pub latest_node: Option<&'a Node>,
}
