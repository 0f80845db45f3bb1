//! Conversation graph records
//!
//! Nodes are immutable in identity and ancestry once written; only status,
//! output, summary and metadata move afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Open metadata bag attached to every node
pub type Metadata = serde_json::Map<String, Value>;

/// Metadata keys the engine reads or writes
pub mod meta {
    pub const MODEL: &str = "model";
    pub const DURATION_MS: &str = "duration_ms";
    pub const BRANCH_OPTIONS_PROPOSED: &str = "branch_options_proposed";
    pub const BRANCH_OPTIONS_SELECTED: &str = "branch_options_selected";
}

/// Merge strategy recorded on merge nodes
pub const MERGE_STRATEGY_SUMMARIES: &str = "shared_prefix_branch_summaries";

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    User,
    Assistant,
    ExploreRoot,
    ExploreBranch,
    Merge,
}

string_enum!(NodeType {
    User => "user",
    Assistant => "assistant",
    ExploreRoot => "explore_root",
    ExploreBranch => "explore_branch",
    Merge => "merge",
});

/// Generation lifecycle status of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Streaming,
    Completed,
    /// Generation stopped by the caller; output holds what had arrived
    Partial,
    Failed,
}

string_enum!(NodeStatus {
    Pending => "pending",
    Streaming => "streaming",
    Completed => "completed",
    Partial => "partial",
    Failed => "failed",
});

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Partial | Self::Failed)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Pending | Self::Streaming)
    }

    /// Position along the lifecycle; statuses never move backwards
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Streaming => 1,
            Self::Completed | Self::Partial | Self::Failed => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

string_enum!(Role {
    User => "user",
    Assistant => "assistant",
    System => "system",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    Active,
    Merged,
    Abandoned,
}

string_enum!(BranchStatus {
    Active => "active",
    Merged => "merged",
    Abandoned => "abandoned",
});

/// A single turn or structural marker in the conversation graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub conversation_id: String,
    /// `parent_ids[0]` is the primary parent; the rest come from merges
    pub parent_ids: Vec<String>,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub status: NodeStatus,
    pub role: Role,
    pub input: String,
    pub output: Option<String>,
    pub reasoning: Option<String>,
    pub summary: Option<String>,
    pub branch_label: Option<String>,
    pub branch_id: Option<String>,
    pub merge_strategy: Option<String>,
    pub sequence: i64,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn primary_parent(&self) -> Option<&str> {
        self.parent_ids.first().map(String::as_str)
    }

    /// Output once there is any, otherwise the input
    pub fn text(&self) -> &str {
        match self.output.as_deref() {
            Some(output) if !output.is_empty() => output,
            _ => &self.input,
        }
    }

    pub fn on_branch(&self, branch_id: Option<&str>) -> bool {
        self.branch_id.as_deref() == branch_id
    }

    /// Fold a possibly stale or duplicated copy of this node into `self`.
    ///
    /// A copy from earlier in the lifecycle never overrides a later status;
    /// metadata keys are unioned either way.
    pub fn absorb(&mut self, incoming: Node) {
        debug_assert_eq!(self.id, incoming.id);
        let newer = incoming.status.rank() > self.status.rank()
            || (incoming.status.rank() == self.status.rank()
                && incoming.updated_at >= self.updated_at);

        if newer {
            self.status = incoming.status;
            if incoming.output.is_some() {
                self.output = incoming.output;
            }
            if incoming.reasoning.is_some() {
                self.reasoning = incoming.reasoning;
            }
            if incoming.summary.is_some() {
                self.summary = incoming.summary;
            }
            self.metadata.extend(incoming.metadata);
            self.updated_at = incoming.updated_at;
        } else {
            for (key, value) in incoming.metadata {
                self.metadata.entry(key).or_insert(value);
            }
            if self.summary.is_none() {
                self.summary = incoming.summary;
            }
        }
    }
}

/// Fields supplied when creating a node; the store assigns id, sequence
/// and timestamps
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    pub conversation_id: String,
    pub parent_ids: Vec<String>,
    pub node_type: NodeType,
    pub status: NodeStatus,
    pub role: Role,
    pub input: String,
    pub output: Option<String>,
    pub branch_id: Option<String>,
    pub branch_label: Option<String>,
    pub merge_strategy: Option<String>,
    pub metadata: Metadata,
}

impl NewNode {
    fn base(
        conversation_id: &str,
        parent_ids: Vec<String>,
        node_type: NodeType,
        role: Role,
    ) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            parent_ids,
            node_type,
            status: NodeStatus::Completed,
            role,
            input: String::new(),
            output: None,
            branch_id: None,
            branch_label: None,
            merge_strategy: None,
            metadata: Metadata::new(),
        }
    }

    /// A user turn; complete at creation
    pub fn user(
        conversation_id: &str,
        parent: Option<&str>,
        branch_id: Option<&str>,
        text: &str,
    ) -> Self {
        let parent_ids = parent.map(String::from).into_iter().collect();
        Self {
            input: text.to_string(),
            output: Some(text.to_string()),
            branch_id: branch_id.map(String::from),
            ..Self::base(conversation_id, parent_ids, NodeType::User, Role::User)
        }
    }

    /// The assistant reply placeholder created right after a user turn
    pub fn assistant_pending(
        conversation_id: &str,
        parent: &str,
        branch_id: Option<&str>,
        input: &str,
        model: &str,
    ) -> Self {
        Self {
            parent_ids: vec![parent.to_string()],
            ..Self::assistant_reply(conversation_id, branch_id, input, model)
        }
    }

    /// Pending reply without a parent yet; the store links it to the user
    /// node it is created with
    pub fn assistant_reply(
        conversation_id: &str,
        branch_id: Option<&str>,
        input: &str,
        model: &str,
    ) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(meta::MODEL.to_string(), Value::from(model));
        Self {
            status: NodeStatus::Pending,
            input: input.to_string(),
            branch_id: branch_id.map(String::from),
            metadata,
            ..Self::base(conversation_id, Vec::new(), NodeType::Assistant, Role::Assistant)
        }
    }

    pub fn explore_root(
        conversation_id: &str,
        current: &Node,
        options: &[BranchOption],
        model: &str,
    ) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(meta::MODEL.to_string(), Value::from(model));
        metadata.insert(
            meta::BRANCH_OPTIONS_PROPOSED.to_string(),
            serde_json::to_value(options).unwrap_or(Value::Null),
        );
        Self {
            input: "/explore".to_string(),
            output: Some(format!("Proposed {} exploration directions", options.len())),
            branch_id: current.branch_id.clone(),
            metadata,
            ..Self::base(
                conversation_id,
                vec![current.id.clone()],
                NodeType::ExploreRoot,
                Role::Assistant,
            )
        }
    }

    /// First node of a freshly committed branch
    pub fn explore_branch(branch: &Branch, option: &BranchOption) -> Self {
        Self {
            input: option.initial_prompt.clone(),
            output: Some(option.initial_prompt.clone()),
            branch_id: Some(branch.id.clone()),
            branch_label: Some(branch.label.clone()),
            ..Self::base(
                &branch.conversation_id,
                vec![branch.parent_node_id.clone()],
                NodeType::ExploreBranch,
                Role::Assistant,
            )
        }
    }

    pub fn merge(
        conversation_id: &str,
        parent_ids: Vec<String>,
        labels: &[&str],
        synthesis: String,
        model: &str,
    ) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(meta::MODEL.to_string(), Value::from(model));
        Self {
            input: format!("/merge [{}]", labels.join(", ")),
            output: Some(synthesis),
            merge_strategy: Some(MERGE_STRATEGY_SUMMARIES.to_string()),
            metadata,
            ..Self::base(conversation_id, parent_ids, NodeType::Merge, Role::Assistant)
        }
    }
}

/// Partial update applied to an existing node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodePatch {
    pub status: Option<NodeStatus>,
    pub output: Option<String>,
    pub summary: Option<String>,
    /// Keys merged into the stored metadata
    pub metadata: Metadata,
}

impl NodePatch {
    pub fn status(status: NodeStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    #[must_use]
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Apply to an in-memory node
    pub fn apply_to(&self, node: &mut Node, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            node.status = status;
        }
        if let Some(output) = &self.output {
            node.output = Some(output.clone());
        }
        if let Some(summary) = &self.summary {
            node.summary = Some(summary.clone());
        }
        node.metadata
            .extend(self.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        node.updated_at = now;
    }
}

/// An exploration lineage forked from an explore root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub conversation_id: String,
    pub label: String,
    pub description: Option<String>,
    /// Always an explore_root node
    pub parent_node_id: String,
    /// Null until the branch's first node exists
    pub root_node_id: Option<String>,
    pub status: BranchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Branch {
    pub fn is_active(&self) -> bool {
        self.status == BranchStatus::Active
    }

    /// Field-merge a feed copy; status only moves away from `active`
    pub fn absorb(&mut self, incoming: Branch) {
        if incoming.root_node_id.is_some() {
            self.root_node_id = incoming.root_node_id;
        }
        if self.status == BranchStatus::Active {
            self.status = incoming.status;
        }
        self.updated_at = self.updated_at.max(incoming.updated_at);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBranch {
    pub conversation_id: String,
    pub label: String,
    pub description: Option<String>,
    pub parent_node_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchPatch {
    pub status: Option<BranchStatus>,
    pub root_node_id: Option<String>,
}

/// Container for nodes and branches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const DEFAULT_TITLE: &str = "New Conversation";

/// One proposed exploration direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchOption {
    pub id: String,
    pub label: String,
    pub description: String,
    pub initial_prompt: String,
}

/// Change notification delivered on a conversation's realtime feed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    NodeCreated { node: Node },
    NodeUpdated { node: Node },
    BranchUpserted { branch: Branch },
}

impl FeedEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NodeCreated { .. } => "node_created",
            Self::NodeUpdated { .. } => "node_updated",
            Self::BranchUpserted { .. } => "branch_upserted",
        }
    }
}
