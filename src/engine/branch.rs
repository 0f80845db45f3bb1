//! Exploration and branch bookkeeping
//!
//! Exploring proposes directions off a node and records an explore root.
//! Committing a direction creates the branch in two writes (the branch row,
//! then its first node) and finally records the root on the branch. A crash
//! between the writes leaves a branch without a recorded root, which later
//! reads repair from the nodes that point at it.

use super::{Engine, EngineError, EngineResult, Generator, Storage};
use crate::graph::{
    assemble_context, meta, traverse, Branch, BranchOption, BranchPatch, BranchStatus,
    ConversationSnapshot, FeedEvent, GraphIndex, NewBranch, NewNode, Node, NodePatch, NodeType,
};
use crate::llm::LlmMessage;
use crate::prompts::{EXPLORE_INSTRUCTION, EXPLORE_SYSTEM_PROMPT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Directions proposed off a node, ready for selection
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExploreProposal {
    pub explore_root_node_id: String,
    pub options: Vec<BranchOption>,
}

#[derive(Debug, Deserialize)]
struct ProposedDirections {
    directions: Vec<ProposedDirection>,
}

#[derive(Debug, Deserialize)]
struct ProposedDirection {
    label: String,
    #[serde(default)]
    description: String,
    initial_prompt: String,
}

impl ProposedDirection {
    fn new(label: &str, description: &str, initial_prompt: &str) -> Self {
        Self {
            label: label.to_string(),
            description: description.to_string(),
            initial_prompt: initial_prompt.to_string(),
        }
    }

    fn into_option(self) -> BranchOption {
        BranchOption {
            id: Uuid::new_v4().to_string(),
            label: self.label,
            description: self.description,
            initial_prompt: self.initial_prompt,
        }
    }
}

/// Used whenever the model's directions cannot be read
fn fallback_directions() -> Vec<ProposedDirection> {
    vec![
        ProposedDirection::new(
            "Direction A",
            "Explore the primary approach discussed.",
            "Let me explore the main approach further.",
        ),
        ProposedDirection::new(
            "Direction B",
            "Consider an alternative perspective.",
            "What if we took a completely different approach?",
        ),
    ]
}

/// Parse the model's structured reply, tolerating a Markdown code fence
fn parse_directions(raw: &str) -> EngineResult<Vec<ProposedDirection>> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    let parsed: ProposedDirections = serde_json::from_str(body.trim())?;
    let directions: Vec<_> = parsed
        .directions
        .into_iter()
        .filter(|d| !d.label.trim().is_empty() && !d.initial_prompt.trim().is_empty())
        .collect();
    if directions.is_empty() {
        return Err(EngineError::Parse("no usable directions".to_string()));
    }
    Ok(directions)
}

impl<S, G> Engine<S, G>
where
    S: Storage + 'static,
    G: Generator + 'static,
{
    /// Ask the model for directions off `current_node_id` and record them on
    /// a new explore root node.
    pub async fn propose_explore(
        &self,
        conversation_id: &str,
        current_node_id: &str,
    ) -> EngineResult<ExploreProposal> {
        self.store.get_conversation(conversation_id).await?;
        let index = GraphIndex::new(self.store.list_nodes(conversation_id).await?);
        let current = index.get(current_node_id).ok_or_else(|| {
            EngineError::not_found(format!("Node not found: {current_node_id}"))
        })?;

        let options = self.propose_directions(&index, current).await?;
        let root = self
            .create_node(&NewNode::explore_root(
                conversation_id,
                current,
                &options,
                self.generator.model_id(),
            ))
            .await?;

        tracing::info!(
            conv_id = %conversation_id,
            explore_root = %root.id,
            options = options.len(),
            "Proposed exploration directions"
        );
        Ok(ExploreProposal {
            explore_root_node_id: root.id,
            options,
        })
    }

    async fn propose_directions(
        &self,
        index: &GraphIndex,
        current: &Node,
    ) -> EngineResult<Vec<BranchOption>> {
        let mut messages = assemble_context(index, &current.id);
        messages.push(LlmMessage::user(EXPLORE_INSTRUCTION));

        let raw = self
            .generator
            .generate_structured(&messages, Some(EXPLORE_SYSTEM_PROMPT))
            .await?;
        let directions = parse_directions(&raw).unwrap_or_else(|e| {
            tracing::warn!(
                conv_id = %current.conversation_id,
                error = %e,
                "Falling back to default exploration directions"
            );
            fallback_directions()
        });
        Ok(directions
            .into_iter()
            .map(ProposedDirection::into_option)
            .collect())
    }

    /// Turn selected options of an explore root into branches
    pub async fn commit_explore(
        &self,
        conversation_id: &str,
        explore_root_id: &str,
        option_ids: &[String],
    ) -> EngineResult<Vec<Branch>> {
        let root = self.store.get_node(explore_root_id).await?;
        if root.conversation_id != conversation_id {
            return Err(EngineError::not_found(format!(
                "Node not found: {explore_root_id}"
            )));
        }
        if root.node_type != NodeType::ExploreRoot {
            return Err(EngineError::validation(format!(
                "Node {explore_root_id} is not an explore root"
            )));
        }

        let proposed: Vec<BranchOption> = root
            .metadata
            .get(meta::BRANCH_OPTIONS_PROPOSED)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        let mut selected: Vec<&BranchOption> = Vec::new();
        for id in option_ids {
            let option = proposed
                .iter()
                .find(|o| &o.id == id)
                .ok_or_else(|| EngineError::validation(format!("Unknown option: {id}")))?;
            if !selected.iter().any(|o| o.id == option.id) {
                selected.push(option);
            }
        }
        if selected.is_empty() {
            return Err(EngineError::validation("Select at least one option"));
        }

        let mut branches = Vec::with_capacity(selected.len());
        for option in &selected {
            branches.push(self.commit_branch(&root, option).await?);
        }

        let mut recorded: Vec<String> = root
            .metadata
            .get(meta::BRANCH_OPTIONS_SELECTED)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        for option in &selected {
            if !recorded.contains(&option.id) {
                recorded.push(option.id.clone());
            }
        }
        self.patch_node(
            &root.id,
            &NodePatch::default().with_meta(meta::BRANCH_OPTIONS_SELECTED, Value::from(recorded)),
        )
        .await?;

        Ok(branches)
    }

    /// Create one branch and its first node off `explore_root`
    async fn commit_branch(&self, explore_root: &Node, option: &BranchOption) -> EngineResult<Branch> {
        let branch = self
            .store
            .create_branch(&NewBranch {
                conversation_id: explore_root.conversation_id.clone(),
                label: option.label.clone(),
                description: Some(option.description.clone()).filter(|d| !d.is_empty()),
                parent_node_id: explore_root.id.clone(),
            })
            .await?;
        self.publish(
            &branch.conversation_id,
            FeedEvent::BranchUpserted {
                branch: branch.clone(),
            },
        )
        .await;

        let first = match self.create_node(&NewNode::explore_branch(&branch, option)).await {
            Ok(node) => node,
            Err(e) => {
                tracing::warn!(
                    branch_id = %branch.id,
                    error = %e,
                    "Branch left without a root node"
                );
                return Err(e);
            }
        };

        let branch = self
            .update_branch(
                &branch.id,
                &BranchPatch {
                    root_node_id: Some(first.id.clone()),
                    ..BranchPatch::default()
                },
            )
            .await?;
        tracing::info!(
            conv_id = %branch.conversation_id,
            branch_id = %branch.id,
            label = %branch.label,
            "Committed branch"
        );
        Ok(branch)
    }

    /// Snapshot of a conversation focused on `branch_id` (the trunk when
    /// unset). Branches whose root was never recorded get it written back
    /// when a node on the branch exists.
    pub async fn view(
        &self,
        conversation_id: &str,
        branch_id: Option<&str>,
    ) -> EngineResult<ConversationSnapshot> {
        let mut snapshot = self.snapshot(conversation_id).await?;
        if let Some(id) = branch_id {
            if snapshot.branch(id).is_none() {
                return Err(EngineError::not_found(format!("Branch not found: {id}")));
            }
        }

        let repairs: Vec<(String, String)> = snapshot
            .branches()
            .iter()
            .filter(|b| b.root_node_id.is_none())
            .filter_map(|b| {
                traverse::resolve_branch_root(snapshot.index(), b)
                    .map(|root| (b.id.clone(), root.id.clone()))
            })
            .collect();
        for (id, root_id) in repairs {
            let patch = BranchPatch {
                root_node_id: Some(root_id),
                ..BranchPatch::default()
            };
            match self.update_branch(&id, &patch).await {
                Ok(branch) => {
                    tracing::info!(branch_id = %id, "Recorded missing branch root");
                    snapshot = snapshot.apply(&FeedEvent::BranchUpserted { branch });
                }
                // The snapshot still resolves the root; the write is retried next read
                Err(e) => tracing::warn!(branch_id = %id, error = %e, "Failed to record branch root"),
            }
        }

        Ok(snapshot.switch_branch(branch_id))
    }

    pub async fn abandon_branch(&self, branch_id: &str) -> EngineResult<Branch> {
        let branch = self.store.get_branch(branch_id).await?;
        if !branch.is_active() {
            return Err(EngineError::validation(format!(
                "Branch {branch_id} is {}",
                branch.status
            )));
        }
        let branch = self
            .update_branch(
                branch_id,
                &BranchPatch {
                    status: Some(BranchStatus::Abandoned),
                    ..BranchPatch::default()
                },
            )
            .await?;
        tracing::info!(branch_id = %branch_id, "Abandoned branch");
        Ok(branch)
    }
}
