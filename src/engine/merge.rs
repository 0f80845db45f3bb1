//! Merging branches back into the trunk

use super::{Engine, EngineError, EngineResult, Generator, Storage};
use crate::graph::{traverse, Branch, GraphIndex, NewNode, Node, Role};
use crate::llm::LlmMessage;
use crate::prompts::{merge_request, BranchTranscript, MERGE_SYSTEM_PROMPT};
use serde::Serialize;

/// Result of a merge: the synthesized node and which branches it absorbed
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    pub merge_node: Node,
    pub merged_branch_ids: Vec<String>,
    /// Requested branches that had no nodes yet; left active
    pub skipped_branch_ids: Vec<String>,
}

fn transcript_line(node: &Node) -> String {
    let speaker = if node.role == Role::User {
        "User"
    } else {
        "Assistant"
    };
    format!("{speaker}: {}", node.text())
}

impl<S, G> Engine<S, G>
where
    S: Storage + 'static,
    G: Generator + 'static,
{
    /// Synthesize two or more active branches into one merge node.
    ///
    /// Branches without nodes are skipped. Nothing is written unless at
    /// least two branches qualify and the synthesis succeeds; the merge node
    /// and the branch status changes are stored together.
    pub async fn merge_branches(
        &self,
        conversation_id: &str,
        branch_ids: &[String],
    ) -> EngineResult<MergeOutcome> {
        self.store.get_conversation(conversation_id).await?;

        let mut requested: Vec<Branch> = Vec::new();
        for id in branch_ids {
            if requested.iter().any(|b| &b.id == id) {
                continue;
            }
            let branch = self.store.get_branch(id).await?;
            if branch.conversation_id != conversation_id {
                return Err(EngineError::not_found(format!("Branch not found: {id}")));
            }
            if !branch.is_active() {
                return Err(EngineError::validation(format!(
                    "Branch {} is {}",
                    branch.label, branch.status
                )));
            }
            requested.push(branch);
        }

        let index = GraphIndex::new(self.store.list_nodes(conversation_id).await?);
        let mut qualifying: Vec<(&Branch, Vec<&Node>)> = Vec::new();
        let mut skipped_branch_ids = Vec::new();
        for branch in &requested {
            let members = traverse::branch_members(&index, Some(&branch.id));
            if members.is_empty() {
                skipped_branch_ids.push(branch.id.clone());
            } else {
                qualifying.push((branch, members));
            }
        }
        if qualifying.len() < 2 {
            return Err(EngineError::validation(
                "At least two branches with content are required to merge",
            ));
        }

        let transcripts: Vec<BranchTranscript<'_>> = qualifying
            .iter()
            .map(|(branch, members)| BranchTranscript {
                label: &branch.label,
                lines: members.iter().map(|n| transcript_line(n)).collect(),
            })
            .collect();
        let prompt = merge_request(&transcripts);
        let synthesis = self
            .generator
            .generate(&[LlmMessage::user(prompt)], Some(MERGE_SYSTEM_PROMPT))
            .await?;

        let parent_ids: Vec<String> = qualifying
            .iter()
            .filter_map(|(_, members)| members.last().map(|n| n.id.clone()))
            .collect();
        let labels: Vec<&str> = qualifying.iter().map(|(b, _)| b.label.as_str()).collect();
        let merged_branch_ids: Vec<String> =
            qualifying.iter().map(|(b, _)| b.id.clone()).collect();
        let (merge_node, _) = self
            .create_merge(
                &NewNode::merge(
                    conversation_id,
                    parent_ids,
                    &labels,
                    synthesis,
                    self.generator.model_id(),
                ),
                &merged_branch_ids,
            )
            .await?;

        tracing::info!(
            conv_id = %conversation_id,
            merge_node = %merge_node.id,
            merged = merged_branch_ids.len(),
            skipped = skipped_branch_ids.len(),
            "Merged branches"
        );
        Ok(MergeOutcome {
            merge_node,
            merged_branch_ids,
            skipped_branch_ids,
        })
    }
}
