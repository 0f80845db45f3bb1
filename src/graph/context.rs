//! Bounded linear context for a generation call
//!
//! The path from a node to the root is split into three zones, newest first:
//! the recent zone is sent verbatim, the summary zone is compressed into one
//! synthetic exchange, and everything older is dropped.

use super::index::GraphIndex;
use super::traverse::walk_to_root;
use super::types::{Node, Role};
use crate::llm::LlmMessage;

/// Nodes sent in full
pub const RECENT_WINDOW: usize = 10;
/// Nodes folded into the summary exchange
pub const SUMMARY_WINDOW: usize = 20;
/// Characters kept per node when no summary was written
pub const EXCERPT_CHARS: usize = 200;

pub const SUMMARY_HEADER: &str = "[Earlier conversation summary]:";
pub const SUMMARY_ACK: &str = "Understood. I have the context from our earlier conversation.";

/// Build the message list for a generation anchored at `target_id`
pub fn assemble_context(index: &GraphIndex, target_id: &str) -> Vec<LlmMessage> {
    let mut path = walk_to_root(index, target_id);
    path.reverse();

    let recent_start = path.len().saturating_sub(RECENT_WINDOW);
    let summary_start = recent_start.saturating_sub(SUMMARY_WINDOW);

    let mut messages = Vec::with_capacity(RECENT_WINDOW + 2);

    let summary = path
        .get(summary_start..recent_start)
        .unwrap_or_default()
        .iter()
        .filter(|n| n.role != Role::System)
        .map(|n| summary_line(n))
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if !summary.trim().is_empty() {
        messages.push(LlmMessage::user(format!("{SUMMARY_HEADER}\n{summary}")));
        messages.push(LlmMessage::model(SUMMARY_ACK));
    }

    for node in path.get(recent_start..).unwrap_or_default() {
        match node.role {
            Role::User => messages.push(LlmMessage::user(node.text())),
            Role::Assistant if !node.text().is_empty() => {
                messages.push(LlmMessage::model(node.text()));
            }
            Role::Assistant | Role::System => {}
        }
    }

    messages
}

fn summary_line(node: &Node) -> String {
    match node.summary.as_deref() {
        Some(summary) if !summary.is_empty() => summary.to_string(),
        _ => excerpt(node.text(), EXCERPT_CHARS),
    }
}

/// First `max_chars` characters, with an ellipsis when anything was cut
pub fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}
