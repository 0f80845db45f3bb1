//! Prompt text sent to the generation collaborator
//!
//! Kept in one place so wording changes never touch engine logic.

use std::fmt::Write;

/// System prompt for ordinary chat turns
pub const CHAT_SYSTEM_PROMPT: &str = "You are a helpful assistant for exploring ideas through \
branching conversations. Be concise, insightful and direct. When the user is working inside an \
exploration branch, stay focused on that branch's topic.";

/// System prompt for direction proposals
pub const EXPLORE_SYSTEM_PROMPT: &str = r"You analyze a conversation and propose distinct directions in which it could continue. Each direction must be a meaningfully different approach, angle or line of reasoning, not a minor variation of another. Match the number of directions to the breadth of the topic, usually between 2 and 5.

For each direction provide:
- a short descriptive label
- a description of two or three sentences
- an opening prompt that starts the exploration";

/// Appended as the final user turn when asking for directions
pub const EXPLORE_INSTRUCTION: &str = r#"Based on the conversation so far, propose several distinct exploration directions. Respond with a JSON object containing a "directions" array. Each entry needs "label" (a short name), "description" (two or three sentences) and "initial_prompt" (the opening message for that branch)."#;

/// System prompt for merge synthesis
pub const MERGE_SYSTEM_PROMPT: &str = r"You combine the results of several exploration branches back into a single conversation. Identify the key insights of each branch, note where the branches agree and where they disagree, then propose a clear way forward that keeps the strongest elements. Be concise but thorough and structure the answer clearly.";

/// One branch's transcript as it appears in the merge request
pub struct BranchTranscript<'a> {
    pub label: &'a str,
    pub lines: Vec<String>,
}

/// Build the single user message asking for a merge synthesis
pub fn merge_request(branches: &[BranchTranscript<'_>]) -> String {
    let mut out = String::from(
        "Merge the following exploration branches back into one conversation thread.\n\nBranches:\n",
    );
    for branch in branches {
        let _ = write!(out, "\n## Branch: {}\n{}\n", branch.label, branch.lines.join("\n"));
    }
    out.push_str(
        "\nWrite a synthesis that:\n\
         1. Identifies the key insights from each branch\n\
         2. Notes where the branches agree and disagree\n\
         3. Proposes a unified path forward that combines the best elements",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_request_lists_every_branch() {
        let text = merge_request(&[
            BranchTranscript {
                label: "Cache",
                lines: vec!["User: why".into(), "Assistant: speed".into()],
            },
            BranchTranscript {
                label: "Rewrite",
                lines: vec!["Assistant: start over".into()],
            },
        ]);
        assert!(text.contains("## Branch: Cache\nUser: why\nAssistant: speed\n"));
        assert!(text.contains("## Branch: Rewrite\nAssistant: start over\n"));
        assert!(text.find("Cache") < text.find("Rewrite"));
    }
}
