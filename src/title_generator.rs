//! Conversation title generation using a fast/cheap model
//!
//! Generates short titles from the first user message of a conversation.

use crate::engine::Generator;
use crate::llm::LlmMessage;
use std::time::Duration;
use tokio::time::timeout;

const TITLE_PROMPT: &str = r#"Write a very short title (3-6 words) for a conversation that starts with the message below. Output only the title, without quotes or trailing punctuation. Examples:
- "How should I structure a monorepo with three services?" -> Structuring a Service Monorepo
- "Compare event sourcing with plain CRUD for an order system" -> Event Sourcing Versus CRUD
- "Ideas for a sci-fi short story set on Europa" -> Europa Sci-Fi Story Ideas

Message:"#;

const TITLE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_PROMPT_CHARS: usize = 500;
const MAX_TITLE_CHARS: usize = 60;

/// Generate a title for a conversation based on its first message.
///
/// Returns None if generation fails or times out; the caller keeps the
/// default title in that case.
pub async fn generate_title(message_text: &str, generator: &dyn Generator) -> Option<String> {
    let mut excerpt: String = message_text.chars().take(MAX_PROMPT_CHARS).collect();
    if excerpt.len() < message_text.len() {
        excerpt.push_str("...");
    }
    let messages = [LlmMessage::user(format!("{TITLE_PROMPT}\n{excerpt}"))];

    match timeout(TITLE_TIMEOUT, generator.generate(&messages, None)).await {
        Ok(Ok(text)) => sanitize_title(&text),
        Ok(Err(e)) => {
            tracing::warn!(error = %e.message, "Title generation LLM error");
            None
        }
        Err(_) => {
            tracing::warn!("Title generation timed out");
            None
        }
    }
}

/// Take the first non-empty line, strip quoting and cap the length at a
/// word boundary
fn sanitize_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '*' || c == '#')
        .trim_end_matches(['.', '!', '?', ':'])
        .trim();

    let mut title = String::new();
    for word in line.split_whitespace() {
        let extra = word.chars().count() + usize::from(!title.is_empty());
        if title.chars().count() + extra > MAX_TITLE_CHARS {
            break;
        }
        if !title.is_empty() {
            title.push(' ');
        }
        title.push_str(word);
    }

    if title.is_empty() {
        // A single word longer than the cap
        title = line.chars().take(MAX_TITLE_CHARS).collect();
    }
    (!title.is_empty()).then_some(title)
}
