//! Database schema and row mapping

use crate::graph::{
    Branch, BranchStatus, Conversation, Metadata, Node, NodeStatus, NodeType, Role,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::Row;

/// SQL schema for initialization
pub const SCHEMA: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    next_sequence INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversations_updated ON conversations(updated_at DESC);

CREATE TABLE IF NOT EXISTS branches (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    label TEXT NOT NULL,
    description TEXT,
    parent_node_id TEXT NOT NULL,
    root_node_id TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_branches_conversation ON branches(conversation_id, created_at);

CREATE TABLE IF NOT EXISTS nodes (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    parent_ids TEXT NOT NULL DEFAULT '[]',
    node_type TEXT NOT NULL,
    status TEXT NOT NULL,
    role TEXT NOT NULL,
    input TEXT NOT NULL,
    output TEXT,
    reasoning TEXT,
    summary TEXT,
    branch_label TEXT,
    branch_id TEXT,
    merge_strategy TEXT,
    sequence INTEGER NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
    UNIQUE (conversation_id, sequence)
);

CREATE INDEX IF NOT EXISTS idx_nodes_branch ON nodes(conversation_id, branch_id, sequence);
CREATE INDEX IF NOT EXISTS idx_nodes_status ON nodes(status, updated_at);
";

pub(super) const NODE_COLUMNS: &str = "id, conversation_id, parent_ids, node_type, status, role, \
     input, output, reasoning, summary, branch_label, branch_id, merge_strategy, sequence, \
     metadata, created_at, updated_at";

pub(super) const BRANCH_COLUMNS: &str = "id, conversation_id, label, description, parent_node_id, \
     root_node_id, status, created_at, updated_at";

pub(super) const CONVERSATION_COLUMNS: &str = "id, title, created_at, updated_at";

/// Fixed-width UTC timestamps so text comparison matches time order
pub(super) fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(super) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

fn corrupt(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unknown {what}: {value}").into(),
    )
}

fn enum_column<T>(
    row: &Row<'_>,
    idx: usize,
    what: &str,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    parse(&text).ok_or_else(|| corrupt(idx, what, &text))
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(super) fn node_from_row(row: &Row<'_>) -> rusqlite::Result<Node> {
    Ok(Node {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        parent_ids: json_column(row, 2)?,
        node_type: enum_column(row, 3, "node type", NodeType::parse)?,
        status: enum_column(row, 4, "node status", NodeStatus::parse)?,
        role: enum_column(row, 5, "role", Role::parse)?,
        input: row.get(6)?,
        output: row.get(7)?,
        reasoning: row.get(8)?,
        summary: row.get(9)?,
        branch_label: row.get(10)?,
        branch_id: row.get(11)?,
        merge_strategy: row.get(12)?,
        sequence: row.get(13)?,
        metadata: json_column::<Metadata>(row, 14)?,
        created_at: parse_datetime(&row.get::<_, String>(15)?),
        updated_at: parse_datetime(&row.get::<_, String>(16)?),
    })
}

pub(super) fn branch_from_row(row: &Row<'_>) -> rusqlite::Result<Branch> {
    Ok(Branch {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        label: row.get(2)?,
        description: row.get(3)?,
        parent_node_id: row.get(4)?,
        root_node_id: row.get(5)?,
        status: enum_column(row, 6, "branch status", BranchStatus::parse)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
        updated_at: parse_datetime(&row.get::<_, String>(8)?),
    })
}

pub(super) fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: parse_datetime(&row.get::<_, String>(2)?),
        updated_at: parse_datetime(&row.get::<_, String>(3)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamps_sort_as_text() {
        let early = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let late = early + chrono::Duration::milliseconds(1500);
        let (a, b) = (format_datetime(early), format_datetime(late));
        assert!(a < b);
        assert_eq!(a.len(), b.len());
        assert_eq!(parse_datetime(&a), early);
    }
}
