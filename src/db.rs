//! Database module for dagchat
//!
//! Persists conversations, nodes and branches in sqlite.

mod schema;

pub use schema::SCHEMA;
use schema::{
    branch_from_row, conversation_from_row, format_datetime, node_from_row, BRANCH_COLUMNS,
    CONVERSATION_COLUMNS, NODE_COLUMNS,
};

use crate::graph::{
    Branch, BranchPatch, BranchStatus, Conversation, NewBranch, NewNode, Node, NodePatch,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Branch not found: {0}")]
    BranchNotFound(String),
    /// The stored row no longer accepts the write
    #[error("{0}")]
    Conflict(String),
    #[error("Database lock poisoned")]
    Poisoned,
}

impl DbError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ConversationNotFound(_) | Self::NodeNotFound(_) | Self::BranchNotFound(_)
        )
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> DbResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // ==================== Conversation Operations ====================

    pub fn create_conversation(&self, title: &str) -> DbResult<Conversation> {
        let conn = self.conn()?;
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();

        conn.execute(
            "INSERT INTO conversations (id, title, next_sequence, created_at, updated_at)
             VALUES (?1, ?2, 0, ?3, ?3)",
            params![id, title, format_datetime(now)],
        )?;

        Ok(Conversation {
            id,
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_conversation(&self, id: &str) -> DbResult<Conversation> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
            params![id],
            conversation_from_row,
        )
        .optional()?
        .ok_or_else(|| DbError::ConversationNotFound(id.to_string()))
    }

    /// Most recently active first
    pub fn list_conversations(&self) -> DbResult<Vec<Conversation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations ORDER BY updated_at DESC"
        ))?;
        let rows = stmt.query_map([], conversation_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn update_conversation_title(&self, id: &str, title: &str) -> DbResult<Conversation> {
        {
            let conn = self.conn()?;
            let updated = conn.execute(
                "UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![title, format_datetime(Utc::now()), id],
            )?;
            if updated == 0 {
                return Err(DbError::ConversationNotFound(id.to_string()));
            }
        }
        self.get_conversation(id)
    }

    // ==================== Node Operations ====================

    /// Insert a node, assigning the next sequence number of its conversation.
    ///
    /// The counter increment and the insert share one transaction, so
    /// concurrent writers to the same conversation never collide.
    pub fn create_node(&self, new: &NewNode) -> DbResult<Node> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let node = Self::insert_node_with(&tx, new, Utc::now())?;
        tx.commit()?;
        Ok(node)
    }

    /// Insert a user node and its pending reply together; the reply's
    /// parent is set to the new user node
    pub fn create_exchange(&self, user: &NewNode, reply: &NewNode) -> DbResult<(Node, Node)> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now();
        let user = Self::insert_node_with(&tx, user, now)?;
        let reply = NewNode {
            parent_ids: vec![user.id.clone()],
            ..reply.clone()
        };
        let reply = Self::insert_node_with(&tx, &reply, now)?;
        tx.commit()?;
        Ok((user, reply))
    }

    /// Insert a merge node and mark every absorbed branch merged, all or
    /// nothing. A branch that is no longer active aborts the merge.
    pub fn create_merge(
        &self,
        new: &NewNode,
        branch_ids: &[String],
    ) -> DbResult<(Node, Vec<Branch>)> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now();
        let node = Self::insert_node_with(&tx, new, now)?;
        for id in branch_ids {
            let updated = tx.execute(
                "UPDATE branches SET status = 'merged', updated_at = ?1
                 WHERE id = ?2 AND status = 'active'",
                params![format_datetime(now), id],
            )?;
            if updated == 0 {
                Self::get_branch_with(&tx, id)?;
                return Err(DbError::Conflict(format!("Branch {id} is no longer active")));
            }
        }
        let branches = branch_ids
            .iter()
            .map(|id| Self::get_branch_with(&tx, id))
            .collect::<DbResult<Vec<_>>>()?;
        tx.commit()?;
        Ok((node, branches))
    }

    fn insert_node_with(tx: &Connection, new: &NewNode, now: DateTime<Utc>) -> DbResult<Node> {
        let now_text = format_datetime(now);

        let sequence: i64 = tx
            .query_row(
                "UPDATE conversations
                 SET next_sequence = next_sequence + 1, updated_at = ?2
                 WHERE id = ?1
                 RETURNING next_sequence - 1",
                params![new.conversation_id, now_text],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| DbError::ConversationNotFound(new.conversation_id.clone()))?;

        let id = uuid::Uuid::new_v4().to_string();
        tx.execute(
            &format!(
                "INSERT INTO nodes ({NODE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, NULL, ?9, ?10, ?11, ?12, ?13, ?14, ?14)"
            ),
            params![
                id,
                new.conversation_id,
                serde_json::to_string(&new.parent_ids)?,
                new.node_type.as_str(),
                new.status.as_str(),
                new.role.as_str(),
                new.input,
                new.output,
                new.branch_label,
                new.branch_id,
                new.merge_strategy,
                sequence,
                serde_json::to_string(&new.metadata)?,
                now_text,
            ],
        )?;

        Ok(Node {
            id,
            conversation_id: new.conversation_id.clone(),
            parent_ids: new.parent_ids.clone(),
            node_type: new.node_type,
            status: new.status,
            role: new.role,
            input: new.input.clone(),
            output: new.output.clone(),
            reasoning: None,
            summary: None,
            branch_label: new.branch_label.clone(),
            branch_id: new.branch_id.clone(),
            merge_strategy: new.merge_strategy.clone(),
            sequence,
            metadata: new.metadata.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_node(&self, id: &str) -> DbResult<Node> {
        let conn = self.conn()?;
        Self::get_node_with(&conn, id)
    }

    fn get_node_with(conn: &Connection, id: &str) -> DbResult<Node> {
        conn.query_row(
            &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"),
            params![id],
            node_from_row,
        )
        .optional()?
        .ok_or_else(|| DbError::NodeNotFound(id.to_string()))
    }

    /// All nodes of a conversation ordered by sequence
    pub fn list_nodes(&self, conversation_id: &str) -> DbResult<Vec<Node>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE conversation_id = ?1 ORDER BY sequence ASC"
        ))?;
        let rows = stmt.query_map(params![conversation_id], node_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Apply a patch; metadata keys are merged into what is stored.
    ///
    /// Status changes are checked against the stored row: a node that
    /// already settled keeps its status.
    pub fn update_node(&self, id: &str, patch: &NodePatch) -> DbResult<Node> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut node = Self::get_node_with(&tx, id)?;
        if patch.status.is_some() && node.status.is_terminal() {
            return Err(DbError::Conflict(format!("Node {id} is already {}", node.status)));
        }
        patch.apply_to(&mut node, Utc::now());

        tx.execute(
            "UPDATE nodes SET status = ?1, output = ?2, summary = ?3, metadata = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                node.status.as_str(),
                node.output,
                node.summary,
                serde_json::to_string(&node.metadata)?,
                format_datetime(node.updated_at),
                id,
            ],
        )?;
        tx.commit()?;
        Ok(node)
    }

    /// Nodes still pending or streaming whose last update is before `cutoff`
    pub fn list_stale_nodes(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<Node>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes
             WHERE status IN ('pending', 'streaming') AND updated_at < ?1
             ORDER BY conversation_id, sequence"
        ))?;
        let rows = stmt.query_map(params![format_datetime(cutoff)], node_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Branch Operations ====================

    pub fn create_branch(&self, new: &NewBranch) -> DbResult<Branch> {
        let conn = self.conn()?;
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();

        conn.execute(
            "INSERT INTO branches (id, conversation_id, label, description, parent_node_id, root_node_id, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, 'active', ?6, ?6)",
            params![
                id,
                new.conversation_id,
                new.label,
                new.description,
                new.parent_node_id,
                format_datetime(now),
            ],
        )?;

        Ok(Branch {
            id,
            conversation_id: new.conversation_id.clone(),
            label: new.label.clone(),
            description: new.description.clone(),
            parent_node_id: new.parent_node_id.clone(),
            root_node_id: None,
            status: BranchStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_branch(&self, id: &str) -> DbResult<Branch> {
        let conn = self.conn()?;
        Self::get_branch_with(&conn, id)
    }

    fn get_branch_with(conn: &Connection, id: &str) -> DbResult<Branch> {
        conn.query_row(
            &format!("SELECT {BRANCH_COLUMNS} FROM branches WHERE id = ?1"),
            params![id],
            branch_from_row,
        )
        .optional()?
        .ok_or_else(|| DbError::BranchNotFound(id.to_string()))
    }

    /// Branches of a conversation in creation order
    pub fn list_branches(&self, conversation_id: &str) -> DbResult<Vec<Branch>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {BRANCH_COLUMNS} FROM branches WHERE conversation_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![conversation_id], branch_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn update_branch(&self, id: &str, patch: &BranchPatch) -> DbResult<Branch> {
        {
            let conn = self.conn()?;
            let updated = conn.execute(
                "UPDATE branches
                 SET status = COALESCE(?1, status),
                     root_node_id = COALESCE(?2, root_node_id),
                     updated_at = ?3
                 WHERE id = ?4",
                params![
                    patch.status.map(BranchStatus::as_str),
                    patch.root_node_id,
                    format_datetime(Utc::now()),
                    id,
                ],
            )?;
            if updated == 0 {
                return Err(DbError::BranchNotFound(id.to_string()));
            }
        }
        self.get_branch(id)
    }
}
