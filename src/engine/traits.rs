//! Trait abstractions for engine I/O
//!
//! These traits let the engine run against mock stores and generators.

use crate::db::{Database, DbError};
use crate::graph::{
    Branch, BranchPatch, Conversation, NewBranch, NewNode, Node, NodePatch,
};
use crate::llm::{LlmError, LlmMessage, LlmRequest, LlmService, ModelRegistry, TextStream};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a store implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(String),
    /// The stored record no longer accepts the write
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Backend(String),
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        if err.is_not_found() {
            Self::NotFound(err.to_string())
        } else if matches!(err, DbError::Conflict(_)) {
            Self::Conflict(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage for conversation records
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, title: &str) -> StoreResult<Conversation>;

    async fn get_conversation(&self, id: &str) -> StoreResult<Conversation>;

    /// Most recently updated first
    async fn list_conversations(&self) -> StoreResult<Vec<Conversation>>;

    async fn update_title(&self, id: &str, title: &str) -> StoreResult<Conversation>;
}

/// Storage for graph nodes
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Insert a node; the store assigns id, sequence and timestamps
    async fn create_node(&self, node: &NewNode) -> StoreResult<Node>;

    /// Insert a user node and its pending reply atomically; the reply's
    /// parent becomes the new user node
    async fn create_exchange(&self, user: &NewNode, reply: &NewNode) -> StoreResult<(Node, Node)>;

    async fn get_node(&self, id: &str) -> StoreResult<Node>;

    /// Every node of the conversation ordered by sequence
    async fn list_nodes(&self, conversation_id: &str) -> StoreResult<Vec<Node>>;

    /// Status changes to a node that already settled fail with `Conflict`
    async fn update_node(&self, id: &str, patch: &NodePatch) -> StoreResult<Node>;

    /// Pending or streaming nodes last touched before `cutoff`
    async fn list_stale_nodes(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Node>>;
}

/// Storage for branches
#[async_trait]
pub trait BranchStore: Send + Sync {
    async fn create_branch(&self, branch: &NewBranch) -> StoreResult<Branch>;

    async fn get_branch(&self, id: &str) -> StoreResult<Branch>;

    async fn list_branches(&self, conversation_id: &str) -> StoreResult<Vec<Branch>>;

    async fn update_branch(&self, id: &str, patch: &BranchPatch) -> StoreResult<Branch>;

    /// Insert a merge node and mark the branches merged, all or nothing.
    /// A branch that is no longer active fails with `Conflict`.
    async fn create_merge(
        &self,
        node: &NewNode,
        branch_ids: &[String],
    ) -> StoreResult<(Node, Vec<Branch>)>;
}

/// Combined storage trait for convenience
pub trait Storage: ConversationStore + NodeStore + BranchStore {}
impl<T: ConversationStore + NodeStore + BranchStore> Storage for T {}

/// Text generation collaborator
#[async_trait]
pub trait Generator: Send + Sync {
    /// Lazily produced fragments; restartable only by calling again
    async fn generate_stream(
        &self,
        messages: &[LlmMessage],
        system: Option<&str>,
    ) -> Result<TextStream, LlmError>;

    async fn generate(&self, messages: &[LlmMessage], system: Option<&str>)
        -> Result<String, LlmError>;

    /// Text expected to parse as JSON; callers handle parse failure
    async fn generate_structured(
        &self,
        messages: &[LlmMessage],
        system: Option<&str>,
    ) -> Result<String, LlmError>;

    fn model_id(&self) -> &str;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: ConversationStore + ?Sized> ConversationStore for Arc<T> {
    async fn create_conversation(&self, title: &str) -> StoreResult<Conversation> {
        (**self).create_conversation(title).await
    }

    async fn get_conversation(&self, id: &str) -> StoreResult<Conversation> {
        (**self).get_conversation(id).await
    }

    async fn list_conversations(&self) -> StoreResult<Vec<Conversation>> {
        (**self).list_conversations().await
    }

    async fn update_title(&self, id: &str, title: &str) -> StoreResult<Conversation> {
        (**self).update_title(id, title).await
    }
}

#[async_trait]
impl<T: NodeStore + ?Sized> NodeStore for Arc<T> {
    async fn create_node(&self, node: &NewNode) -> StoreResult<Node> {
        (**self).create_node(node).await
    }

    async fn create_exchange(&self, user: &NewNode, reply: &NewNode) -> StoreResult<(Node, Node)> {
        (**self).create_exchange(user, reply).await
    }

    async fn get_node(&self, id: &str) -> StoreResult<Node> {
        (**self).get_node(id).await
    }

    async fn list_nodes(&self, conversation_id: &str) -> StoreResult<Vec<Node>> {
        (**self).list_nodes(conversation_id).await
    }

    async fn update_node(&self, id: &str, patch: &NodePatch) -> StoreResult<Node> {
        (**self).update_node(id, patch).await
    }

    async fn list_stale_nodes(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Node>> {
        (**self).list_stale_nodes(cutoff).await
    }
}

#[async_trait]
impl<T: BranchStore + ?Sized> BranchStore for Arc<T> {
    async fn create_branch(&self, branch: &NewBranch) -> StoreResult<Branch> {
        (**self).create_branch(branch).await
    }

    async fn get_branch(&self, id: &str) -> StoreResult<Branch> {
        (**self).get_branch(id).await
    }

    async fn list_branches(&self, conversation_id: &str) -> StoreResult<Vec<Branch>> {
        (**self).list_branches(conversation_id).await
    }

    async fn update_branch(&self, id: &str, patch: &BranchPatch) -> StoreResult<Branch> {
        (**self).update_branch(id, patch).await
    }

    async fn create_merge(
        &self,
        node: &NewNode,
        branch_ids: &[String],
    ) -> StoreResult<(Node, Vec<Branch>)> {
        (**self).create_merge(node, branch_ids).await
    }
}

#[async_trait]
impl<T: Generator + ?Sized> Generator for Arc<T> {
    async fn generate_stream(
        &self,
        messages: &[LlmMessage],
        system: Option<&str>,
    ) -> Result<TextStream, LlmError> {
        (**self).generate_stream(messages, system).await
    }

    async fn generate(
        &self,
        messages: &[LlmMessage],
        system: Option<&str>,
    ) -> Result<String, LlmError> {
        (**self).generate(messages, system).await
    }

    async fn generate_structured(
        &self,
        messages: &[LlmMessage],
        system: Option<&str>,
    ) -> Result<String, LlmError> {
        (**self).generate_structured(messages, system).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as Storage
#[derive(Clone)]
pub struct DatabaseStore {
    db: Database,
}

impl DatabaseStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConversationStore for DatabaseStore {
    async fn create_conversation(&self, title: &str) -> StoreResult<Conversation> {
        Ok(self.db.create_conversation(title)?)
    }

    async fn get_conversation(&self, id: &str) -> StoreResult<Conversation> {
        Ok(self.db.get_conversation(id)?)
    }

    async fn list_conversations(&self) -> StoreResult<Vec<Conversation>> {
        Ok(self.db.list_conversations()?)
    }

    async fn update_title(&self, id: &str, title: &str) -> StoreResult<Conversation> {
        Ok(self.db.update_conversation_title(id, title)?)
    }
}

#[async_trait]
impl NodeStore for DatabaseStore {
    async fn create_node(&self, node: &NewNode) -> StoreResult<Node> {
        Ok(self.db.create_node(node)?)
    }

    async fn create_exchange(&self, user: &NewNode, reply: &NewNode) -> StoreResult<(Node, Node)> {
        Ok(self.db.create_exchange(user, reply)?)
    }

    async fn get_node(&self, id: &str) -> StoreResult<Node> {
        Ok(self.db.get_node(id)?)
    }

    async fn list_nodes(&self, conversation_id: &str) -> StoreResult<Vec<Node>> {
        Ok(self.db.list_nodes(conversation_id)?)
    }

    async fn update_node(&self, id: &str, patch: &NodePatch) -> StoreResult<Node> {
        Ok(self.db.update_node(id, patch)?)
    }

    async fn list_stale_nodes(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Node>> {
        Ok(self.db.list_stale_nodes(cutoff)?)
    }
}

#[async_trait]
impl BranchStore for DatabaseStore {
    async fn create_branch(&self, branch: &NewBranch) -> StoreResult<Branch> {
        Ok(self.db.create_branch(branch)?)
    }

    async fn get_branch(&self, id: &str) -> StoreResult<Branch> {
        Ok(self.db.get_branch(id)?)
    }

    async fn list_branches(&self, conversation_id: &str) -> StoreResult<Vec<Branch>> {
        Ok(self.db.list_branches(conversation_id)?)
    }

    async fn update_branch(&self, id: &str, patch: &BranchPatch) -> StoreResult<Branch> {
        Ok(self.db.update_branch(id, patch)?)
    }

    async fn create_merge(
        &self,
        node: &NewNode,
        branch_ids: &[String],
    ) -> StoreResult<(Node, Vec<Branch>)> {
        Ok(self.db.create_merge(node, branch_ids)?)
    }
}

/// Adapter to use a `ModelRegistry` model as the Generator
pub struct RegistryGenerator {
    registry: Arc<ModelRegistry>,
    model_id: String,
}

impl RegistryGenerator {
    pub fn new(registry: Arc<ModelRegistry>, model_id: String) -> Self {
        Self { registry, model_id }
    }

    /// Generator over the registry's auxiliary model, for side tasks
    pub fn auxiliary(registry: Arc<ModelRegistry>) -> Self {
        let model_id = registry
            .get_cheap_model()
            .map_or_else(|| registry.default_model_id().to_string(), |s| s.model_id().to_string());
        Self { registry, model_id }
    }

    fn service(&self) -> Result<Arc<dyn LlmService>, LlmError> {
        self.registry
            .get(&self.model_id)
            .or_else(|| self.registry.default())
            .ok_or_else(|| LlmError::network("No LLM available"))
    }

    fn request(messages: &[LlmMessage], system: Option<&str>) -> LlmRequest {
        LlmRequest::new(system.map(String::from), messages.to_vec())
    }
}

#[async_trait]
impl Generator for RegistryGenerator {
    async fn generate_stream(
        &self,
        messages: &[LlmMessage],
        system: Option<&str>,
    ) -> Result<TextStream, LlmError> {
        self.service()?
            .stream(&Self::request(messages, system))
            .await
    }

    async fn generate(
        &self,
        messages: &[LlmMessage],
        system: Option<&str>,
    ) -> Result<String, LlmError> {
        let response = self
            .service()?
            .complete(&Self::request(messages, system))
            .await?;
        Ok(response.text)
    }

    async fn generate_structured(
        &self,
        messages: &[LlmMessage],
        system: Option<&str>,
    ) -> Result<String, LlmError> {
        let response = self
            .service()?
            .complete(&Self::request(messages, system).json())
            .await?;
        Ok(response.text)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
