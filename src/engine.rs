//! Conversation graph engine
//!
//! Owns the write paths of the graph: chat turns, exploration, merges,
//! branch bookkeeping and reconciliation. Every successful store write is
//! published on the conversation's realtime feed.

mod branch;
mod error;
mod merge;
mod recovery;
pub mod traits;
mod turn;

#[cfg(test)]
pub mod testing;

pub use branch::ExploreProposal;
pub use error::{EngineError, EngineResult};
pub use merge::MergeOutcome;
pub use traits::*;
pub use turn::{SendMessage, TurnEvent};

use crate::graph::{
    Branch, BranchPatch, Conversation, ConversationSnapshot, FeedEvent, NewNode, Node, NodePatch,
    DEFAULT_TITLE,
};
use crate::lifecycle::{transition, LifecycleEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

/// Type alias for the production engine with concrete implementations
pub type ProductionEngine = Engine<DatabaseStore, RegistryGenerator>;

const FEED_CAPACITY: usize = 256;
const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

pub struct Engine<S, G> {
    store: S,
    generator: G,
    /// Model used for conversation titles; titles are skipped when unset
    titles: Option<Arc<dyn Generator>>,
    /// How often a streaming node is touched so reconciliation leaves it alone
    heartbeat: Duration,
    feeds: RwLock<HashMap<String, broadcast::Sender<FeedEvent>>>,
}

impl<S, G> Engine<S, G>
where
    S: Storage + 'static,
    G: Generator + 'static,
{
    pub fn new(store: S, generator: G) -> Self {
        Self {
            store,
            generator,
            titles: None,
            heartbeat: DEFAULT_HEARTBEAT,
            feeds: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_title_generator(mut self, titles: Arc<dyn Generator>) -> Self {
        self.titles = Some(titles);
        self
    }

    /// Keep streaming nodes fresh at `interval`; must stay well under the
    /// reconciliation age
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = interval.max(Duration::from_millis(1));
        self
    }

    pub fn model_id(&self) -> &str {
        self.generator.model_id()
    }

    // ==================== Realtime feed ====================

    /// Subscribe to change events of one conversation
    pub async fn subscribe(&self, conversation_id: &str) -> broadcast::Receiver<FeedEvent> {
        let mut feeds = self.feeds.write().await;
        feeds.retain(|_, tx| tx.receiver_count() > 0);
        feeds
            .entry(conversation_id.to_string())
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .subscribe()
    }

    async fn publish(&self, conversation_id: &str, event: FeedEvent) {
        let feeds = self.feeds.read().await;
        if let Some(tx) = feeds.get(conversation_id) {
            tracing::debug!(conv_id = %conversation_id, event = event.name(), "Publishing feed event");
            // No receivers left is fine
            let _ = tx.send(event);
        }
    }

    // ==================== Conversations ====================

    pub async fn create_conversation(&self, title: Option<&str>) -> EngineResult<Conversation> {
        let title = title.map(str::trim).filter(|t| !t.is_empty());
        let conversation = self
            .store
            .create_conversation(title.unwrap_or(DEFAULT_TITLE))
            .await?;
        tracing::info!(conv_id = %conversation.id, "Created conversation");
        Ok(conversation)
    }

    pub async fn list_conversations(&self) -> EngineResult<Vec<Conversation>> {
        Ok(self.store.list_conversations().await?)
    }

    pub async fn get_conversation(&self, id: &str) -> EngineResult<Conversation> {
        Ok(self.store.get_conversation(id).await?)
    }

    /// Fresh snapshot of everything stored for a conversation
    pub async fn snapshot(&self, conversation_id: &str) -> EngineResult<ConversationSnapshot> {
        let conversation = self.store.get_conversation(conversation_id).await?;
        let nodes = self.store.list_nodes(conversation_id).await?;
        let branches = self.store.list_branches(conversation_id).await?;
        Ok(ConversationSnapshot::new(conversation, nodes, branches))
    }

    /// Name a conversation after its first message, in the background
    fn spawn_title_generation(self: &Arc<Self>, conversation: &Conversation, first_message: &str) {
        let Some(titles) = self.titles.clone() else {
            return;
        };
        if conversation.title != DEFAULT_TITLE {
            return;
        }
        let engine = Arc::clone(self);
        let conv_id = conversation.id.clone();
        let message = first_message.to_string();
        tokio::spawn(async move {
            let Some(title) = crate::title_generator::generate_title(&message, titles.as_ref()).await
            else {
                return;
            };
            match engine.store.update_title(&conv_id, &title).await {
                Ok(_) => tracing::info!(conv_id = %conv_id, title = %title, "Generated conversation title"),
                Err(e) => tracing::warn!(conv_id = %conv_id, error = %e, "Failed to store title"),
            }
        });
    }

    // ==================== Write helpers ====================

    async fn create_node(&self, new: &NewNode) -> EngineResult<Node> {
        let node = self.store.create_node(new).await?;
        tracing::debug!(
            conv_id = %node.conversation_id,
            node_id = %node.id,
            node_type = %node.node_type,
            sequence = node.sequence,
            "Created node"
        );
        self.publish(
            &node.conversation_id,
            FeedEvent::NodeCreated { node: node.clone() },
        )
        .await;
        Ok(node)
    }

    async fn create_exchange(&self, user: &NewNode, reply: &NewNode) -> EngineResult<(Node, Node)> {
        let (user, reply) = self.store.create_exchange(user, reply).await?;
        for node in [&user, &reply] {
            self.publish(
                &node.conversation_id,
                FeedEvent::NodeCreated { node: node.clone() },
            )
            .await;
        }
        Ok((user, reply))
    }

    async fn patch_node(&self, id: &str, patch: &NodePatch) -> EngineResult<Node> {
        let updated = self.store.update_node(id, patch).await?;
        self.publish(
            &updated.conversation_id,
            FeedEvent::NodeUpdated {
                node: updated.clone(),
            },
        )
        .await;
        Ok(updated)
    }

    /// Run one lifecycle transition and persist its result
    async fn advance(&self, node: &Node, event: LifecycleEvent) -> EngineResult<Node> {
        let result = transition(node.status, event)?;
        let updated = self.patch_node(&node.id, &result.patch).await?;
        tracing::debug!(
            conv_id = %node.conversation_id,
            node_id = %node.id,
            from = %node.status,
            to = %result.new_status,
            "Node transition"
        );
        Ok(updated)
    }

    async fn create_merge(
        &self,
        new: &NewNode,
        branch_ids: &[String],
    ) -> EngineResult<(Node, Vec<Branch>)> {
        let (node, branches) = self.store.create_merge(new, branch_ids).await?;
        self.publish(
            &node.conversation_id,
            FeedEvent::NodeCreated { node: node.clone() },
        )
        .await;
        for branch in &branches {
            self.publish(
                &branch.conversation_id,
                FeedEvent::BranchUpserted {
                    branch: branch.clone(),
                },
            )
            .await;
        }
        Ok((node, branches))
    }

    async fn update_branch(&self, id: &str, patch: &BranchPatch) -> EngineResult<Branch> {
        let branch = self.store.update_branch(id, patch).await?;
        self.publish(
            &branch.conversation_id,
            FeedEvent::BranchUpserted {
                branch: branch.clone(),
            },
        )
        .await;
        Ok(branch)
    }
}
