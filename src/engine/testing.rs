//! Mock implementations for testing
//!
//! These mocks enable engine tests without sqlite or network I/O.

use super::traits::*;
use super::Engine;
use crate::graph::{
    Branch, BranchPatch, BranchStatus, Conversation, NewBranch, NewNode, Node, NodePatch,
    NodeStatus, NodeType,
};
use crate::llm::{LlmError, LlmMessage, TextStream};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// In-memory Storage
// ============================================================================

#[derive(Default)]
struct StoreState {
    conversations: Vec<(Conversation, i64)>,
    nodes: Vec<Node>,
    branches: Vec<Branch>,
    /// Every status written through `update_node`, per node
    history: HashMap<String, Vec<NodeStatus>>,
    next_id: u64,
}

impl StoreState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn insert_node(&mut self, new: &NewNode) -> StoreResult<Node> {
        let id = self.next_id("node");
        let now = Utc::now();
        let (conversation, next_sequence) = self
            .conversations
            .iter_mut()
            .find(|(c, _)| c.id == new.conversation_id)
            .ok_or_else(|| {
                StoreError::NotFound(format!("Conversation not found: {}", new.conversation_id))
            })?;
        let sequence = *next_sequence;
        *next_sequence += 1;
        conversation.updated_at = now;

        let node = Node {
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
        };
        self.nodes.push(node.clone());
        Ok(node)
    }
}

/// In-memory store with failure injection
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    /// Node creations allowed before every further one fails
    node_create_budget: Mutex<Option<usize>>,
    /// Node updates allowed before every further one fails
    node_update_budget: Mutex<Option<usize>>,
    /// Branch updates allowed before every further one fails
    branch_update_budget: Mutex<Option<usize>>,
}

fn take_budget(budget: &Mutex<Option<usize>>, what: &str) -> StoreResult<()> {
    let mut budget = budget.lock().unwrap();
    match budget.as_mut() {
        Some(0) => Err(StoreError::Backend(format!("injected {what} failure"))),
        Some(n) => {
            *n -= 1;
            Ok(())
        }
        None => Ok(()),
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `n` more node creations succeed, then fail the rest
    pub fn fail_creates_after(&self, n: usize) {
        *self.node_create_budget.lock().unwrap() = Some(n);
    }

    /// Let `n` more node updates succeed, then fail the rest
    pub fn fail_updates_after(&self, n: usize) {
        *self.node_update_budget.lock().unwrap() = Some(n);
    }

    /// Let `n` more branch updates succeed, then fail the rest
    pub fn fail_branch_updates_after(&self, n: usize) {
        *self.branch_update_budget.lock().unwrap() = Some(n);
    }

    pub fn heal(&self) {
        *self.node_create_budget.lock().unwrap() = None;
        *self.node_update_budget.lock().unwrap() = None;
        *self.branch_update_budget.lock().unwrap() = None;
    }

    pub fn node(&self, id: &str) -> Option<Node> {
        let state = self.state.lock().unwrap();
        state.nodes.iter().find(|n| n.id == id).cloned()
    }

    pub fn all_nodes(&self, conversation_id: &str) -> Vec<Node> {
        let state = self.state.lock().unwrap();
        state
            .nodes
            .iter()
            .filter(|n| n.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    pub fn nodes_of_type(&self, conversation_id: &str, node_type: NodeType) -> Vec<Node> {
        self.all_nodes(conversation_id)
            .into_iter()
            .filter(|n| n.node_type == node_type)
            .collect()
    }

    pub fn branch(&self, id: &str) -> Option<Branch> {
        let state = self.state.lock().unwrap();
        state.branches.iter().find(|b| b.id == id).cloned()
    }

    pub fn status_history(&self, node_id: &str) -> Vec<NodeStatus> {
        let state = self.state.lock().unwrap();
        state.history.get(node_id).cloned().unwrap_or_default()
    }

    /// Backdate a node so reconciliation treats it as stale
    pub fn set_updated_at(&self, node_id: &str, at: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        if let Some(node) = state.nodes.iter_mut().find(|n| n.id == node_id) {
            node.updated_at = at;
        }
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn create_conversation(&self, title: &str) -> StoreResult<Conversation> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let conversation = Conversation {
            id: state.next_id("conv"),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        };
        state.conversations.push((conversation.clone(), 0));
        Ok(conversation)
    }

    async fn get_conversation(&self, id: &str) -> StoreResult<Conversation> {
        let state = self.state.lock().unwrap();
        state
            .conversations
            .iter()
            .find(|(c, _)| c.id == id)
            .map(|(c, _)| c.clone())
            .ok_or_else(|| StoreError::NotFound(format!("Conversation not found: {id}")))
    }

    async fn list_conversations(&self) -> StoreResult<Vec<Conversation>> {
        let state = self.state.lock().unwrap();
        let mut all: Vec<_> = state.conversations.iter().map(|(c, _)| c.clone()).collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all)
    }

    async fn update_title(&self, id: &str, title: &str) -> StoreResult<Conversation> {
        let mut state = self.state.lock().unwrap();
        let (conversation, _) = state
            .conversations
            .iter_mut()
            .find(|(c, _)| c.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("Conversation not found: {id}")))?;
        conversation.title = title.to_string();
        conversation.updated_at = Utc::now();
        Ok(conversation.clone())
    }
}

#[async_trait]
impl NodeStore for InMemoryStore {
    async fn create_node(&self, new: &NewNode) -> StoreResult<Node> {
        take_budget(&self.node_create_budget, "node create")?;
        self.state.lock().unwrap().insert_node(new)
    }

    async fn create_exchange(&self, user: &NewNode, reply: &NewNode) -> StoreResult<(Node, Node)> {
        take_budget(&self.node_create_budget, "node create")?;
        take_budget(&self.node_create_budget, "node create")?;
        let mut state = self.state.lock().unwrap();
        let user = state.insert_node(user)?;
        let reply = NewNode {
            parent_ids: vec![user.id.clone()],
            ..reply.clone()
        };
        let reply = state.insert_node(&reply)?;
        Ok((user, reply))
    }

    async fn get_node(&self, id: &str) -> StoreResult<Node> {
        self.node(id)
            .ok_or_else(|| StoreError::NotFound(format!("Node not found: {id}")))
    }

    async fn list_nodes(&self, conversation_id: &str) -> StoreResult<Vec<Node>> {
        let mut nodes = self.all_nodes(conversation_id);
        nodes.sort_by_key(|n| n.sequence);
        Ok(nodes)
    }

    async fn update_node(&self, id: &str, patch: &NodePatch) -> StoreResult<Node> {
        take_budget(&self.node_update_budget, "node update")?;
        let mut state = self.state.lock().unwrap();
        let node = state
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("Node not found: {id}")))?;
        if patch.status.is_some() && node.status.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "Node {id} is already {}",
                node.status
            )));
        }
        patch.apply_to(node, Utc::now());
        let updated = node.clone();
        if let Some(status) = patch.status {
            state.history.entry(id.to_string()).or_default().push(status);
        }
        Ok(updated)
    }

    async fn list_stale_nodes(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Node>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .nodes
            .iter()
            .filter(|n| n.status.is_in_flight() && n.updated_at < cutoff)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BranchStore for InMemoryStore {
    async fn create_branch(&self, new: &NewBranch) -> StoreResult<Branch> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let branch = Branch {
            id: state.next_id("branch"),
            conversation_id: new.conversation_id.clone(),
            label: new.label.clone(),
            description: new.description.clone(),
            parent_node_id: new.parent_node_id.clone(),
            root_node_id: None,
            status: BranchStatus::Active,
            created_at: now,
            updated_at: now,
        };
        state.branches.push(branch.clone());
        Ok(branch)
    }

    async fn get_branch(&self, id: &str) -> StoreResult<Branch> {
        self.branch(id)
            .ok_or_else(|| StoreError::NotFound(format!("Branch not found: {id}")))
    }

    async fn list_branches(&self, conversation_id: &str) -> StoreResult<Vec<Branch>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .branches
            .iter()
            .filter(|b| b.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn update_branch(&self, id: &str, patch: &BranchPatch) -> StoreResult<Branch> {
        take_budget(&self.branch_update_budget, "branch update")?;
        let mut state = self.state.lock().unwrap();
        let branch = state
            .branches
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("Branch not found: {id}")))?;
        if let Some(status) = patch.status {
            branch.status = status;
        }
        if let Some(root) = &patch.root_node_id {
            branch.root_node_id = Some(root.clone());
        }
        branch.updated_at = Utc::now();
        Ok(branch.clone())
    }

    async fn create_merge(
        &self,
        new: &NewNode,
        branch_ids: &[String],
    ) -> StoreResult<(Node, Vec<Branch>)> {
        take_budget(&self.node_create_budget, "node create")?;
        for _ in branch_ids {
            take_budget(&self.branch_update_budget, "branch update")?;
        }
        let mut state = self.state.lock().unwrap();
        for id in branch_ids {
            let branch = state
                .branches
                .iter()
                .find(|b| &b.id == id)
                .ok_or_else(|| StoreError::NotFound(format!("Branch not found: {id}")))?;
            if !branch.is_active() {
                return Err(StoreError::Conflict(format!("Branch {id} is no longer active")));
            }
        }
        let node = state.insert_node(new)?;
        let now = Utc::now();
        let mut merged = Vec::with_capacity(branch_ids.len());
        for branch in &mut state.branches {
            if branch_ids.contains(&branch.id) {
                branch.status = BranchStatus::Merged;
                branch.updated_at = now;
            }
        }
        for id in branch_ids {
            if let Some(branch) = state.branches.iter().find(|b| &b.id == id) {
                merged.push(branch.clone());
            }
        }
        Ok((node, merged))
    }
}

// ============================================================================
// Mock Generator
// ============================================================================

/// Set when a stream handed out by the mock is dropped
#[derive(Clone, Default)]
pub struct DropFlag(Arc<AtomicBool>);

impl DropFlag {
    pub fn was_dropped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct DropGuard(DropFlag);

impl Drop for DropGuard {
    fn drop(&mut self) {
        (self.0).0.store(true, Ordering::SeqCst);
    }
}

enum Scripted {
    Text(Result<String, LlmError>),
    Stream(Result<TextStream, LlmError>),
}

/// What the mock was asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Stream,
    Text,
    Structured,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub kind: CallKind,
    pub messages: Vec<LlmMessage>,
    pub system: Option<String>,
}

/// Generator that replays queued responses in order
pub struct MockGenerator {
    model_id: String,
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockGenerator {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a one-shot answer for `generate` or `generate_structured`
    pub fn queue_text(&self, text: impl Into<String>) {
        self.push(Scripted::Text(Ok(text.into())));
    }

    /// Queue a one-shot failure
    pub fn queue_error(&self, error: LlmError) {
        self.push(Scripted::Text(Err(error)));
    }

    /// Queue a finite stream of fragments
    pub fn queue_stream<const N: usize>(&self, fragments: [&str; N]) {
        self.queue_stream_items(fragments.iter().map(|f| Ok((*f).to_string())).collect());
    }

    pub fn queue_stream_items(&self, items: Vec<Result<String, LlmError>>) {
        self.push(Scripted::Stream(Ok(Box::pin(futures::stream::iter(items)))));
    }

    /// Queue a stream request that fails before any fragment
    pub fn queue_stream_error(&self, error: LlmError) {
        self.push(Scripted::Stream(Err(error)));
    }

    /// Queue a stream that cycles through `fragments` forever
    pub fn queue_endless_stream<const N: usize>(&self, fragments: [&str; N]) -> DropFlag {
        let flag = DropFlag::default();
        let guard = DropGuard(flag.clone());
        let fragments: Vec<String> = fragments.iter().map(|f| (*f).to_string()).collect();
        let stream = futures::stream::iter(fragments.into_iter().cycle())
            .then(|fragment| async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                Ok::<_, LlmError>(fragment)
            })
            .map(move |item| {
                let _held = &guard;
                item
            });
        self.push(Scripted::Stream(Ok(Box::pin(stream))));
        flag
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, scripted: Scripted) {
        self.script.lock().unwrap().push_back(scripted);
    }

    fn record(&self, kind: CallKind, messages: &[LlmMessage], system: Option<&str>) {
        self.calls.lock().unwrap().push(RecordedCall {
            kind,
            messages: messages.to_vec(),
            system: system.map(String::from),
        });
    }

    fn next_text(&self) -> Result<String, LlmError> {
        match self.script.lock().unwrap().pop_front() {
            Some(Scripted::Text(result)) => result,
            Some(Scripted::Stream(_)) => Err(LlmError::unknown("Mock expected a text call")),
            None => Err(LlmError::network("No mock response queued")),
        }
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate_stream(
        &self,
        messages: &[LlmMessage],
        system: Option<&str>,
    ) -> Result<TextStream, LlmError> {
        self.record(CallKind::Stream, messages, system);
        match self.script.lock().unwrap().pop_front() {
            Some(Scripted::Stream(result)) => result,
            Some(Scripted::Text(_)) => Err(LlmError::unknown("Mock expected a stream call")),
            None => Err(LlmError::network("No mock response queued")),
        }
    }

    async fn generate(
        &self,
        messages: &[LlmMessage],
        system: Option<&str>,
    ) -> Result<String, LlmError> {
        self.record(CallKind::Text, messages, system);
        self.next_text()
    }

    async fn generate_structured(
        &self,
        messages: &[LlmMessage],
        system: Option<&str>,
    ) -> Result<String, LlmError> {
        self.record(CallKind::Structured, messages, system);
        self.next_text()
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Engine harness
// ============================================================================

pub type TestEngine = Engine<Arc<InMemoryStore>, Arc<MockGenerator>>;

pub struct Harness {
    pub engine: Arc<TestEngine>,
    pub store: Arc<InMemoryStore>,
    pub generator: Arc<MockGenerator>,
    pub titles: Arc<MockGenerator>,
}

pub fn harness() -> Harness {
    build_harness(false, None)
}

/// Harness whose engine also generates conversation titles
pub fn harness_with_titles() -> Harness {
    build_harness(true, None)
}

/// Harness whose streaming turns touch their node every `interval`
pub fn harness_with_heartbeat(interval: Duration) -> Harness {
    build_harness(false, Some(interval))
}

fn build_harness(with_titles: bool, heartbeat: Option<Duration>) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let generator = Arc::new(MockGenerator::new("mock-model"));
    let titles = Arc::new(MockGenerator::new("mock-titles"));
    let mut engine = Engine::new(Arc::clone(&store), Arc::clone(&generator));
    if with_titles {
        engine = engine.with_title_generator(Arc::clone(&titles) as Arc<dyn Generator>);
    }
    if let Some(interval) = heartbeat {
        engine = engine.with_heartbeat(interval);
    }
    Harness {
        engine: Arc::new(engine),
        store,
        generator,
        titles,
    }
}

pub fn test_engine() -> Arc<TestEngine> {
    harness().engine
}

/// Poll until the node reaches `status`
pub async fn wait_for_status(store: &InMemoryStore, node_id: &str, status: NodeStatus) -> Node {
    for _ in 0..500 {
        if let Some(node) = store.node(node_id) {
            if node.status == status {
                return node;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "node {node_id} never reached {status}: {:?}",
        store.node(node_id)
    );
}

impl Harness {
    /// A completed trunk of alternating user/assistant nodes
    pub async fn seed_trunk(&self, conversation_id: &str, len: usize) -> Vec<Node> {
        let mut nodes: Vec<Node> = Vec::with_capacity(len);
        for i in 0..len {
            let parent = nodes.last().map(|n| n.id.clone());
            let mut new = NewNode::user(conversation_id, parent.as_deref(), None, &format!("turn {i}"));
            if i % 2 == 1 {
                new.node_type = NodeType::Assistant;
                new.role = crate::graph::Role::Assistant;
            }
            nodes.push(self.store.create_node(&new).await.unwrap());
        }
        nodes
    }
}
