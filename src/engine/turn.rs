//! Chat turns: user node, pending assistant node, streamed generation
//!
//! A turn runs as one spawned task that forwards fragments to the caller
//! and persists each lifecycle transition in order. Closing the receiving
//! end cancels the generation.

use super::{Engine, EngineError, EngineResult, Generator, Storage};
use crate::graph::{assemble_context, traverse, GraphIndex, NewNode, Node, NodePatch};
use crate::lifecycle::LifecycleEvent;
use crate::llm::LlmMessage;
use crate::prompts::CHAT_SYSTEM_PROMPT;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

const TURN_CHANNEL_CAPACITY: usize = 64;

/// Inputs of a send-message call
#[derive(Debug, Clone, Default)]
pub struct SendMessage {
    pub conversation_id: String,
    pub message: String,
    pub parent_node_id: Option<String>,
    pub branch_id: Option<String>,
}

/// Events delivered to the caller of a turn, in order: one `Started`, any
/// number of `Fragment`s, then exactly one of `Done` or `Error`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TurnEvent {
    #[serde(rename_all = "camelCase")]
    Started {
        user_node_id: String,
        assistant_node_id: String,
        sequence: i64,
    },
    #[serde(rename_all = "camelCase")]
    Fragment { text: String, node_id: String },
    Done { done: bool },
    Error { error: String },
}

impl TurnEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

/// How the fragment loop ended
enum StreamEnd {
    Finished(String),
    Failed(String),
    Cancelled(String),
    /// Another writer settled the node first
    Superseded(Node),
}

impl<S, G> Engine<S, G>
where
    S: Storage + 'static,
    G: Generator + 'static,
{
    /// Validate, create the user and pending assistant nodes, then start
    /// generation in the background.
    ///
    /// Every validation failure happens before any node is written.
    pub async fn send_message(
        self: &Arc<Self>,
        request: SendMessage,
    ) -> EngineResult<mpsc::Receiver<TurnEvent>> {
        let text = request.message.trim();
        if text.is_empty() {
            return Err(EngineError::validation("Message must not be empty"));
        }

        let conversation = self.store.get_conversation(&request.conversation_id).await?;
        let branch_id = request.branch_id.as_deref();
        let branch = match branch_id {
            Some(id) => {
                let branch = self.store.get_branch(id).await?;
                if branch.conversation_id != conversation.id {
                    return Err(EngineError::not_found(format!("Branch not found: {id}")));
                }
                if !branch.is_active() {
                    return Err(EngineError::validation(format!(
                        "Branch {id} is {}",
                        branch.status
                    )));
                }
                Some(branch)
            }
            None => None,
        };

        let mut index = GraphIndex::new(self.store.list_nodes(&conversation.id).await?);
        let parent = match request.parent_node_id.as_deref() {
            Some(id) => Some(
                index
                    .get(id)
                    .ok_or_else(|| EngineError::not_found(format!("Node not found: {id}")))?
                    .id
                    .clone(),
            ),
            None => traverse::latest_node(&index, branch_id)
                .map(|n| n.id.clone())
                // An empty branch continues from its explore root
                .or_else(|| branch.as_ref().map(|b| b.parent_node_id.clone())),
        };
        let first_message = index.is_empty();

        let (user, assistant) = self
            .create_exchange(
                &NewNode::user(&conversation.id, parent.as_deref(), branch_id, text),
                &NewNode::assistant_reply(
                    &conversation.id,
                    branch_id,
                    text,
                    self.generator.model_id(),
                ),
            )
            .await?;

        tracing::info!(
            conv_id = %conversation.id,
            user_node_id = %user.id,
            assistant_node_id = %assistant.id,
            branch_id = ?branch_id,
            "Starting chat turn"
        );

        index.upsert(user.clone());
        let messages = assemble_context(&index, &user.id);

        if first_message {
            self.spawn_title_generation(&conversation, text);
        }

        let (tx, rx) = mpsc::channel(TURN_CHANNEL_CAPACITY);
        // Fresh channel with free capacity, so this cannot fail
        let _ = tx.try_send(TurnEvent::Started {
            user_node_id: user.id.clone(),
            assistant_node_id: assistant.id.clone(),
            sequence: user.sequence,
        });

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.run_turn(assistant, messages, tx).await;
        });

        Ok(rx)
    }

    async fn run_turn(
        self: Arc<Self>,
        node: Node,
        messages: Vec<LlmMessage>,
        tx: mpsc::Sender<TurnEvent>,
    ) {
        let started = Instant::now();
        let node_id = node.id.clone();

        if tx.is_closed() {
            self.settle(
                &node,
                LifecycleEvent::Cancelled {
                    partial_output: String::new(),
                    duration_ms: elapsed_ms(started),
                },
            )
            .await;
            return;
        }

        let node = match self.advance(&node, LifecycleEvent::StreamStarted).await {
            Ok(node) => node,
            Err(e) => {
                let message = e.to_string();
                self.settle(
                    &node,
                    LifecycleEvent::StreamFailed {
                        diagnostic: message.clone(),
                    },
                )
                .await;
                let _ = tx.send(TurnEvent::Error { error: message }).await;
                return;
            }
        };

        let end = self.stream_fragments(&node_id, &messages, &tx).await;
        let duration_ms = elapsed_ms(started);

        match end {
            StreamEnd::Finished(output) => {
                let finished = LifecycleEvent::StreamFinished {
                    output,
                    duration_ms,
                };
                match self.advance(&node, finished).await {
                    Ok(_) => {
                        tracing::info!(conv_id = %node.conversation_id, node_id = %node_id, duration_ms, "Chat turn completed");
                        let _ = tx.send(TurnEvent::Done { done: true }).await;
                    }
                    Err(e) => {
                        let message = e.to_string();
                        self.settle(
                            &node,
                            LifecycleEvent::StreamFailed {
                                diagnostic: message.clone(),
                            },
                        )
                        .await;
                        let _ = tx.send(TurnEvent::Error { error: message }).await;
                    }
                }
            }
            StreamEnd::Failed(message) => {
                tracing::warn!(conv_id = %node.conversation_id, node_id = %node_id, error = %message, "Chat turn failed");
                self.settle(
                    &node,
                    LifecycleEvent::StreamFailed {
                        diagnostic: message.clone(),
                    },
                )
                .await;
                let _ = tx.send(TurnEvent::Error { error: message }).await;
            }
            StreamEnd::Cancelled(partial_output) => {
                tracing::info!(conv_id = %node.conversation_id, node_id = %node_id, chars = partial_output.len(), "Chat turn cancelled by caller");
                self.settle(
                    &node,
                    LifecycleEvent::Cancelled {
                        partial_output,
                        duration_ms,
                    },
                )
                .await;
            }
            StreamEnd::Superseded(stored) => {
                tracing::warn!(conv_id = %node.conversation_id, node_id = %node_id, status = %stored.status, "Generation settled elsewhere, stopping turn");
                let error = stored
                    .output
                    .unwrap_or_else(|| format!("Node is already {}", stored.status));
                let _ = tx.send(TurnEvent::Error { error }).await;
            }
        }
    }

    /// Pull fragments until the stream ends, fails or the caller goes away.
    /// The upstream stream is dropped on return, releasing the request.
    ///
    /// The node is touched every heartbeat; if that shows it was settled
    /// elsewhere the generation stops.
    async fn stream_fragments(
        &self,
        node_id: &str,
        messages: &[LlmMessage],
        tx: &mpsc::Sender<TurnEvent>,
    ) -> StreamEnd {
        let mut stream = tokio::select! {
            () = tx.closed() => return StreamEnd::Cancelled(String::new()),
            result = self.generator.generate_stream(messages, Some(CHAT_SYSTEM_PROMPT)) => {
                match result {
                    Ok(stream) => stream,
                    Err(e) => return StreamEnd::Failed(e.message),
                }
            }
        };

        let mut heartbeat =
            tokio::time::interval_at(tokio::time::Instant::now() + self.heartbeat, self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut output = String::new();
        loop {
            let next = tokio::select! {
                () = tx.closed() => return StreamEnd::Cancelled(output),
                _ = heartbeat.tick() => {
                    match self.store.update_node(node_id, &NodePatch::default()).await {
                        Ok(stored) if stored.status.is_terminal() => {
                            return StreamEnd::Superseded(stored);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(node_id = %node_id, error = %e, "Heartbeat write failed");
                        }
                    }
                    continue;
                }
                next = stream.next() => next,
            };
            match next {
                Some(Ok(text)) => {
                    output.push_str(&text);
                    let event = TurnEvent::Fragment {
                        text,
                        node_id: node_id.to_string(),
                    };
                    if tx.send(event).await.is_err() {
                        return StreamEnd::Cancelled(output);
                    }
                }
                Some(Err(e)) => return StreamEnd::Failed(e.message),
                None => return StreamEnd::Finished(output),
            }
        }
    }

    /// Terminal transition whose own failure can only be logged; the
    /// reconciliation pass picks up whatever stays in flight
    async fn settle(&self, node: &Node, event: LifecycleEvent) {
        match self.advance(node, event).await {
            Ok(_) => {}
            Err(EngineError::Validation(reason)) => {
                tracing::info!(
                    conv_id = %node.conversation_id,
                    node_id = %node.id,
                    reason = %reason,
                    "Node already settled"
                );
            }
            Err(e) => tracing::error!(
                conv_id = %node.conversation_id,
                node_id = %node.id,
                error = %e,
                "Failed to persist terminal node status"
            ),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
