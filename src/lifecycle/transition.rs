//! Pure status transition function
//!
//! pending -> streaming -> completed | partial | failed, with pending and
//! streaming both able to fail directly. Terminal statuses accept nothing.

use super::LifecycleEvent;
use crate::graph::{meta, NodePatch, NodeStatus};
use thiserror::Error;

/// Result of a status transition
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionResult {
    pub new_status: NodeStatus,
    /// Fields to persist alongside the new status
    pub patch: NodePatch,
}

impl TransitionResult {
    fn new(status: NodeStatus) -> Self {
        Self {
            new_status: status,
            patch: NodePatch::status(status),
        }
    }

    fn with_output(mut self, output: impl Into<String>) -> Self {
        self.patch = self.patch.with_output(output);
        self
    }

    fn with_duration(mut self, duration_ms: u64) -> Self {
        self.patch = self.patch.with_meta(meta::DURATION_MS, duration_ms);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("Node is already {0}")]
    Terminal(NodeStatus),
    #[error("Invalid transition: {event} while {status}")]
    InvalidTransition {
        status: NodeStatus,
        event: &'static str,
    },
}

/// Diagnostic stored on a node that failed
pub fn failure_output(diagnostic: &str) -> String {
    format!("Error: {diagnostic}")
}

/// Pure transition function: same inputs, same outputs, no I/O
pub fn transition(
    status: NodeStatus,
    event: LifecycleEvent,
) -> Result<TransitionResult, LifecycleError> {
    if status.is_terminal() {
        return Err(LifecycleError::Terminal(status));
    }

    match (status, event) {
        (NodeStatus::Pending, LifecycleEvent::StreamStarted) => {
            Ok(TransitionResult::new(NodeStatus::Streaming))
        }

        (
            NodeStatus::Streaming,
            LifecycleEvent::StreamFinished {
                output,
                duration_ms,
            },
        ) => Ok(TransitionResult::new(NodeStatus::Completed)
            .with_output(output)
            .with_duration(duration_ms)),

        (
            NodeStatus::Pending | NodeStatus::Streaming,
            LifecycleEvent::StreamFailed { diagnostic },
        ) => Ok(TransitionResult::new(NodeStatus::Failed).with_output(failure_output(&diagnostic))),

        (
            NodeStatus::Streaming,
            LifecycleEvent::Cancelled {
                partial_output,
                duration_ms,
            },
        ) => Ok(TransitionResult::new(NodeStatus::Partial)
            .with_output(partial_output)
            .with_duration(duration_ms)),

        // Nothing was generated, so there is nothing partial to keep
        (NodeStatus::Pending, LifecycleEvent::Cancelled { duration_ms, .. }) => {
            Ok(TransitionResult::new(NodeStatus::Failed)
                .with_output(failure_output("cancelled before generation started"))
                .with_duration(duration_ms))
        }

        (
            NodeStatus::Pending | NodeStatus::Streaming,
            LifecycleEvent::Reconciled { diagnostic },
        ) => Ok(TransitionResult::new(NodeStatus::Failed).with_output(failure_output(&diagnostic))),

        (status, event) => Err(LifecycleError::InvalidTransition {
            status,
            event: event.name(),
        }),
    }
}
