//! Reconciliation of generations that never settled
//!
//! A process that dies mid-turn leaves assistant nodes pending or streaming.
//! They are failed on startup and periodically afterwards.

use super::{Engine, EngineResult, Generator, Storage};
use crate::lifecycle::LifecycleEvent;
use chrono::{DateTime, Utc};

pub const INTERRUPTED_DIAGNOSTIC: &str = "generation interrupted before completion";

impl<S, G> Engine<S, G>
where
    S: Storage + 'static,
    G: Generator + 'static,
{
    /// Fail every in-flight node last touched before `cutoff`; returns how
    /// many were settled
    pub async fn reconcile_stale_nodes(&self, cutoff: DateTime<Utc>) -> EngineResult<usize> {
        let stale = self.store.list_stale_nodes(cutoff).await?;
        let mut settled = 0;
        for node in &stale {
            let event = LifecycleEvent::Reconciled {
                diagnostic: INTERRUPTED_DIAGNOSTIC.to_string(),
            };
            match self.advance(node, event).await {
                Ok(_) => settled += 1,
                Err(e) => {
                    tracing::warn!(node_id = %node.id, error = %e, "Failed to reconcile node");
                }
            }
        }
        if settled > 0 {
            tracing::info!(count = settled, "Reconciled interrupted generations");
        }
        Ok(settled)
    }
}
