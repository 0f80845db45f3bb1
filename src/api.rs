//! HTTP API for the conversation graph

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::engine::{Engine, Generator, Storage};
use crate::llm::ModelRegistry;
use std::sync::Arc;

/// Application state shared across handlers
pub struct AppState<S, G> {
    pub engine: Arc<Engine<S, G>>,
    pub llm_registry: Arc<ModelRegistry>,
}

impl<S, G> AppState<S, G>
where
    S: Storage + 'static,
    G: Generator + 'static,
{
    pub fn new(engine: Arc<Engine<S, G>>, llm_registry: Arc<ModelRegistry>) -> Self {
        Self {
            engine,
            llm_registry,
        }
    }
}

impl<S, G> Clone for AppState<S, G> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            llm_registry: Arc::clone(&self.llm_registry),
        }
    }
}
