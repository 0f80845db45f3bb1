//! Conversation DAG: records, traversal, context assembly and snapshots
//!
//! Everything here is pure and synchronous. Storage and generation live in
//! the engine; this module only reasons about nodes already loaded.

pub mod context;
pub mod index;
pub mod snapshot;
pub mod traverse;
pub mod types;

#[cfg(test)]
pub(crate) mod fixtures;
#[cfg(test)]
mod proptests;

pub use context::assemble_context;
pub use index::GraphIndex;
pub use snapshot::ConversationSnapshot;
pub use types::*;
