//! Assistant node generation lifecycle
//!
//! Pure status transitions in the Elm style: the engine feeds events in and
//! persists whatever patch comes back.

pub mod event;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use event::LifecycleEvent;
pub use transition::{failure_output, transition, LifecycleError};
