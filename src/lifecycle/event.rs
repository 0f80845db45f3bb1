//! Events that move an assistant node through its generation lifecycle

/// Events that trigger status transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// About to request the first fragment
    StreamStarted,
    /// The fragment stream ended normally
    StreamFinished { output: String, duration_ms: u64 },
    /// The generation collaborator or the store failed
    StreamFailed { diagnostic: String },
    /// The caller went away; `partial_output` is what had arrived so far
    Cancelled {
        partial_output: String,
        duration_ms: u64,
    },
    /// A reconciliation pass found the node stuck in flight
    Reconciled { diagnostic: String },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StreamStarted => "stream_started",
            Self::StreamFinished { .. } => "stream_finished",
            Self::StreamFailed { .. } => "stream_failed",
            Self::Cancelled { .. } => "cancelled",
            Self::Reconciled { .. } => "reconciled",
        }
    }
}
