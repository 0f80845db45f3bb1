//! Property-based tests for lifecycle transitions

use super::*;
use crate::graph::NodeStatus;
use proptest::prelude::*;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_status() -> impl Strategy<Value = NodeStatus> {
    prop_oneof![
        Just(NodeStatus::Pending),
        Just(NodeStatus::Streaming),
        Just(NodeStatus::Completed),
        Just(NodeStatus::Partial),
        Just(NodeStatus::Failed),
    ]
}

fn arb_event() -> impl Strategy<Value = LifecycleEvent> {
    prop_oneof![
        Just(LifecycleEvent::StreamStarted),
        ("[a-z ]{0,30}", 0u64..10_000).prop_map(|(output, duration_ms)| {
            LifecycleEvent::StreamFinished {
                output,
                duration_ms,
            }
        }),
        "[a-z ]{1,30}".prop_map(|diagnostic| LifecycleEvent::StreamFailed { diagnostic }),
        ("[a-z ]{0,30}", 0u64..10_000).prop_map(|(partial_output, duration_ms)| {
            LifecycleEvent::Cancelled {
                partial_output,
                duration_ms,
            }
        }),
        "[a-z ]{1,30}".prop_map(|diagnostic| LifecycleEvent::Reconciled { diagnostic }),
    ]
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    // Status never moves backwards and terminal statuses are absorbing
    #[test]
    fn prop_status_is_monotonic(status in arb_status(), event in arb_event()) {
        match transition(status, event) {
            Ok(result) => {
                prop_assert!(!status.is_terminal());
                prop_assert!(result.new_status.rank() > status.rank());
                prop_assert_eq!(result.patch.status, Some(result.new_status));
            }
            Err(LifecycleError::Terminal(s)) => {
                prop_assert!(status.is_terminal());
                prop_assert_eq!(s, status);
            }
            Err(LifecycleError::InvalidTransition { .. }) => {
                prop_assert!(status.is_in_flight());
            }
        }
    }

    // Any event sequence from pending settles at most once
    #[test]
    fn prop_sequences_terminate(events in proptest::collection::vec(arb_event(), 0..12)) {
        let mut status = NodeStatus::Pending;
        let mut settled = 0;
        for event in events {
            if let Ok(result) = transition(status, event) {
                status = result.new_status;
                if status.is_terminal() {
                    settled += 1;
                }
            }
        }
        prop_assert!(settled <= 1);
    }

    // Every terminal result carries output text
    #[test]
    fn prop_terminal_results_have_output(status in arb_status(), event in arb_event()) {
        if let Ok(result) = transition(status, event) {
            if result.new_status.is_terminal() {
                prop_assert!(result.patch.output.is_some());
            }
        }
    }
}
