//! Integration tests for snapshot and diagnostic broadcasting
//!
//! Subscribers receive every published snapshot asynchronously; observers and
//! effects receive them synchronously. Failures with no caller are broadcast
//! on the diagnostic feed.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use composable_slice_core::{Patch, PatchError, SliceState};
use composable_slice_runtime::{DiagnosticKind, SliceBuilder, SliceConfig};
use composable_slice_testing::helpers::settle;
use composable_slice_testing::{ManualSource, RecordingEffect, RecordingObserver};
use tokio::sync::broadcast::error::RecvError;

// ============================================================================
// Test Fixtures
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq)]
struct Journal {
    entries: Vec<String>,
}

/// Appends one entry
struct Append(String);

impl Patch<Journal> for Append {
    fn merge(self, prior: &Journal) -> Result<Journal, PatchError> {
        let mut entries = prior.entries.clone();
        entries.push(self.0);
        Ok(Journal { entries })
    }
}

impl SliceState for Journal {
    type Patch = Append;
}

fn append(_state: &Journal, entry: String) -> Append {
    Append(entry)
}

// ============================================================================
// Tests
// ============================================================================

/// Subscribers see snapshots in timeline order
#[tokio::test]
async fn test_subscribers_receive_every_snapshot() {
    let slice = SliceBuilder::new(Journal::default())
        .action("append", append)
        .build()
        .unwrap();
    let mut first = slice.subscribe();
    let mut second = slice.subscribe();

    for entry in ["a", "b", "c"] {
        slice.dispatch("append", entry.to_string()).unwrap();
    }

    for receiver in [&mut first, &mut second] {
        assert_eq!(receiver.recv().await.unwrap().entries.len(), 1);
        assert_eq!(receiver.recv().await.unwrap().entries.len(), 2);
        assert_eq!(receiver.recv().await.unwrap().entries.len(), 3);
    }
}

/// Slow subscribers lag instead of blocking the timeline
#[tokio::test]
async fn test_slow_subscriber_lags() {
    let slice = SliceBuilder::new(Journal::default())
        .config(SliceConfig::default().with_broadcast_capacity(2))
        .action("append", append)
        .build()
        .unwrap();
    let observer = RecordingObserver::<Journal>::new();
    slice.observe(observer.callback());
    let mut receiver = slice.subscribe();

    for entry in 0..5 {
        slice.dispatch("append", entry.to_string()).unwrap();
    }

    assert!(matches!(receiver.recv().await, Err(RecvError::Lagged(3))));
    assert_eq!(receiver.recv().await.unwrap().entries.len(), 4);

    // Observers never lag
    assert_eq!(observer.len(), 5);
}

/// Observers run before effects, both in registration order
#[tokio::test]
async fn test_observers_then_effects() {
    let first = RecordingEffect::<Journal>::new();
    let second = RecordingEffect::<Journal>::new();
    let slice = SliceBuilder::new(Journal::default())
        .action("append", append)
        .effect("first", first.clone())
        .effect("second", second.clone())
        .build()
        .unwrap();

    let observed_effect_runs = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let runs = std::sync::Arc::clone(&observed_effect_runs);
    let probe = first.clone();
    slice.observe(move |_| runs.lock().unwrap().push(probe.runs()));

    slice.dispatch("append", "x".to_string()).unwrap();
    slice.dispatch("append", "y".to_string()).unwrap();

    // The observer ran before the first effect each time
    assert_eq!(*observed_effect_runs.lock().unwrap(), vec![0, 1]);
    assert_eq!(first.snapshots(), second.snapshots());
    assert_eq!(second.runs(), 2);
}

/// Effect failures are broadcast and never roll state back
#[tokio::test]
async fn test_effect_failures_are_broadcast() {
    let failing = RecordingEffect::<Journal>::new();
    failing.set_failing(true);
    let after = RecordingEffect::<Journal>::new();
    let slice = SliceBuilder::new(Journal::default())
        .action("append", append)
        .effect("save", failing.clone())
        .effect("audit", after.clone())
        .build()
        .unwrap();
    let mut feed = slice.subscribe_diagnostics();

    let state = slice.dispatch("append", "kept".to_string()).unwrap();

    assert_eq!(state.entries, vec!["kept".to_string()]);
    assert_eq!(slice.snapshot(), state);
    assert_eq!(after.runs(), 1);

    let diagnostic = feed.recv().await.unwrap();
    assert_eq!(diagnostic.kind, DiagnosticKind::EffectFailed);
    assert_eq!(diagnostic.origin, "save");
}

/// Source failures reach the diagnostic feed
#[tokio::test]
async fn test_source_failures_are_broadcast() {
    let (trigger, producer) = ManualSource::<String>::new();
    let slice = SliceBuilder::new(Journal::default())
        .source("remote", producer, Append)
        .build()
        .unwrap();
    let mut feed = slice.subscribe_diagnostics();

    trigger.fail("connection reset");
    settle().await;

    let diagnostic = feed.recv().await.unwrap();
    assert_eq!(diagnostic.kind, DiagnosticKind::SourceFailed);
    assert_eq!(diagnostic.origin, "remote");
    assert!(diagnostic.message.contains("connection reset"));
    assert_eq!(slice.version(), 0);
}

/// The diagnostic log keeps only the newest entries
#[tokio::test]
async fn test_diagnostic_log_is_bounded() {
    let failing = RecordingEffect::<Journal>::new();
    failing.set_failing(true);
    let slice = SliceBuilder::new(Journal::default())
        .config(SliceConfig::default().with_diagnostic_log_size(3))
        .action("append", append)
        .effect("save", failing)
        .build()
        .unwrap();

    for entry in 0..10 {
        slice.dispatch("append", entry.to_string()).unwrap();
    }

    assert_eq!(slice.diagnostics().len(), 3);
    assert_eq!(slice.diagnostics().drain().len(), 3);
    assert!(slice.diagnostics().is_empty());
}
