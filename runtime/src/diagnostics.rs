//! Diagnostics for failures that have no caller to return to.
//!
//! A source resolving in the background or an effect failing after a publish
//! cannot hand an error back to anyone. Those failures are logged, counted,
//! broadcast to diagnostic subscribers and kept in a bounded log so they
//! can be inspected later.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

/// What went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// A source producer returned an error or timed out
    SourceFailed,
    /// A source resolved after the slice was disposed; its value was dropped
    SourceDiscarded,
    /// A source's patch was rejected by the timeline
    PatchRejected,
    /// An effect returned an error or panicked
    EffectFailed,
    /// An observer panicked
    ObserverFailed,
}

impl DiagnosticKind {
    /// Stable label for logs and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SourceFailed => "source_failed",
            Self::SourceDiscarded => "source_discarded",
            Self::PatchRejected => "patch_rejected",
            Self::EffectFailed => "effect_failed",
            Self::ObserverFailed => "observer_failed",
        }
    }
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure recorded by the slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// What went wrong
    pub kind: DiagnosticKind,
    /// Name of the source, effect or observer that failed
    pub origin: String,
    /// Human-readable error message
    pub message: String,
    /// When it was recorded
    pub at: DateTime<Utc>,
}

impl Diagnostic {
    /// Create a diagnostic stamped with the current time
    #[must_use]
    pub fn new(kind: DiagnosticKind, origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            origin: origin.into(),
            message: message.into(),
            at: Utc::now(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.origin, self.message)
    }
}

/// Bounded log of diagnostics with a broadcast feed
///
/// When the log is full the oldest entry is evicted. Cloning shares the same
/// log.
#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    entries: Arc<Mutex<VecDeque<Diagnostic>>>,
    max_size: usize,
    feed: broadcast::Sender<Diagnostic>,
}

impl DiagnosticLog {
    /// Create a log holding at most `max_size` entries
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        let (feed, _) = broadcast::channel(max_size.clamp(1, 1024));
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(max_size))),
            max_size,
            feed,
        }
    }

    /// Record a diagnostic
    pub fn push(&self, diagnostic: Diagnostic) {
        tracing::warn!(
            kind = %diagnostic.kind,
            origin = %diagnostic.origin,
            message = %diagnostic.message,
            "Slice diagnostic recorded"
        );
        metrics::counter!("slice.diagnostics.total", "kind" => diagnostic.kind.as_str())
            .increment(1);

        {
            let mut entries = self.lock();
            if self.max_size > 0 {
                while entries.len() >= self.max_size {
                    entries.pop_front();
                }
                entries.push_back(diagnostic.clone());
            }
        }

        // No subscribers is fine
        let _ = self.feed.send(diagnostic);
    }

    /// Snapshot of the recorded diagnostics, oldest first
    #[must_use]
    pub fn entries(&self) -> Vec<Diagnostic> {
        self.lock().iter().cloned().collect()
    }

    /// Remove and return every recorded diagnostic
    #[must_use]
    pub fn drain(&self) -> Vec<Diagnostic> {
        self.lock().drain(..).collect()
    }

    /// Number of recorded diagnostics
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Receive diagnostics as they are recorded
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Diagnostic> {
        self.feed.subscribe()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Diagnostic>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_records_in_order() {
        let log = DiagnosticLog::new(10);
        log.push(Diagnostic::new(DiagnosticKind::SourceFailed, "load", "boom"));
        log.push(Diagnostic::new(DiagnosticKind::EffectFailed, "persist", "disk full"));

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].origin, "load");
        assert_eq!(entries[1].kind, DiagnosticKind::EffectFailed);
    }

    #[test]
    fn oldest_entry_is_evicted_when_full() {
        let log = DiagnosticLog::new(2);
        for origin in ["a", "b", "c"] {
            log.push(Diagnostic::new(DiagnosticKind::EffectFailed, origin, "x"));
        }

        let origins: Vec<_> = log.entries().into_iter().map(|d| d.origin).collect();
        assert_eq!(origins, vec!["b", "c"]);
    }

    #[test]
    fn drain_empties_the_log() {
        let log = DiagnosticLog::new(4);
        log.push(Diagnostic::new(DiagnosticKind::SourceDiscarded, "load", "late"));

        assert_eq!(log.drain().len(), 1);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn subscribers_receive_pushed_diagnostics() {
        let log = DiagnosticLog::new(4);
        let mut feed = log.subscribe();

        log.push(Diagnostic::new(DiagnosticKind::PatchRejected, "load", "dup id"));

        let received = feed.recv().await.unwrap();
        assert_eq!(received.kind, DiagnosticKind::PatchRejected);
        assert_eq!(received.message, "dup id");
    }

    #[test]
    fn kind_labels_are_stable() {
        assert_eq!(DiagnosticKind::SourceFailed.to_string(), "source_failed");
        assert_eq!(DiagnosticKind::EffectFailed.as_str(), "effect_failed");
        assert_eq!(DiagnosticKind::ObserverFailed.as_str(), "observer_failed");
    }
}
