//! # Composable Slice Testing
//!
//! Testing utilities and helpers for composable reactive state slices.
//!
//! This crate provides:
//! - [`ReducerTest`]: Given-When-Then assertions for action reducers
//! - Recording observers and effects that capture every snapshot they see
//! - [`mocks::ManualSource`]: a source producer resolved by the test
//! - Helpers for letting spawned sources run and for test logging
//!
//! ## Example
//!
//! ```ignore
//! use composable_slice_testing::{helpers::settle, mocks::ManualSource, RecordingObserver};
//!
//! #[tokio::test]
//! async fn test_cart_loads() {
//!     let (trigger, producer) = ManualSource::new();
//!     let observer = RecordingObserver::new();
//!     let slice = SliceBuilder::new(CartState::default())
//!         .source("load", producer, |items| CartPatch::loaded(items))
//!         .build()?;
//!     slice.observe(observer.callback());
//!
//!     trigger.resolve(vec![]);
//!     settle().await;
//!
//!     assert_eq!(observer.len(), 1);
//! }
//! ```


pub use reducer_test::ReducerTest;

/// Mock collaborators for slices
pub mod mocks {
    use composable_slice_core::Effect;
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};
    use tokio::sync::oneshot;

    /// Observer that records every snapshot it is notified with
    ///
    /// # Example
    ///
    /// ```
    /// use composable_slice_testing::RecordingObserver;
    ///
    /// let observer = RecordingObserver::new();
    /// let callback = observer.callback();
    /// callback(&1_u32);
    /// callback(&2_u32);
    /// assert_eq!(observer.snapshots(), vec![1, 2]);
    /// ```
    #[derive(Debug)]
    pub struct RecordingObserver<S> {
        seen: Arc<Mutex<Vec<S>>>,
    }

    impl<S: Clone + Send + 'static> RecordingObserver<S> {
        /// Create an observer that has seen nothing yet
        #[must_use]
        pub fn new() -> Self {
            Self {
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Callback to hand to `Slice::observe`
        pub fn callback(&self) -> impl Fn(&S) + Send + Sync + 'static {
            let seen = Arc::clone(&self.seen);
            move |snapshot: &S| {
                seen.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(snapshot.clone());
            }
        }

        /// Snapshots seen so far, in notification order
        #[must_use]
        pub fn snapshots(&self) -> Vec<S> {
            self.seen.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        /// Most recent snapshot
        #[must_use]
        pub fn last(&self) -> Option<S> {
            self.seen.lock().unwrap_or_else(PoisonError::into_inner).last().cloned()
        }

        /// Number of notifications received
        #[must_use]
        pub fn len(&self) -> usize {
            self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
        }

        /// Whether no notification was received
        #[must_use]
        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    impl<S: Clone + Send + 'static> Default for RecordingObserver<S> {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<S> Clone for RecordingObserver<S> {
        fn clone(&self) -> Self {
            Self {
                seen: Arc::clone(&self.seen),
            }
        }
    }

    /// Effect that records snapshots and can be switched to failing
    ///
    /// Clones share the recording, so keep one clone and register the other.
    #[derive(Debug)]
    pub struct RecordingEffect<S> {
        seen: Arc<Mutex<Vec<S>>>,
        failing: Arc<AtomicBool>,
    }

    impl<S: Clone + Send + Sync + 'static> RecordingEffect<S> {
        /// Create an effect that succeeds
        #[must_use]
        pub fn new() -> Self {
            Self {
                seen: Arc::new(Mutex::new(Vec::new())),
                failing: Arc::new(AtomicBool::new(false)),
            }
        }

        /// Make subsequent runs fail (after recording the snapshot)
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Snapshots the effect ran with, in order
        #[must_use]
        pub fn snapshots(&self) -> Vec<S> {
            self.seen.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        /// Number of runs
        #[must_use]
        pub fn runs(&self) -> usize {
            self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
        }
    }

    impl<S: Clone + Send + Sync + 'static> Default for RecordingEffect<S> {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<S> Clone for RecordingEffect<S> {
        fn clone(&self) -> Self {
            Self {
                seen: Arc::clone(&self.seen),
                failing: Arc::clone(&self.failing),
            }
        }
    }

    impl<S: Clone + Send + Sync + 'static> Effect<S> for RecordingEffect<S> {
        fn run(&self, snapshot: &S) -> anyhow::Result<()> {
            self.seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(snapshot.clone());
            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("recording effect configured to fail");
            }
            Ok(())
        }
    }

    /// Source producer resolved by hand
    ///
    /// If the trigger is dropped without resolving, the producer never
    /// resolves either, like a request that hangs forever.
    #[derive(Debug)]
    pub struct ManualSource<V> {
        sender: oneshot::Sender<anyhow::Result<V>>,
    }

    impl<V: Send + 'static> ManualSource<V> {
        /// Create a trigger and the producer future it controls
        #[must_use]
        #[allow(clippy::new_ret_no_self)]
        pub fn new() -> (Self, BoxFuture<'static, anyhow::Result<V>>) {
            let (sender, receiver) = oneshot::channel();
            let producer = async move {
                match receiver.await {
                    Ok(outcome) => outcome,
                    Err(_) => std::future::pending().await,
                }
            }
            .boxed();
            (Self { sender }, producer)
        }

        /// Resolve the producer with `value`
        ///
        /// Returns `false` if the producer was already dropped.
        pub fn resolve(self, value: V) -> bool {
            self.sender.send(Ok(value)).is_ok()
        }

        /// Fail the producer with `message`
        ///
        /// Returns `false` if the producer was already dropped.
        pub fn fail(self, message: &str) -> bool {
            self.sender.send(Err(anyhow::anyhow!(message.to_string()))).is_ok()
        }
    }
}

/// Test helpers and utilities
pub mod helpers {
    /// Let spawned tasks make progress
    ///
    /// Sources run on the Tokio runtime; on a current-thread runtime they only
    /// advance while the test yields.
    pub async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    /// Install a test-writer tracing subscriber, once per process
    ///
    /// Honors `RUST_LOG`, defaulting to `debug` for the slice crates.
    pub fn init_tracing() {
        use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("composable_slice_runtime=debug,composable_cart=debug"));

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer())
            .try_init();
    }
}

/// Assertion helpers for slices
pub mod assertions {
    use composable_slice_core::SliceState;
    use composable_slice_runtime::{DiagnosticKind, Slice};

    /// Assert that the slice recorded exactly `expected` diagnostics of `kind`
    ///
    /// # Panics
    ///
    /// Panics if the count differs.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_diagnostics<S: SliceState>(slice: &Slice<S>, kind: DiagnosticKind, expected: usize) {
        let entries = slice.diagnostics().entries();
        let found = entries.iter().filter(|d| d.kind == kind).count();
        assert_eq!(
            found, expected,
            "Expected {expected} {kind} diagnostics, but found {found}: {entries:?}"
        );
    }

    /// Assert that the slice recorded no diagnostics at all
    ///
    /// # Panics
    ///
    /// Panics if any diagnostic was recorded.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_no_diagnostics<S: SliceState>(slice: &Slice<S>) {
        let entries = slice.diagnostics().entries();
        assert!(entries.is_empty(), "Expected no diagnostics, but found {entries:?}");
    }
}

// Re-export commonly used items
pub use mocks::{ManualSource, RecordingEffect, RecordingObserver};
