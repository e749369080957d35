//! # Composable Slice Runtime
//!
//! Runtime implementation for reactive state slices.
//!
//! A [`Slice`] owns one canonical state timeline and merges three kinds of
//! input into it:
//!
//! - **Sources**: one-shot asynchronous producers (e.g. "load initial items")
//!   mapped to a patch once they resolve
//! - **Actions**: named, externally dispatchable reducers
//!   `(state, payload) → patch`
//! - **Direct publishes**: patches handed to [`Slice::publish`]
//!
//! Every patch goes through the same FIFO timeline. Each one is merged onto the
//! last published snapshot, the new snapshot is published to observers and
//! subscribers, and then every registered effect runs, in registration order.
//! Dispatch is synchronous end to end: when [`Slice::dispatch`] returns, the
//! reducer has run, the snapshot has been published and all effects have run.
//!
//! ## Example
//!
//! ```ignore
//! use composable_slice_runtime::SliceBuilder;
//!
//! let slice = SliceBuilder::new(CartState::default())
//!     .source("load_items", storage.load_items(), |items| CartPatch::loaded(items))
//!     .action("add", reducer::add)
//!     .effect("persist", move |state: &CartState| persist(state))
//!     .build()?;
//!
//! slice.dispatch("add", item)?;
//! let count = slice.state(|s| s.items.len());
//! ```

use std::time::Duration;

/// Action registry and typed action channels
pub mod action;

/// Diagnostics for failures that never reach a caller
pub mod diagnostics;

/// Retry logic with exponential backoff
pub mod retry;

/// Memoized derived values
pub mod selector;

/// The slice engine
pub mod slice;

/// Asynchronous source adapters
pub mod source;

mod timeline;

// Re-export commonly used types
pub use action::ActionChannel;
pub use diagnostics::{Diagnostic, DiagnosticKind, DiagnosticLog};
pub use error::SliceError;
pub use retry::{RetryPolicy, retry_with_backoff};
pub use selector::Selector;
pub use slice::{ObserverId, Slice, SliceBuilder};

/// Error types for the slice runtime
pub mod error {
    use composable_slice_core::PatchError;
    use thiserror::Error;

    /// Errors returned synchronously to callers of the slice
    ///
    /// Failures of sources and effects are not returned here: they happen
    /// away from any caller and are recorded as
    /// [`Diagnostic`](crate::Diagnostic)s instead.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum SliceError {
        /// The patch could not be merged, or the merged snapshot broke an invariant
        ///
        /// The timeline is unchanged.
        #[error("Invalid patch: {0}")]
        InvalidPatch(#[from] PatchError),

        /// `dispatch` was called with a name no reducer is registered under
        #[error("Unknown action: {0}")]
        UnknownAction(String),

        /// The payload type does not match the one the action was registered with
        #[error("Action '{action}' expects a payload of type {expected}")]
        PayloadMismatch {
            /// Action name
            action: String,
            /// Registered payload type name
            expected: &'static str,
        },

        /// Two reducers were registered under the same action name
        #[error("Action registered twice: {0}")]
        DuplicateAction(String),

        /// A publish was attempted while the same slice was notifying
        ///
        /// Observers, effects and reducers must not publish or dispatch into
        /// the slice that invoked them.
        #[error("Reentrant publish rejected: slice is already applying a patch on this thread")]
        ReentrantPublish,

        /// The slice has been disposed and no longer accepts patches
        #[error("Slice has been disposed")]
        Disposed,

        /// Sources need a Tokio runtime to run on
        #[error("No Tokio runtime available to drive sources")]
        NoRuntime,
    }
}

/// Configuration for a [`Slice`]
///
/// # Example
///
/// ```
/// use composable_slice_runtime::SliceConfig;
///
/// let config = SliceConfig::default()
///     .with_broadcast_capacity(64)
///     .with_diagnostic_log_size(500);
/// assert_eq!(config.broadcast_capacity, 64);
/// ```
#[derive(Debug, Clone)]
pub struct SliceConfig {
    /// Number of snapshots buffered for lagging [`Slice::subscribe`] receivers
    pub broadcast_capacity: usize,
    /// Maximum number of diagnostics kept before the oldest are evicted
    pub diagnostic_log_size: usize,
    /// How long a source may take to resolve before it is abandoned
    ///
    /// `None` waits indefinitely; a source that never resolves simply never
    /// patches the timeline.
    pub source_timeout: Option<Duration>,
}

impl SliceConfig {
    /// Set the snapshot broadcast capacity
    #[must_use]
    pub const fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Set the diagnostic log size
    #[must_use]
    pub const fn with_diagnostic_log_size(mut self, size: usize) -> Self {
        self.diagnostic_log_size = size;
        self
    }

    /// Give up on sources that have not resolved within `timeout`
    #[must_use]
    pub const fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = Some(timeout);
        self
    }
}

impl Default for SliceConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 16,
            diagnostic_log_size: 100,
            source_timeout: None,
        }
    }
}
