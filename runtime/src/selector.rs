//! Memoized derived values.
//!
//! A [`Selector`] is a pure function of the latest snapshot. Its value is
//! computed lazily on first read and cached until the next publish, so it is
//! never stale relative to the timeline and never recomputed needlessly.

use crate::slice::Slice;
use composable_slice_core::SliceState;
use std::sync::{Arc, Mutex, PoisonError};

/// Derived read-only value over a [`Slice`]
///
/// Created with [`Slice::selector`]. Clones share the same cache.
pub struct Selector<S: SliceState, T> {
    slice: Slice<S>,
    compute: Arc<dyn Fn(&S) -> T + Send + Sync>,
    memo: Arc<Mutex<Option<(u64, T)>>>,
}

impl<S: SliceState, T: Clone> Selector<S, T> {
    pub(crate) fn new<F>(slice: Slice<S>, compute: F) -> Self
    where
        F: Fn(&S) -> T + Send + Sync + 'static,
    {
        Self {
            slice,
            compute: Arc::new(compute),
            memo: Arc::new(Mutex::new(None)),
        }
    }

    /// Value for the latest published snapshot
    #[must_use]
    pub fn get(&self) -> T {
        let (version, snapshot) = self.slice.published();

        if let Some((cached_version, value)) = self.lock().as_ref() {
            if *cached_version == version {
                return value.clone();
            }
        }

        let value = (self.compute)(snapshot.as_ref());
        *self.lock() = Some((version, value.clone()));
        value
    }

    /// Evaluate against an arbitrary snapshot, bypassing the cache
    ///
    /// Useful inside effects, which receive the snapshot being published.
    #[must_use]
    pub fn compute(&self, snapshot: &S) -> T {
        (self.compute)(snapshot)
    }

    /// Whether the cached value matches the latest snapshot
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        let version = self.slice.version();
        matches!(self.lock().as_ref(), Some((cached, _)) if *cached == version)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<(u64, T)>> {
        self.memo.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: SliceState, T> Clone for Selector<S, T> {
    fn clone(&self) -> Self {
        Self {
            slice: self.slice.clone(),
            compute: Arc::clone(&self.compute),
            memo: Arc::clone(&self.memo),
        }
    }
}

impl<S: SliceState, T> std::fmt::Debug for Selector<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector")
            .field("value", &std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}
