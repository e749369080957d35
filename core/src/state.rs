//! Snapshot state trait.

use crate::patch::{Patch, PatchError};

/// State held by a slice.
///
/// A value of this type is one immutable snapshot of the whole slice. The
/// runtime never mutates a published snapshot; every change produces a new
/// value through [`Patch::merge`].
///
/// # Invariants
///
/// Implementors enforce their data-model invariants in [`SliceState::validate`].
/// The runtime calls it on every candidate snapshot before publishing, so a
/// patch that would break an invariant is rejected and the timeline is left
/// untouched.
pub trait SliceState: Clone + std::fmt::Debug + Send + Sync + 'static {
    /// The typed partial state produced by reducers and sources
    type Patch: Patch<Self> + Send + 'static;

    /// Check a candidate snapshot against the snapshot it replaces
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::InvariantViolated`] (or any other [`PatchError`])
    /// when `self` must not become the next published snapshot.
    fn validate(&self, prior: &Self) -> Result<(), PatchError> {
        let _ = prior;
        Ok(())
    }
}
