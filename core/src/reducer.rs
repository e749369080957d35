//! Action reducers.
//!
//! An action reducer is the business logic behind one named action. It reads
//! the current snapshot and the dispatched payload and returns the patch to
//! merge. It must not retain the snapshot or reach anything else.

use crate::state::SliceState;

/// Pure function `(State, Payload) → Patch`
///
/// Implemented for every `Fn(&S, P) -> S::Patch` closure, so plain functions
/// can be registered directly:
///
/// ```
/// use composable_slice_core::{ActionReducer, Patch, PatchError, SliceState};
///
/// #[derive(Clone, Debug, Default)]
/// struct Total(u64);
///
/// struct Set(u64);
///
/// impl Patch<Total> for Set {
///     fn merge(self, _prior: &Total) -> Result<Total, PatchError> {
///         Ok(Total(self.0))
///     }
/// }
///
/// impl SliceState for Total {
///     type Patch = Set;
/// }
///
/// fn add(state: &Total, amount: u64) -> Set {
///     Set(state.0 + amount)
/// }
///
/// let patch = ActionReducer::reduce(&add, &Total(2), 3);
/// assert_eq!(patch.merge(&Total(2)).unwrap().0, 5);
/// ```
pub trait ActionReducer<S: SliceState, P>: Send + Sync {
    /// Compute the patch for `payload` against the current snapshot
    fn reduce(&self, state: &S, payload: P) -> S::Patch;
}

impl<S, P, F> ActionReducer<S, P> for F
where
    S: SliceState,
    F: Fn(&S, P) -> S::Patch + Send + Sync,
{
    fn reduce(&self, state: &S, payload: P) -> S::Patch {
        self(state, payload)
    }
}
