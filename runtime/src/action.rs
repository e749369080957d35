//! Named action channels.
//!
//! Each action is registered under a name with a reducer over a concrete
//! payload type. Dispatching by name looks the reducer up, checks the payload
//! type and feeds the reducer's patch into the timeline. [`ActionChannel`]
//! resolves the name and payload type once, up front, for callers that
//! dispatch the same action repeatedly.

use crate::error::SliceError;
use crate::slice::Slice;
use composable_slice_core::{ActionReducer, SliceState};
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

type ErasedReducer<S> =
    Box<dyn Fn(&S, Box<dyn Any + Send>) -> Option<<S as SliceState>::Patch> + Send + Sync>;

struct Registered<S: SliceState> {
    payload_type: TypeId,
    payload_name: &'static str,
    reduce: ErasedReducer<S>,
}

/// Reducers keyed by action name
pub(crate) struct ActionRegistry<S: SliceState> {
    actions: HashMap<String, Registered<S>>,
}

impl<S: SliceState> ActionRegistry<S> {
    pub(crate) fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Register `reducer` under `name`
    ///
    /// # Errors
    ///
    /// Returns [`SliceError::DuplicateAction`] if `name` is already taken.
    pub(crate) fn register<P, R>(&mut self, name: &str, reducer: R) -> Result<(), SliceError>
    where
        P: Send + 'static,
        R: ActionReducer<S, P> + 'static,
    {
        if self.actions.contains_key(name) {
            return Err(SliceError::DuplicateAction(name.to_string()));
        }

        let reduce: ErasedReducer<S> = Box::new(move |state, payload| {
            payload
                .downcast::<P>()
                .ok()
                .map(|payload| reducer.reduce(state, *payload))
        });

        self.actions.insert(
            name.to_string(),
            Registered {
                payload_type: TypeId::of::<P>(),
                payload_name: type_name::<P>(),
                reduce,
            },
        );
        Ok(())
    }

    /// Check that `name` exists and takes payloads of type `P`
    pub(crate) fn check<P: 'static>(&self, name: &str) -> Result<(), SliceError> {
        let registered = self
            .actions
            .get(name)
            .ok_or_else(|| SliceError::UnknownAction(name.to_string()))?;

        if registered.payload_type != TypeId::of::<P>() {
            return Err(SliceError::PayloadMismatch {
                action: name.to_string(),
                expected: registered.payload_name,
            });
        }
        Ok(())
    }

    /// Run the reducer registered under `name`
    pub(crate) fn reduce<P: Send + 'static>(
        &self,
        name: &str,
        state: &S,
        payload: P,
    ) -> Result<S::Patch, SliceError> {
        let registered = self
            .actions
            .get(name)
            .ok_or_else(|| SliceError::UnknownAction(name.to_string()))?;

        (registered.reduce)(state, Box::new(payload)).ok_or_else(|| SliceError::PayloadMismatch {
            action: name.to_string(),
            expected: registered.payload_name,
        })
    }

    /// Registered action names, sorted
    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Typed handle for dispatching one action
///
/// Obtained from [`Slice::channel`], which verifies the action name and
/// payload type once so that [`ActionChannel::dispatch`] can only fail for
/// reasons that depend on the state.
///
/// # Example
///
/// ```ignore
/// let add = slice.channel::<CartLineItem>("add")?;
/// add.dispatch(item)?;
/// ```
pub struct ActionChannel<S: SliceState, P> {
    slice: Slice<S>,
    name: Arc<str>,
    _payload: PhantomData<fn(P)>,
}

impl<S: SliceState, P: Send + 'static> ActionChannel<S, P> {
    pub(crate) fn new(slice: Slice<S>, name: &str) -> Self {
        Self {
            slice,
            name: Arc::from(name),
            _payload: PhantomData,
        }
    }

    /// Action name this channel dispatches to
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dispatch `payload` and return the published snapshot
    ///
    /// # Errors
    ///
    /// See [`Slice::dispatch`].
    pub fn dispatch(&self, payload: P) -> Result<Arc<S>, SliceError> {
        self.slice.dispatch(&self.name, payload)
    }
}

impl<S: SliceState, P> Clone for ActionChannel<S, P> {
    fn clone(&self) -> Self {
        Self {
            slice: self.slice.clone(),
            name: Arc::clone(&self.name),
            _payload: PhantomData,
        }
    }
}

impl<S: SliceState, P> std::fmt::Debug for ActionChannel<S, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionChannel")
            .field("name", &self.name)
            .field("payload", &type_name::<P>())
            .finish()
    }
}
