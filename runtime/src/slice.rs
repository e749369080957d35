//! The slice engine.
//!
//! A [`Slice`] owns the canonical snapshot of one piece of state. All changes
//! flow through [`Slice::commit`]: take a turn on the FIFO timeline, produce
//! the next snapshot from the current one, validate it, publish it, notify
//! observers and subscribers, run effects, release the turn.

use crate::SliceConfig;
use crate::action::{ActionChannel, ActionRegistry};
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticLog};
use crate::error::SliceError;
use crate::selector::Selector;
use crate::timeline::Timeline;
use composable_slice_core::{ActionReducer, Effect, Patch, SliceState};
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

type Observer<S> = Arc<dyn Fn(&S) + Send + Sync>;

type PendingSource<S> = Box<dyn FnOnce(&Slice<S>) -> Result<(), SliceError> + Send>;

/// Identifies an observer registered with [`Slice::observe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

struct NamedEffect<S> {
    name: String,
    effect: Box<dyn Effect<S>>,
}

/// Latest snapshot together with its position on the timeline
struct Published<S> {
    version: u64,
    snapshot: Arc<S>,
}

pub(crate) struct Inner<S: SliceState> {
    timeline: Timeline,
    published: RwLock<Published<S>>,
    observers: RwLock<Vec<(ObserverId, Observer<S>)>>,
    next_observer: AtomicU64,
    actions: ActionRegistry<S>,
    effects: Vec<NamedEffect<S>>,
    snapshots: broadcast::Sender<Arc<S>>,
    diagnostics: DiagnosticLog,
    disposed: AtomicBool,
    sources: Mutex<Vec<JoinHandle<()>>>,
    config: SliceConfig,
}

impl<S: SliceState> Inner<S> {
    pub(crate) fn track_source(&self, handle: JoinHandle<()>) {
        let mut sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
        sources.retain(|source| !source.is_finished());
        sources.push(handle);
    }

    fn abort_sources(&self) -> usize {
        let mut sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
        let pending = sources.iter().filter(|source| !source.is_finished()).count();
        for source in sources.drain(..) {
            source.abort();
        }
        pending
    }
}

impl<S: SliceState> Drop for Inner<S> {
    fn drop(&mut self) {
        self.abort_sources();
    }
}

/// Builder for a [`Slice`]
///
/// Actions, sources and effects are declared up front. Effects run in the
/// order they are declared here.
///
/// # Example
///
/// ```ignore
/// let slice = SliceBuilder::new(CartState::default())
///     .action("add", reducer::add)
///     .action("remove", reducer::remove)
///     .source("load_items", storage.load_items(), CartPatch::loaded)
///     .effect("persist", persist)
///     .build()?;
/// ```
pub struct SliceBuilder<S: SliceState> {
    initial: S,
    actions: ActionRegistry<S>,
    registration_error: Option<SliceError>,
    effects: Vec<NamedEffect<S>>,
    sources: Vec<PendingSource<S>>,
    config: SliceConfig,
}

impl<S: SliceState> SliceBuilder<S> {
    /// Start a slice from its initial snapshot
    #[must_use]
    pub fn new(initial: S) -> Self {
        Self {
            initial,
            actions: ActionRegistry::new(),
            registration_error: None,
            effects: Vec::new(),
            sources: Vec::new(),
            config: SliceConfig::default(),
        }
    }

    /// Use a custom configuration
    #[must_use]
    pub fn config(mut self, config: SliceConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an action reducer under `name`
    ///
    /// Registering the same name twice makes [`SliceBuilder::build`] fail
    /// with [`SliceError::DuplicateAction`].
    #[must_use]
    pub fn action<P, R>(mut self, name: &str, reducer: R) -> Self
    where
        P: Send + 'static,
        R: ActionReducer<S, P> + 'static,
    {
        if let Err(error) = self.actions.register(name, reducer) {
            self.registration_error.get_or_insert(error);
        }
        self
    }

    /// Subscribe to an asynchronous producer once the slice is built
    ///
    /// When `producer` resolves, `map` turns its value into a patch that is
    /// enqueued on the timeline like any other. See [`Slice::attach_source`].
    #[must_use]
    pub fn source<V, Fut, M>(mut self, name: impl Into<String>, producer: Fut, map: M) -> Self
    where
        V: Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
        M: FnOnce(V) -> S::Patch + Send + 'static,
    {
        let name = name.into();
        self.sources
            .push(Box::new(move |slice: &Slice<S>| slice.attach_source(name, producer, map)));
        self
    }

    /// Run `effect` after every publish
    #[must_use]
    pub fn effect<E>(mut self, name: impl Into<String>, effect: E) -> Self
    where
        E: Effect<S> + 'static,
    {
        self.effects.push(NamedEffect {
            name: name.into(),
            effect: Box::new(effect),
        });
        self
    }

    /// Build the slice and start its sources
    ///
    /// # Errors
    ///
    /// - [`SliceError::DuplicateAction`] if an action name was registered twice
    /// - [`SliceError::NoRuntime`] if sources were declared but no Tokio
    ///   runtime is running
    pub fn build(self) -> Result<Slice<S>, SliceError> {
        if let Some(error) = self.registration_error {
            return Err(error);
        }
        if !self.sources.is_empty() && tokio::runtime::Handle::try_current().is_err() {
            return Err(SliceError::NoRuntime);
        }

        let (snapshots, _) = broadcast::channel(self.config.broadcast_capacity.max(1));
        let diagnostics = DiagnosticLog::new(self.config.diagnostic_log_size);

        let slice = Slice {
            inner: Arc::new(Inner {
                timeline: Timeline::new(),
                published: RwLock::new(Published {
                    version: 0,
                    snapshot: Arc::new(self.initial),
                }),
                observers: RwLock::new(Vec::new()),
                next_observer: AtomicU64::new(0),
                actions: self.actions,
                effects: self.effects,
                snapshots,
                diagnostics,
                disposed: AtomicBool::new(false),
                sources: Mutex::new(Vec::new()),
                config: self.config,
            }),
        };

        tracing::debug!(
            actions = ?slice.inner.actions.names(),
            effects = slice.inner.effects.len(),
            sources = self.sources.len(),
            "Slice built"
        );

        for attach in self.sources {
            attach(&slice)?;
        }

        Ok(slice)
    }
}

/// Reactive state container
///
/// Cloning is cheap and every clone shares the same timeline; hand clones to
/// the call sites that need the state rather than reaching for a global.
///
/// # Concurrency
///
/// - Patches from sources, actions and [`Slice::publish`] are applied one at
///   a time, in the order they were enqueued
/// - A dispatch observes the effect of every dispatch enqueued before it
/// - Observers, subscribers and effects see every snapshot exactly once, in
///   timeline order
/// - Publishing into a slice from its own observer, effect or reducer is
///   rejected with [`SliceError::ReentrantPublish`]
pub struct Slice<S: SliceState> {
    pub(crate) inner: Arc<Inner<S>>,
}

impl<S: SliceState> Clone for Slice<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: SliceState> std::fmt::Debug for Slice<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slice")
            .field("version", &self.version())
            .field("disposed", &self.is_disposed())
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl<S: SliceState> Slice<S> {
    /// Merge `patch` onto the current snapshot and publish the result
    ///
    /// # Errors
    ///
    /// - [`SliceError::InvalidPatch`] if the patch cannot be merged or the
    ///   merged snapshot fails [`SliceState::validate`]; state is unchanged
    /// - [`SliceError::ReentrantPublish`] if called from this slice's own
    ///   observer, effect or reducer
    /// - [`SliceError::Disposed`] after [`Slice::dispose`]
    pub fn publish<P: Patch<S>>(&self, patch: P) -> Result<Arc<S>, SliceError> {
        self.publish_from("publish", patch)
    }

    pub(crate) fn publish_from<P: Patch<S>>(
        &self,
        origin: &str,
        patch: P,
    ) -> Result<Arc<S>, SliceError> {
        self.commit(origin, |prior| Ok(patch.merge(prior)?))
    }

    /// Run the reducer registered under `name` and publish its patch
    ///
    /// The reducer sees the snapshot current at the moment this dispatch
    /// reaches the head of the timeline. When this returns, observers and
    /// effects have already seen the new snapshot.
    ///
    /// # Errors
    ///
    /// - [`SliceError::UnknownAction`] if no reducer is registered under `name`
    /// - [`SliceError::PayloadMismatch`] if `P` is not the registered payload type
    /// - any error of [`Slice::publish`]
    #[tracing::instrument(skip(self, payload), name = "slice_dispatch")]
    pub fn dispatch<P: Send + 'static>(&self, name: &str, payload: P) -> Result<Arc<S>, SliceError> {
        // Fail fast, before taking a place on the timeline
        if let Err(error) = self.inner.actions.check::<P>(name) {
            metrics::counter!("slice.publish.rejected", "reason" => rejection_reason(&error))
                .increment(1);
            return Err(error);
        }

        self.commit(name, |prior| {
            let patch = self.inner.actions.reduce(name, prior, payload)?;
            Ok(patch.merge(prior)?)
        })
    }

    /// Typed handle for the action registered under `name`
    ///
    /// # Errors
    ///
    /// - [`SliceError::UnknownAction`] if no reducer is registered under `name`
    /// - [`SliceError::PayloadMismatch`] if `P` is not the registered payload type
    pub fn channel<P: Send + 'static>(&self, name: &str) -> Result<ActionChannel<S, P>, SliceError> {
        self.inner.actions.check::<P>(name)?;
        Ok(ActionChannel::new(self.clone(), name))
    }

    /// Names of the registered actions, sorted
    #[must_use]
    pub fn actions(&self) -> Vec<String> {
        self.inner.actions.names()
    }

    /// The latest published snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<S> {
        Arc::clone(&self.read_published().snapshot)
    }

    /// Read the latest snapshot through a closure
    ///
    /// ```ignore
    /// let item_count = slice.state(|s| s.items.len());
    /// ```
    pub fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        f(self.snapshot().as_ref())
    }

    /// Number of snapshots published since construction
    #[must_use]
    pub fn version(&self) -> u64 {
        self.read_published().version
    }

    pub(crate) fn published(&self) -> (u64, Arc<S>) {
        let published = self.read_published();
        (published.version, Arc::clone(&published.snapshot))
    }

    /// Derived value recomputed at most once per published snapshot
    ///
    /// ```ignore
    /// let count = slice.selector(|s: &CartState| s.items.len());
    /// assert_eq!(count.get(), 0);
    /// ```
    #[must_use]
    pub fn selector<T, F>(&self, compute: F) -> Selector<S, T>
    where
        T: Clone,
        F: Fn(&S) -> T + Send + Sync + 'static,
    {
        Selector::new(self.clone(), compute)
    }

    /// Call `observer` synchronously with every snapshot published from now on
    ///
    /// Observers run in registration order, before effects.
    pub fn observe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        let id = ObserverId(self.inner.next_observer.fetch_add(1, Ordering::Relaxed));
        self.inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(observer)));
        id
    }

    /// Stop notifying an observer; returns whether it was registered
    pub fn unobserve(&self, id: ObserverId) -> bool {
        let mut observers = self
            .inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(registered, _)| *registered != id);
        observers.len() != before
    }

    /// Receive published snapshots asynchronously
    ///
    /// Receivers that fall more than `broadcast_capacity` snapshots behind
    /// observe a lag error; use [`Slice::observe`] for guaranteed delivery.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<S>> {
        self.inner.snapshots.subscribe()
    }

    /// Failures recorded for sources and effects
    #[must_use]
    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.inner.diagnostics
    }

    /// Receive diagnostics as they are recorded
    #[must_use]
    pub fn subscribe_diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.inner.diagnostics.subscribe()
    }

    /// Configuration the slice was built with
    #[must_use]
    pub fn config(&self) -> &SliceConfig {
        &self.inner.config
    }

    /// Stop accepting patches and abandon pending sources
    ///
    /// The last snapshot stays readable. A source that resolves after this
    /// point is discarded.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let abandoned = self.inner.abort_sources();
        tracing::info!(abandoned_sources = abandoned, "Slice disposed");
    }

    /// Whether [`Slice::dispose`] has been called
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Apply one change to the timeline
    ///
    /// `produce` runs while holding the turn, against the snapshot current
    /// at that moment.
    fn commit<F>(&self, origin: &str, produce: F) -> Result<Arc<S>, SliceError>
    where
        F: FnOnce(&S) -> Result<S, SliceError>,
    {
        if self.is_disposed() {
            return Err(SliceError::Disposed);
        }

        let turn = self.inner.timeline.enter().inspect_err(|error| {
            tracing::warn!(origin, %error, "Rejected publish");
            metrics::counter!("slice.publish.rejected", "reason" => rejection_reason(error))
                .increment(1);
        })?;

        // Disposal may have happened while waiting for the turn
        if self.is_disposed() {
            return Err(SliceError::Disposed);
        }

        let start = std::time::Instant::now();
        let prior = self.snapshot();
        let prior: &S = prior.as_ref();

        let next = match produce(prior).and_then(|next| {
            next.validate(prior)?;
            Ok(next)
        }) {
            Ok(next) => Arc::new(next),
            Err(error) => {
                tracing::warn!(origin, %error, "Patch rejected, state unchanged");
                metrics::counter!("slice.publish.rejected", "reason" => rejection_reason(&error))
                    .increment(1);
                return Err(error);
            },
        };

        let version = {
            let mut published = self
                .inner
                .published
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            published.version += 1;
            published.snapshot = Arc::clone(&next);
            published.version
        };

        tracing::debug!(origin, version, "Published snapshot");
        metrics::counter!("slice.publish.total").increment(1);

        self.notify(&next);
        self.run_effects(&next);

        metrics::histogram!("slice.publish.duration_seconds").record(start.elapsed().as_secs_f64());
        drop(turn);

        Ok(next)
    }

    fn notify(&self, snapshot: &Arc<S>) {
        let observers: Vec<(ObserverId, Observer<S>)> = self
            .inner
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, observer)| (*id, Arc::clone(observer)))
            .collect();

        tracing::trace!(observers = observers.len(), "Notifying observers");
        for (id, observer) in observers {
            // A panicking observer must not cost the others their snapshot
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| observer(snapshot.as_ref()))) {
                let message = panic_message("observer", panic.as_ref());
                metrics::counter!("slice.observer.failed").increment(1);
                self.inner.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::ObserverFailed,
                    id.to_string(),
                    message,
                ));
            }
        }

        // No subscribers is fine
        let _ = self.inner.snapshots.send(Arc::clone(snapshot));
    }

    fn run_effects(&self, snapshot: &S) {
        for NamedEffect { name, effect } in &self.inner.effects {
            tracing::trace!(effect = %name, "Running effect");

            let message = match catch_unwind(AssertUnwindSafe(|| effect.run(snapshot))) {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => format!("{error:#}"),
                Err(panic) => panic_message("effect", panic.as_ref()),
            };

            metrics::counter!("slice.effect.failed").increment(1);
            self.inner.diagnostics.push(Diagnostic::new(
                DiagnosticKind::EffectFailed,
                name.as_str(),
                message,
            ));
        }
    }

    fn read_published(&self) -> std::sync::RwLockReadGuard<'_, Published<S>> {
        self.inner
            .published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

const fn rejection_reason(error: &SliceError) -> &'static str {
    match error {
        SliceError::InvalidPatch(_) => "invalid_patch",
        SliceError::UnknownAction(_) => "unknown_action",
        SliceError::PayloadMismatch { .. } => "payload_mismatch",
        SliceError::DuplicateAction(_) => "duplicate_action",
        SliceError::ReentrantPublish => "reentrant",
        SliceError::Disposed => "disposed",
        SliceError::NoRuntime => "no_runtime",
    }
}

fn panic_message(what: &str, panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("{what} panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("{what} panicked: {message}")
    } else {
        format!("{what} panicked")
    }
}
