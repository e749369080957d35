//! Asynchronous source adapters.
//!
//! A source wraps a one-shot asynchronous producer. It is spawned on the
//! Tokio runtime and, when it resolves, its value is mapped to a patch and
//! enqueued on the timeline exactly once. Sources race with actions on equal
//! terms: whichever reaches the timeline first is applied first.
//!
//! Failure modes never reach a caller:
//!
//! - the producer fails or times out: recorded as
//!   [`DiagnosticKind::SourceFailed`], the state it would have set keeps its
//!   default
//! - the slice is disposed before the producer resolves: the value is
//!   dropped and recorded as [`DiagnosticKind::SourceDiscarded`]
//! - the mapped patch is rejected: recorded as [`DiagnosticKind::PatchRejected`]
//!
//! A producer that never resolves is not a failure; the slice simply never
//! sees its patch.

use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::error::SliceError;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::slice::{Inner, Slice};
use composable_slice_core::SliceState;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

impl<S: SliceState> Slice<S> {
    /// Spawn `producer` and publish `map(value)` once it resolves
    ///
    /// Can be called at any time, for example to reload after a failed
    /// initial load.
    ///
    /// # Errors
    ///
    /// - [`SliceError::Disposed`] after [`Slice::dispose`]
    /// - [`SliceError::NoRuntime`] outside a Tokio runtime
    pub fn attach_source<V, Fut, M>(
        &self,
        name: impl Into<String>,
        producer: Fut,
        map: M,
    ) -> Result<(), SliceError>
    where
        V: Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
        M: FnOnce(V) -> S::Patch + Send + 'static,
    {
        if self.is_disposed() {
            return Err(SliceError::Disposed);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SliceError::NoRuntime)?;

        let name = name.into();
        tracing::debug!(source = %name, "Attaching source");

        let task = run_source(
            Arc::downgrade(&self.inner),
            name,
            producer,
            map,
            self.config().source_timeout,
        );
        self.inner.track_source(runtime.spawn(task));
        Ok(())
    }

    /// Like [`Slice::attach_source`], retrying the producer with backoff
    ///
    /// `factory` is called again for every attempt. Only the final outcome
    /// reaches the timeline.
    ///
    /// # Errors
    ///
    /// See [`Slice::attach_source`].
    pub fn attach_retrying_source<V, F, Fut, M>(
        &self,
        name: impl Into<String>,
        policy: RetryPolicy,
        factory: F,
        map: M,
    ) -> Result<(), SliceError>
    where
        V: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
        M: FnOnce(V) -> S::Patch + Send + 'static,
    {
        self.attach_source(name, retry_with_backoff(policy, factory), map)
    }
}

async fn run_source<S, V, Fut, M>(
    slice: Weak<Inner<S>>,
    name: String,
    producer: Fut,
    map: M,
    timeout: Option<Duration>,
) where
    S: SliceState,
    Fut: Future<Output = anyhow::Result<V>>,
    M: FnOnce(V) -> S::Patch,
{
    let outcome = match timeout {
        Some(limit) => tokio::time::timeout(limit, producer)
            .await
            .unwrap_or_else(|_| Err(anyhow::anyhow!("source did not resolve within {limit:?}"))),
        None => producer.await,
    };

    let Some(inner) = slice.upgrade() else {
        tracing::debug!(source = %name, "Slice dropped before source resolved, discarding value");
        metrics::counter!("slice.source.discarded").increment(1);
        return;
    };
    let slice = Slice { inner };

    if slice.is_disposed() {
        discard(&slice, &name);
        return;
    }

    match outcome {
        Ok(value) => match slice.publish_from(&name, map(value)) {
            Ok(_) => {
                tracing::info!(source = %name, version = slice.version(), "Source resolved");
            },
            Err(SliceError::Disposed) => discard(&slice, &name),
            Err(error) => reject(&slice, &name, &error),
        },
        Err(error) => {
            metrics::counter!("slice.source.failed").increment(1);
            slice.diagnostics().push(Diagnostic::new(
                DiagnosticKind::SourceFailed,
                name.as_str(),
                format!("{error:#}"),
            ));
        },
    }
}

fn reject<S: SliceState>(slice: &Slice<S>, name: &str, error: &SliceError) {
    metrics::counter!("slice.source.rejected").increment(1);
    slice.diagnostics().push(Diagnostic::new(
        DiagnosticKind::PatchRejected,
        name,
        error.to_string(),
    ));
}

fn discard<S: SliceState>(slice: &Slice<S>, name: &str) {
    metrics::counter!("slice.source.discarded").increment(1);
    slice.diagnostics().push(Diagnostic::new(
        DiagnosticKind::SourceDiscarded,
        name,
        "slice disposed before source resolved",
    ));
}
