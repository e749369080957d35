//! Effects observing the state timeline.
//!
//! Effects run once per published snapshot, after observers have been
//! notified. They exist for side effects only (persisting, logging) and
//! cannot change state. A failing effect is reported by the runtime but
//! never rolls back the snapshot it observed.

/// Side effect run after every publish
///
/// Closures of shape `Fn(&S) -> anyhow::Result<()>` implement this trait.
///
/// # Example
///
/// ```
/// use composable_slice_core::Effect;
///
/// let log = |value: &u32| -> anyhow::Result<()> {
///     anyhow::ensure!(*value < 10, "value {value} out of range");
///     Ok(())
/// };
///
/// assert!(log.run(&3_u32).is_ok());
/// assert!(log.run(&12_u32).is_err());
/// ```
pub trait Effect<S>: Send + Sync {
    /// Run the effect for a freshly published snapshot
    ///
    /// # Errors
    ///
    /// Any error is recorded as a diagnostic by the runtime.
    fn run(&self, snapshot: &S) -> anyhow::Result<()>;
}

impl<S, F> Effect<S> for F
where
    F: Fn(&S) -> anyhow::Result<()> + Send + Sync,
{
    fn run(&self, snapshot: &S) -> anyhow::Result<()> {
        self(snapshot)
    }
}
