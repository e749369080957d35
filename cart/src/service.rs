//! The cart application service.
//!
//! [`CartSlice`] wires the cart reducers, the storage load source, the
//! persist effect and the `count`/`price` selectors into one slice. Build it
//! once and hand clones to whoever needs the cart.

use crate::reducer;
use crate::storage::CartStorage;
use crate::types::{CartLineItem, CartPatch, CartState, ProductId};
use composable_slice_core::Effect;
use composable_slice_runtime::{
    ActionChannel, Diagnostic, ObserverId, RetryPolicy, Selector, Slice, SliceBuilder, SliceConfig,
    SliceError,
};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Name under which the storage load runs
pub const LOAD_SOURCE: &str = "load";

/// Name of the persist effect
pub const PERSIST_EFFECT: &str = "persist";

/// Saves the items after every publish once the cart is loaded
///
/// No-op dispatches are saved too.
struct PersistEffect {
    storage: Arc<dyn CartStorage>,
}

impl Effect<CartState> for PersistEffect {
    fn run(&self, snapshot: &CartState) -> anyhow::Result<()> {
        if snapshot.loaded {
            self.storage.save_items(&snapshot.items);
            metrics::counter!("cart.save.total").increment(1);
            tracing::trace!(items = snapshot.items.len(), "Cart persisted");
        }
        Ok(())
    }
}

/// Shared shopping cart
///
/// # Example
///
/// ```no_run
/// use composable_cart::{CartLineItem, CartSlice, InMemoryCartStorage, Product, ProductId};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let cart = CartSlice::new(Arc::new(InMemoryCartStorage::new()))?;
///
/// cart.add(CartLineItem::new(Product::new(1, "Mug", 8.5), 1))?;
/// cart.add(CartLineItem::new(Product::new(1, "Mug", 8.5), 1))?;
/// assert_eq!(cart.count(), 2);
///
/// cart.remove(ProductId::new(1))?;
/// assert_eq!(cart.count(), 0);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CartSlice {
    slice: Slice<CartState>,
    storage: Arc<dyn CartStorage>,
    load_retry: Option<RetryPolicy>,
    add: ActionChannel<CartState, CartLineItem>,
    remove: ActionChannel<CartState, ProductId>,
    update: ActionChannel<CartState, CartLineItem>,
    count: Selector<CartState, u64>,
    price: Selector<CartState, f64>,
}

impl CartSlice {
    /// Build the cart and start loading it from `storage`
    ///
    /// # Errors
    ///
    /// [`SliceError::NoRuntime`] when called outside a Tokio runtime.
    pub fn new(storage: Arc<dyn CartStorage>) -> Result<Self, SliceError> {
        Self::with_config(storage, SliceConfig::default(), None)
    }

    /// Like [`CartSlice::new`], with slice settings and an optional retry
    /// policy for the load
    ///
    /// # Errors
    ///
    /// [`SliceError::NoRuntime`] when called outside a Tokio runtime.
    pub fn with_config(
        storage: Arc<dyn CartStorage>,
        config: SliceConfig,
        load_retry: Option<RetryPolicy>,
    ) -> Result<Self, SliceError> {
        let slice = SliceBuilder::new(CartState::new())
            .config(config)
            .action(reducer::ADD, reducer::add)
            .action(reducer::REMOVE, reducer::remove)
            .action(reducer::UPDATE, reducer::update)
            .effect(
                PERSIST_EFFECT,
                PersistEffect {
                    storage: Arc::clone(&storage),
                },
            )
            .build()?;

        let cart = Self {
            add: slice.channel(reducer::ADD)?,
            remove: slice.channel(reducer::REMOVE)?,
            update: slice.channel(reducer::UPDATE)?,
            count: slice.selector(CartState::count),
            price: slice.selector(CartState::price),
            slice,
            storage,
            load_retry,
        };

        cart.attach_load()?;
        tracing::info!("Cart created, loading stored items");
        Ok(cart)
    }

    /// Add one unit of a product
    ///
    /// # Errors
    ///
    /// See [`Slice::dispatch`].
    pub fn add(&self, item: CartLineItem) -> Result<Arc<CartState>, SliceError> {
        self.add.dispatch(item)
    }

    /// Remove a product
    ///
    /// # Errors
    ///
    /// See [`Slice::dispatch`].
    pub fn remove(&self, id: ProductId) -> Result<Arc<CartState>, SliceError> {
        self.remove.dispatch(id)
    }

    /// Set a product's quantity; 0 removes it
    ///
    /// # Errors
    ///
    /// See [`Slice::dispatch`].
    pub fn update(&self, item: CartLineItem) -> Result<Arc<CartState>, SliceError> {
        self.update.dispatch(item)
    }

    /// Total units in the cart
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.get()
    }

    /// Total price of the cart, unrounded
    #[must_use]
    pub fn price(&self) -> f64 {
        self.price.get()
    }

    /// Latest cart snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<CartState> {
        self.slice.snapshot()
    }

    /// Whether the stored items have arrived
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.slice.state(|state| state.loaded)
    }

    /// Call `observer` with every future snapshot
    pub fn observe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&CartState) + Send + Sync + 'static,
    {
        self.slice.observe(observer)
    }

    /// Stop calling an observer
    pub fn unobserve(&self, id: ObserverId) -> bool {
        self.slice.unobserve(id)
    }

    /// Receive snapshots asynchronously
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<CartState>> {
        self.slice.subscribe()
    }

    /// Recorded load and persist failures
    #[must_use]
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.slice.diagnostics().entries()
    }

    /// Load the stored items again
    ///
    /// The recovery path after a failed load. The loaded items replace the
    /// current ones.
    ///
    /// # Errors
    ///
    /// - [`SliceError::Disposed`] after [`CartSlice::dispose`]
    /// - [`SliceError::NoRuntime`] outside a Tokio runtime
    pub fn reload(&self) -> Result<(), SliceError> {
        tracing::info!("Reloading cart");
        self.attach_load()
    }

    /// Tear the cart down; a load still in flight is dropped
    pub fn dispose(&self) {
        self.slice.dispose();
    }

    /// Whether [`CartSlice::dispose`] has been called
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.slice.is_disposed()
    }

    /// The underlying slice
    #[must_use]
    pub const fn slice(&self) -> &Slice<CartState> {
        &self.slice
    }

    fn attach_load(&self) -> Result<(), SliceError> {
        match &self.load_retry {
            Some(policy) => {
                let storage = Arc::clone(&self.storage);
                self.slice.attach_retrying_source(
                    LOAD_SOURCE,
                    policy.clone(),
                    move || {
                        let load = storage.load_items();
                        async move { load.await.map_err(anyhow::Error::from) }
                    },
                    CartPatch::loaded,
                )
            },
            None => {
                let load = self.storage.load_items();
                self.slice.attach_source(
                    LOAD_SOURCE,
                    async move { load.await.map_err(anyhow::Error::from) },
                    CartPatch::loaded,
                )
            },
        }
    }
}

impl std::fmt::Debug for CartSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartSlice")
            .field("slice", &self.slice)
            .field("load_retry", &self.load_retry)
            .finish_non_exhaustive()
    }
}
