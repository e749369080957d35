//! Storage collaborator for the cart.
//!
//! The cart loads its items once and saves them after every change. How and
//! where they are stored is up to the implementation; [`InMemoryCartStorage`]
//! keeps them in memory and can be told to fail or to hold loads back, which
//! makes it suitable for tests and demos.

use crate::types::CartLineItem;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::watch;

/// Errors from a [`CartStorage`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The stored items could not be read
    #[error("Failed to load cart items: {0}")]
    LoadFailed(String),

    /// The storage backend is not reachable
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Future returned by [`CartStorage::load_items`]
pub type LoadFuture = Pin<Box<dyn Future<Output = Result<Vec<CartLineItem>, StorageError>> + Send>>;

/// Where cart items live between sessions
pub trait CartStorage: Send + Sync {
    /// Load the stored items
    ///
    /// The returned future owns everything it needs, so it can be driven on
    /// a spawned task after `self` is gone.
    fn load_items(&self) -> LoadFuture;

    /// Store `items`, replacing whatever was stored
    ///
    /// Fire-and-forget: failures are the implementation's to handle.
    fn save_items(&self, items: &[CartLineItem]);
}

#[derive(Debug, Default)]
struct Stored {
    items: Mutex<Vec<CartLineItem>>,
    saves: Mutex<Vec<Vec<CartLineItem>>>,
    loads: AtomicUsize,
    failing_loads: AtomicUsize,
}

/// In-memory [`CartStorage`]
///
/// Clones share the same storage.
///
/// # Example
///
/// ```
/// use composable_cart::storage::{CartStorage, InMemoryCartStorage};
/// use composable_cart::{CartLineItem, Product};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = InMemoryCartStorage::with_items(vec![
///     CartLineItem::new(Product::new(1, "Mug", 8.5), 2),
/// ]);
///
/// let items = storage.load_items().await?;
/// assert_eq!(items.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryCartStorage {
    stored: Arc<Stored>,
    gate: Option<watch::Receiver<bool>>,
}

impl InMemoryCartStorage {
    /// Create an empty storage
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a storage holding `items`
    #[must_use]
    pub fn with_items(items: Vec<CartLineItem>) -> Self {
        let storage = Self::default();
        *storage.lock_items() = items;
        storage
    }

    /// Hold every load back until the returned gate is opened
    ///
    /// Dropping the gate without opening it fails pending loads with
    /// [`StorageError::Unavailable`].
    #[must_use]
    pub fn gated(self) -> (Self, LoadGate) {
        let (sender, receiver) = watch::channel(false);
        (
            Self {
                gate: Some(receiver),
                ..self
            },
            LoadGate { sender },
        )
    }

    /// Make the next `count` loads fail with [`StorageError::LoadFailed`]
    pub fn fail_next_loads(&self, count: usize) {
        self.stored.failing_loads.store(count, Ordering::SeqCst);
    }

    /// Items currently stored
    #[must_use]
    pub fn stored_items(&self) -> Vec<CartLineItem> {
        self.lock_items().clone()
    }

    /// Every list passed to [`CartStorage::save_items`], oldest first
    #[must_use]
    pub fn saves(&self) -> Vec<Vec<CartLineItem>> {
        self.stored
            .saves
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of saves so far
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.stored
            .saves
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of loads started so far
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.stored.loads.load(Ordering::SeqCst)
    }

    fn lock_items(&self) -> std::sync::MutexGuard<'_, Vec<CartLineItem>> {
        self.stored.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CartStorage for InMemoryCartStorage {
    fn load_items(&self) -> LoadFuture {
        let attempt = self.stored.loads.fetch_add(1, Ordering::SeqCst) + 1;
        let fail = self
            .stored
            .failing_loads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        let stored = Arc::clone(&self.stored);
        let gate = self.gate.clone();

        Box::pin(async move {
            if let Some(mut gate) = gate {
                gate.wait_for(|open| *open)
                    .await
                    .map_err(|_| StorageError::Unavailable("load gate dropped".to_string()))?;
            }

            if fail {
                tracing::debug!(attempt, "In-memory load failing on request");
                return Err(StorageError::LoadFailed(format!("load attempt {attempt} failed")));
            }

            let items = stored
                .items
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            tracing::debug!(attempt, items = items.len(), "In-memory load");
            Ok(items)
        })
    }

    fn save_items(&self, items: &[CartLineItem]) {
        tracing::trace!(items = items.len(), "In-memory save");
        *self.lock_items() = items.to_vec();
        self.stored
            .saves
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(items.to_vec());
    }
}

/// Releases loads held back by [`InMemoryCartStorage::gated`]
#[derive(Debug)]
pub struct LoadGate {
    sender: watch::Sender<bool>,
}

impl LoadGate {
    /// Let pending and future loads complete
    pub fn open(&self) {
        self.sender.send_replace(true);
    }
}
