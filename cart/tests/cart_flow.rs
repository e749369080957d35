//! Integration tests for the cart service
//!
//! Exercises the cart end to end: load source, actions, selectors, persist
//! effect, disposal and the error paths of the underlying slice.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic
#![allow(clippy::float_cmp)] // Prices in these tests are exact binary fractions

use composable_cart::{
    CartLineItem, CartPatch, CartSlice, CartState, InMemoryCartStorage, Product, ProductId,
};
use composable_slice_core::{JsonPatch, PatchError};
use composable_cart::reducer;
use composable_slice_runtime::{
    DiagnosticKind, RetryPolicy, Selector, SliceBuilder, SliceConfig, SliceError,
};
use composable_slice_testing::RecordingObserver;
use composable_slice_testing::assertions::{assert_diagnostics, assert_no_diagnostics};
use composable_slice_testing::helpers::{init_tracing, settle};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

// ============================================================================
// Test Fixtures
// ============================================================================

fn item(id: u64, price: f64) -> CartLineItem {
    CartLineItem::new(Product::new(id, format!("product {id}"), price), 1)
}

fn item_with_quantity(id: u64, price: f64, quantity: u32) -> CartLineItem {
    CartLineItem::new(Product::new(id, format!("product {id}"), price), quantity)
}

/// Cart whose load is held back until the returned gate opens
fn gated_cart(
    stored: Vec<CartLineItem>,
) -> (CartSlice, InMemoryCartStorage, composable_cart::storage::LoadGate) {
    let (storage, gate) = InMemoryCartStorage::with_items(stored).gated();
    let cart = CartSlice::new(Arc::new(storage.clone())).unwrap();
    (cart, storage, gate)
}

async fn loaded_cart(stored: Vec<CartLineItem>) -> (CartSlice, InMemoryCartStorage) {
    let storage = InMemoryCartStorage::with_items(stored);
    let cart = CartSlice::new(Arc::new(storage.clone())).unwrap();
    settle().await;
    assert!(cart.is_loaded());
    (cart, storage)
}

// ============================================================================
// Actions and selectors
// ============================================================================

#[tokio::test]
async fn add_add_remove_cancels_out() {
    init_tracing();
    let (cart, _storage, _gate) = gated_cart(Vec::new());
    let product = item(1, 10.0);

    assert_eq!(*cart.snapshot(), CartState::new());
    assert_eq!(cart.count(), 0);
    assert_eq!(cart.price(), 0.0);

    let state = cart.add(product.clone()).unwrap();
    assert_eq!(state.items, vec![item_with_quantity(1, 10.0, 1)]);
    assert_eq!(cart.count(), 1);
    assert_eq!(cart.price(), 10.0);

    let state = cart.add(product).unwrap();
    assert_eq!(state.items, vec![item_with_quantity(1, 10.0, 2)]);
    assert_eq!(cart.count(), 2);
    assert_eq!(cart.price(), 20.0);

    let state = cart.remove(ProductId::new(1)).unwrap();
    assert!(state.items.is_empty());
    assert_eq!(cart.count(), 0);
    assert_eq!(cart.price(), 0.0);
    assert!(!state.loaded);
}

#[tokio::test]
async fn add_ignores_requested_quantity_for_new_items() {
    let (cart, _storage, _gate) = gated_cart(Vec::new());

    cart.add(item_with_quantity(3, 2.5, 40)).unwrap();

    assert_eq!(cart.count(), 1);
    assert_eq!(cart.snapshot().get(ProductId::new(3)).unwrap().quantity, 1);
}

#[tokio::test]
async fn update_sets_quantity_and_zero_removes() {
    let (cart, _storage, _gate) = gated_cart(Vec::new());
    cart.add(item(1, 10.0)).unwrap();
    cart.add(item(2, 0.5)).unwrap();

    cart.update(item_with_quantity(2, 0.5, 6)).unwrap();
    assert_eq!(cart.count(), 7);
    assert_eq!(cart.price(), 13.0);

    cart.update(item_with_quantity(9, 1.0, 6)).unwrap();
    assert_eq!(cart.snapshot().items.len(), 2);

    cart.update(item_with_quantity(1, 10.0, 0)).unwrap();
    assert_eq!(cart.snapshot().items, vec![item_with_quantity(2, 0.5, 6)]);
    assert_eq!(cart.price(), 3.0);
}

#[tokio::test]
async fn unknown_action_fails_fast() {
    let (cart, _storage, _gate) = gated_cart(Vec::new());

    let result = cart.slice().dispatch("clear", ());

    assert_eq!(result, Err(SliceError::UnknownAction("clear".to_string())));
    assert_eq!(cart.slice().version(), 0);
}

#[tokio::test]
async fn wrong_payload_type_is_rejected() {
    let (cart, _storage, _gate) = gated_cart(Vec::new());

    let result = cart.slice().dispatch("remove", 1_u64);

    assert!(matches!(result, Err(SliceError::PayloadMismatch { .. })));
    assert!(cart.slice().channel::<u64>("remove").is_err());
}

// ============================================================================
// Loading
// ============================================================================

#[tokio::test]
async fn loaded_flips_exactly_once() {
    let (cart, _storage, gate) = gated_cart(vec![item(5, 1.0)]);
    let observer = RecordingObserver::<CartState>::new();
    cart.observe(observer.callback());

    cart.add(item(1, 10.0)).unwrap();
    assert!(!cart.is_loaded());

    gate.open();
    settle().await;
    cart.add(item(2, 4.0)).unwrap();
    cart.reload().unwrap();
    settle().await;

    let flags: Vec<bool> = observer.snapshots().iter().map(|s| s.loaded).collect();
    assert_eq!(flags, vec![false, true, true, true]);
    assert!(cart.is_loaded());
}

#[tokio::test]
async fn load_replaces_items_with_stored_ones() {
    let (cart, _storage, gate) = gated_cart(vec![item(5, 1.0), item(6, 2.0)]);
    cart.add(item(1, 10.0)).unwrap();

    gate.open();
    settle().await;

    let ids: Vec<u64> = cart.snapshot().items.iter().map(|i| i.id().get()).collect();
    assert_eq!(ids, vec![5, 6]);
    assert_eq!(cart.count(), 2);
}

#[tokio::test]
async fn failed_load_degrades_to_empty_cart_until_reload() {
    let storage = InMemoryCartStorage::with_items(vec![item(5, 1.0)]);
    storage.fail_next_loads(1);
    let cart = CartSlice::new(Arc::new(storage.clone())).unwrap();
    settle().await;

    assert!(!cart.is_loaded());
    assert_diagnostics(cart.slice(), DiagnosticKind::SourceFailed, 1);
    let diagnostic = &cart.diagnostics()[0];
    assert_eq!(diagnostic.origin, "load");
    assert!(diagnostic.message.contains("load attempt 1 failed"));

    // Still usable while unloaded
    assert_ok!(cart.add(item(1, 10.0)));
    assert_eq!(cart.count(), 1);
    assert_eq!(storage.save_count(), 0);

    cart.reload().unwrap();
    settle().await;

    assert!(cart.is_loaded());
    assert_eq!(cart.snapshot().items, vec![item(5, 1.0)]);
    assert_eq!(storage.load_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn retrying_load_recovers_from_transient_failures() {
    let storage = InMemoryCartStorage::with_items(vec![item(5, 1.0)]);
    storage.fail_next_loads(2);
    let policy = RetryPolicy::builder()
        .max_retries(3)
        .initial_delay(Duration::from_millis(10))
        .build();

    let cart =
        CartSlice::with_config(Arc::new(storage.clone()), SliceConfig::default(), Some(policy))
            .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    settle().await;

    assert!(cart.is_loaded());
    assert_eq!(storage.load_count(), 3);
    assert_no_diagnostics(cart.slice());
}

#[tokio::test(start_paused = true)]
async fn hanging_load_times_out_when_configured() {
    let (storage, _gate) = InMemoryCartStorage::new().gated();
    let config = SliceConfig::default().with_source_timeout(Duration::from_millis(100));

    let cart = CartSlice::with_config(Arc::new(storage), config, None).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    settle().await;

    assert!(!cart.is_loaded());
    assert_diagnostics(cart.slice(), DiagnosticKind::SourceFailed, 1);
}

#[tokio::test]
async fn disposed_cart_drops_late_load() {
    let (cart, storage, gate) = gated_cart(vec![item(5, 1.0)]);

    cart.dispose();
    gate.open();
    settle().await;

    assert!(cart.is_disposed());
    assert!(!cart.is_loaded());
    assert_eq!(cart.slice().version(), 0);
    assert_eq!(storage.save_count(), 0);
    assert_err!(cart.add(item(1, 10.0)));
    assert_eq!(cart.reload(), Err(SliceError::Disposed));
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn every_publish_after_load_is_saved() {
    let (cart, storage) = loaded_cart(Vec::new()).await;
    assert_eq!(storage.save_count(), 1);

    cart.add(item(1, 10.0)).unwrap();
    cart.remove(ProductId::new(99)).unwrap();
    cart.update(item_with_quantity(1, 10.0, 4)).unwrap();

    let saves = storage.saves();
    assert_eq!(saves.len(), 4);
    assert_eq!(saves[1], saves[2]);
    assert_eq!(saves[3], vec![item_with_quantity(1, 10.0, 4)]);
    assert_eq!(storage.stored_items(), cart.snapshot().items);
}

// ============================================================================
// Timeline guarantees
// ============================================================================

#[tokio::test]
async fn subscribers_receive_each_snapshot() {
    let (cart, _storage) = loaded_cart(Vec::new()).await;
    let mut updates = cart.subscribe();

    cart.add(item(1, 10.0)).unwrap();
    cart.add(item(1, 10.0)).unwrap();

    assert_eq!(updates.recv().await.unwrap().count(), 1);
    assert_eq!(updates.recv().await.unwrap().count(), 2);
}

#[test]
fn selectors_inside_effects_see_the_published_snapshot() {
    type Totals = (Selector<CartState, u64>, Selector<CartState, f64>);

    let selectors: Arc<OnceLock<Totals>> = Arc::new(OnceLock::new());
    let seen: Arc<Mutex<Vec<(u64, f64, u64, f64)>>> = Arc::new(Mutex::new(Vec::new()));

    let (handle, sink) = (Arc::clone(&selectors), Arc::clone(&seen));
    let slice = SliceBuilder::new(CartState::new())
        .action(reducer::ADD, reducer::add)
        .action(reducer::REMOVE, reducer::remove)
        .action(reducer::UPDATE, reducer::update)
        .effect("totals", move |state: &CartState| -> anyhow::Result<()> {
            if let Some((count, price)) = handle.get() {
                sink.lock()
                    .unwrap()
                    .push((count.get(), price.get(), state.count(), state.price()));
            }
            Ok(())
        })
        .build()
        .unwrap();
    let (count, price) = (slice.selector(CartState::count), slice.selector(CartState::price));
    // Warm both caches so a stale read would be served from them
    assert_eq!(count.get(), 0);
    assert_eq!(price.get(), 0.0);
    assert!(selectors.set((count, price)).is_ok());

    slice.dispatch(reducer::ADD, item(1, 2.5)).unwrap();
    slice.dispatch(reducer::ADD, item(1, 2.5)).unwrap();
    slice.dispatch(reducer::ADD, item(2, 0.75)).unwrap();
    slice.dispatch(reducer::UPDATE, item_with_quantity(2, 0.75, 4)).unwrap();
    slice.dispatch(reducer::REMOVE, ProductId::new(1)).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 5);
    for (count, price, expected_count, expected_price) in seen.iter() {
        assert_eq!(count, expected_count);
        assert_eq!(price, expected_price);
    }
    assert_eq!(
        seen.iter().map(|(count, ..)| *count).collect::<Vec<_>>(),
        vec![1, 2, 3, 6, 4]
    );
    assert_eq!(seen.last().map(|(_, price, ..)| *price), Some(3.0));
}

#[test]
fn concurrent_dispatches_serialize() {
    const THREADS: u64 = 8;
    const ADDS: u64 = 25;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let _guard = runtime.enter();

    let (storage, _gate) = InMemoryCartStorage::new().gated();
    let cart = CartSlice::new(Arc::new(storage)).unwrap();
    let observer = RecordingObserver::<CartState>::new();
    cart.observe(observer.callback());

    std::thread::scope(|scope| {
        for thread in 0..THREADS {
            let cart = cart.clone();
            scope.spawn(move || {
                for _ in 0..ADDS {
                    cart.add(item(thread, 1.0)).unwrap();
                }
            });
        }
    });

    assert_eq!(cart.count(), THREADS * ADDS);
    assert_eq!(cart.snapshot().items.len(), usize::try_from(THREADS).unwrap());

    // Every snapshot is exactly one add after the previous one
    let counts: Vec<u64> = observer.snapshots().iter().map(CartState::count).collect();
    let expected: Vec<u64> = (1..=THREADS * ADDS).collect();
    assert_eq!(counts, expected);
}

#[tokio::test]
async fn reentrant_dispatch_is_rejected() {
    let (cart, _storage, _gate) = gated_cart(Vec::new());
    let outcomes = Arc::new(Mutex::new(Vec::new()));

    let inner = cart.clone();
    let seen = Arc::clone(&outcomes);
    let id = cart.observe(move |state| {
        if state.count() == 1 {
            seen.lock().unwrap().push(inner.add(item(2, 1.0)));
        }
    });

    cart.add(item(1, 10.0)).unwrap();
    cart.unobserve(id);

    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0], Err(SliceError::ReentrantPublish));
    assert_eq!(cart.snapshot().items, vec![item(1, 10.0)]);

    // The timeline is free again once the outer dispatch returned
    assert_ok!(cart.add(item(2, 1.0)));
}

#[tokio::test]
async fn patch_with_unknown_field_is_rejected() {
    let (cart, _storage, _gate) = gated_cart(Vec::new());
    cart.add(item(1, 10.0)).unwrap();

    let patch = JsonPatch::new().set("coupon", "SUMMER").unwrap();
    let result = cart.slice().publish(patch);

    assert_eq!(
        result,
        Err(SliceError::InvalidPatch(PatchError::UnknownField {
            field: "coupon".to_string()
        }))
    );
    assert_eq!(cart.count(), 1);
    assert_eq!(cart.slice().version(), 1);
}

#[tokio::test]
async fn dynamic_patch_with_known_fields_applies() {
    let (cart, _storage, _gate) = gated_cart(Vec::new());

    let patch = JsonPatch::new()
        .set("items", vec![item_with_quantity(4, 2.0, 3)])
        .unwrap();
    cart.slice().publish(patch).unwrap();

    assert_eq!(cart.count(), 3);
    assert!(!cart.is_loaded());
}

#[tokio::test]
async fn patch_breaking_invariants_is_rejected() {
    let (cart, _storage) = loaded_cart(Vec::new()).await;
    cart.add(item(1, 10.0)).unwrap();
    let before = cart.snapshot();

    let duplicate = cart
        .slice()
        .publish(CartPatch::items(vec![item(2, 1.0), item(2, 1.0)]));
    let unload = cart.slice().publish(CartPatch {
        items: None,
        loaded: Some(false),
    });

    assert!(matches!(duplicate, Err(SliceError::InvalidPatch(_))));
    assert!(matches!(unload, Err(SliceError::InvalidPatch(_))));
    assert_eq!(cart.snapshot(), before);
}
