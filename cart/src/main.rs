//! Cart example binary
//!
//! Walks a cart through a failed load, a few user actions, a reload and
//! disposal, logging every published snapshot.

use composable_cart::{CartLineItem, CartSlice, InMemoryCartStorage, Product, ProductId};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "composable_cart=debug,composable_slice_runtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== Cart Example: Composable Slices ===\n");

    let mug = Product::new(1, "Mug", 8.5);
    let teapot = Product::new(2, "Teapot", 24.0);

    // Storage already holds a teapot, but the first load will fail
    let storage = InMemoryCartStorage::with_items(vec![CartLineItem::new(teapot.clone(), 1)]);
    storage.fail_next_loads(1);

    let cart = CartSlice::new(Arc::new(storage.clone()))?;
    cart.observe(|state| {
        println!(
            "  snapshot: {} lines, loaded={}",
            state.items.len(),
            state.loaded
        );
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    for diagnostic in cart.diagnostics() {
        println!("Load problem: {diagnostic}");
    }
    println!("Loaded: {}, count: {}", cart.is_loaded(), cart.count());

    println!("\n>>> add(Mug) twice");
    cart.add(CartLineItem::new(mug.clone(), 1))?;
    cart.add(CartLineItem::new(mug.clone(), 5))?;
    println!("count: {}, price: {}", cart.count(), cart.price());

    println!("\n>>> update(Mug, 3)");
    cart.update(CartLineItem::new(mug.clone(), 3))?;
    println!("count: {}, price: {}", cart.count(), cart.price());

    println!("\n>>> remove(Mug)");
    cart.remove(ProductId::new(1))?;
    println!("count: {}, price: {}", cart.count(), cart.price());

    println!("\n>>> reload");
    let mut updates = cart.subscribe();
    cart.reload()?;
    let loaded = updates.recv().await?;
    println!("Loaded: {}, count: {}, price: {}", loaded.loaded, cart.count(), cart.price());

    println!("\n>>> add(Mug) after load");
    cart.add(CartLineItem::new(mug, 1))?;
    println!("Saved {} times", storage.save_count());
    println!("Snapshot:\n{}", serde_json::to_string_pretty(cart.snapshot().as_ref())?);

    println!("\n>>> dispose");
    cart.dispose();
    match cart.add(CartLineItem::new(teapot, 1)) {
        Ok(_) => println!("unexpected: disposed cart accepted an action"),
        Err(error) => println!("add after dispose: {error}"),
    }

    println!("\n=== Demonstration Complete ===");
    Ok(())
}
