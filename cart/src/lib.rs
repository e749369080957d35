//! Shopping cart built on a composable reactive state slice.
//!
//! The cart holds an ordered list of line items and a `loaded` flag. Its
//! stored items arrive asynchronously from a [`CartStorage`]; meanwhile users
//! add, remove and update items synchronously. Every change is published on
//! one timeline, the `count` and `price` aggregates follow it, and once the
//! cart is loaded every change is saved back to storage.
//!
//! - [`types`]: products, line items, cart state and cart patches
//! - [`reducer`]: the `add`, `remove` and `update` actions
//! - [`storage`]: the storage collaborator and an in-memory implementation
//! - [`service`]: [`CartSlice`], which wires it all together
//!
//! # Quick Start
//!
//! ```no_run
//! use composable_cart::{CartLineItem, CartSlice, InMemoryCartStorage, Product};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cart = CartSlice::new(Arc::new(InMemoryCartStorage::new()))?;
//!
//! cart.observe(|state| println!("{} items", state.items.len()));
//! cart.add(CartLineItem::new(Product::new(7, "Teapot", 24.0), 1))?;
//!
//! println!("Total: {}", cart.price());
//! # Ok(())
//! # }
//! ```

pub mod reducer;
pub mod service;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use service::CartSlice;
pub use storage::{CartStorage, InMemoryCartStorage, StorageError};
pub use types::{CartLineItem, CartPatch, CartState, Product, ProductId};
