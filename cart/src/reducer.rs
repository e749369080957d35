//! Cart action reducers.
//!
//! Each reducer reads the current cart and returns a patch carrying a freshly
//! built item list; published snapshots are never modified in place.

use crate::types::{CartLineItem, CartPatch, CartState, ProductId};

/// Name of the [`add`] action
pub const ADD: &str = "add";

/// Name of the [`remove`] action
pub const REMOVE: &str = "remove";

/// Name of the [`update`] action
pub const UPDATE: &str = "update";

/// Add one unit of a product
///
/// A product already in the cart gets its quantity incremented by exactly 1.
/// A new product is appended with quantity 1; the quantity carried by the
/// payload is ignored.
///
/// Quantities saturate: adding a product already at `u32::MAX` leaves its
/// line unchanged, and the dispatch still succeeds.
#[must_use]
pub fn add(state: &CartState, item: CartLineItem) -> CartPatch {
    let id = item.id();

    let items = if state.contains(id) {
        state
            .items
            .iter()
            .map(|line| {
                if line.id() == id {
                    CartLineItem {
                        quantity: line.quantity.saturating_add(1),
                        ..line.clone()
                    }
                } else {
                    line.clone()
                }
            })
            .collect()
    } else {
        let mut items = state.items.clone();
        items.push(CartLineItem { quantity: 1, ..item });
        items
    };

    CartPatch::items(items)
}

/// Drop the line for `id`; no-op if absent
#[must_use]
pub fn remove(state: &CartState, id: ProductId) -> CartPatch {
    CartPatch::items(
        state
            .items
            .iter()
            .filter(|line| line.id() != id)
            .cloned()
            .collect(),
    )
}

/// Set the quantity of the line matching `item`
///
/// No-op if the product is not in the cart. A quantity of 0 removes the line.
#[must_use]
pub fn update(state: &CartState, item: CartLineItem) -> CartPatch {
    let id = item.id();

    CartPatch::items(
        state
            .items
            .iter()
            .filter_map(|line| {
                if line.id() != id {
                    return Some(line.clone());
                }
                (item.quantity > 0).then(|| CartLineItem {
                    quantity: item.quantity,
                    ..line.clone()
                })
            })
            .collect(),
    )
}
