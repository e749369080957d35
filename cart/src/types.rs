//! Core domain types for the cart.
//!
//! A cart is an ordered list of line items, at most one per product, plus a
//! flag recording whether the stored cart has been loaded yet.

use composable_slice_core::{Patch, PatchError, SliceState};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Unique identifier for a product
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(u64);

impl ProductId {
    /// Creates a new `ProductId`
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the inner value
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A catalog product as seen by the cart
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Product identifier
    pub id: ProductId,
    /// Product name for display
    pub title: String,
    /// Unit price, unrounded
    pub price: f64,
}

impl Product {
    /// Creates a new product
    #[must_use]
    pub fn new(id: u64, title: impl Into<String>, price: f64) -> Self {
        Self {
            id: ProductId::new(id),
            title: title.into(),
            price,
        }
    }
}

/// A single line item in the cart
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartLineItem {
    /// The product
    pub product: Product,
    /// Units of the product, at least 1 in a published cart
    pub quantity: u32,
}

impl CartLineItem {
    /// Creates a new line item
    #[must_use]
    pub const fn new(product: Product, quantity: u32) -> Self {
        Self { product, quantity }
    }

    /// Identity key of the line
    #[must_use]
    pub const fn id(&self) -> ProductId {
        self.product.id
    }

    /// `price * quantity`
    #[must_use]
    pub fn subtotal(&self) -> f64 {
        self.product.price * f64::from(self.quantity)
    }
}

/// Cart state
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CartState {
    /// Line items in insertion order
    pub items: Vec<CartLineItem>,
    /// Whether the stored cart has been loaded
    pub loaded: bool,
}

impl CartState {
    /// Creates an empty, not yet loaded cart
    #[must_use]
    pub const fn new() -> Self {
        Self {
            items: Vec::new(),
            loaded: false,
        }
    }

    /// Sum of quantities over all items
    #[must_use]
    pub fn count(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity)).sum()
    }

    /// Sum of `price * quantity` over all items
    #[must_use]
    pub fn price(&self) -> f64 {
        self.items.iter().map(CartLineItem::subtotal).sum()
    }

    /// Line item for `id`, if present
    #[must_use]
    pub fn get(&self, id: ProductId) -> Option<&CartLineItem> {
        self.items.iter().find(|item| item.id() == id)
    }

    /// Whether the cart holds `id`
    #[must_use]
    pub fn contains(&self, id: ProductId) -> bool {
        self.get(id).is_some()
    }
}

/// Partial cart state; `None` fields keep their prior value
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CartPatch {
    /// Replacement item list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<CartLineItem>>,
    /// Replacement loaded flag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded: Option<bool>,
}

impl CartPatch {
    /// Patch replacing only the item list
    #[must_use]
    pub const fn items(items: Vec<CartLineItem>) -> Self {
        Self {
            items: Some(items),
            loaded: None,
        }
    }

    /// Patch applied when the stored cart arrives
    #[must_use]
    pub const fn loaded(items: Vec<CartLineItem>) -> Self {
        Self {
            items: Some(items),
            loaded: Some(true),
        }
    }

    /// Whether the patch names no field
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.items.is_none() && self.loaded.is_none()
    }
}

impl Patch<CartState> for CartPatch {
    fn merge(self, prior: &CartState) -> Result<CartState, PatchError> {
        Ok(CartState {
            items: self.items.unwrap_or_else(|| prior.items.clone()),
            loaded: self.loaded.unwrap_or(prior.loaded),
        })
    }
}

impl SliceState for CartState {
    type Patch = CartPatch;

    fn validate(&self, prior: &Self) -> Result<(), PatchError> {
        if prior.loaded && !self.loaded {
            return Err(PatchError::InvariantViolated(
                "loaded cannot revert to false".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(self.items.len());
        for item in &self.items {
            if item.quantity == 0 {
                return Err(PatchError::InvariantViolated(format!(
                    "product {} has quantity 0",
                    item.id()
                )));
            }
            if !seen.insert(item.id()) {
                return Err(PatchError::InvariantViolated(format!(
                    "product {} appears more than once",
                    item.id()
                )));
            }
        }

        Ok(())
    }
}
