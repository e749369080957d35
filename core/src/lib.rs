//! # Composable Slice Core
//!
//! Core traits and types for reactive state slices.
//!
//! A slice owns one canonical state timeline. Everything that changes that
//! state does so by producing a *patch* that the runtime merges onto the last
//! published snapshot.
//!
//! ## Core Concepts
//!
//! - **State**: An immutable snapshot of the whole slice ([`state::SliceState`])
//! - **Patch**: A partial state naming only the fields it changes ([`patch::Patch`])
//! - **Action reducer**: Pure function `(State, Payload) → Patch` ([`reducer::ActionReducer`])
//! - **Effect**: Side effect observing every published snapshot ([`effect::Effect`])
//!
//! ## Example
//!
//! ```
//! use composable_slice_core::{Patch, PatchError, SliceState};
//!
//! #[derive(Clone, Debug, Default)]
//! struct Counter {
//!     value: i64,
//! }
//!
//! struct SetValue(i64);
//!
//! impl Patch<Counter> for SetValue {
//!     fn merge(self, _prior: &Counter) -> Result<Counter, PatchError> {
//!         Ok(Counter { value: self.0 })
//!     }
//! }
//!
//! impl SliceState for Counter {
//!     type Patch = SetValue;
//! }
//!
//! let next = SetValue(3).merge(&Counter::default()).unwrap();
//! assert_eq!(next.value, 3);
//! ```

pub mod effect;
pub mod patch;
pub mod reducer;
pub mod state;

// Re-export commonly used types
pub use effect::Effect;
pub use patch::{JsonPatch, Patch, PatchError};
pub use reducer::ActionReducer;
pub use state::SliceState;
