//! Partial state updates.
//!
//! A patch names only the fields it changes. Merging is a shallow field
//! replacement: fields present in the patch overwrite the prior snapshot's,
//! every other field is carried over unchanged.
//!
//! Two flavours are supported:
//!
//! - A typed patch per state (`SliceState::Patch`), usually a struct of
//!   `Option` fields. Unknown fields are unrepresentable.
//! - [`JsonPatch`], a dynamically shaped object that can target any
//!   serde-serializable state. Keys that are not fields of the state are
//!   rejected with [`PatchError::UnknownField`].

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors produced while merging or validating a patch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// The patch names a field the state does not have.
    #[error("Unknown field in patch: {field}")]
    UnknownField {
        /// The offending field name
        field: String,
    },

    /// The state does not serialize to an object, so it has no named fields.
    #[error("State is not shaped as an object: {0}")]
    ShapeMismatch(String),

    /// A field value could not be converted to or from the state's type.
    #[error("Patch serialization failed: {0}")]
    Serialization(String),

    /// The merged snapshot breaks a state invariant.
    #[error("Invariant violated: {0}")]
    InvariantViolated(String),
}

impl From<serde_json::Error> for PatchError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// A partial state that can be merged onto a prior snapshot.
pub trait Patch<S> {
    /// Produce the next snapshot from `prior`
    ///
    /// # Errors
    ///
    /// Returns a [`PatchError`] when the patch cannot be applied to `prior`.
    fn merge(self, prior: &S) -> Result<S, PatchError>;
}

/// Dynamically shaped patch backed by a JSON object.
///
/// # Example
///
/// ```
/// use composable_slice_core::{JsonPatch, Patch};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Debug, Serialize, Deserialize)]
/// struct Profile {
///     name: String,
///     visits: u32,
/// }
///
/// let prior = Profile { name: "ada".into(), visits: 1 };
///
/// let next: Profile = JsonPatch::new().set("visits", 2).unwrap().merge(&prior).unwrap();
/// assert_eq!(next.visits, 2);
/// assert_eq!(next.name, "ada");
///
/// let bad = JsonPatch::new().set("email", "x").unwrap();
/// assert!(Patch::<Profile>::merge(bad, &prior).is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonPatch(Map<String, Value>);

impl JsonPatch {
    /// Create an empty patch
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Set a field, serializing `value`
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::Serialization`] if `value` cannot be serialized.
    pub fn set(mut self, field: impl Into<String>, value: impl Serialize) -> Result<Self, PatchError> {
        self.0.insert(field.into(), serde_json::to_value(value)?);
        Ok(self)
    }

    /// Build a patch from a JSON value
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::ShapeMismatch`] if `value` is not an object.
    pub fn from_value(value: Value) -> Result<Self, PatchError> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(PatchError::ShapeMismatch(format!(
                "patch must be an object, got {other}"
            ))),
        }
    }

    /// Field names this patch touches
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Whether the patch touches no field at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S> Patch<S> for JsonPatch
where
    S: Serialize + DeserializeOwned,
{
    fn merge(self, prior: &S) -> Result<S, PatchError> {
        let Value::Object(mut fields) = serde_json::to_value(prior)? else {
            return Err(PatchError::ShapeMismatch(
                "state does not serialize to an object".to_string(),
            ));
        };

        // Reject before touching anything so a partially valid patch has no effect.
        if let Some(unknown) = self.0.keys().find(|key| !fields.contains_key(*key)) {
            return Err(PatchError::UnknownField {
                field: unknown.clone(),
            });
        }

        for (field, value) in self.0 {
            fields.insert(field, value);
        }

        Ok(serde_json::from_value(Value::Object(fields))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Settings {
        theme: String,
        volume: u8,
        muted: bool,
    }

    fn settings() -> Settings {
        Settings {
            theme: "dark".to_string(),
            volume: 5,
            muted: false,
        }
    }

    #[test]
    fn json_patch_replaces_only_named_fields() {
        let patch = JsonPatch::new().set("volume", 9).unwrap().set("muted", true).unwrap();

        let next = patch.merge(&settings()).unwrap();

        assert_eq!(
            next,
            Settings {
                theme: "dark".to_string(),
                volume: 9,
                muted: true,
            }
        );
    }

    #[test]
    fn json_patch_rejects_unknown_field() {
        let patch = JsonPatch::new()
            .set("volume", 1)
            .unwrap()
            .set("brightness", 3)
            .unwrap();

        let result: Result<Settings, _> = patch.merge(&settings());

        assert_eq!(
            result,
            Err(PatchError::UnknownField {
                field: "brightness".to_string()
            })
        );
    }

    #[test]
    fn json_patch_rejects_wrongly_typed_value() {
        let patch = JsonPatch::new().set("volume", "loud").unwrap();

        let result: Result<Settings, _> = patch.merge(&settings());

        assert!(matches!(result, Err(PatchError::Serialization(_))));
    }

    #[test]
    fn json_patch_from_non_object_is_rejected() {
        assert!(matches!(
            JsonPatch::from_value(json!([1, 2, 3])),
            Err(PatchError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn empty_json_patch_is_identity() {
        let patch = JsonPatch::from_value(json!({})).unwrap();
        assert!(patch.is_empty());

        let next: Settings = patch.merge(&settings()).unwrap();
        assert_eq!(next, settings());
    }

    #[test]
    fn json_patch_targeting_scalar_state_is_shape_mismatch() {
        let patch = JsonPatch::new().set("value", 1).unwrap();

        let result: Result<u32, _> = patch.merge(&7_u32);

        assert!(matches!(result, Err(PatchError::ShapeMismatch(_))));
    }

    #[test]
    fn fields_lists_touched_keys() {
        let patch = JsonPatch::new().set("theme", "light").unwrap();
        assert_eq!(patch.fields().collect::<Vec<_>>(), vec!["theme"]);
    }
}
