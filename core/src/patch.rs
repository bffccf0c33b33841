//! Explicit PATCH semantics for optional fields.

use serde::{Deserialize, Deserializer};

/// One field of a partial update.
///
/// When deserialized inside a struct marked `#[serde(default)]`:
///
/// | JSON                 | Value           |
/// |----------------------|-----------------|
/// | field absent         | `Unchanged`     |
/// | `"field": null`      | `Clear`         |
/// | `"field": value`     | `Set(value)`    |
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Patch<T> {
    /// Keep the current value
    #[default]
    Unchanged,
    /// Remove the current value
    Clear,
    /// Replace the current value
    Set(T),
}

impl<T> Patch<T> {
    /// Whether this patch leaves the field alone.
    #[must_use]
    pub const fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged)
    }

    /// Apply the patch to the current value.
    #[must_use]
    pub fn apply(self, current: Option<T>) -> Option<T> {
        match self {
            Self::Unchanged => current,
            Self::Clear => None,
            Self::Set(value) => Some(value),
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Clear, Self::Set)
    }
}

impl<'de, T> Deserialize<'de> for Patch<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Self::from)
    }
}
