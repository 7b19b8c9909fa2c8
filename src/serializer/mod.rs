//! Conversion between values and the strings kept in storage.
//!
//! Any type implementing [`Serializer`] can be plugged into a synced state.
//! [`JsonSerializer`] is the default.

mod json;

pub use json::{JsonSerializer, UNDEFINED_MARKER};

use crate::error::SerializeError;

/// Two-way conversion between a state value and its stored string.
///
/// `None` is the "no value" state. Implementations must round-trip it:
/// `parse(&stringify(&None)?)` yields `Ok(None)`.
pub trait Serializer<T>: Send + Sync {
    /// Encode a value for storage.
    fn stringify(&self, value: &Option<T>) -> Result<String, SerializeError>;

    /// Decode a stored string.
    fn parse(&self, raw: &str) -> Result<Option<T>, SerializeError>;
}
