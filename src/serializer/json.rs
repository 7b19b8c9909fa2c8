use super::Serializer;
use crate::error::SerializeError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Stored form of "no value".
///
/// This text is not valid JSON, so it can never collide with the encoding of
/// a real value (the string `"undefined"` encodes as `"\"undefined\""`).
pub const UNDEFINED_MARKER: &str = "undefined";

/// JSON serializer backed by `serde_json`.
///
/// # Examples
///
/// ```
/// use tincan_storage::serializer::{JsonSerializer, Serializer};
///
/// let json = JsonSerializer;
/// let raw = json.stringify(&Some(vec![1, 2])).unwrap();
/// assert_eq!(raw, "[1,2]");
///
/// let none: Option<Vec<String>> = json.parse("undefined").unwrap();
/// assert_eq!(none, None);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<T> Serializer<T> for JsonSerializer
where
    T: Serialize + DeserializeOwned,
{
    fn stringify(&self, value: &Option<T>) -> Result<String, SerializeError> {
        match value {
            Some(value) => Ok(serde_json::to_string(value)?),
            None => Ok(UNDEFINED_MARKER.to_string()),
        }
    }

    fn parse(&self, raw: &str) -> Result<Option<T>, SerializeError> {
        if raw == UNDEFINED_MARKER {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(raw)?))
    }
}
