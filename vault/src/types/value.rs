//! Index key and value types.
//!
//! Provides the `Value` tagged enum used for both index keys and the values
//! stored under them, the `Slot` that holds one value or an ordered list of
//! values per key, and the `KeyType` tag that fixes how an index renders its
//! keys.

use serde::{Deserialize, Serialize};


/// A key or value held by an index.
///
/// The serialized form is adjacently tagged so that buffers and dates
/// survive a round trip through the fragment encoding without being
/// confused with arrays or numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
#[allow(clippy::disallowed_methods)] // Clone needed for payload snapshots
pub enum Value {
    String(String),
    Number(f64),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    Boolean(bool),
    Buffer(Vec<u8>),
}

impl Value {
    /// Get the key type this value naturally belongs to.
    #[must_use]
    pub const fn key_type(&self) -> KeyType {
        match self {
            Self::String(_) => KeyType::String,
            Self::Number(_) => KeyType::Number,
            Self::Date(_) => KeyType::Date,
            Self::Boolean(_) => KeyType::Boolean,
            Self::Buffer(_) => KeyType::Buffer,
        }
    }

    /// Check that the value can be persisted without loss.
    ///
    /// Non-finite numbers have no JSON representation and would come back
    /// from a fragment as a different value.
    #[must_use]
    pub const fn is_storable(&self) -> bool {
        match self {
            Self::Number(n) => n.is_finite(),
            _ => true,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

/// The values stored under a single key.
///
/// Indexes that disallow collisions always hold `Single`; indexes that allow
/// them always hold `Many`, ordered by insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
#[allow(clippy::disallowed_methods)] // Clone needed for lookups and payload snapshots
pub enum Slot {
    Single(Value),
    Many(Vec<Value>),
}

impl Slot {
    /// Number of values held.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Many(values) => values.len(),
        }
    }

    /// Whether no values are held (only possible for an emptied list).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check whether the slot holds a value deep-equal to `value`.
    #[must_use]
    pub fn contains(&self, value: &Value) -> bool {
        match self {
            Self::Single(v) => v == value,
            Self::Many(values) => values.contains(value),
        }
    }

    /// Borrow the values as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[Value] {
        match self {
            Self::Single(v) => std::slice::from_ref(v),
            Self::Many(values) => values,
        }
    }
}

/// The key type an index is declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    String,
    Number,
    Date,
    Boolean,
    Buffer,
    /// Collection names in a registry index; rendered like strings.
    Collection,
}

impl KeyType {
    /// Check whether a value may be used as a key of this type.
    #[must_use]
    pub const fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::String | Self::Collection, Value::String(_))
                | (Self::Number, Value::Number(_))
                | (Self::Date, Value::Date(_))
                | (Self::Boolean, Value::Boolean(_))
                | (Self::Buffer, Value::Buffer(_))
        )
    }

    /// Render a key as the text used for it inside a leaf payload.
    ///
    /// Numbers use the shortest decimal form (negative zero collapses to
    /// `0`), dates their millisecond count, buffers lowercase hex.
    #[must_use]
    pub fn stored_key(value: &Value) -> String {
        match value {
            Value::String(s) => s.as_str().to_owned(),
            Value::Number(n) => render_number(*n),
            Value::Date(ms) => ms.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Buffer(bytes) => hex::encode(bytes),
        }
    }

    /// Parse a stored key back into a value of this type.
    ///
    /// Returns `None` if the text is not a valid rendering for the type.
    #[must_use]
    pub fn parse_stored(self, text: &str) -> Option<Value> {
        match self {
            Self::String | Self::Collection => Some(Value::String(text.to_owned())),
            Self::Number => text.parse::<f64>().ok().map(Value::Number),
            Self::Date => text.parse::<i64>().ok().map(Value::Date),
            Self::Boolean => text.parse::<bool>().ok().map(Value::Boolean),
            Self::Buffer => hex::decode(text).ok().map(Value::Buffer),
        }
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Date => "date",
            Self::Boolean => "boolean",
            Self::Buffer => "buffer",
            Self::Collection => "collection",
        };
        f.write_str(name)
    }
}

/// Render a number in its shortest decimal form.
pub(crate) fn render_number(n: f64) -> String {
    if n == 0.0 {
        // Covers negative zero.
        return "0".to_owned();
    }
    format!("{n}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_key_forms() {
        assert_eq!(KeyType::stored_key(&Value::from("abc")), "abc");
        assert_eq!(KeyType::stored_key(&Value::Number(5.0)), "5");
        assert_eq!(KeyType::stored_key(&Value::Number(-0.0)), "0");
        assert_eq!(KeyType::stored_key(&Value::Number(2.5)), "2.5");
        assert_eq!(KeyType::stored_key(&Value::Date(1_700_000_000_123)), "1700000000123");
        assert_eq!(KeyType::stored_key(&Value::Buffer(vec![0x00, 0xab])), "00ab");
    }

    #[test]
    fn test_parse_stored_inverts_stored_key() {
        let cases = [
            (KeyType::String, Value::from("hello")),
            (KeyType::Number, Value::Number(-12.75)),
            (KeyType::Date, Value::Date(-5)),
            (KeyType::Buffer, Value::Buffer(vec![1, 2, 255])),
        ];
        for (key_type, value) in cases {
            let text = KeyType::stored_key(&value);
            assert_eq!(key_type.parse_stored(&text), Some(value));
        }
        assert_eq!(KeyType::Buffer.parse_stored("zz"), None);
        assert_eq!(KeyType::Number.parse_stored("five"), None);
    }

    #[test]
    fn test_key_type_accepts() {
        assert!(KeyType::String.accepts(&Value::from("x")));
        assert!(KeyType::Collection.accepts(&Value::from("x")));
        assert!(!KeyType::Number.accepts(&Value::from("x")));
        assert!(KeyType::Date.accepts(&Value::Date(0)));
        assert!(!KeyType::Buffer.accepts(&Value::Boolean(true)));
    }

    #[test]
    fn test_slot_serialization_keeps_types() {
        let slot = Slot::Many(vec![
            Value::Buffer(vec![1, 2]),
            Value::Date(10),
            Value::Number(10.0),
        ]);
        let json = serde_json::to_string(&slot).expect("serialize");
        let decoded: Slot = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(decoded, slot);

        let single = Slot::Single(Value::from("doc-1"));
        let json = serde_json::to_string(&single).expect("serialize");
        assert_eq!(json, r#"{"type":"string","value":"doc-1"}"#);
    }

    #[test]
    fn test_slot_contains_and_len() {
        let slot = Slot::Many(vec![Value::from("a"), Value::from("b")]);
        assert_eq!(slot.len(), 2);
        assert!(slot.contains(&Value::from("b")));
        assert!(!slot.contains(&Value::from("c")));
        assert!(Slot::Many(Vec::new()).is_empty());
    }

    #[test]
    fn test_storable_rejects_non_finite() {
        assert!(Value::Number(1.0).is_storable());
        assert!(!Value::Number(f64::NAN).is_storable());
        assert!(!Value::Number(f64::INFINITY).is_storable());
    }
}
