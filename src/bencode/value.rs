//! Bencode value model
//!
//! A tagged union over the four bencode types, with typed accessors and a
//! JSON rendering used by the `decode` command.

use bytes::Bytes;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// A decoded bencode value.
///
/// Dictionaries are keyed by raw bytes in a `BTreeMap`, so iteration (and
/// therefore encoding) always follows ascending byte order of the keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Signed 64-bit integer
    Integer(i64),
    /// Opaque byte string, not necessarily UTF-8
    Bytes(Bytes),
    /// Ordered list
    List(Vec<Value>),
    /// Dictionary with byte string keys
    Dict(BTreeMap<Bytes, Value>),
}

impl Value {
    /// Build a byte string value from text
    pub fn string(s: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }

    /// Build a dictionary from `(key, value)` pairs
    pub fn dict<'a>(entries: impl IntoIterator<Item = (&'a str, Value)>) -> Self {
        Value::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (Bytes::copy_from_slice(k.as_bytes()), v))
                .collect(),
        )
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the byte string as UTF-8 text, if it is valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Bytes, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Look up a key when this value is a dictionary
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict().and_then(|d| d.get(key.as_bytes()))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(v))
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Bytes(b) => serializer.serialize_str(&String::from_utf8_lossy(b)),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Dict(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(&String::from_utf8_lossy(k), v)?;
                }
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let v = Value::dict([("n", Value::Integer(3)), ("s", Value::string("abc"))]);
        assert_eq!(v.get("n").and_then(Value::as_integer), Some(3));
        assert_eq!(v.get("s").and_then(Value::as_str), Some("abc"));
        assert!(v.get("missing").is_none());
        assert!(Value::Integer(1).get("n").is_none());
    }

    #[test]
    fn test_non_utf8_bytes_have_no_str() {
        let v = Value::from(vec![0xff, 0xfe]);
        assert!(v.as_str().is_none());
        assert_eq!(v.as_bytes().map(|b| b.len()), Some(2));
    }

    #[test]
    fn test_json_rendering() {
        let v = Value::dict([
            ("list", Value::List(vec![Value::Integer(1), Value::string("x")])),
            ("name", Value::string("hello")),
        ]);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"list":[1,"x"],"name":"hello"}"#);
    }
}
