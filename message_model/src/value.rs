use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A dynamically-typed value, sufficient to round-trip inventory-derived host variables and
/// action arguments across the wire without pulling in a full scripting-language value type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    String(String),
    Integer(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// A canonical, sorted-key encoding used for fingerprinting (connection caching, content
    /// keys). Deterministic for equal values regardless of map insertion order, since the
    /// underlying storage is already a `BTreeMap`.
    pub fn canonical_encode(&self) -> String {
        match self {
            Value::String(s) => format!("s:{s}"),
            Value::Integer(i) => format!("i:{i}"),
            Value::Bool(b) => format!("b:{b}"),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::canonical_encode).collect();
                format!("[{}]", parts.join(","))
            }
            Value::Map(map) => {
                let parts: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{k}={}", v.canonical_encode()))
                    .collect();
                format!("{{{}}}", parts.join(","))
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_encoding_is_order_independent() {
        let mut a = BTreeMap::new();
        a.insert("b".to_string(), Value::from("2"));
        a.insert("a".to_string(), Value::from("1"));

        let mut b = BTreeMap::new();
        b.insert("a".to_string(), Value::from("1"));
        b.insert("b".to_string(), Value::from("2"));

        assert_eq!(
            Value::Map(a).canonical_encode(),
            Value::Map(b).canonical_encode()
        );
    }
}
