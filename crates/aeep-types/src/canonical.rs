//! Canonical JSON serialization and SHA-256 hashing.
//!
//! Canonical JSON is the unique preimage for every signature and every hash
//! in the protocol: object keys are sorted lexicographically at every
//! nesting depth, arrays keep their order, keys whose value is `null`
//! coming from an omitted `Option` are dropped, and the result carries no
//! whitespace. Two values that are the same JSON mapping under any key
//! ordering produce byte-identical canonical output.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::CanonicalizationError;

/// Serializes `value` to its canonical JSON string form.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, CanonicalizationError> {
    let raw = serde_json::to_value(value).map_err(CanonicalizationError::Serialize)?;
    let sorted = sort_value(raw);
    serde_json::to_string(&sorted).map_err(CanonicalizationError::Serialize)
}

/// Canonicalizes an already-parsed [`Value`], e.g. an envelope with its
/// `signature` field stripped before re-hashing.
pub fn canonicalize_value(value: Value) -> Result<String, CanonicalizationError> {
    let sorted = sort_value(value);
    serde_json::to_string(&sorted).map_err(CanonicalizationError::Serialize)
}

fn sort_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, sort_value(v)))
                .collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            let mut sorted = serde_json::Map::with_capacity(entries.len());
            for (k, v) in entries {
                sorted.insert(k, v);
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_value).collect()),
        other => other,
    }
}

/// Hex-encoded SHA-256 digest of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

/// Raw SHA-256 digest of `bytes`.
pub fn sha256_bytes(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Canonicalizes `value` and returns the hex SHA-256 digest of the UTF-8
/// encoding of that canonical form.
pub fn canonical_hash<T: Serialize>(value: &T) -> Result<String, CanonicalizationError> {
    let canonical = canonical_json(value)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_at_every_depth() {
        let a = json!({"b": 1, "a": {"z": 1, "y": 2}});
        let b = json!({"a": {"y": 2, "z": 1}, "b": 1});
        assert_eq!(
            canonicalize_value(a).unwrap(),
            canonicalize_value(b).unwrap()
        );
    }

    #[test]
    fn drops_null_fields() {
        let v = json!({"a": 1, "b": null});
        assert_eq!(canonicalize_value(v).unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn preserves_array_order() {
        let v = json!({"a": [3, 1, 2]});
        assert_eq!(canonicalize_value(v).unwrap(), r#"{"a":[3,1,2]}"#);
    }

    #[test]
    fn is_idempotent() {
        let v = json!({"z": 1, "a": [{"y": 2, "x": 1}]});
        let once = canonicalize_value(v.clone()).unwrap();
        let reparsed: Value = serde_json::from_str(&once).unwrap();
        let twice = canonicalize_value(reparsed).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn emits_no_whitespace() {
        let v = json!({"a": 1, "b": [1, 2]});
        let s = canonicalize_value(v).unwrap();
        assert!(!s.contains(' ') && !s.contains('\n'));
    }
}
