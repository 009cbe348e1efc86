//! Stable JSON serialization and hashing.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize a JSON value with object keys sorted at every level.
pub fn canonical_json_bytes(value: &Value) -> Result<Vec<u8>, serde_json::Error> {
    fn canonicalize(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut out = serde_json::Map::new();
                for (key, value) in entries {
                    out.insert(key.clone(), canonicalize(value));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
            _ => value.clone(),
        }
    }

    serde_json::to_vec(&canonicalize(value))
}

/// Canonical bytes of any serializable value
pub fn canonical_bytes_of<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    canonical_json_bytes(&serde_json::to_value(value)?)
}

/// Lowercase hex SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 of the canonical serialization of `value`
pub fn stable_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(&canonical_bytes_of(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_sorted_recursively() {
        let value = serde_json::json!({"b": 1, "a": {"d": [{"z": 1, "y": 2}], "c": null}});
        let bytes = canonical_json_bytes(&value).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":{"c":null,"d":[{"y":2,"z":1}]},"b":1}"#
        );
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
