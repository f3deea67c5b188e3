//! Cache key derivation.
//!
//! A key is the SHA-256 of a canonical JSON encoding: object keys sorted at
//! every depth, no insignificant whitespace. Two logically equal requests
//! produce the same key regardless of how their maps were built.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Rebuild `value` with every object's keys in sorted order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k.clone(), canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// `<namespace>:<hex sha256 of the canonical encoding>`.
pub fn derive_key(namespace: &str, value: &Value) -> String {
    let canonical = canonicalize(value).to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{namespace}:{hex}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_key_shape() {
        let key = derive_key("search", &json!({"q": "rust"}));
        let (ns, hex) = key.split_once(':').unwrap();
        assert_eq!(ns, "search");
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_nested_objects_are_sorted() {
        let a = json!({"q": "x", "filters": {"b": 1, "a": {"z": true, "y": false}}});
        let b = json!({"filters": {"a": {"y": false, "z": true}, "b": 1}, "q": "x"});
        assert_eq!(derive_key("search", &a), derive_key("search", &b));
        assert_ne!(
            derive_key("search", &a),
            derive_key("search", &json!({"q": "y"}))
        );
    }

    #[test]
    fn test_array_order_is_significant() {
        assert_ne!(
            derive_key("search", &json!({"fields": ["a", "b"]})),
            derive_key("search", &json!({"fields": ["b", "a"]}))
        );
    }

    proptest! {
        #[test]
        fn prop_key_ignores_insertion_order(
            pairs in proptest::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..12)
        ) {
            let mut forward = Map::new();
            for (k, v) in &pairs {
                forward.insert(k.clone(), json!(v));
            }
            let mut backward = Map::new();
            for (k, v) in pairs.iter().rev() {
                backward.insert(k.clone(), json!(v));
            }

            let a = json!({"q": "term", "filters": Value::Object(forward)});
            let b = json!({"filters": Value::Object(backward), "q": "term"});
            prop_assert_eq!(derive_key("search", &a), derive_key("search", &b));
        }
    }
}
