//! Canonical JSON serialisation.
//!
//! Used to compute JWK thumbprints (`keys::Ed25519Jwk::thumbprint`) and to
//! produce a stable byte representation of any JSON value that needs to be
//! hashed or signed deterministically. Canonical JSON here is a subset of
//! RFC 7159 following the Matrix canonical JSON spec: keys sorted
//! lexicographically, no extra whitespace.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::SecurityError;

/// Produce canonical JSON (sorted keys, no extra whitespace).
pub fn canonical_json(value: &Value) -> Result<String, SecurityError> {
    Ok(sort_keys(value).to_string())
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: serde_json::Map<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), sort_keys(v)))
                .collect::<BTreeMap<_, _>>()
                .into_iter()
                .collect();
            Value::Object(sorted)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_lexicographically() {
        let value = json!({"b": 1, "a": 2, "c": {"z": 1, "y": 2}});
        let canonical = canonical_json(&value).unwrap();
        assert_eq!(canonical, r#"{"a":2,"b":1,"c":{"y":2,"z":1}}"#);
    }

    #[test]
    fn is_stable_across_input_key_order() {
        let a = json!({"x": 1, "y": 2});
        let b = json!({"y": 2, "x": 1});
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
    }
}
