//! Canonical fingerprints for Terraform output values.
//!
//! A fingerprint is `base58(SHA-256(canonical(value)))` where `canonical`
//! is a structurally deterministic JSON serialization: object keys sorted
//! by code point, arrays in order, numbers in their minimal JSON encoding,
//! strings with the default JSON escaping. Two independently computed
//! fingerprints of semantically equal values are bitwise equal, which is
//! what lets an edge's consumer decide whether it is in sync with its
//! producer without shipping the value around.
//!
//! Failure is soft: values that cannot be canonicalized (or that exceed
//! the recursion depth cap) fingerprint to the empty string, which callers
//! treat as "no fingerprint".

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Default cap on value-tree depth during canonicalization.
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// How many leading characters [`short`] keeps for display.
const SHORT_LEN: usize = 12;

/// Compute the fingerprint of a value with the default depth cap.
pub fn compute(value: &Value) -> String {
    compute_with_depth(value, DEFAULT_MAX_DEPTH)
}

/// Compute the fingerprint of a value, returning the empty string when the
/// value tree is deeper than `max_depth`.
pub fn compute_with_depth(value: &Value, max_depth: usize) -> String {
    let mut buf = String::new();
    if canonicalize(value, &mut buf, max_depth).is_err() {
        return String::new();
    }
    let digest = Sha256::digest(buf.as_bytes());
    bs58::encode(digest).into_string()
}

/// Compare two fingerprints: equal only when both are non-empty.
pub fn matches(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && a == b
}

/// Truncate a fingerprint for display: first 12 characters plus `...`.
pub fn short(fingerprint: &str) -> String {
    if fingerprint.len() <= SHORT_LEN {
        return fingerprint.to_string();
    }
    format!("{}...", &fingerprint[..SHORT_LEN])
}

struct DepthExceeded;

fn canonicalize(value: &Value, out: &mut String, depth: usize) -> Result<(), DepthExceeded> {
    if depth == 0 {
        return Err(DepthExceeded);
    }
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        // serde_json renders integers in canonical decimal and floats via
        // shortest round-trip, which is exactly the minimal encoding.
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            // Default JSON escaping; encoding a string cannot fail.
            out.push_str(&serde_json::to_string(s).expect("string encoding is infallible"))
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonicalize(item, out, depth - 1)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            // Keys sorted lexicographically by code point.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(
                    &serde_json::to_string(key).expect("string encoding is infallible"),
                );
                out.push(':');
                canonicalize(&map[key.as_str()], out, depth - 1)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_key_order_is_irrelevant() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":[true,null]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b":[true,null],"a":1}"#).unwrap();
        let fa = compute(&a);
        let fb = compute(&b);
        assert!(!fa.is_empty());
        assert_eq!(fa, fb);
    }

    #[test]
    fn repeated_invocations_are_deterministic() {
        let v = json!({"host": "db.internal", "port": 5432, "tags": ["a", "b"]});
        assert_eq!(compute(&v), compute(&v));
    }

    #[test]
    fn distinct_values_fingerprint_differently() {
        assert_ne!(compute(&json!({"a": 1})), compute(&json!({"a": 2})));
        assert_ne!(compute(&json!(1)), compute(&json!("1")));
        assert_ne!(compute(&json!(null)), compute(&json!(false)));
    }

    #[test]
    fn nested_objects_sort_recursively() {
        let a = json!({"outer": {"x": 1, "y": 2}});
        let b: Value = serde_json::from_str(r#"{"outer":{"y":2,"x":1}}"#).unwrap();
        assert_eq!(compute(&a), compute(&b));
    }

    #[test]
    fn array_order_is_significant() {
        assert_ne!(compute(&json!([1, 2])), compute(&json!([2, 1])));
    }

    #[test]
    fn number_encoding_is_minimal() {
        // 1 and 1.0 are different JSON numbers and fingerprint differently;
        // each is stable on its own.
        let int = json!(1);
        let float: Value = serde_json::from_str("1.0").unwrap();
        assert_ne!(compute(&int), compute(&float));
        assert_eq!(compute(&float), compute(&float));
    }

    #[test]
    fn depth_cap_yields_empty_fingerprint() {
        let mut v = json!("leaf");
        for _ in 0..10 {
            v = json!([v]);
        }
        assert_eq!(compute_with_depth(&v, 5), String::new());
        assert!(!compute_with_depth(&v, 64).is_empty());
    }

    #[test]
    fn matches_requires_both_non_empty() {
        let fp = compute(&json!({"a": 1}));
        assert!(matches(&fp, &fp));
        assert!(!matches("", ""));
        assert!(!matches(&fp, ""));
        assert!(!matches("", &fp));
    }

    #[test]
    fn short_truncates_for_display() {
        let fp = compute(&json!({"a": 1}));
        let s = short(&fp);
        assert!(s.ends_with("..."));
        assert_eq!(s.len(), 15);
        assert!(fp.starts_with(&s[..12]));
        assert_eq!(short("abc"), "abc");
    }
}
