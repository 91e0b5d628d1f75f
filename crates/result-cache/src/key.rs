//! Content-addressed cache keys.
//!
//! The key is SHA-256 over the tool name, a NUL separator and a canonical
//! rendering of the params in which object keys are sorted at every depth,
//! so `{"a":1,"b":2}` and `{"b":2,"a":1}` address the same entry.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Prefix shared by every result-cache key in the fast tier.
pub const RESULT_KEY_PREFIX: &str = "tool_result:";

/// Fast-tier key for a `(tool, params)` pair.
pub fn cache_key(tool_name: &str, params: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical_json(params).as_bytes());
    format!("{RESULT_KEY_PREFIX}{}", hex::encode(hasher.finalize()))
}

/// Compact JSON with object keys sorted recursively.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"q":"x","opts":{"limit":5,"lang":"en"}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"opts":{"lang":"en","limit":5},"q":"x"}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(cache_key("lookup", &a), cache_key("lookup", &b));
    }

    #[test]
    fn array_order_matters() {
        assert_ne!(
            cache_key("t", &json!({"ids": [1, 2]})),
            cache_key("t", &json!({"ids": [2, 1]}))
        );
    }

    #[test]
    fn tool_name_is_part_of_the_key() {
        let params = json!({"q": "x"});
        assert_ne!(cache_key("lookup", &params), cache_key("search", &params));
    }

    #[test]
    fn separator_prevents_ambiguous_concatenation() {
        // "ab" + "\"c\"" must not collide with "a" + "b\"c\"".
        assert_ne!(cache_key("ab", &json!("c")), cache_key("a", &json!("bc")));
    }

    #[test]
    fn canonical_form_is_compact_and_escaped() {
        let v = json!({"b": [true, null], "a": "q\"uote"});
        assert_eq!(canonical_json(&v), r#"{"a":"q\"uote","b":[true,null]}"#);
    }

    #[test]
    fn key_has_prefix_and_hex_digest() {
        let key = cache_key("lookup", &json!({}));
        let digest = key.strip_prefix(RESULT_KEY_PREFIX).unwrap();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
