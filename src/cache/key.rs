// src/cache/key.rs
// Content-addressed cache keys: canonical JSON -> SHA-256

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Request fields that participate in the cache key. Everything else
/// (session ids, headers, stream flags) is deliberately ignored.
const KEYED_FIELDS: &[&str] = &[
    "model",
    "input",
    "messages",
    "tools",
    "tool_choice",
    "temperature",
    "top_p",
    "max_tokens",
];

/// Compute the cache key for a request body.
pub fn cache_key(payload: &Value) -> String {
    let mut keyed = Map::new();
    if let Some(obj) = payload.as_object() {
        for field in KEYED_FIELDS {
            if let Some(value) = obj.get(*field) {
                keyed.insert((*field).to_string(), value.clone());
            }
        }
    }
    let canonical = canonical_json(&Value::Object(keyed));
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Serialize with recursively sorted object keys. Array order is preserved
/// (message order is semantic). Object fields whose value is null are
/// dropped, so an absent field and an explicit null produce the same key.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, _)| k)
                .collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(*key) {
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
        other => out.push_str(&other.to_string()),
    }
}
