//! ID and content-hash utilities for Loopguard
//!
//! Hashes are lowercase hex SHA-256. JSON is hashed in canonical form:
//! compact, with object keys sorted.

use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(bytes.as_ref()))
}

/// Canonical JSON encoding: compact, keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    // serde_json::Map is a BTreeMap, so object keys serialize sorted
    value.to_string()
}

/// SHA-256 over the canonical JSON encoding of `value`.
pub fn hash_json(value: &Value) -> String {
    sha256_hex(canonical_json(value))
}

/// Sorted-key JSON with `", "` and `": "` separators and non-ASCII escaped
/// as `\uXXXX`. This is the text form other loop tooling hashes for waiver
/// IDs, so digests agree across implementations.
pub fn spaced_json(value: &Value) -> String {
    let mut out = String::new();
    write_spaced(value, &mut out);
    out
}

fn write_spaced(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_spaced(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                push_ascii(&Value::from(key.as_str()).to_string(), out);
                out.push_str(": ");
                write_spaced(item, out);
            }
            out.push('}');
        }
        Value::String(_) => push_ascii(&value.to_string(), out),
        other => out.push_str(&other.to_string()),
    }
}

fn push_ascii(encoded: &str, out: &mut String) {
    for c in encoded.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
}

/// Generate a run ID
///
/// Format: `run-{YYYYmmddTHHMMSS}-{hex8}`
/// Example: `run-20260301T120000-1a2b3c4d`
pub fn generate_run_id() -> String {
    let now = Utc::now();
    let seed = format!(
        "{}:{}:{}",
        now.timestamp_nanos_opt().unwrap_or_default(),
        std::process::id(),
        env!("CARGO_PKG_NAME")
    );
    format!("run-{}-{}", now.format("%Y%m%dT%H%M%S"), &sha256_hex(seed)[..8])
}
