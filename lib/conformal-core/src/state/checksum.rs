//! Canonical JSON encoding and content checksums.
//!
//! Two snapshots may only be compared by checksum when both encode rows the
//! same way, so the encoding is pinned: camelCase field names, object keys in
//! ascending order, no whitespace.

use std::fmt::Write as _;

use sha2::{Digest, Sha256};

/// Encodes a JSON value in the canonical form used for checksums.
pub(crate) fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    use cruet::*;

    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<(String, &serde_json::Value)> = map
                .iter()
                .map(|(key, value)| (key.to_camel_case(), value))
                .collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));

            out.push('{');
            for (index, (key, value)) in entries.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                // serde_json handles the key escaping.
                out.push_str(&serde_json::Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// SHA-256 over the canonical encoding of each row, newline-separated.
pub(crate) fn checksum_rows(rows: &[serde_json::Value]) -> String {
    let mut hasher = Sha256::new();
    for row in rows {
        hasher.update(canonical_json(row).as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}
