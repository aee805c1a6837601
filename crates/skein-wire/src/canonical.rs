// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Deterministic JSON encoding for signing.
//!
//! Every signature in the mesh (manifest envelopes, invite tokens) is
//! computed over the output of [`canonical_json_bytes`], never over whatever
//! byte sequence a serializer happened to emit. Two structurally equal
//! values therefore always produce byte-equal output:
//!
//! - object keys are sorted by code-point order,
//! - arrays keep their order,
//! - no insignificant whitespace,
//! - strings use standard JSON escaping,
//! - numbers must be finite.
//!
//! The output is itself valid JSON, so `canonicalize(parse(canonicalize(v)))
//! == canonicalize(v)` holds for every representable value.
//!
//! ```rust
//! use serde_json::json;
//! use skein_wire::canonical_json;
//!
//! let a = json!({"b": 1, "a": [true, null]});
//! assert_eq!(canonical_json(&a).unwrap(), r#"{"a":[true,null],"b":1}"#);
//! ```

use serde_json::Value;

use crate::error::WireError;

/// Canonical JSON encoding of `value` as a string.
pub fn canonical_json(value: &Value) -> Result<String, WireError> {
    let mut out = String::new();
    write_value(&mut out, value)?;
    Ok(out)
}

/// Canonical JSON encoding of `value` as bytes — the signing input.
pub fn canonical_json_bytes(value: &Value) -> Result<Vec<u8>, WireError> {
    canonical_json(value).map(String::into_bytes)
}

fn write_value(out: &mut String, value: &Value) -> Result<(), WireError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => {
            if n.as_f64().is_some_and(|f| !f.is_finite()) {
                return Err(WireError::NonFiniteNumber);
            }
            out.push_str(&n.to_string());
        }
        Value::String(s) => {
            let escaped =
                serde_json::to_string(s).map_err(|e| WireError::Canonicalize(e.to_string()))?;
            out.push_str(&escaped);
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            // String comparison in Rust is byte-wise over UTF-8, which is
            // exactly code-point order.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();

            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let escaped = serde_json::to_string(key)
                    .map_err(|e| WireError::Canonicalize(e.to_string()))?;
                out.push_str(&escaped);
                out.push(':');
                // Key came from the map, so the entry exists.
                if let Some(v) = map.get(*key) {
                    write_value(out, v)?;
                }
            }
            out.push('}');
        }
    }
    Ok(())
}

// ── Unit tests ────────────────────────────────────────────────────────────────
