// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Canonical text form of a payload, used for substring matching.
//!
//! Depth first, object keys in sorted order, no whitespace. Strings are
//! written verbatim between quotes, without JSON escaping, so text copied out
//! of a stored value (backslashes, quotes, newlines) still matches it. Two
//! payloads with the same content always produce the same text regardless of
//! the key order the backend returned.

use serde_json::Value;

use crate::core::types::Payload;

pub fn canonical_payload(payload: &Payload) -> String {
    let mut out = String::new();
    write_object(payload, &mut out);
    out
}

pub fn canonical_value(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(fields) => write_object(fields, out),
    }
}

fn write_object(fields: &Payload, out: &mut String) {
    let mut keys: Vec<&String> = fields.keys().collect();
    keys.sort();
    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(key, out);
        out.push(':');
        write_value(&fields[key.as_str()], out);
    }
    out.push('}');
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    out.push_str(s);
    out.push('"');
}
