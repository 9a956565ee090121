//! Canonical JSON bytes: the single serialization-for-hashing implementation.
//!
//! **Exactly one place** produces canonical JSON bytes in the workspace. Receipt
//! self-hashes, dual hashes, config digests and the JSONL store all route
//! through [`canonical_json_bytes`].
//!
//! # Canonicalization rules
//!
//! 1. Object keys are sorted lexicographically (byte order).
//! 2. No extraneous whitespace (compact form: `{"a":1,"b":2}`).
//! 3. Strings are JSON-escaped per RFC 8259 §7.
//! 4. Integers (`i64`/`u64`) are written in decimal. Finite floats are written
//!    in shortest round-trip form (`1.5`, `0.1`, `1e21`); `-0.0` is written
//!    as `0.0`. An integral float keeps its float form (`2.0`), so the JSON
//!    type of a field is part of its hash.
//! 5. `null`, `true`, `false` are written literally.
//! 6. Output is always valid UTF-8.
//!
//! `serde_json::Value` cannot hold NaN or infinities. Typed values that
//! contain them serialize to `null` before reaching this module; callers that
//! need to reject them (record canonicalization, receipt schema validation)
//! do so explicitly.

use std::io::Write;

/// Error type for canonical JSON serialization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CanonError {
    /// A JSON number has no finite `f64`, `i64` or `u64` representation.
    #[error("unrepresentable number in canonical JSON: {raw}")]
    UnrepresentableNumber { raw: String },
}

/// Produce canonical JSON bytes from a `serde_json::Value`.
///
/// # Errors
///
/// Returns [`CanonError::UnrepresentableNumber`] if a JSON number cannot be
/// represented as a finite `f64`.
pub fn canonical_json_bytes(value: &serde_json::Value) -> Result<Vec<u8>, CanonError> {
    let mut buf = Vec::new();
    write_value(&mut buf, value)?;
    Ok(buf)
}

/// Canonical JSON of an arbitrary serializable value.
///
/// # Errors
///
/// Returns [`CanonError`] if the value cannot be converted to JSON or
/// contains an unrepresentable number.
pub fn canonical_json_of<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, CanonError> {
    let v = serde_json::to_value(value).map_err(|e| CanonError::UnrepresentableNumber {
        raw: format!("{e}"),
    })?;
    canonical_json_bytes(&v)
}

fn write_value(buf: &mut Vec<u8>, value: &serde_json::Value) -> Result<(), CanonError> {
    match value {
        serde_json::Value::Null => buf.extend_from_slice(b"null"),
        serde_json::Value::Bool(true) => buf.extend_from_slice(b"true"),
        serde_json::Value::Bool(false) => buf.extend_from_slice(b"false"),
        serde_json::Value::Number(n) => write_number(buf, n)?,
        serde_json::Value::String(s) => write_string(buf, s),
        serde_json::Value::Array(arr) => {
            buf.push(b'[');
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_value(buf, item)?;
            }
            buf.push(b']');
        }
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            buf.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                write_string(buf, key);
                buf.push(b':');
                write_value(buf, &map[*key])?;
            }
            buf.push(b'}');
        }
    }
    Ok(())
}

fn write_number(buf: &mut Vec<u8>, n: &serde_json::Number) -> Result<(), CanonError> {
    if let Some(i) = n.as_i64() {
        let _ = write!(buf, "{i}");
        return Ok(());
    }
    if let Some(u) = n.as_u64() {
        let _ = write!(buf, "{u}");
        return Ok(());
    }
    match n.as_f64() {
        Some(f) if f == 0.0 => {
            buf.extend_from_slice(b"0.0");
            Ok(())
        }
        // serde_json's float Display is the shortest round-trip form.
        Some(f) if f.is_finite() => {
            let _ = write!(buf, "{n}");
            Ok(())
        }
        _ => Err(CanonError::UnrepresentableNumber { raw: n.to_string() }),
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.push(b'"');
    for ch in s.chars() {
        match ch {
            '"' => buf.extend_from_slice(b"\\\""),
            '\\' => buf.extend_from_slice(b"\\\\"),
            '\n' => buf.extend_from_slice(b"\\n"),
            '\r' => buf.extend_from_slice(b"\\r"),
            '\t' => buf.extend_from_slice(b"\\t"),
            c if c < '\u{0020}' => {
                let _ = write!(buf, "\\u{:04x}", c as u32);
            }
            c => {
                let mut utf8_buf = [0u8; 4];
                buf.extend_from_slice(c.encode_utf8(&mut utf8_buf).as_bytes());
            }
        }
    }
    buf.push(b'"');
}
