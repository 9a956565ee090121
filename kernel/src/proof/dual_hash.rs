//! Dual hashing of record batches and receipt payloads.
//!
//! A [`DualHash`] pairs two digests of the same data:
//!
//! - `order_sensitive_hash` covers the records in submission order. Any
//!   reordering, insertion, deletion or value change alters it.
//! - `content_hash` covers the records as a multiset: the canonical bytes of
//!   every record are sorted before hashing. Reordering leaves it unchanged;
//!   any value change alters it.
//!
//! Comparing the two tells a verifier whether a batch was merely reordered
//! or actually altered.
//!
//! # Record canonicalization
//!
//! A record is canonicalized as a JSON object through
//! [`canonical_json_bytes`]: sorted keys, compact form, finite numbers only.
//! `-0.0` is normalized to `0.0`. NaN and infinite floats cannot be
//! canonicalized and fail the batch with [`CanonicalizationError`].
//!
//! Both hashes are length-framed (`u64le(len) || bytes` per record), so no
//! two distinct record sequences share a preimage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::canon::{canonical_json_bytes, CanonError};
use super::hash::{canonical_hash, ContentHash, FramedHasher, HashDomain};

/// A single field value in a [`Record`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// Numeric view of the field.
    ///
    /// Integers and finite floats convert directly. Text converts when it
    /// parses as a number after stripping `$`, `,` and surrounding
    /// whitespace (ledger exports commonly format amounts that way).
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) if f.is_finite() => Some(*f),
            Self::Text(s) => {
                let cleaned: String = s
                    .trim()
                    .chars()
                    .filter(|c| *c != '$' && *c != ',')
                    .collect();
                cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
            }
            _ => None,
        }
    }

    /// Text view of the field (integers are rendered in decimal).
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Int(i) => Some(i.to_string()),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for FieldValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

/// A domain record: field name to value, iterated in key order.
pub type Record = BTreeMap<String, FieldValue>;

/// A batch of records handed to the core by an ingestion collaborator.
///
/// Immutable once handed off: the pipeline shares it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordBatch {
    pub source_id: String,
    pub batch_id: String,
    pub records: Vec<Record>,
    /// Ingestion timestamp as reported by the collaborator (observational).
    pub ingested_at: String,
}

/// Order-sensitive and content hash of the same data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DualHash {
    pub order_sensitive_hash: ContentHash,
    pub content_hash: ContentHash,
}

/// A record (or payload) that cannot be canonicalized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CanonicalizationError {
    /// A float field is NaN or infinite.
    #[error("record {record_index}: field {field:?} is not a finite number")]
    NonFiniteField { record_index: usize, field: String },
    /// Canonical JSON writer rejected the value.
    #[error("canonical JSON error: {detail}")]
    Canon { detail: String },
}

impl From<CanonError> for CanonicalizationError {
    fn from(e: CanonError) -> Self {
        Self::Canon {
            detail: e.to_string(),
        }
    }
}

/// Canonical JSON bytes of a single record.
///
/// # Errors
///
/// Returns [`CanonicalizationError::NonFiniteField`] if any float field is
/// NaN or infinite. `record_index` is reported as 0; batch-level callers
/// report the real index.
pub fn canonical_record_bytes(record: &Record) -> Result<Vec<u8>, CanonicalizationError> {
    canonical_record_bytes_at(0, record)
}

fn canonical_record_bytes_at(
    record_index: usize,
    record: &Record,
) -> Result<Vec<u8>, CanonicalizationError> {
    let mut map = serde_json::Map::new();
    for (key, value) in record {
        let json = match value {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Bool(b) => serde_json::Value::Bool(*b),
            FieldValue::Int(i) => serde_json::Value::from(*i),
            FieldValue::Float(f) => {
                let normalized = if *f == 0.0 { 0.0 } else { *f };
                serde_json::Number::from_f64(normalized)
                    .map(serde_json::Value::Number)
                    .ok_or_else(|| CanonicalizationError::NonFiniteField {
                        record_index,
                        field: key.clone(),
                    })?
            }
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
        };
        map.insert(key.clone(), json);
    }
    Ok(canonical_json_bytes(&serde_json::Value::Object(map))?)
}

/// Canonical bytes of every record in batch order.
///
/// # Errors
///
/// Returns the first [`CanonicalizationError`] encountered.
pub fn canonical_records(records: &[Record]) -> Result<Vec<Vec<u8>>, CanonicalizationError> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| canonical_record_bytes_at(i, r))
        .collect()
}

/// Compute the dual hash of a record batch.
///
/// Only the records are hashed; `source_id`, `batch_id` and `ingested_at`
/// are metadata carried alongside the evidence in the ingest receipt.
///
/// # Errors
///
/// Returns [`CanonicalizationError`] if any record cannot be canonicalized.
pub fn dual_hash(batch: &RecordBatch) -> Result<DualHash, CanonicalizationError> {
    dual_hash_records(&batch.records)
}

/// Compute the dual hash of a record sequence.
///
/// # Errors
///
/// Returns [`CanonicalizationError`] if any record cannot be canonicalized.
pub fn dual_hash_records(records: &[Record]) -> Result<DualHash, CanonicalizationError> {
    let mut encoded = canonical_records(records)?;

    let mut order = FramedHasher::new(HashDomain::BatchOrder);
    for bytes in &encoded {
        order.frame(bytes);
    }

    encoded.sort_unstable();
    let mut content = FramedHasher::new(HashDomain::BatchContent);
    for bytes in &encoded {
        content.frame(bytes);
    }

    Ok(DualHash {
        order_sensitive_hash: order.finish(),
        content_hash: content.finish(),
    })
}

/// Compute the dual hash of an arbitrary JSON payload.
///
/// The order-sensitive hash covers the canonical JSON as given. The content
/// hash covers the canonical JSON after sorting every array (recursively) by
/// the canonical bytes of its elements.
///
/// # Errors
///
/// Returns [`CanonicalizationError`] if the payload contains an
/// unrepresentable number.
pub fn dual_hash_value(value: &serde_json::Value) -> Result<DualHash, CanonicalizationError> {
    let ordered = canonical_json_bytes(value)?;
    let normalized = sort_arrays(value)?;
    let unordered = canonical_json_bytes(&normalized)?;
    Ok(DualHash {
        order_sensitive_hash: canonical_hash(HashDomain::PayloadOrder, &ordered),
        content_hash: canonical_hash(HashDomain::PayloadContent, &unordered),
    })
}

fn sort_arrays(value: &serde_json::Value) -> Result<serde_json::Value, CanonError> {
    Ok(match value {
        serde_json::Value::Array(items) => {
            let mut keyed = items
                .iter()
                .map(|item| {
                    let sorted = sort_arrays(item)?;
                    let key = canonical_json_bytes(&sorted)?;
                    Ok((key, sorted))
                })
                .collect::<Result<Vec<_>, CanonError>>()?;
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
            serde_json::Value::Array(keyed.into_iter().map(|(_, v)| v).collect())
        }
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), sort_arrays(v)?);
            }
            serde_json::Value::Object(out)
        }
        other => other.clone(),
    })
}
