//! Receipts: immutable, hash-chained records of every unit of work.
//!
//! # Wire form
//!
//! ```text
//! {
//!   "sequence":      0,
//!   "receipt_type":  "ingest",
//!   "payload":       { ... typed per receipt_type ... },
//!   "timestamp":     "2026-01-01T00:00:00.000Z",
//!   "previous_hash": "sha256:0000...",
//!   "self_hash":     "sha256:..."
//! }
//! ```
//!
//! # Self-hash
//!
//! `self_hash = H(ReceiptSelf, canonical_json({payload, previous_hash, receipt_type}))`.
//!
//! `timestamp` and `sequence` are observational and are not hash inputs.
//! Two processes that emit the same work produce the same chain even though
//! their clocks differ. `sequence` is still covered indirectly: the chain
//! link to the predecessor fixes every receipt's position.

pub mod payload;
pub mod schema;

use serde::{Deserialize, Serialize};

use crate::proof::canon::{canonical_json_bytes, CanonError};
use crate::proof::hash::{canonical_hash, ContentHash, HashDomain};

pub use payload::ReceiptPayload;

/// The closed set of receipt types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptType {
    Ingest,
    Benford,
    Entropy,
    Network,
    #[serde(rename = "stoprule")]
    StopRule,
    Calibration,
    Anchor,
    Output,
    Reset,
    Cancel,
}

impl ReceiptType {
    pub const ALL: [ReceiptType; 10] = [
        Self::Ingest,
        Self::Benford,
        Self::Entropy,
        Self::Network,
        Self::StopRule,
        Self::Calibration,
        Self::Anchor,
        Self::Output,
        Self::Reset,
        Self::Cancel,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Benford => "benford",
            Self::Entropy => "entropy",
            Self::Network => "network",
            Self::StopRule => "stoprule",
            Self::Calibration => "calibration",
            Self::Anchor => "anchor",
            Self::Output => "output",
            Self::Reset => "reset",
            Self::Cancel => "cancel",
        }
    }
}

impl std::fmt::Display for ReceiptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReceiptType {
    type Err = ReceiptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ReceiptError::UnknownType { name: s.to_string() })
    }
}

/// Receipt decoding and hashing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReceiptError {
    #[error("unknown receipt type: {name:?}")]
    UnknownType { name: String },
    #[error("{receipt_type} payload does not match its typed shape: {detail}")]
    PayloadShape {
        receipt_type: ReceiptType,
        detail: String,
    },
    #[error(transparent)]
    Canon(#[from] CanonError),
}

/// A committed (or candidate) receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub sequence: u64,
    pub receipt_type: ReceiptType,
    pub payload: serde_json::Value,
    pub timestamp: String,
    pub previous_hash: ContentHash,
    pub self_hash: ContentHash,
}

/// Compute a receipt self-hash from its hashed fields.
///
/// # Errors
///
/// Returns [`CanonError`] if the payload contains an unrepresentable number.
pub fn compute_self_hash(
    receipt_type: ReceiptType,
    payload: &serde_json::Value,
    previous_hash: &ContentHash,
) -> Result<ContentHash, CanonError> {
    let basis = serde_json::json!({
        "payload": payload,
        "previous_hash": previous_hash.as_str(),
        "receipt_type": receipt_type.as_str(),
    });
    let bytes = canonical_json_bytes(&basis)?;
    Ok(canonical_hash(HashDomain::ReceiptSelf, &bytes))
}

impl Receipt {
    /// Recompute `self_hash` from the stored fields.
    ///
    /// # Errors
    ///
    /// Returns [`CanonError`] if the stored payload cannot be canonicalized.
    pub fn recompute_self_hash(&self) -> Result<ContentHash, CanonError> {
        compute_self_hash(self.receipt_type, &self.payload, &self.previous_hash)
    }

    /// Whether the stored `self_hash` matches its recomputation.
    #[must_use]
    pub fn is_self_consistent(&self) -> bool {
        self.recompute_self_hash()
            .is_ok_and(|recomputed| recomputed == self.self_hash)
    }

    /// Decode the payload into its typed form.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError::PayloadShape`] if the payload does not match.
    pub fn typed_payload(&self) -> Result<ReceiptPayload, ReceiptError> {
        ReceiptPayload::from_parts(self.receipt_type, &self.payload)
    }

    /// Canonical JSON bytes of the whole receipt (one JSONL line, no newline).
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError`] if the receipt cannot be canonicalized.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>, ReceiptError> {
        let value = serde_json::to_value(self).map_err(|e| ReceiptError::PayloadShape {
            receipt_type: self.receipt_type,
            detail: e.to_string(),
        })?;
        Ok(canonical_json_bytes(&value)?)
    }
}
