//! Typed receipt payloads.
//!
//! One payload struct per receipt type. The detector payloads live in
//! [`crate::finding`]; everything else is defined here. Field names are the
//! wire names checked by the receipt schema document.

use serde::{Deserialize, Serialize};

use super::{ReceiptError, ReceiptType};
use crate::finding::{BenfordPayload, DetectorKind, EntropyPayload, NetworkPayload};
use crate::proof::dual_hash::DualHash;
use crate::proof::hash::ContentHash;

/// Whether an ingested batch entered the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Accepted,
    Rejected,
}

/// Payload of an `ingest` receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestPayload {
    pub source_id: String,
    pub batch_id: String,
    pub record_count: u64,
    pub status: IngestStatus,
    /// Present when the batch canonicalized.
    pub dual_hash: Option<DualHash>,
    /// Present when ingestion or canonicalization failed.
    pub error: Option<String>,
}

/// StopRule outcome class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictKind {
    Continue,
    Flag,
    Halt,
}

/// StopRule state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopRuleState {
    Normal,
    Flagged,
    Halted,
}

/// A StopRule verdict: outcome, triggering condition, observed value, threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopRuleVerdict {
    pub kind: VerdictKind,
    pub condition: String,
    pub observed: f64,
    pub threshold: f64,
}

/// What the StopRule looked at, recorded with the verdict.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CheckSummary {
    pub integrity_failures: Vec<String>,
    pub missing_receipts: Vec<DetectorKind>,
    pub calibration_match: Option<f64>,
    pub failed_detectors: Vec<DetectorKind>,
}

/// Payload of a `stoprule` receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopRulePayload {
    pub cycle_id: String,
    pub verdict: StopRuleVerdict,
    pub state_before: StopRuleState,
    /// State the engine enters once this receipt is committed.
    pub state_after: StopRuleState,
    /// Self-hashes of the finding receipts this verdict considered.
    pub finding_receipts: Vec<ContentHash>,
    pub checks: CheckSummary,
}

/// Payload of a `calibration` receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPayload {
    pub scenario: String,
    pub cycles: u64,
    pub evaluated: u64,
    pub skipped: u64,
    pub injection_rate: f64,
    pub detection_rate: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub calibration_match: f64,
    pub true_positives: u64,
    pub false_positives: u64,
    pub true_negatives: u64,
    pub false_negatives: u64,
    pub config_digest: ContentHash,
}

/// Merkle anchor over one cycle's receipts; also the `anchor` receipt payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleAnchor {
    pub cycle_id: String,
    pub merkle_root: ContentHash,
    pub leaf_count: u64,
    pub first_sequence: Option<u64>,
    pub last_sequence: Option<u64>,
}

/// Payload of an `output` receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPayload {
    pub format: String,
    /// Self-hashes of the committed receipts the document was rendered from.
    pub source_receipts: Vec<ContentHash>,
    pub document_hash: ContentHash,
}

/// Payload of a `reset` receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetPayload {
    pub operator_id: String,
    pub reason: String,
    /// Self-hash of the HALT verdict receipt being cleared.
    pub halted_receipt: ContentHash,
}

/// Payload of a `cancel` receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPayload {
    pub cycle_id: String,
    /// Pipeline stage at which cancellation was observed.
    pub stage: String,
    pub reason: String,
}

/// A typed receipt payload: the closed set of receipt variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiptPayload {
    Ingest(IngestPayload),
    Benford(BenfordPayload),
    Entropy(EntropyPayload),
    Network(NetworkPayload),
    StopRule(StopRulePayload),
    Calibration(CalibrationPayload),
    Anchor(MerkleAnchor),
    Output(OutputPayload),
    Reset(ResetPayload),
    Cancel(CancelPayload),
}

impl ReceiptPayload {
    #[must_use]
    pub fn receipt_type(&self) -> ReceiptType {
        match self {
            Self::Ingest(_) => ReceiptType::Ingest,
            Self::Benford(_) => ReceiptType::Benford,
            Self::Entropy(_) => ReceiptType::Entropy,
            Self::Network(_) => ReceiptType::Network,
            Self::StopRule(_) => ReceiptType::StopRule,
            Self::Calibration(_) => ReceiptType::Calibration,
            Self::Anchor(_) => ReceiptType::Anchor,
            Self::Output(_) => ReceiptType::Output,
            Self::Reset(_) => ReceiptType::Reset,
            Self::Cancel(_) => ReceiptType::Cancel,
        }
    }

    /// JSON form of the payload.
    ///
    /// Non-finite floats become `null` here and are then rejected by schema
    /// validation wherever the field is declared numeric.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError::PayloadShape`] if serialization fails.
    pub fn to_value(&self) -> Result<serde_json::Value, ReceiptError> {
        let result = match self {
            Self::Ingest(p) => serde_json::to_value(p),
            Self::Benford(p) => serde_json::to_value(p),
            Self::Entropy(p) => serde_json::to_value(p),
            Self::Network(p) => serde_json::to_value(p),
            Self::StopRule(p) => serde_json::to_value(p),
            Self::Calibration(p) => serde_json::to_value(p),
            Self::Anchor(p) => serde_json::to_value(p),
            Self::Output(p) => serde_json::to_value(p),
            Self::Reset(p) => serde_json::to_value(p),
            Self::Cancel(p) => serde_json::to_value(p),
        };
        result.map_err(|e| ReceiptError::PayloadShape {
            receipt_type: self.receipt_type(),
            detail: e.to_string(),
        })
    }

    /// Decode a JSON payload of the given type.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiptError::PayloadShape`] if the JSON does not match the
    /// typed payload for `receipt_type`.
    pub fn from_parts(
        receipt_type: ReceiptType,
        payload: &serde_json::Value,
    ) -> Result<Self, ReceiptError> {
        fn de<T: serde::de::DeserializeOwned>(
            receipt_type: ReceiptType,
            payload: &serde_json::Value,
        ) -> Result<T, ReceiptError> {
            T::deserialize(payload).map_err(|e| ReceiptError::PayloadShape {
                receipt_type,
                detail: e.to_string(),
            })
        }
        Ok(match receipt_type {
            ReceiptType::Ingest => Self::Ingest(de(receipt_type, payload)?),
            ReceiptType::Benford => Self::Benford(de(receipt_type, payload)?),
            ReceiptType::Entropy => Self::Entropy(de(receipt_type, payload)?),
            ReceiptType::Network => Self::Network(de(receipt_type, payload)?),
            ReceiptType::StopRule => Self::StopRule(de(receipt_type, payload)?),
            ReceiptType::Calibration => Self::Calibration(de(receipt_type, payload)?),
            ReceiptType::Anchor => Self::Anchor(de(receipt_type, payload)?),
            ReceiptType::Output => Self::Output(de(receipt_type, payload)?),
            ReceiptType::Reset => Self::Reset(de(receipt_type, payload)?),
            ReceiptType::Cancel => Self::Cancel(de(receipt_type, payload)?),
        })
    }

    /// The verdict carried by a `stoprule` payload.
    #[must_use]
    pub fn stoprule_verdict(&self) -> Option<&StopRuleVerdict> {
        match self {
            Self::StopRule(p) => Some(&p.verdict),
            _ => None,
        }
    }
}

impl From<crate::finding::FindingDetail> for ReceiptPayload {
    fn from(detail: crate::finding::FindingDetail) -> Self {
        use crate::finding::FindingDetail;
        match detail {
            FindingDetail::Benford(p) => Self::Benford(p),
            FindingDetail::Entropy(p) => Self::Entropy(p),
            FindingDetail::Network(p) => Self::Network(p),
        }
    }
}
