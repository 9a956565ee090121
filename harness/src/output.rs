//! Downstream output documents.
//!
//! An output document is rendered only from receipts the ledger verifies as
//! committed chain members. The rendered bytes are canonical JSON; their
//! digest and the self-hashes they were built from go into an `output`
//! receipt, so every published document is itself on the chain.
//!
//! A single finding can also be exported on its own as a [`FindingProof`]:
//! the finding receipt, the anchor receipt whose Merkle tree covers it, and
//! the inclusion path between the two. The bundle verifies without the
//! ledger.

use serde::{Deserialize, Serialize};

use evidentia_kernel::finding::Verdict;
use evidentia_kernel::ledger::{Ledger, LedgerError};
use evidentia_kernel::proof::canon::canonical_json_of;
use evidentia_kernel::proof::hash::{canonical_hash, ContentHash, HashDomain};
use evidentia_kernel::proof::merkle::{inclusion_proof, verify_inclusion, InclusionProof};
use evidentia_kernel::receipt::payload::{MerkleAnchor, OutputPayload, VerdictKind};
use evidentia_kernel::receipt::{Receipt, ReceiptPayload, ReceiptType};

pub const SUMMARY_FORMAT: &str = "evidentia.summary.v1";
pub const FINDING_PROOF_FORMAT: &str = "evidentia.finding-proof.v1";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OutputError {
    #[error("no source receipts")]
    Empty,
    #[error("receipt {sequence} is not a verified committed receipt")]
    Unverified { sequence: u64 },
    #[error("receipt {sequence} payload: {detail}")]
    Payload { sequence: u64, detail: String },
    #[error("receipt {sequence} is not a detector finding")]
    NotAFinding { sequence: u64 },
    #[error("receipt {sequence} is not covered by a committed anchor")]
    Unanchored { sequence: u64 },
    #[error("document canonicalization failed: {detail}")]
    Canon { detail: String },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FindingLine {
    pub sequence: u64,
    pub detector: ReceiptType,
    pub batch_id: String,
    pub pass_fail: Verdict,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerdictLine {
    pub sequence: u64,
    pub cycle_id: String,
    pub verdict: VerdictKind,
    pub condition: String,
}

/// Findings and StopRule verdicts drawn from a run of receipts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryDocument {
    pub format: String,
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub findings: Vec<FindingLine>,
    pub verdicts: Vec<VerdictLine>,
    pub flags: u64,
    pub halts: u64,
}

impl SummaryDocument {
    /// Build a summary. Receipt types without a summary line are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::Empty`] for no receipts and
    /// [`OutputError::Payload`] if a payload does not match its type.
    pub fn from_receipts(receipts: &[Receipt]) -> Result<Self, OutputError> {
        let (Some(first), Some(last)) = (receipts.first(), receipts.last()) else {
            return Err(OutputError::Empty);
        };
        let mut findings = Vec::new();
        let mut verdicts = Vec::new();
        for r in receipts {
            let payload = r.typed_payload().map_err(|e| OutputError::Payload {
                sequence: r.sequence,
                detail: e.to_string(),
            })?;
            let (batch_id, pass_fail) = match payload {
                ReceiptPayload::Benford(p) => (p.batch_id, p.pass_fail),
                ReceiptPayload::Entropy(p) => (p.batch_id, p.pass_fail),
                ReceiptPayload::Network(p) => (p.batch_id, p.pass_fail),
                ReceiptPayload::StopRule(p) => {
                    verdicts.push(VerdictLine {
                        sequence: r.sequence,
                        cycle_id: p.cycle_id,
                        verdict: p.verdict.kind,
                        condition: p.verdict.condition,
                    });
                    continue;
                }
                _ => continue,
            };
            findings.push(FindingLine {
                sequence: r.sequence,
                detector: r.receipt_type,
                batch_id,
                pass_fail,
            });
        }
        let tally = |kind: VerdictKind| {
            let n = verdicts.iter().filter(|v| v.verdict == kind).count();
            u64::try_from(n).unwrap_or(u64::MAX)
        };
        let (flags, halts) = (tally(VerdictKind::Flag), tally(VerdictKind::Halt));
        Ok(Self {
            format: SUMMARY_FORMAT.to_string(),
            first_sequence: first.sequence,
            last_sequence: last.sequence,
            findings,
            verdicts,
            flags,
            halts,
        })
    }
}

/// A rendered document and the receipt that records it.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedOutput {
    pub document: Vec<u8>,
    pub document_hash: ContentHash,
    pub receipt: Receipt,
}

/// Render a summary of `sources` and append its `output` receipt.
///
/// Every source must verify against `ledger`; a single receipt that does
/// not refuses the whole document.
///
/// # Errors
///
/// Returns [`OutputError::Unverified`] for the first source the ledger does
/// not verify, and document or ledger errors as they occur.
pub fn emit_output(ledger: &mut Ledger, sources: &[Receipt]) -> Result<EmittedOutput, OutputError> {
    if let Some(bad) = sources.iter().find(|r| !ledger.verify(r)) {
        return Err(OutputError::Unverified {
            sequence: bad.sequence,
        });
    }
    let summary = SummaryDocument::from_receipts(sources)?;
    let document = canonical_json_of(&summary).map_err(|e| OutputError::Canon {
        detail: e.to_string(),
    })?;
    let document_hash = canonical_hash(HashDomain::OutputDocument, &document);
    let receipt = ledger.append(&ReceiptPayload::Output(OutputPayload {
        format: SUMMARY_FORMAT.to_string(),
        source_receipts: sources.iter().map(|r| r.self_hash.clone()).collect(),
        document_hash: document_hash.clone(),
    }))?;
    tracing::info!(
        sequence = receipt.sequence,
        sources = sources.len(),
        %document_hash,
        "output emitted"
    );
    Ok(EmittedOutput {
        document,
        document_hash,
        receipt,
    })
}

// --- Finding proofs ---

fn is_finding(receipt_type: ReceiptType) -> bool {
    matches!(
        receipt_type,
        ReceiptType::Benford | ReceiptType::Entropy | ReceiptType::Network
    )
}

fn anchor_payload(receipt: &Receipt) -> Option<MerkleAnchor> {
    match receipt.typed_payload() {
        Ok(ReceiptPayload::Anchor(anchor)) => Some(anchor),
        _ => None,
    }
}

fn covers(anchor: &MerkleAnchor, sequence: u64) -> bool {
    matches!(
        (anchor.first_sequence, anchor.last_sequence),
        (Some(first), Some(last)) if first <= sequence && sequence <= last
    )
}

/// A finding receipt with the anchor that commits it and the path between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingProof {
    pub format: String,
    pub finding: Receipt,
    pub anchor: Receipt,
    pub inclusion: InclusionProof,
}

impl FindingProof {
    /// Canonical JSON bytes of the bundle.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::Canon`] if the bundle does not canonicalize.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>, OutputError> {
        canonical_json_of(self).map_err(|e| OutputError::Canon {
            detail: e.to_string(),
        })
    }

    /// Whether the bundle proves its finding on its own.
    ///
    /// Both receipts must be self-consistent, the anchor must cover the
    /// finding's sequence at the proof's leaf position, and the finding's
    /// self-hash must fold up to the anchored root.
    #[must_use]
    pub fn verify(&self) -> bool {
        if self.format != FINDING_PROOF_FORMAT
            || !is_finding(self.finding.receipt_type)
            || !self.finding.is_self_consistent()
            || !self.anchor.is_self_consistent()
        {
            return false;
        }
        let Some(anchor) = anchor_payload(&self.anchor) else {
            return false;
        };
        let Some(first) = anchor.first_sequence else {
            return false;
        };
        let position = self.finding.sequence.checked_sub(first);
        covers(&anchor, self.finding.sequence)
            && position == u64::try_from(self.inclusion.leaf_index).ok()
            && u64::try_from(self.inclusion.leaf_count).ok() == Some(anchor.leaf_count)
            && verify_inclusion(&self.finding.self_hash, &self.inclusion, &anchor.merkle_root)
    }
}

/// Build the proof bundle for one committed finding receipt.
///
/// # Errors
///
/// Returns [`OutputError::Unverified`] if the ledger does not verify
/// `finding`, [`OutputError::NotAFinding`] for a non-detector receipt and
/// [`OutputError::Unanchored`] while no committed anchor covers it yet.
pub fn prove_finding(ledger: &Ledger, finding: &Receipt) -> Result<FindingProof, OutputError> {
    let sequence = finding.sequence;
    if !ledger.verify(finding) {
        return Err(OutputError::Unverified { sequence });
    }
    if !is_finding(finding.receipt_type) {
        return Err(OutputError::NotAFinding { sequence });
    }
    let committed = ledger.committed();
    let (anchor_receipt, anchor) = committed
        .iter()
        .filter(|r| r.sequence > sequence && r.receipt_type == ReceiptType::Anchor)
        .find_map(|r| anchor_payload(r).map(|a| (r, a)))
        .filter(|(_, a)| covers(a, sequence))
        .ok_or(OutputError::Unanchored { sequence })?;
    let (Some(first), Some(last)) = (anchor.first_sequence, anchor.last_sequence) else {
        return Err(OutputError::Unanchored { sequence });
    };
    let span = usize::try_from(first)
        .ok()
        .zip(usize::try_from(last).ok())
        .and_then(|(first, last)| committed.get(first..=last))
        .ok_or(OutputError::Unanchored { sequence })?;
    let leaves: Vec<ContentHash> = span.iter().map(|r| r.self_hash.clone()).collect();
    let inclusion = usize::try_from(sequence - first)
        .ok()
        .and_then(|index| inclusion_proof(&leaves, index))
        .ok_or(OutputError::Unanchored { sequence })?;
    tracing::debug!(
        sequence,
        anchor_sequence = anchor_receipt.sequence,
        merkle_root = %anchor.merkle_root,
        "finding proof built"
    );
    Ok(FindingProof {
        format: FINDING_PROOF_FORMAT.to_string(),
        finding: finding.clone(),
        anchor: anchor_receipt.clone(),
        inclusion,
    })
}
