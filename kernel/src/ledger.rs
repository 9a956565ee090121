//! Receipt ledger: the append-only, single-writer, hash-chained log.
//!
//! # Invariants
//!
//! - `append` is the only way a component's output becomes visible. A
//!   detector finding that is never appended has no effect anywhere.
//! - `receipts[i].previous_hash == receipts[i-1].self_hash`, with the
//!   all-zero [`ContentHash::genesis`] before the first receipt.
//! - `receipts[i].sequence == i`.
//! - Receipts are never mutated or removed. There is no rollback.
//! - Every payload satisfies the receipt schema for its type.
//!
//! # Halt gate
//!
//! Committing a `stoprule` receipt whose verdict is HALT closes the gate.
//! While closed, only `anchor` receipts (sealing the halted cycle's
//! evidence) and a single `reset` receipt that names the HALT receipt are
//! accepted. The reset reopens the gate.
//!
//! # Anchoring
//!
//! `anchor(cycle_id)` builds a Merkle root over the self-hashes emitted
//! since the previous anchor (emission order) and appends it as an `anchor`
//! receipt. That anchor receipt is the first leaf of the next cycle, so
//! consecutive anchors are linked through the tree as well as the chain.
//!
//! # Persistence
//!
//! Each receipt is handed to a [`ReceiptStore`] before it is committed in
//! memory. A store failure leaves the ledger unchanged.

use tracing::{debug, info, warn};

use crate::proof::canon::CanonError;
use crate::proof::hash::ContentHash;
use crate::proof::merkle::merkle_root;
use crate::receipt::payload::{MerkleAnchor, ResetPayload, VerdictKind};
use crate::receipt::schema::{ReceiptSchema, SchemaError};
use crate::receipt::{compute_self_hash, Receipt, ReceiptError, ReceiptPayload, ReceiptType};

/// Persistence collaborator for committed receipts.
pub trait ReceiptStore: Send {
    /// Durably record a receipt. Called before the receipt is committed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the receipt could not be persisted.
    fn persist(&mut self, receipt: &Receipt) -> Result<(), StoreError>;
}

/// Persistence failure reported by a [`ReceiptStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("receipt store error: {detail}")]
pub struct StoreError {
    pub detail: String,
}

/// In-memory store: keeps a copy of every persisted receipt.
#[derive(Debug, Default)]
pub struct MemoryStore {
    receipts: Vec<Receipt>,
}

impl MemoryStore {
    #[must_use]
    pub fn receipts(&self) -> &[Receipt] {
        &self.receipts
    }
}

impl ReceiptStore for MemoryStore {
    fn persist(&mut self, receipt: &Receipt) -> Result<(), StoreError> {
        self.receipts.push(receipt.clone());
        Ok(())
    }
}

/// Source of receipt timestamps.
pub trait Clock: Send {
    fn now(&self) -> String;
}

/// Wall-clock UTC timestamps (RFC 3339, millisecond precision).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> String {
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    }
}

/// A clock frozen at one instant; for fixtures and tests.
#[derive(Debug, Clone)]
pub struct FixedClock(pub String);

impl Default for FixedClock {
    fn default() -> Self {
        Self("1970-01-01T00:00:00.000Z".to_string())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> String {
        self.0.clone()
    }
}

/// Operator authorization to clear a HALT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetAuthorization {
    pub operator_id: String,
    pub reason: String,
}

/// Ledger append and anchor failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    /// The ledger is halted and the receipt is neither `anchor` nor `reset`.
    #[error("ledger halted by {halted_by}: {receipt_type} receipt refused")]
    Halted {
        halted_by: ContentHash,
        receipt_type: ReceiptType,
    },
    /// A `reset` receipt was submitted while the ledger is not halted.
    #[error("reset refused: ledger is not halted")]
    NotHalted,
    /// A `reset` receipt names a different HALT receipt.
    #[error("reset names {named}, but the ledger was halted by {halted_by}")]
    ResetMismatch {
        named: ContentHash,
        halted_by: ContentHash,
    },
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Receipt(#[from] ReceiptError),
    #[error(transparent)]
    Canon(#[from] CanonError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A break found while walking a receipt chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("receipt at index {index} carries sequence {found}")]
    SequenceGap { index: u64, found: u64 },
    #[error("receipt {sequence}: previous_hash {found} does not link to {expected}")]
    ChainBroken {
        sequence: u64,
        expected: ContentHash,
        found: ContentHash,
    },
    #[error("receipt {sequence}: stored self_hash {stored} != recomputed {recomputed}")]
    HashMismatch {
        sequence: u64,
        stored: ContentHash,
        recomputed: String,
    },
}

/// Walk a receipt sequence from genesis and check every link and self-hash.
///
/// # Errors
///
/// Returns the first [`ChainError`] found.
pub fn verify_receipts(receipts: &[Receipt]) -> Result<(), ChainError> {
    let mut expected_prev = ContentHash::genesis();
    for (index, receipt) in (0u64..).zip(receipts) {
        if receipt.sequence != index {
            return Err(ChainError::SequenceGap {
                index,
                found: receipt.sequence,
            });
        }
        if receipt.previous_hash != expected_prev {
            return Err(ChainError::ChainBroken {
                sequence: receipt.sequence,
                expected: expected_prev,
                found: receipt.previous_hash.clone(),
            });
        }
        match receipt.recompute_self_hash() {
            Ok(recomputed) if recomputed == receipt.self_hash => {}
            Ok(recomputed) => {
                return Err(ChainError::HashMismatch {
                    sequence: receipt.sequence,
                    stored: receipt.self_hash.clone(),
                    recomputed: recomputed.as_str().to_string(),
                })
            }
            Err(e) => {
                return Err(ChainError::HashMismatch {
                    sequence: receipt.sequence,
                    stored: receipt.self_hash.clone(),
                    recomputed: format!("<{e}>"),
                })
            }
        }
        expected_prev = receipt.self_hash.clone();
    }
    Ok(())
}

/// The receipt ledger. Owned by exactly one writer; pass it by `&mut`.
pub struct Ledger {
    schema: ReceiptSchema,
    receipts: Vec<Receipt>,
    /// Index of the first receipt not yet covered by an anchor.
    cycle_start: usize,
    halted_by: Option<ContentHash>,
    store: Box<dyn ReceiptStore>,
    clock: Box<dyn Clock>,
}

impl Ledger {
    /// Create an empty ledger over the given store and clock.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Schema`] if the embedded schema fails to load.
    pub fn new(store: Box<dyn ReceiptStore>, clock: Box<dyn Clock>) -> Result<Self, LedgerError> {
        Ok(Self {
            schema: ReceiptSchema::v1()?,
            receipts: Vec::new(),
            cycle_start: 0,
            halted_by: None,
            store,
            clock,
        })
    }

    /// An in-memory ledger with the given clock.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Schema`] if the embedded schema fails to load.
    pub fn in_memory(clock: Box<dyn Clock>) -> Result<Self, LedgerError> {
        Self::new(Box::new(MemoryStore::default()), clock)
    }

    /// Append a typed payload.
    ///
    /// # Errors
    ///
    /// See [`Ledger::append_value`].
    pub fn append(&mut self, payload: &ReceiptPayload) -> Result<Receipt, LedgerError> {
        let value = payload.to_value()?;
        self.append_value(payload.receipt_type(), value)
    }

    /// Append an untyped payload by receipt type name.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Receipt`] for an unknown type name, otherwise
    /// see [`Ledger::append_value`].
    pub fn append_raw(
        &mut self,
        receipt_type: &str,
        payload: serde_json::Value,
    ) -> Result<Receipt, LedgerError> {
        let receipt_type: ReceiptType = receipt_type.parse()?;
        self.append_value(receipt_type, payload)
    }

    /// Validate, chain, persist and commit one receipt.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Halted`] when halted and the type is not `anchor`/`reset`
    /// - [`LedgerError::NotHalted`] / [`LedgerError::ResetMismatch`] for a bad reset
    /// - [`LedgerError::Schema`] when the payload violates the schema
    /// - [`LedgerError::Receipt`] when it does not decode to the typed payload
    /// - [`LedgerError::Store`] when persistence fails (nothing is committed)
    pub fn append_value(
        &mut self,
        receipt_type: ReceiptType,
        payload: serde_json::Value,
    ) -> Result<Receipt, LedgerError> {
        if let Some(halted_by) = &self.halted_by {
            if !matches!(receipt_type, ReceiptType::Anchor | ReceiptType::Reset) {
                warn!(%halted_by, %receipt_type, "append refused while halted");
                return Err(LedgerError::Halted {
                    halted_by: halted_by.clone(),
                    receipt_type,
                });
            }
        }

        self.schema.validate(receipt_type, &payload)?;
        let typed = ReceiptPayload::from_parts(receipt_type, &payload)?;

        if let ReceiptPayload::Reset(reset) = &typed {
            match &self.halted_by {
                None => return Err(LedgerError::NotHalted),
                Some(halted_by) if *halted_by != reset.halted_receipt => {
                    return Err(LedgerError::ResetMismatch {
                        named: reset.halted_receipt.clone(),
                        halted_by: halted_by.clone(),
                    })
                }
                Some(_) => {}
            }
        }

        let previous_hash = self
            .receipts
            .last()
            .map_or_else(ContentHash::genesis, |r| r.self_hash.clone());
        let self_hash = compute_self_hash(receipt_type, &payload, &previous_hash)?;
        let receipt = Receipt {
            sequence: self.receipts.len() as u64,
            receipt_type,
            payload,
            timestamp: self.clock.now(),
            previous_hash,
            self_hash,
        };

        self.store.persist(&receipt)?;
        self.receipts.push(receipt.clone());

        match &typed {
            ReceiptPayload::StopRule(p) if p.verdict.kind == VerdictKind::Halt => {
                warn!(
                    sequence = receipt.sequence,
                    condition = %p.verdict.condition,
                    "ledger halted"
                );
                self.halted_by = Some(receipt.self_hash.clone());
            }
            ReceiptPayload::Reset(p) => {
                info!(
                    sequence = receipt.sequence,
                    operator_id = %p.operator_id,
                    "ledger reset"
                );
                self.halted_by = None;
            }
            _ => {}
        }
        debug!(
            sequence = receipt.sequence,
            %receipt_type,
            self_hash = %receipt.self_hash,
            "receipt appended"
        );
        Ok(receipt)
    }

    /// Anchor every receipt emitted since the previous anchor.
    ///
    /// Allowed while halted. An empty cycle anchors to the empty-tree root.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the anchor receipt cannot be appended.
    pub fn anchor(&mut self, cycle_id: &str) -> Result<MerkleAnchor, LedgerError> {
        let pending = &self.receipts[self.cycle_start..];
        let leaves: Vec<ContentHash> = pending.iter().map(|r| r.self_hash.clone()).collect();
        let anchor = MerkleAnchor {
            cycle_id: cycle_id.to_string(),
            merkle_root: merkle_root(&leaves),
            leaf_count: leaves.len() as u64,
            first_sequence: pending.first().map(|r| r.sequence),
            last_sequence: pending.last().map(|r| r.sequence),
        };
        let receipt = self.append(&ReceiptPayload::Anchor(anchor.clone()))?;
        self.cycle_start = self.receipts.len() - 1;
        info!(
            cycle_id,
            merkle_root = %anchor.merkle_root,
            leaf_count = anchor.leaf_count,
            anchor_sequence = receipt.sequence,
            "cycle anchored"
        );
        Ok(anchor)
    }

    /// Append the `reset` receipt that clears the current HALT.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotHalted`] if the ledger is not halted.
    pub fn reset(&mut self, authorization: &ResetAuthorization) -> Result<Receipt, LedgerError> {
        let halted_receipt = self.halted_by.clone().ok_or(LedgerError::NotHalted)?;
        self.append(&ReceiptPayload::Reset(ResetPayload {
            operator_id: authorization.operator_id.clone(),
            reason: authorization.reason.clone(),
            halted_receipt,
        }))
    }

    /// Whether `receipt` is a committed, untampered member of this chain.
    ///
    /// Checks the self-hash, the link to the committed predecessor, and that
    /// the committed receipt at that sequence is identical.
    #[must_use]
    pub fn verify(&self, receipt: &Receipt) -> bool {
        if !receipt.is_self_consistent() {
            return false;
        }
        let Ok(index) = usize::try_from(receipt.sequence) else {
            return false;
        };
        let Some(committed) = self.receipts.get(index) else {
            return false;
        };
        let expected_prev = if index == 0 {
            ContentHash::genesis()
        } else {
            self.receipts[index - 1].self_hash.clone()
        };
        receipt.previous_hash == expected_prev && committed == receipt
    }

    /// Walk the whole committed chain.
    ///
    /// # Errors
    ///
    /// Returns the first [`ChainError`] found.
    pub fn verify_chain(&self) -> Result<(), ChainError> {
        verify_receipts(&self.receipts)
    }

    /// Committed receipts, in emission order.
    #[must_use]
    pub fn committed(&self) -> &[Receipt] {
        &self.receipts
    }

    /// Receipts emitted since the previous anchor (the pending Merkle leaves).
    #[must_use]
    pub fn pending(&self) -> &[Receipt] {
        &self.receipts[self.cycle_start..]
    }

    #[must_use]
    pub fn last(&self) -> Option<&Receipt> {
        self.receipts.last()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.receipts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty()
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted_by.is_some()
    }

    /// Self-hash of the HALT verdict receipt, while halted.
    #[must_use]
    pub fn halted_by(&self) -> Option<&ContentHash> {
        self.halted_by.as_ref()
    }

    #[must_use]
    pub fn schema(&self) -> &ReceiptSchema {
        &self.schema
    }
}
