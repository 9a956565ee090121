//! StopRule: the finite-state halting evaluator.
//!
//! # States
//!
//! `NORMAL`, `FLAGGED`, `HALTED`. `HALTED` is terminal until an operator
//! reset receipt is committed.
//!
//! # Classification (fixed priority, first match wins)
//!
//! | # | condition                                   | verdict | condition text          |
//! |---|---------------------------------------------|---------|-------------------------|
//! | 1 | integrity check failed                      | HALT    | `integrity violation`   |
//! | 2 | a detector produced no receipt              | HALT    | `missing receipt`       |
//! | 3 | calibration match below threshold           | HALT    | `calibration failure`   |
//! | 4 | any finding verdict FAIL                    | FLAG    | detector kind           |
//! | 5 | otherwise                                   | CONTINUE| `all checks passed`     |
//!
//! Only rows 1–3 halt. A FLAG never halts, however many detectors fail.
//!
//! # Receipt before effect
//!
//! [`StopRuleEngine::evaluate`] is pure: it returns the verdict and the
//! state it would lead to. The engine only changes state in
//! [`StopRuleEngine::apply`], which takes the *committed* `stoprule`
//! receipt. A halt therefore cannot take effect without first being provable.

use crate::finding::{DetectorKind, Finding};
use crate::proof::hash::ContentHash;
use crate::receipt::payload::{
    CheckSummary, StopRulePayload, StopRuleState, StopRuleVerdict, VerdictKind,
};
use crate::receipt::{Receipt, ReceiptPayload, ReceiptType};

/// Default calibration match threshold.
pub const DEFAULT_CALIBRATION_THRESHOLD: f64 = 0.95;

pub const CONDITION_INTEGRITY: &str = "integrity violation";
pub const CONDITION_MISSING_RECEIPT: &str = "missing receipt";
pub const CONDITION_CALIBRATION: &str = "calibration failure";
pub const CONDITION_CLEAR: &str = "all checks passed";

/// Everything the StopRule observes for one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleChecks {
    /// Descriptions of failed integrity checks (empty = passed).
    pub integrity_failures: Vec<String>,
    /// Detectors that ran without a committed receipt.
    pub missing_receipts: Vec<DetectorKind>,
    /// Calibration match fraction, during calibration runs only.
    pub calibration_match: Option<f64>,
    /// Findings whose receipts were committed this cycle.
    pub findings: Vec<Finding>,
}

impl CycleChecks {
    fn summary(&self) -> CheckSummary {
        CheckSummary {
            integrity_failures: self.integrity_failures.clone(),
            missing_receipts: self.missing_receipts.clone(),
            calibration_match: self.calibration_match,
            failed_detectors: self
                .findings
                .iter()
                .filter(|f| f.is_fail())
                .map(|f| f.detector)
                .collect(),
        }
    }
}

/// StopRule misuse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StopRuleError {
    #[error("stoprule is halted; a committed reset receipt is required")]
    Halted,
    #[error("reset refused: stoprule is not halted")]
    NotHalted,
    #[error("expected a committed {expected} receipt, got {found}")]
    WrongReceipt {
        expected: ReceiptType,
        found: ReceiptType,
    },
    #[error("receipt {sequence} fails self-hash verification")]
    Unverified { sequence: u64 },
    #[error("receipt payload does not decode: {detail}")]
    Malformed { detail: String },
}

/// Classify one cycle. Pure; see the module table.
#[must_use]
pub fn classify(checks: &CycleChecks, calibration_threshold: f64) -> StopRuleVerdict {
    if !checks.integrity_failures.is_empty() {
        return StopRuleVerdict {
            kind: VerdictKind::Halt,
            condition: CONDITION_INTEGRITY.to_string(),
            observed: count(checks.integrity_failures.len()),
            threshold: 0.0,
        };
    }
    if !checks.missing_receipts.is_empty() {
        return StopRuleVerdict {
            kind: VerdictKind::Halt,
            condition: CONDITION_MISSING_RECEIPT.to_string(),
            observed: count(checks.missing_receipts.len()),
            threshold: 0.0,
        };
    }
    if let Some(matched) = checks.calibration_match {
        if matched < calibration_threshold {
            return StopRuleVerdict {
                kind: VerdictKind::Halt,
                condition: CONDITION_CALIBRATION.to_string(),
                observed: matched,
                threshold: calibration_threshold,
            };
        }
    }
    // First failing detector in fixed detector order names the flag.
    let mut failed: Vec<&Finding> = checks.findings.iter().filter(|f| f.is_fail()).collect();
    failed.sort_by_key(|f| f.detector);
    if let Some(first) = failed.first() {
        return StopRuleVerdict {
            kind: VerdictKind::Flag,
            condition: first.detector.as_str().to_string(),
            observed: first.statistic.unwrap_or(0.0),
            threshold: first.threshold,
        };
    }
    StopRuleVerdict {
        kind: VerdictKind::Continue,
        condition: CONDITION_CLEAR.to_string(),
        observed: 0.0,
        threshold: 0.0,
    }
}

#[allow(clippy::cast_precision_loss)]
fn count(n: usize) -> f64 {
    n as f64
}

/// Transition table.
#[must_use]
pub const fn next_state(kind: VerdictKind) -> StopRuleState {
    match kind {
        VerdictKind::Continue => StopRuleState::Normal,
        VerdictKind::Flag => StopRuleState::Flagged,
        VerdictKind::Halt => StopRuleState::Halted,
    }
}

/// The StopRule state machine.
#[derive(Debug, Clone)]
pub struct StopRuleEngine {
    state: StopRuleState,
    calibration_threshold: f64,
}

impl Default for StopRuleEngine {
    fn default() -> Self {
        Self::new(DEFAULT_CALIBRATION_THRESHOLD)
    }
}

impl StopRuleEngine {
    #[must_use]
    pub fn new(calibration_threshold: f64) -> Self {
        Self {
            state: StopRuleState::Normal,
            calibration_threshold,
        }
    }

    #[must_use]
    pub fn state(&self) -> StopRuleState {
        self.state
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.state == StopRuleState::Halted
    }

    /// Evaluate a cycle and build the `stoprule` payload to append.
    ///
    /// Does not change state.
    ///
    /// # Errors
    ///
    /// Returns [`StopRuleError::Halted`] if the engine is halted.
    pub fn evaluate(
        &self,
        cycle_id: &str,
        checks: &CycleChecks,
        finding_receipts: Vec<ContentHash>,
    ) -> Result<StopRulePayload, StopRuleError> {
        if self.is_halted() {
            return Err(StopRuleError::Halted);
        }
        let verdict = classify(checks, self.calibration_threshold);
        Ok(StopRulePayload {
            cycle_id: cycle_id.to_string(),
            state_before: self.state,
            state_after: next_state(verdict.kind),
            verdict,
            finding_receipts,
            checks: checks.summary(),
        })
    }

    /// Apply a committed `stoprule` receipt.
    ///
    /// # Errors
    ///
    /// Returns [`StopRuleError`] if halted, if the receipt is not a
    /// self-consistent `stoprule` receipt, or if it does not decode.
    pub fn apply(&mut self, receipt: &Receipt) -> Result<StopRuleState, StopRuleError> {
        if self.is_halted() {
            return Err(StopRuleError::Halted);
        }
        let payload = decode(receipt, ReceiptType::StopRule)?;
        let Some(verdict) = payload.stoprule_verdict() else {
            return Err(StopRuleError::WrongReceipt {
                expected: ReceiptType::StopRule,
                found: receipt.receipt_type,
            });
        };
        self.state = next_state(verdict.kind);
        Ok(self.state)
    }

    /// Leave `HALTED` on a committed `reset` receipt.
    ///
    /// # Errors
    ///
    /// Returns [`StopRuleError::NotHalted`] if not halted, or a receipt error
    /// if `receipt` is not a self-consistent `reset` receipt.
    pub fn reset(&mut self, receipt: &Receipt) -> Result<StopRuleState, StopRuleError> {
        if !self.is_halted() {
            return Err(StopRuleError::NotHalted);
        }
        decode(receipt, ReceiptType::Reset)?;
        self.state = StopRuleState::Normal;
        Ok(self.state)
    }
}

fn decode(receipt: &Receipt, expected: ReceiptType) -> Result<ReceiptPayload, StopRuleError> {
    if receipt.receipt_type != expected {
        return Err(StopRuleError::WrongReceipt {
            expected,
            found: receipt.receipt_type,
        });
    }
    if !receipt.is_self_consistent() {
        return Err(StopRuleError::Unverified {
            sequence: receipt.sequence,
        });
    }
    receipt
        .typed_payload()
        .map_err(|e| StopRuleError::Malformed {
            detail: e.to_string(),
        })
}
