//! One detection cycle, end to end.
//!
//! # Cycle
//!
//! ```text
//! cancel? → dual_hash(batch) → ingest receipt
//!   → [benford ‖ entropy ‖ network] on worker threads
//!   → wait (≤ detector_timeout) → cancel?
//!   → finding receipts (fixed kind order)
//!   → integrity + completeness checks
//!   → stoprule receipt → apply → anchor (HALT or cadence)
//! ```
//!
//! Detectors share the batch behind an `Arc` and send findings over an
//! `mpsc` channel. This thread is the single consumer and the only ledger
//! writer. A detector that times out or panics simply never sends; its kind
//! is then missing a receipt and the cycle HALTs.
//!
//! A detector thread that misses the checkpoint cannot be interrupted. Its
//! handle is kept, and no new thread is started for that kind until it has
//! finished and been joined, so at most one late thread exists per kind.
//! Until then the kind is reported missing.
//!
//! Nothing here retries. After a HALT every further cycle is refused until
//! [`Pipeline::reset`] is called with an operator authorization.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, info, warn};

use evidentia_detect::suite::{DetectionSuite, Detector};
use evidentia_kernel::finding::{DetectorKind, Finding};
use evidentia_kernel::ledger::{Ledger, LedgerError, ResetAuthorization};
use evidentia_kernel::proof::dual_hash::{dual_hash, DualHash, RecordBatch};
use evidentia_kernel::proof::hash::ContentHash;
use evidentia_kernel::receipt::payload::{
    CancelPayload, IngestPayload, IngestStatus, MerkleAnchor, StopRuleState, StopRuleVerdict,
    VerdictKind,
};
use evidentia_kernel::receipt::{Receipt, ReceiptPayload};
use evidentia_kernel::stoprule::{CycleChecks, StopRuleEngine, StopRuleError};

use crate::config::{ConfigError, PipelineConfig};

/// Cooperative cancellation flag shared with the caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A batch that never reached the core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestionError {
    #[error("source {source_id} unavailable: {detail}")]
    SourceUnavailable { source_id: String, detail: String },
    #[error("batch {batch_id} malformed: {detail}")]
    Malformed { batch_id: String, detail: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline halted by {halted_by}; reset required")]
    Halted { halted_by: String },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    StopRule(#[from] StopRuleError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The StopRule ruled on the cycle.
    Completed { verdict: StopRuleVerdict },
    /// The batch could not be canonicalized; a rejected ingest receipt was
    /// appended and no detector ran.
    Rejected { error: String },
    /// Cancellation was observed at `stage`; a cancel receipt was appended.
    Cancelled { stage: String },
}

/// What one cycle produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle_id: String,
    pub outcome: CycleOutcome,
    /// Findings whose receipts were committed, in kind order.
    pub findings: Vec<Finding>,
    /// Every receipt appended during the cycle, in order.
    pub receipts: Vec<Receipt>,
    pub anchor: Option<MerkleAnchor>,
}

impl CycleReport {
    #[must_use]
    pub fn verdict(&self) -> Option<&StopRuleVerdict> {
        match &self.outcome {
            CycleOutcome::Completed { verdict } => Some(verdict),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_halt(&self) -> bool {
        self.verdict().is_some_and(|v| v.kind == VerdictKind::Halt)
    }

    #[must_use]
    pub fn is_flag(&self) -> bool {
        self.verdict().is_some_and(|v| v.kind == VerdictKind::Flag)
    }

    /// Process completion status: 1 on HALT, 0 otherwise. FLAG is not a
    /// failure.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(self.is_halt())
    }
}

/// Cycle orchestrator. Holds the detectors and the StopRule state; the
/// ledger is passed in so its single owner stays explicit.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    suite: DetectionSuite,
    stoprule: StopRuleEngine,
    cycles_since_anchor: u64,
    /// Detector threads that missed their checkpoint and are still running.
    stragglers: BTreeMap<DetectorKind, JoinHandle<()>>,
}

impl Pipeline {
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if `config` does not validate.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let suite = DetectionSuite::new(
            config.benford.clone(),
            config.entropy.clone(),
            config.network.clone(),
        );
        Ok(Self {
            stoprule: StopRuleEngine::new(config.calibration_threshold),
            config,
            suite,
            cycles_since_anchor: 0,
            stragglers: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn suite(&self) -> &DetectionSuite {
        &self.suite
    }

    /// Swap in a detector for its kind.
    pub fn replace_detector(&mut self, detector: Arc<dyn Detector>) {
        self.suite.replace(detector);
    }

    #[must_use]
    pub fn state(&self) -> StopRuleState {
        self.stoprule.state()
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.stoprule.is_halted()
    }

    /// Detector threads from earlier cycles that have not been joined yet.
    #[must_use]
    pub fn stragglers(&self) -> usize {
        self.stragglers.len()
    }

    fn ensure_running(&self, ledger: &Ledger) -> Result<(), PipelineError> {
        if let Some(halted_by) = ledger.halted_by() {
            return Err(PipelineError::Halted {
                halted_by: halted_by.to_string(),
            });
        }
        if self.stoprule.is_halted() {
            return Err(PipelineError::Halted {
                halted_by: "stoprule".to_string(),
            });
        }
        Ok(())
    }

    /// Run one cycle over `batch`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Halted`] if a previous HALT has not been
    /// reset, and [`PipelineError::Ledger`] if the ledger refuses an append.
    /// Statistical and integrity outcomes are verdicts, not errors.
    pub fn run_cycle(
        &mut self,
        ledger: &mut Ledger,
        cycle_id: &str,
        batch: &RecordBatch,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, PipelineError> {
        self.ensure_running(ledger)?;
        let mut report = CycleReport {
            cycle_id: cycle_id.to_string(),
            outcome: CycleOutcome::Rejected {
                error: String::new(),
            },
            findings: Vec::new(),
            receipts: Vec::new(),
            anchor: None,
        };

        if cancel.is_cancelled() {
            return self.cancel_cycle(ledger, report, "ingest");
        }

        let record_count = batch.records.len() as u64;
        let evidence = match dual_hash(batch) {
            Ok(evidence) => evidence,
            Err(e) => {
                warn!(cycle_id, batch_id = %batch.batch_id, error = %e, "batch rejected");
                let receipt = ledger.append(&ReceiptPayload::Ingest(IngestPayload {
                    source_id: batch.source_id.clone(),
                    batch_id: batch.batch_id.clone(),
                    record_count,
                    status: IngestStatus::Rejected,
                    dual_hash: None,
                    error: Some(e.to_string()),
                }))?;
                report.receipts.push(receipt);
                report.outcome = CycleOutcome::Rejected {
                    error: e.to_string(),
                };
                return Ok(report);
            }
        };
        let ingest = ledger.append(&ReceiptPayload::Ingest(IngestPayload {
            source_id: batch.source_id.clone(),
            batch_id: batch.batch_id.clone(),
            record_count,
            status: IngestStatus::Accepted,
            dual_hash: Some(evidence.clone()),
            error: None,
        }))?;
        report.receipts.push(ingest);

        let mut received = self.detect(batch, &evidence);

        if cancel.is_cancelled() {
            return self.cancel_cycle(ledger, report, "detection");
        }

        let mut missing = Vec::new();
        let mut finding_hashes = Vec::new();
        for kind in DetectorKind::ALL {
            let Some(finding) = received.remove(&kind) else {
                warn!(cycle_id, detector = %kind, "no finding before checkpoint");
                missing.push(kind);
                continue;
            };
            match ledger.append(&ReceiptPayload::from(finding.detail.clone())) {
                Ok(receipt) => {
                    finding_hashes.push(receipt.self_hash.clone());
                    report.receipts.push(receipt);
                    report.findings.push(finding);
                }
                Err(e @ LedgerError::Store(_)) => return Err(e.into()),
                Err(e) => {
                    warn!(cycle_id, detector = %kind, error = %e, "finding receipt refused");
                    missing.push(kind);
                }
            }
        }

        let checks = CycleChecks {
            integrity_failures: integrity_failures(ledger, &evidence, &report),
            missing_receipts: missing,
            calibration_match: None,
            findings: report.findings.clone(),
        };
        let (receipt, verdict) = self.rule(ledger, cycle_id, &checks, finding_hashes)?;
        report.receipts.push(receipt);

        // Only cycles nobody objected to feed the entropy reference.
        if verdict.kind == VerdictKind::Continue {
            for finding in &report.findings {
                self.suite.learn(finding);
            }
        }

        self.cycles_since_anchor += 1;
        if verdict.kind == VerdictKind::Halt
            || self.cycles_since_anchor >= self.config.anchor_every_cycles
        {
            report.anchor = Some(self.anchor(ledger, cycle_id)?);
            if let Some(last) = ledger.last() {
                report.receipts.push(last.clone());
            }
        }
        report.outcome = CycleOutcome::Completed { verdict };
        Ok(report)
    }

    /// Run the detectors on worker threads and collect whatever arrives
    /// before the timeout.
    fn detect(
        &mut self,
        batch: &RecordBatch,
        evidence: &DualHash,
    ) -> BTreeMap<DetectorKind, Finding> {
        self.reap_stragglers();
        let shared = Arc::new(batch.clone());
        let (tx, rx) = mpsc::channel::<Finding>();
        let mut workers: BTreeMap<DetectorKind, JoinHandle<()>> = BTreeMap::new();
        for detector in self.suite.detectors() {
            let kind = detector.kind();
            if self.stragglers.contains_key(&kind) {
                warn!(detector = %kind, "previous run still in progress, not started");
                continue;
            }
            let detector = Arc::clone(detector);
            let batch = Arc::clone(&shared);
            let evidence = evidence.clone();
            let tx = tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("detector-{kind}"))
                .spawn(move || {
                    let finding = detector.analyze(&batch, &evidence);
                    if tx.send(finding).is_err() {
                        debug!(detector = %kind, "finding arrived after the checkpoint");
                    }
                });
            match spawned {
                Ok(handle) => {
                    workers.insert(kind, handle);
                }
                Err(e) => warn!(detector = %kind, error = %e, "detector thread failed to start"),
            }
        }
        drop(tx);

        let expected = workers.len();
        let deadline = Instant::now() + self.config.detector_timeout();
        let mut findings = BTreeMap::new();
        while findings.len() < expected {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(finding) => {
                    debug!(detector = %finding.detector, verdict = ?finding.verdict, "finding received");
                    findings.entry(finding.detector).or_insert(finding);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    warn!(
                        timeout_ms = self.config.detector_timeout_ms,
                        received = findings.len(),
                        expected,
                        "detector checkpoint timed out"
                    );
                    break;
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        for (kind, handle) in workers {
            // A worker that delivered returns right after its send.
            if findings.contains_key(&kind) || handle.is_finished() {
                join_worker(kind, handle);
            } else {
                self.stragglers.insert(kind, handle);
            }
        }
        findings
    }

    /// Join every late detector thread that has since finished.
    fn reap_stragglers(&mut self) {
        let finished: Vec<DetectorKind> = self
            .stragglers
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(kind, _)| *kind)
            .collect();
        for kind in finished {
            if let Some(handle) = self.stragglers.remove(&kind) {
                join_worker(kind, handle);
            }
        }
    }

    /// Evaluate, append, then apply one StopRule verdict.
    fn rule(
        &mut self,
        ledger: &mut Ledger,
        cycle_id: &str,
        checks: &CycleChecks,
        finding_hashes: Vec<ContentHash>,
    ) -> Result<(Receipt, StopRuleVerdict), PipelineError> {
        let payload = self.stoprule.evaluate(cycle_id, checks, finding_hashes)?;
        let verdict = payload.verdict.clone();
        let receipt = ledger.append(&ReceiptPayload::StopRule(payload))?;
        self.stoprule.apply(&receipt)?;
        match verdict.kind {
            VerdictKind::Halt => warn!(
                cycle_id,
                condition = %verdict.condition,
                observed = verdict.observed,
                "HALT"
            ),
            VerdictKind::Flag => warn!(
                cycle_id,
                condition = %verdict.condition,
                observed = verdict.observed,
                "FLAG"
            ),
            VerdictKind::Continue => debug!(cycle_id, "CONTINUE"),
        }
        Ok((receipt, verdict))
    }

    fn anchor(&mut self, ledger: &mut Ledger, cycle_id: &str) -> Result<MerkleAnchor, PipelineError> {
        let anchor = ledger.anchor(cycle_id)?;
        self.cycles_since_anchor = 0;
        Ok(anchor)
    }

    fn cancel_cycle(
        &mut self,
        ledger: &mut Ledger,
        mut report: CycleReport,
        stage: &str,
    ) -> Result<CycleReport, PipelineError> {
        info!(cycle_id = %report.cycle_id, stage, "cycle cancelled");
        let receipt = ledger.append(&ReceiptPayload::Cancel(CancelPayload {
            cycle_id: report.cycle_id.clone(),
            stage: stage.to_string(),
            reason: "cancellation requested".to_string(),
        }))?;
        report.receipts.push(receipt);
        report.outcome = CycleOutcome::Cancelled {
            stage: stage.to_string(),
        };
        Ok(report)
    }

    /// Record a batch that failed before reaching the core. Non-halting.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if halted or the ledger refuses the receipt.
    pub fn record_ingest_failure(
        &mut self,
        ledger: &mut Ledger,
        source_id: &str,
        batch_id: &str,
        error: &IngestionError,
    ) -> Result<Receipt, PipelineError> {
        self.ensure_running(ledger)?;
        warn!(source_id, batch_id, %error, "ingestion failed");
        Ok(ledger.append(&ReceiptPayload::Ingest(IngestPayload {
            source_id: source_id.to_string(),
            batch_id: batch_id.to_string(),
            record_count: 0,
            status: IngestStatus::Rejected,
            dual_hash: None,
            error: Some(error.to_string()),
        }))?)
    }

    /// Close a calibration run: a StopRule verdict that includes the
    /// calibration match, then an anchor.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if halted or the ledger refuses a receipt.
    pub fn close_calibration(
        &mut self,
        ledger: &mut Ledger,
        cycle_id: &str,
        calibration_match: f64,
        calibration_receipt: &Receipt,
    ) -> Result<CycleReport, PipelineError> {
        self.ensure_running(ledger)?;
        let mut integrity_failures = Vec::new();
        if !ledger.verify(calibration_receipt) {
            integrity_failures.push(format!(
                "calibration receipt {} does not verify",
                calibration_receipt.sequence
            ));
        }
        let checks = CycleChecks {
            integrity_failures,
            calibration_match: Some(calibration_match),
            ..CycleChecks::default()
        };
        let (receipt, verdict) = self.rule(ledger, cycle_id, &checks, Vec::new())?;
        let anchor = self.anchor(ledger, cycle_id)?;
        let mut receipts = vec![receipt];
        receipts.extend(ledger.last().cloned());
        Ok(CycleReport {
            cycle_id: cycle_id.to_string(),
            outcome: CycleOutcome::Completed { verdict },
            findings: Vec::new(),
            receipts,
            anchor: Some(anchor),
        })
    }

    /// Clear a HALT: append the authorized reset receipt, then hand it to
    /// the StopRule.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Ledger`] if the ledger is not halted and
    /// [`PipelineError::StopRule`] if the StopRule refuses the receipt.
    pub fn reset(
        &mut self,
        ledger: &mut Ledger,
        authorization: &ResetAuthorization,
    ) -> Result<Receipt, PipelineError> {
        let receipt = ledger.reset(authorization)?;
        self.stoprule.reset(&receipt)?;
        Ok(receipt)
    }
}

fn join_worker(kind: DetectorKind, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        warn!(detector = %kind, "detector thread panicked");
    }
}

/// Integrity checks over one cycle: the committed ingest receipt holds the
/// evidence the detectors were handed, every finding cites that evidence,
/// and every receipt of the cycle is a verified member of the chain.
fn integrity_failures(ledger: &Ledger, evidence: &DualHash, report: &CycleReport) -> Vec<String> {
    let mut failures = Vec::new();
    let ingested = report.receipts.iter().find_map(|r| match r.typed_payload() {
        Ok(ReceiptPayload::Ingest(p)) => Some(p.dual_hash),
        _ => None,
    });
    match ingested {
        Some(Some(committed)) if committed == *evidence => {}
        Some(Some(committed)) => failures.push(format!(
            "ingest receipt commits {} but detectors were handed {}",
            committed.content_hash, evidence.content_hash
        )),
        Some(None) | None => failures.push("cycle has no accepted ingest receipt".to_string()),
    }
    for finding in &report.findings {
        if finding.evidence != *evidence {
            failures.push(format!(
                "{} finding cites evidence {} instead of {}",
                finding.detector, finding.evidence.content_hash, evidence.content_hash
            ));
        }
    }
    for receipt in &report.receipts {
        if !ledger.verify(receipt) {
            failures.push(format!("receipt {} does not verify", receipt.sequence));
        }
    }
    failures
}
