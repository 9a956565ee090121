//! Pipeline lock tests.
//!
//! Proves:
//! 1. A detector that misses the checkpoint (slow or crashed) HALTs the
//!    cycle as a missing receipt, and a still-running late detector is never
//!    started a second time
//! 2. A finding that cites the wrong evidence HALTs as an integrity violation
//! 3. Cancellation is recorded as a receipt, never silently dropped
//! 4. A HALT blocks every further cycle until an operator reset
//! 5. A FLAG or a rejected batch never stops the pipeline
//! 6. A pipeline writing through the JSONL store leaves a replayable chain
//! 7. Committed cycles teach the entropy detector that is active now

use std::sync::Arc;
use std::time::Duration;

use evidentia_detect::benford::BenfordDetector;
use evidentia_detect::entropy::EntropyDetector;
use evidentia_detect::network::NetworkDetector;
use evidentia_harness::calibration::SyntheticGenerator;
use evidentia_harness::config::PipelineConfig;
use evidentia_harness::output::emit_output;
use evidentia_harness::pipeline::{
    CancellationToken, CycleOutcome, CycleReport, IngestionError, Pipeline, PipelineError,
};
use evidentia_harness::store::{verify_jsonl, JsonlStore};
use evidentia_kernel::finding::DetectorKind;
use evidentia_kernel::ledger::{FixedClock, Ledger, ResetAuthorization};
use evidentia_kernel::proof::dual_hash::{FieldValue, RecordBatch};
use evidentia_kernel::receipt::payload::VerdictKind;
use evidentia_kernel::receipt::{ReceiptPayload, ReceiptType};
use evidentia_kernel::stoprule::{CONDITION_INTEGRITY, CONDITION_MISSING_RECEIPT};
use lock_tests::fixtures::{
    fixed_ledger, spread_batch, Cancelling, Panicking, Slow, WrongEvidence, FIXED_TIME,
};

fn clean(batch_id: &str) -> RecordBatch {
    SyntheticGenerator::new(0xC1EA).clean_batch("lock", batch_id, 200)
}

fn pipeline() -> Pipeline {
    Pipeline::new(PipelineConfig::default()).unwrap()
}

fn run(pipeline: &mut Pipeline, ledger: &mut Ledger, id: &str, batch: &RecordBatch) -> CycleReport {
    pipeline
        .run_cycle(ledger, id, batch, &CancellationToken::new())
        .unwrap()
}

fn authorization() -> ResetAuthorization {
    ResetAuthorization {
        operator_id: "ops-7".to_string(),
        reason: "detector restored".to_string(),
    }
}

fn receipt_types(report: &CycleReport) -> Vec<ReceiptType> {
    report.receipts.iter().map(|r| r.receipt_type).collect()
}

// --- Checkpoint ---

#[test]
fn clean_cycle_continues() {
    let mut ledger = fixed_ledger();
    let mut p = pipeline();
    let report = run(&mut p, &mut ledger, "c-1", &clean("b-1"));
    assert_eq!(report.verdict().unwrap().kind, VerdictKind::Continue);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(
        receipt_types(&report),
        vec![
            ReceiptType::Ingest,
            ReceiptType::Benford,
            ReceiptType::Entropy,
            ReceiptType::Network,
            ReceiptType::StopRule,
            ReceiptType::Anchor,
        ]
    );
    assert_eq!(report.anchor.as_ref().unwrap().leaf_count, 5);
    ledger.verify_chain().unwrap();
}

#[test]
fn slow_detector_is_a_missing_receipt() {
    let mut ledger = fixed_ledger();
    let config = PipelineConfig {
        detector_timeout_ms: 50,
        ..PipelineConfig::default()
    };
    let mut p = Pipeline::new(config).unwrap();
    p.replace_detector(Arc::new(Slow {
        inner: Arc::new(NetworkDetector::default()),
        delay: Duration::from_millis(500),
    }));

    let report = run(&mut p, &mut ledger, "c-1", &clean("b-1"));
    let verdict = report.verdict().unwrap();
    assert_eq!(verdict.kind, VerdictKind::Halt);
    assert_eq!(verdict.condition, CONDITION_MISSING_RECEIPT);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.findings.len(), 2);
    assert!(!receipt_types(&report).contains(&ReceiptType::Network));
    assert!(report.anchor.is_some());
    assert!(ledger.is_halted());
    assert!(p.is_halted());
}

#[test]
fn late_detector_is_not_started_again_while_running() {
    let mut ledger = fixed_ledger();
    let config = PipelineConfig {
        detector_timeout_ms: 200,
        ..PipelineConfig::default()
    };
    let mut p = Pipeline::new(config).unwrap();
    p.replace_detector(Arc::new(Slow {
        inner: Arc::new(NetworkDetector::default()),
        delay: Duration::from_millis(800),
    }));

    assert!(run(&mut p, &mut ledger, "c-1", &clean("b-1")).is_halt());
    assert_eq!(p.stragglers(), 1);

    // Still running: the kind is missing without a second thread.
    p.reset(&mut ledger, &authorization()).unwrap();
    let report = run(&mut p, &mut ledger, "c-2", &clean("b-2"));
    assert_eq!(report.verdict().unwrap().condition, CONDITION_MISSING_RECEIPT);
    assert_eq!(report.findings.len(), 2);
    assert_eq!(p.stragglers(), 1);

    // Once it has finished it is joined and the kind runs again.
    std::thread::sleep(Duration::from_millis(900));
    p.reset(&mut ledger, &authorization()).unwrap();
    p.replace_detector(Arc::new(NetworkDetector::default()));
    let report = run(&mut p, &mut ledger, "c-3", &clean("b-3"));
    assert_eq!(report.verdict().unwrap().kind, VerdictKind::Continue);
    assert_eq!(p.stragglers(), 0);
    ledger.verify_chain().unwrap();
}

#[test]
fn crashed_detector_is_a_missing_receipt() {
    let mut ledger = fixed_ledger();
    let mut p = pipeline();
    p.replace_detector(Arc::new(Panicking(DetectorKind::Entropy)));
    let report = run(&mut p, &mut ledger, "c-1", &clean("b-1"));
    let verdict = report.verdict().unwrap();
    assert_eq!(verdict.kind, VerdictKind::Halt);
    assert_eq!(verdict.condition, CONDITION_MISSING_RECEIPT);
    let stoprule = report
        .receipts
        .iter()
        .find(|r| r.receipt_type == ReceiptType::StopRule)
        .unwrap();
    let Ok(ReceiptPayload::StopRule(payload)) = stoprule.typed_payload() else {
        panic!("stoprule receipt does not decode");
    };
    assert_eq!(payload.checks.missing_receipts, vec![DetectorKind::Entropy]);
}

#[test]
fn wrong_evidence_is_an_integrity_violation() {
    let mut ledger = fixed_ledger();
    let mut p = pipeline();
    p.replace_detector(Arc::new(WrongEvidence {
        inner: Arc::new(BenfordDetector::default()),
    }));
    let report = run(&mut p, &mut ledger, "c-1", &clean("b-1"));
    let verdict = report.verdict().unwrap();
    assert_eq!(verdict.kind, VerdictKind::Halt);
    assert_eq!(verdict.condition, CONDITION_INTEGRITY);
}

// --- Cancellation ---

#[test]
fn cancellation_during_detection_is_recorded() {
    let mut ledger = fixed_ledger();
    let mut p = pipeline();
    let token = CancellationToken::new();
    p.replace_detector(Arc::new(Cancelling {
        inner: Arc::new(EntropyDetector::default()),
        token: token.clone(),
    }));
    let report = p
        .run_cycle(&mut ledger, "c-1", &clean("b-1"), &token)
        .unwrap();
    assert_eq!(
        report.outcome,
        CycleOutcome::Cancelled {
            stage: "detection".to_string()
        }
    );
    assert_eq!(
        receipt_types(&report),
        vec![ReceiptType::Ingest, ReceiptType::Cancel]
    );
    assert_eq!(report.exit_code(), 0);
    assert!(!ledger.is_halted());
    ledger.verify_chain().unwrap();
}

#[test]
fn cancellation_before_ingest_is_recorded() {
    let mut ledger = fixed_ledger();
    let mut p = pipeline();
    let token = CancellationToken::new();
    token.cancel();
    let report = p
        .run_cycle(&mut ledger, "c-1", &clean("b-1"), &token)
        .unwrap();
    assert_eq!(
        report.outcome,
        CycleOutcome::Cancelled {
            stage: "ingest".to_string()
        }
    );
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.committed()[0].receipt_type, ReceiptType::Cancel);
    assert_eq!(ledger.committed()[0].payload["cycle_id"], "c-1");
}

// --- HALT is terminal until reset ---

#[test]
fn halt_blocks_until_reset() {
    let mut ledger = fixed_ledger();
    let mut p = pipeline();
    p.replace_detector(Arc::new(Panicking(DetectorKind::Network)));
    assert!(run(&mut p, &mut ledger, "c-1", &clean("b-1")).is_halt());
    let halted_len = ledger.len();

    assert!(matches!(
        p.run_cycle(&mut ledger, "c-2", &clean("b-2"), &CancellationToken::new()),
        Err(PipelineError::Halted { .. })
    ));
    let unavailable = IngestionError::SourceUnavailable {
        source_id: "erp".to_string(),
        detail: "connection refused".to_string(),
    };
    assert!(matches!(
        p.record_ingest_failure(&mut ledger, "erp", "b-3", &unavailable),
        Err(PipelineError::Halted { .. })
    ));
    assert_eq!(ledger.len(), halted_len);

    let reset = p.reset(&mut ledger, &authorization()).unwrap();
    assert_eq!(reset.receipt_type, ReceiptType::Reset);
    assert!(!ledger.is_halted());
    p.replace_detector(Arc::new(NetworkDetector::default()));
    let report = run(&mut p, &mut ledger, "c-4", &clean("b-4"));
    assert_eq!(report.verdict().unwrap().kind, VerdictKind::Continue);
    ledger.verify_chain().unwrap();
}

#[test]
fn reset_without_halt_is_refused() {
    let mut ledger = fixed_ledger();
    let mut p = pipeline();
    run(&mut p, &mut ledger, "c-1", &clean("b-1"));
    assert!(matches!(
        p.reset(&mut ledger, &authorization()),
        Err(PipelineError::Ledger(_))
    ));
}

// --- Non-halting outcomes ---

#[test]
fn flag_does_not_stop_the_pipeline() {
    let mut ledger = fixed_ledger();
    let mut p = pipeline();
    // Evenly spread leading digits.
    let report = run(&mut p, &mut ledger, "c-1", &spread_batch("b-1", 120));
    assert!(report.is_flag());
    assert_eq!(report.verdict().unwrap().condition, "benford");
    assert_eq!(report.exit_code(), 0);
    assert!(!ledger.is_halted());

    let report = run(&mut p, &mut ledger, "c-2", &clean("b-2"));
    assert_eq!(report.verdict().unwrap().kind, VerdictKind::Continue);
}

#[test]
fn rejected_batch_does_not_stop_the_pipeline() {
    let mut ledger = fixed_ledger();
    let mut p = pipeline();
    let mut batch = clean("b-1");
    batch.records[3].insert("amount".into(), FieldValue::Float(f64::INFINITY));
    let report = run(&mut p, &mut ledger, "c-1", &batch);
    assert!(matches!(report.outcome, CycleOutcome::Rejected { .. }));
    assert_eq!(receipt_types(&report), vec![ReceiptType::Ingest]);
    assert_eq!(report.receipts[0].payload["status"], "rejected");

    let unavailable = IngestionError::Malformed {
        batch_id: "b-2".to_string(),
        detail: "truncated CSV".to_string(),
    };
    p.record_ingest_failure(&mut ledger, "erp", "b-2", &unavailable)
        .unwrap();

    let report = run(&mut p, &mut ledger, "c-3", &clean("b-3"));
    assert!(report.verdict().is_some());
    ledger.verify_chain().unwrap();
}

#[test]
fn replaced_entropy_detector_is_the_one_that_learns() {
    let mut ledger = fixed_ledger();
    let mut p = pipeline();
    let active = Arc::new(EntropyDetector::default());
    p.replace_detector(active.clone());
    for (cycle, batch) in [("c-1", "b-1"), ("c-2", "b-2")] {
        let report = run(&mut p, &mut ledger, cycle, &clean(batch));
        assert_eq!(report.verdict().unwrap().kind, VerdictKind::Continue);
    }
    assert_eq!(active.baseline().len(), 2);
}

// --- Persistence and output ---

#[test]
fn jsonl_chain_replays_and_summarizes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("receipts.jsonl");
    let store = JsonlStore::create(&path).unwrap();
    let mut ledger =
        Ledger::new(Box::new(store), Box::new(FixedClock(FIXED_TIME.to_string()))).unwrap();
    let mut p = pipeline();
    run(&mut p, &mut ledger, "c-1", &clean("b-1"));
    run(&mut p, &mut ledger, "c-2", &spread_batch("b-2", 120));

    let sources = ledger.committed().to_vec();
    let out = emit_output(&mut ledger, &sources).unwrap();
    let summary: serde_json::Value = serde_json::from_slice(&out.document).unwrap();
    assert_eq!(summary["flags"], 1);
    assert_eq!(summary["halts"], 0);

    let replayed = verify_jsonl(&path).unwrap();
    assert_eq!(replayed.as_slice(), ledger.committed());
    assert_eq!(replayed.last().unwrap().receipt_type, ReceiptType::Output);
}
