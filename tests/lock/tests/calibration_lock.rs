//! Calibration lock tests.
//!
//! Proves:
//! 1. A clean run raises nothing and matches perfectly
//! 2. Each named fraud pattern is caught by the detector meant for it
//! 3. Degenerate batches never halt the pipeline
//! 4. A run that misses injected fraud closes with a calibration HALT
//! 5. Every run leaves a chain that verifies and ends on an anchor

use evidentia_harness::calibration::{
    run_named, run_scenario, CalibrationError, CalibrationRun, CalibrationSettings, Scenario,
};
use evidentia_harness::config::PipelineConfig;
use evidentia_kernel::ledger::Ledger;
use evidentia_kernel::receipt::payload::VerdictKind;
use evidentia_kernel::receipt::ReceiptType;
use evidentia_kernel::stoprule::CONDITION_CALIBRATION;
use lock_tests::fixtures::fixed_ledger;

fn settings(cycles: usize) -> CalibrationSettings {
    CalibrationSettings {
        cycles,
        ..CalibrationSettings::default()
    }
}

fn run(scenario: Scenario, cycles: usize) -> (CalibrationRun, Ledger) {
    let mut ledger = fixed_ledger();
    let run = run_scenario(
        scenario,
        &settings(cycles),
        &PipelineConfig::default(),
        &mut ledger,
    )
    .unwrap();
    (run, ledger)
}

fn assert_closed(ledger: &Ledger) {
    ledger.verify_chain().unwrap();
    let types: Vec<ReceiptType> = ledger
        .committed()
        .iter()
        .rev()
        .take(3)
        .map(|r| r.receipt_type)
        .collect();
    assert_eq!(
        types,
        vec![
            ReceiptType::Anchor,
            ReceiptType::StopRule,
            ReceiptType::Calibration
        ]
    );
}

fn assert_perfect(run: &CalibrationRun) {
    assert!(
        (run.result.calibration_match - 1.0).abs() < f64::EPSILON,
        "{} matched {} ({:?})",
        run.scenario,
        run.result.calibration_match,
        run.cycles
    );
    assert_eq!(run.verdict.kind, VerdictKind::Continue);
    assert_eq!(run.exit_code(), 0);
}

// --- Clean ---

#[test]
fn baseline_raises_nothing() {
    let (run, ledger) = run(Scenario::Baseline, 20);
    assert_eq!(run.result.evaluated, 20);
    assert_eq!(run.result.false_positives, 0);
    assert!(run.result.detection_rate.abs() < f64::EPSILON);
    assert!(run.cycles.iter().all(|c| c.verdict == Some(VerdictKind::Continue)));
    assert_perfect(&run);
    assert_closed(&ledger);
}

// --- Fraud patterns ---

#[test]
fn dolton_threshold_avoidance_is_caught() {
    let (run, ledger) = run(Scenario::DoltonCalibration, 20);
    assert_eq!(run.cycles.iter().filter(|c| c.injected()).count(), 2);
    assert!((run.result.injection_rate - 0.10).abs() < 1e-12);
    assert!(run.result.recall >= 0.9);
    assert_perfect(&run);
    assert_closed(&ledger);
}

#[test]
fn single_pattern_scenarios_match() {
    for scenario in [
        Scenario::IdesCalibration,
        Scenario::MadiganCalibration,
        Scenario::Cascade,
    ] {
        let (run, ledger) = run(scenario, 20);
        assert_eq!(run.result.true_positives, 1, "{scenario}");
        for c in run.cycles.iter().filter(|c| c.injected()) {
            assert_eq!(c.verdict, Some(VerdictKind::Flag), "{scenario} {}", c.cycle_id);
        }
        assert_perfect(&run);
        assert_closed(&ledger);
    }
}

#[test]
fn stress_run_completes() {
    let (run, ledger) = run(Scenario::Stress, 10);
    assert_eq!(run.result.cycles, 10);
    assert_eq!(run.cycles.iter().filter(|c| c.injected()).count(), 3);
    assert_eq!(run.result.skipped, 0);
    let first_ingest = ledger
        .committed()
        .iter()
        .find(|r| r.receipt_type == ReceiptType::Ingest)
        .unwrap();
    assert_eq!(first_ingest.payload["record_count"], 500);
    assert_closed(&ledger);
}

// --- Degenerate input ---

#[test]
fn godel_degenerate_batches_never_halt() {
    let (run, ledger) = run(Scenario::Godel, 20);
    assert_eq!(run.result.skipped, 3);
    assert_eq!(run.result.evaluated, 17);
    assert!(run.cycles.iter().all(|c| c.verdict != Some(VerdictKind::Halt)));
    let rejected = ledger
        .committed()
        .iter()
        .filter(|r| r.receipt_type == ReceiptType::Ingest && r.payload["status"] == "rejected")
        .count();
    assert_eq!(rejected, 3);
    assert_perfect(&run);
    assert_closed(&ledger);
}

// --- Calibration failure ---

#[test]
fn missed_fraud_halts_the_run() {
    let mut config = PipelineConfig::default();
    config.entropy.z_score_threshold = 1_000.0;
    let mut ledger = fixed_ledger();
    let run = run_scenario(Scenario::IdesCalibration, &settings(10), &config, &mut ledger).unwrap();

    assert_eq!(run.result.false_negatives, 1);
    assert!((run.result.calibration_match - 0.9).abs() < 1e-12);
    assert_eq!(run.verdict.kind, VerdictKind::Halt);
    assert_eq!(run.verdict.condition, CONDITION_CALIBRATION);
    assert_eq!(run.exit_code(), 1);
    assert!(ledger.is_halted());
    ledger.verify_chain().unwrap();
}

#[test]
fn calibration_receipt_binds_config() {
    let (run, ledger) = run(Scenario::Baseline, 5);
    assert!(ledger.verify(&run.calibration_receipt));
    assert_eq!(
        run.result.config_digest,
        PipelineConfig::default().snapshot_digest().unwrap()
    );

    let mut stricter = PipelineConfig::default();
    stricter.benford.p_value_threshold = 0.01;
    assert_ne!(
        run.result.config_digest,
        stricter.snapshot_digest().unwrap()
    );
}

#[test]
fn unknown_scenario_is_refused() {
    let mut ledger = fixed_ledger();
    let err = run_named("PONZI", &settings(5), &PipelineConfig::default(), &mut ledger).unwrap_err();
    assert!(matches!(err, CalibrationError::ScenarioNotFound { ref name } if name == "PONZI"));
    assert!(ledger.is_empty());
}

#[test]
fn runs_are_reproducible() {
    let (a, ledger_a) = run(Scenario::Cascade, 10);
    let (b, ledger_b) = run(Scenario::Cascade, 10);
    assert_eq!(a.result, b.result);
    assert_eq!(ledger_a.last().unwrap().self_hash, ledger_b.last().unwrap().self_hash);
}
