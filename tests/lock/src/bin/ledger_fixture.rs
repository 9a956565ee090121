//! Runs a fixed calibration scenario against a fixed-clock ledger and prints
//! deterministic `key=value` lines for cross-process comparison.
//!
//! Usage: `ledger_fixture`
//! Output:
//!   `batch_order_hash`=sha256:...
//!   `batch_content_hash`=sha256:...
//!   `config_digest`=sha256:...
//!   `receipt_count`=N
//!   `head_hash`=sha256:...
//!   `anchor_root`=sha256:...
//!   `calibration_match`=...
//!   `verdict`=CONTINUE|FLAG|HALT

use evidentia_harness::calibration::{
    run_scenario, CalibrationSettings, Scenario, SyntheticGenerator,
};
use evidentia_harness::config::PipelineConfig;
use evidentia_kernel::proof::dual_hash::dual_hash;
use evidentia_kernel::receipt::payload::MerkleAnchor;
use evidentia_kernel::receipt::ReceiptType;
use lock_tests::fixtures::fixed_ledger;

fn main() {
    let settings = CalibrationSettings {
        cycles: 20,
        ..CalibrationSettings::default()
    };
    let config = PipelineConfig::default();

    let sample = SyntheticGenerator::new(settings.seed).clean_batch("sample", "sample-1", 200);
    let evidence = dual_hash(&sample).expect("sample batch canonicalizes");

    let mut ledger = fixed_ledger();
    let run = run_scenario(Scenario::DoltonCalibration, &settings, &config, &mut ledger)
        .expect("scenario runs");

    let anchor: MerkleAnchor = ledger
        .committed()
        .iter()
        .rev()
        .find(|r| r.receipt_type == ReceiptType::Anchor)
        .map(|r| serde_json::from_value(r.payload.clone()).expect("anchor payload"))
        .expect("at least one anchor");
    let head = ledger.last().expect("non-empty ledger");

    println!("batch_order_hash={}", evidence.order_sensitive_hash);
    println!("batch_content_hash={}", evidence.content_hash);
    println!("config_digest={}", run.result.config_digest);
    println!("receipt_count={}", ledger.len());
    println!("head_hash={}", head.self_hash);
    println!("anchor_root={}", anchor.merkle_root);
    println!("calibration_match={}", run.result.calibration_match);
    println!("verdict={}", format!("{:?}", run.verdict.kind).to_uppercase());
}
