//! Command surface: every mode writes exactly one receipt JSON line to stdout.
//!
//! Usage:
//!   `evidentia_emit test`
//!   `evidentia_emit hash <text>`
//!   `evidentia_emit scenario <NAME> [--config <file>] [--receipts <file.jsonl>]`
//!   `evidentia_emit verify <receipts.jsonl>`
//!
//! Exit status: 0 on success, 1 on HALT, 2 on malformed input.
//! Logs go to stderr; `RUST_LOG` sets the filter (default `warn`).

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::EnvFilter;

use evidentia_harness::calibration::{
    run_named, CalibrationError, CalibrationSettings, SyntheticGenerator,
};
use evidentia_harness::config::PipelineConfig;
use evidentia_harness::output::emit_output;
use evidentia_harness::pipeline::{CancellationToken, Pipeline};
use evidentia_harness::store::{verify_jsonl, JsonlStore};
use evidentia_kernel::ledger::{Ledger, SystemClock};
use evidentia_kernel::proof::dual_hash::{dual_hash, FieldValue, Record, RecordBatch};
use evidentia_kernel::proof::merkle::merkle_root;
use evidentia_kernel::receipt::payload::{IngestPayload, IngestStatus, MerkleAnchor, VerdictKind};
use evidentia_kernel::receipt::{Receipt, ReceiptPayload};

const USAGE: &str = "usage: evidentia_emit test | hash <text> | scenario <NAME> [--config <file>] [--receipts <file>] | verify <file>";

/// How a mode ended.
enum Failure {
    Halt(String),
    Malformed(String),
}

impl Failure {
    fn malformed(e: impl std::fmt::Display) -> Self {
        Self::Malformed(e.to_string())
    }
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        Some("test") if args.len() == 1 => mode_test(),
        Some("hash") if args.len() == 2 => mode_hash(&args[1]),
        Some("scenario") if args.len() >= 2 => mode_scenario(&args[1], &args[2..]),
        Some("verify") if args.len() == 2 => mode_verify(Path::new(&args[1])),
        _ => Err(Failure::Malformed(USAGE.to_string())),
    };

    let receipt = match result {
        Ok(receipt) => receipt,
        Err(Failure::Halt(condition)) => {
            error!(%condition, "halted");
            return ExitCode::from(1);
        }
        Err(Failure::Malformed(detail)) => {
            error!(%detail, "malformed input");
            eprintln!("{detail}");
            return ExitCode::from(2);
        }
    };
    match receipt.to_canonical_json() {
        Ok(line) => {
            println!("{}", String::from_utf8_lossy(&line));
            if is_halt(&receipt) {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!(%e, "receipt canonicalization failed");
            ExitCode::from(2)
        }
    }
}

fn is_halt(receipt: &Receipt) -> bool {
    matches!(
        receipt.typed_payload(),
        Ok(ReceiptPayload::StopRule(p)) if p.verdict.kind == VerdictKind::Halt
    )
}

fn ledger() -> Result<Ledger, Failure> {
    Ledger::in_memory(Box::new(SystemClock)).map_err(Failure::malformed)
}

/// One clean synthetic cycle, summarized into an output receipt.
fn mode_test() -> Result<Receipt, Failure> {
    let mut ledger = ledger()?;
    let mut pipeline = Pipeline::new(PipelineConfig::default()).map_err(Failure::malformed)?;
    let batch = SyntheticGenerator::new(CalibrationSettings::default().seed)
        .clean_batch("selftest", "selftest-0001", 200);
    let report = pipeline
        .run_cycle(&mut ledger, "selftest", &batch, &CancellationToken::new())
        .map_err(Failure::malformed)?;
    if report.is_halt() {
        return Err(Failure::Halt(
            report.verdict().map(|v| v.condition.clone()).unwrap_or_default(),
        ));
    }
    let sources = ledger.committed().to_vec();
    let out = emit_output(&mut ledger, &sources).map_err(Failure::malformed)?;
    Ok(out.receipt)
}

/// Ingest `text` as a one-record batch and emit its ingest receipt.
fn mode_hash(text: &str) -> Result<Receipt, Failure> {
    let mut record = Record::new();
    record.insert("text".into(), FieldValue::from(text));
    let batch = RecordBatch {
        source_id: "cli".to_string(),
        batch_id: "hash".to_string(),
        records: vec![record],
        ingested_at: String::new(),
    };
    let evidence = dual_hash(&batch).map_err(Failure::malformed)?;
    let mut ledger = ledger()?;
    ledger
        .append(&ReceiptPayload::Ingest(IngestPayload {
            source_id: batch.source_id,
            batch_id: batch.batch_id,
            record_count: 1,
            status: IngestStatus::Accepted,
            dual_hash: Some(evidence),
            error: None,
        }))
        .map_err(Failure::malformed)
}

/// Run a calibration scenario and emit its closing StopRule receipt.
fn mode_scenario(name: &str, rest: &[String]) -> Result<Receipt, Failure> {
    let mut config = PipelineConfig::default();
    let mut receipts_path: Option<PathBuf> = None;
    let mut it = rest.iter();
    while let Some(flag) = it.next() {
        let value = it
            .next()
            .ok_or_else(|| Failure::Malformed(format!("{flag} needs a value\n{USAGE}")))?;
        match flag.as_str() {
            "--config" => {
                config = PipelineConfig::from_json_file(Path::new(value)).map_err(Failure::malformed)?;
            }
            "--receipts" => receipts_path = Some(PathBuf::from(value)),
            _ => return Err(Failure::Malformed(format!("unknown flag {flag}\n{USAGE}"))),
        }
    }

    let mut ledger = match receipts_path {
        Some(path) => {
            let store = JsonlStore::create(&path).map_err(Failure::malformed)?;
            Ledger::new(Box::new(store), Box::new(SystemClock)).map_err(Failure::malformed)?
        }
        None => ledger()?,
    };
    match run_named(name, &CalibrationSettings::default(), &config, &mut ledger) {
        Ok(_) => ledger
            .committed()
            .iter()
            .rev()
            .find(|r| matches!(r.typed_payload(), Ok(ReceiptPayload::StopRule(_))))
            .cloned()
            .ok_or_else(|| Failure::Malformed("scenario produced no verdict".to_string())),
        Err(CalibrationError::Halted { condition, .. }) => Err(Failure::Halt(condition)),
        Err(e) => Err(Failure::malformed(e)),
    }
}

/// Verify a persisted chain and emit an anchor receipt over it.
fn mode_verify(path: &Path) -> Result<Receipt, Failure> {
    let receipts = verify_jsonl(path).map_err(Failure::malformed)?;
    let leaves: Vec<_> = receipts.iter().map(|r| r.self_hash.clone()).collect();
    let anchor = MerkleAnchor {
        cycle_id: path.display().to_string(),
        merkle_root: merkle_root(&leaves),
        leaf_count: leaves.len() as u64,
        first_sequence: receipts.first().map(|r| r.sequence),
        last_sequence: receipts.last().map(|r| r.sequence),
    };
    ledger()?
        .append(&ReceiptPayload::Anchor(anchor))
        .map_err(Failure::malformed)
}
