//! Shared inputs for evidentia benchmark suites.

use evidentia_harness::calibration::{CalibrationSettings, FraudPattern, SyntheticGenerator};
use evidentia_harness::config::PipelineConfig;
use evidentia_harness::pipeline::{CancellationToken, Pipeline};
use evidentia_kernel::ledger::{FixedClock, Ledger};
use evidentia_kernel::proof::dual_hash::RecordBatch;

/// Clean batches of `size` records from the default calibration seed.
#[must_use]
pub fn clean_batches(count: usize, size: usize) -> Vec<RecordBatch> {
    let mut generator = SyntheticGenerator::new(CalibrationSettings::default().seed);
    (0..count)
        .map(|i| generator.clean_batch("bench", &format!("bench-{i:04}"), size))
        .collect()
}

/// One batch of `size` records carrying `pattern`.
#[must_use]
pub fn fraud_batch(size: usize, pattern: FraudPattern) -> RecordBatch {
    let mut generator = SyntheticGenerator::new(CalibrationSettings::default().seed ^ 0xF);
    let mut batch = generator.clean_batch("bench", "bench-fraud", size);
    generator.inject(&mut batch, pattern);
    batch
}

/// A pipeline whose entropy baseline has seen `warmup` clean batches, and
/// the ledger that recorded them.
///
/// # Panics
///
/// Panics if the default configuration is rejected or a warmup cycle fails.
/// Benchmark setup failures are fatal.
#[must_use]
pub fn warmed_pipeline(warmup: usize, size: usize) -> (Pipeline, Ledger) {
    let mut pipeline = Pipeline::new(PipelineConfig::default()).expect("default config is valid");
    let mut ledger = Ledger::in_memory(Box::new(FixedClock::default())).expect("schema loads");
    let cancel = CancellationToken::new();
    for (i, batch) in clean_batches(warmup, size).iter().enumerate() {
        pipeline
            .run_cycle(&mut ledger, &format!("warmup-{i:03}"), batch, &cancel)
            .expect("warmup cycle runs");
    }
    (pipeline, ledger)
}
