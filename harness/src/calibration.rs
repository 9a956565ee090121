//! Calibration and simulation.
//!
//! A scenario drives the real pipeline over deterministic synthetic batches
//! with known ground truth, then scores the verdicts against it:
//!
//! - warm-up: clean batches that seed the entropy baseline
//! - cycles: clean batches, exactly `round(rate × cycles)` of them with
//!   fraud patterns injected
//! - a `calibration` receipt with the confusion counts and metrics
//! - a StopRule verdict that HALTs when the calibration match falls below
//!   the configured threshold
//!
//! Synthetic amounts are Benford-conformant by construction: leading digits
//! are assigned by exact quotas (largest remainder), so a clean batch never
//! fails the digit test by sampling noise.

use std::str::FromStr;

use tracing::info;

use evidentia_detect::benford::expected_proportions;
use evidentia_kernel::finding::DigitPosition;
use evidentia_kernel::ledger::{Ledger, LedgerError};
use evidentia_kernel::proof::dual_hash::{FieldValue, Record, RecordBatch};
use evidentia_kernel::receipt::payload::{CalibrationPayload, StopRuleVerdict, VerdictKind};
use evidentia_kernel::receipt::{Receipt, ReceiptPayload};

use crate::config::{ConfigError, PipelineConfig};
use crate::pipeline::{CancellationToken, CycleOutcome, Pipeline, PipelineError};
use crate::rng::Xorshift64;

const DEPARTMENTS: u64 = 8;
const CATEGORIES: [&str; 6] = [
    "supplies",
    "services",
    "equipment",
    "travel",
    "professional_fees",
    "other",
];
const SHELL_VENDOR: &str = "vendor-shell-01";

/// The kind of filer a clean batch comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AgencyProfile {
    vendors: u64,
    months: u64,
    categories: usize,
}

/// Clean batches alternate between a large agency and a small district
/// office, so an entropy baseline learned from them spans more than one
/// filer and its spread is not just sampling noise.
const PROFILES: [AgencyProfile; 2] = [
    AgencyProfile {
        vendors: 50,
        months: 12,
        categories: 6,
    },
    AgencyProfile {
        vendors: 12,
        months: 3,
        categories: 2,
    },
];

/// Fraction of records altered by each pattern.
const THRESHOLD_AVOIDANCE_SHARE: f64 = 0.25;
const FABRICATED_ID_SHARE: f64 = 0.50;
const CONCENTRATION_SHARE: f64 = 0.75;

/// A fraud pattern the generator can inject, and the detector meant to
/// catch it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FraudPattern {
    /// Amounts parked just under a 10,000 approval limit (digit conformity).
    ThresholdAvoidance,
    /// High-entropy claimant references replacing sequential ones
    /// (compression anomaly).
    FabricatedIdentifiers,
    /// Payments concentrated on one shell counterparty (network centrality).
    CounterpartyConcentration,
}

impl FraudPattern {
    pub const ALL: [FraudPattern; 3] = [
        Self::ThresholdAvoidance,
        Self::FabricatedIdentifiers,
        Self::CounterpartyConcentration,
    ];
}

/// The fixed scenario enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Clean data only.
    Baseline,
    DoltonCalibration,
    IdesCalibration,
    MadiganCalibration,
    /// All three patterns at once.
    Cascade,
    /// Degenerate inputs: empty, tiny, all-zero, negative and non-finite
    /// batches. Nothing is injected; nothing may crash or flag.
    Godel,
    /// Large batches at a high injection rate, rotating patterns.
    Stress,
}

impl Scenario {
    pub const ALL: [Scenario; 7] = [
        Self::Baseline,
        Self::DoltonCalibration,
        Self::IdesCalibration,
        Self::MadiganCalibration,
        Self::Cascade,
        Self::Godel,
        Self::Stress,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "BASELINE",
            Self::DoltonCalibration => "DOLTON_CALIBRATION",
            Self::IdesCalibration => "IDES_CALIBRATION",
            Self::MadiganCalibration => "MADIGAN_CALIBRATION",
            Self::Cascade => "CASCADE",
            Self::Godel => "GODEL",
            Self::Stress => "STRESS",
        }
    }

    #[must_use]
    pub const fn injection_rate(self) -> f64 {
        match self {
            Self::Baseline | Self::Godel => 0.0,
            Self::DoltonCalibration => 0.10,
            Self::IdesCalibration | Self::MadiganCalibration | Self::Cascade => 0.05,
            Self::Stress => 0.30,
        }
    }

    /// Patterns injected into the `nth` fraud batch of a run.
    #[must_use]
    pub fn patterns(self, nth: usize) -> Vec<FraudPattern> {
        match self {
            Self::Baseline | Self::Godel => Vec::new(),
            Self::DoltonCalibration => vec![FraudPattern::ThresholdAvoidance],
            Self::IdesCalibration => vec![FraudPattern::FabricatedIdentifiers],
            Self::MadiganCalibration => vec![FraudPattern::CounterpartyConcentration],
            Self::Cascade => FraudPattern::ALL.to_vec(),
            Self::Stress => vec![FraudPattern::ALL[nth % FraudPattern::ALL.len()]],
        }
    }

    fn batch_size(self, settings: &CalibrationSettings) -> usize {
        match self {
            Self::Stress => settings.batch_size.max(500),
            _ => settings.batch_size,
        }
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scenario {
    type Err = CalibrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|sc| sc.as_str() == wanted)
            .ok_or_else(|| CalibrationError::ScenarioNotFound {
                name: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalibrationError {
    #[error("scenario not found: {name:?}")]
    ScenarioNotFound { name: String },
    #[error("calibration settings: {detail}")]
    Settings { detail: String },
    #[error("calibration halted at cycle {cycle_id}: {condition}")]
    Halted { cycle_id: String, condition: String },
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Run size and seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationSettings {
    pub cycles: usize,
    pub batch_size: usize,
    /// Clean cycles run before scoring starts.
    pub warmup_batches: usize,
    pub seed: u64,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            cycles: 100,
            batch_size: 200,
            warmup_batches: 8,
            seed: 0x00E5_1DE7_1A00,
        }
    }
}

// --- Generator ---

/// Exact leading-digit counts for `n` values: `n·log10(1 + 1/d)` rounded by
/// largest remainder so they sum to `n`.
#[must_use]
pub fn benford_quotas(n: usize) -> [usize; 9] {
    let expected = expected_proportions(DigitPosition::First);
    let mut quotas = [0_usize; 9];
    let mut remainders: Vec<(f64, usize)> = Vec::with_capacity(9);
    let mut assigned = 0;
    for (d, p) in expected.iter().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let exact = p * n as f64;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let whole = exact.floor() as usize;
        quotas[d] = whole;
        assigned += whole;
        remainders.push((exact - exact.floor(), d));
    }
    remainders.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    for (_, d) in remainders.into_iter().take(n.saturating_sub(assigned)) {
        quotas[d] += 1;
    }
    quotas
}

/// Deterministic synthetic transaction generator.
#[derive(Debug, Clone)]
pub struct SyntheticGenerator {
    rng: Xorshift64,
    next_record: u64,
    clean_batches: usize,
}

impl SyntheticGenerator {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Xorshift64::new(seed),
            next_record: 1,
            clean_batches: 0,
        }
    }

    /// Amount with leading digit `digit`, between 10 and 9,999.99.
    fn amount_with_leading_digit(&mut self, digit: u64) -> f64 {
        // 10^(k+2) cents, k ∈ {1, 2, 3}.
        let scale = 10_u64.pow(3 + u32::try_from(self.rng.next_below(3)).unwrap_or(0));
        let cents = digit * scale + self.rng.next_below(scale);
        #[allow(clippy::cast_precision_loss)]
        let amount = cents as f64 / 100.0;
        amount
    }

    fn record(&mut self, amount: f64, profile: AgencyProfile) -> Record {
        let id = self.next_record;
        self.next_record += 1;
        let department = 1 + self.rng.next_below(DEPARTMENTS);
        let vendor = 1 + self.rng.next_below(profile.vendors);
        let category = CATEGORIES[self.rng.next_usize(profile.categories)];
        let month = 1 + self.rng.next_below(profile.months);
        let day = 1 + self.rng.next_below(28);

        let mut r = Record::new();
        r.insert("record_id".into(), FieldValue::from(format!("R-{id:07}")));
        r.insert("claimant_ref".into(), FieldValue::from(format!("CLM-{id:07}")));
        r.insert("department".into(), FieldValue::from(format!("DEPT-{department:02}")));
        r.insert("vendor".into(), FieldValue::from(format!("vendor-{vendor:03}")));
        r.insert("category".into(), FieldValue::from(category));
        r.insert("posted_on".into(), FieldValue::from(format!("2026-{month:02}-{day:02}")));
        r.insert("amount".into(), FieldValue::Float(amount));
        r
    }

    /// A clean batch of `n` records with Benford-conformant amounts, drawn
    /// from the next profile in the rotation.
    pub fn clean_batch(&mut self, source_id: &str, batch_id: &str, n: usize) -> RecordBatch {
        let profile = PROFILES[self.clean_batches % PROFILES.len()];
        self.clean_batches += 1;
        let mut digits: Vec<u64> = Vec::with_capacity(n);
        for (d, count) in (1_u64..).zip(benford_quotas(n)) {
            digits.extend(std::iter::repeat_n(d, count));
        }
        self.rng.shuffle(&mut digits);
        let records = digits
            .into_iter()
            .map(|d| {
                let amount = self.amount_with_leading_digit(d);
                self.record(amount, profile)
            })
            .collect();
        RecordBatch {
            source_id: source_id.to_string(),
            batch_id: batch_id.to_string(),
            records,
            ingested_at: "2026-01-01T00:00:00.000Z".to_string(),
        }
    }

    fn pick(&mut self, n: usize, share: f64) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..n).collect();
        self.rng.shuffle(&mut idx);
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let take = (n as f64 * share).round() as usize;
        idx.truncate(take);
        idx
    }

    /// Apply a fraud pattern in place.
    pub fn inject(&mut self, batch: &mut RecordBatch, pattern: FraudPattern) {
        let n = batch.records.len();
        match pattern {
            FraudPattern::ThresholdAvoidance => {
                for i in self.pick(n, THRESHOLD_AVOIDANCE_SHARE) {
                    let cents = 900_000 + self.rng.next_below(100_000);
                    #[allow(clippy::cast_precision_loss)]
                    let amount = cents as f64 / 100.0;
                    batch.records[i].insert("amount".into(), FieldValue::Float(amount));
                }
            }
            FraudPattern::FabricatedIdentifiers => {
                for i in self.pick(n, FABRICATED_ID_SHARE) {
                    let reference = self.rng.next_hex(40);
                    batch.records[i].insert("claimant_ref".into(), FieldValue::from(reference));
                }
            }
            FraudPattern::CounterpartyConcentration => {
                for i in self.pick(n, CONCENTRATION_SHARE) {
                    batch.records[i].insert("vendor".into(), FieldValue::from(SHELL_VENDOR));
                }
            }
        }
    }

    /// The `i`th degenerate batch of the GODEL rotation.
    pub fn degenerate_batch(
        &mut self,
        source_id: &str,
        batch_id: &str,
        n: usize,
        i: usize,
    ) -> RecordBatch {
        match i % 6 {
            1 => self.clean_batch(source_id, batch_id, 0),
            2 => self.clean_batch(source_id, batch_id, 1),
            3 => {
                let mut b = self.clean_batch(source_id, batch_id, n);
                for r in &mut b.records {
                    r.insert("amount".into(), FieldValue::Float(0.0));
                }
                b
            }
            4 => {
                let mut b = self.clean_batch(source_id, batch_id, 10);
                for r in &mut b.records {
                    if let Some(v) = r.get("amount").and_then(FieldValue::as_f64) {
                        r.insert("amount".into(), FieldValue::Float(-v));
                    }
                }
                b
            }
            5 => {
                let mut b = self.clean_batch(source_id, batch_id, n);
                if let Some(r) = b.records.first_mut() {
                    r.insert("amount".into(), FieldValue::Float(f64::NAN));
                }
                b
            }
            _ => self.clean_batch(source_id, batch_id, n),
        }
    }
}

// --- Metrics ---

/// Confusion counts over evaluated cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Confusion {
    pub true_positives: u64,
    pub false_positives: u64,
    pub true_negatives: u64,
    pub false_negatives: u64,
}

impl Confusion {
    pub fn record(&mut self, injected: bool, flagged: bool) {
        match (injected, flagged) {
            (true, true) => self.true_positives += 1,
            (false, true) => self.false_positives += 1,
            (false, false) => self.true_negatives += 1,
            (true, false) => self.false_negatives += 1,
        }
    }

    #[must_use]
    pub fn evaluated(&self) -> u64 {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    /// `TP / (TP + FP)`; 1.0 when nothing was flagged.
    #[must_use]
    pub fn precision(&self) -> f64 {
        ratio_or_one(self.true_positives, self.true_positives + self.false_positives)
    }

    /// `TP / (TP + FN)`; 1.0 when nothing was injected.
    #[must_use]
    pub fn recall(&self) -> f64 {
        ratio_or_one(self.true_positives, self.true_positives + self.false_negatives)
    }

    #[must_use]
    pub fn f1_score(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r > 0.0 {
            2.0 * p * r / (p + r)
        } else {
            0.0
        }
    }

    /// Flagged over evaluated.
    #[must_use]
    pub fn detection_rate(&self) -> f64 {
        ratio_or_zero(
            self.true_positives + self.false_positives,
            self.evaluated(),
        )
    }

    /// `(TP + TN) / evaluated`; 0.0 when nothing was evaluated.
    #[must_use]
    pub fn calibration_match(&self) -> f64 {
        ratio_or_zero(self.true_positives + self.true_negatives, self.evaluated())
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio_or_one(num: u64, den: u64) -> f64 {
    if den == 0 {
        1.0
    } else {
        num as f64 / den as f64
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio_or_zero(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

// --- Run ---

/// Ground truth and outcome of one scored cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleRecord {
    pub cycle_id: String,
    pub patterns: Vec<FraudPattern>,
    /// `None` when the batch was rejected or cancelled (not evaluated).
    pub verdict: Option<VerdictKind>,
}

impl CycleRecord {
    #[must_use]
    pub fn injected(&self) -> bool {
        !self.patterns.is_empty()
    }
}

/// Everything a scenario run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationRun {
    pub scenario: Scenario,
    pub cycles: Vec<CycleRecord>,
    pub result: CalibrationPayload,
    pub calibration_receipt: Receipt,
    /// The closing StopRule verdict.
    pub verdict: StopRuleVerdict,
}

impl CalibrationRun {
    /// 1 when the closing verdict HALTs, 0 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(self.verdict.kind == VerdictKind::Halt)
    }
}

/// Run a scenario by name.
///
/// # Errors
///
/// Returns [`CalibrationError::ScenarioNotFound`] for an unknown name,
/// otherwise see [`run_scenario`].
pub fn run_named(
    name: &str,
    settings: &CalibrationSettings,
    config: &PipelineConfig,
    ledger: &mut Ledger,
) -> Result<CalibrationRun, CalibrationError> {
    run_scenario(name.parse()?, settings, config, ledger)
}

/// Run a scenario end to end against `ledger`.
///
/// # Errors
///
/// Returns [`CalibrationError::Halted`] if a cycle HALTs before scoring
/// completes, and pipeline or ledger errors as they occur.
pub fn run_scenario(
    scenario: Scenario,
    settings: &CalibrationSettings,
    config: &PipelineConfig,
    ledger: &mut Ledger,
) -> Result<CalibrationRun, CalibrationError> {
    if settings.cycles == 0 {
        return Err(CalibrationError::Settings {
            detail: "cycles must be at least 1".to_string(),
        });
    }
    let name = scenario.as_str();
    let mut pipeline = Pipeline::new(config.clone())?;
    let mut generator = SyntheticGenerator::new(settings.seed);
    let cancel = CancellationToken::new();
    let batch_size = scenario.batch_size(settings);

    for w in 0..settings.warmup_batches {
        let id = format!("{name}-warmup-{w:03}");
        let batch = generator.clean_batch(name, &id, batch_size);
        let report = pipeline.run_cycle(ledger, &id, &batch, &cancel)?;
        halt_check(&id, report.verdict())?;
    }

    let fraud_cycles = choose_fraud_cycles(
        &mut generator.rng,
        settings.cycles,
        scenario.injection_rate(),
    );

    let mut confusion = Confusion::default();
    let mut cycles = Vec::with_capacity(settings.cycles);
    let mut skipped = 0_u64;
    let mut injected_count = 0_usize;
    for i in 0..settings.cycles {
        let id = format!("{name}-{i:04}");
        let (batch, patterns) = if scenario == Scenario::Godel {
            (
                generator.degenerate_batch(name, &id, batch_size, i),
                Vec::new(),
            )
        } else {
            let mut batch = generator.clean_batch(name, &id, batch_size);
            let patterns = if fraud_cycles.contains(&i) {
                let patterns = scenario.patterns(injected_count);
                injected_count += 1;
                for p in &patterns {
                    generator.inject(&mut batch, *p);
                }
                patterns
            } else {
                Vec::new()
            };
            (batch, patterns)
        };

        let report = pipeline.run_cycle(ledger, &id, &batch, &cancel)?;
        halt_check(&id, report.verdict())?;
        let verdict = match &report.outcome {
            CycleOutcome::Completed { verdict } => Some(verdict.kind),
            CycleOutcome::Rejected { .. } | CycleOutcome::Cancelled { .. } => None,
        };
        match verdict {
            Some(kind) => confusion.record(!patterns.is_empty(), kind != VerdictKind::Continue),
            None => skipped += 1,
        }
        cycles.push(CycleRecord {
            cycle_id: id,
            patterns,
            verdict,
        });
    }

    #[allow(clippy::cast_precision_loss)]
    let injection_rate = injected_count as f64 / settings.cycles as f64;
    let result = CalibrationPayload {
        scenario: name.to_string(),
        cycles: settings.cycles as u64,
        evaluated: confusion.evaluated(),
        skipped,
        injection_rate,
        detection_rate: confusion.detection_rate(),
        precision: confusion.precision(),
        recall: confusion.recall(),
        f1_score: confusion.f1_score(),
        calibration_match: confusion.calibration_match(),
        true_positives: confusion.true_positives,
        false_positives: confusion.false_positives,
        true_negatives: confusion.true_negatives,
        false_negatives: confusion.false_negatives,
        config_digest: config.snapshot_digest()?,
    };
    let calibration_receipt = ledger.append(&ReceiptPayload::Calibration(result.clone()))?;
    let closing = pipeline.close_calibration(
        ledger,
        &format!("{name}-calibration"),
        result.calibration_match,
        &calibration_receipt,
    )?;
    let verdict = closing
        .verdict()
        .cloned()
        .ok_or_else(|| CalibrationError::Settings {
            detail: "closing cycle produced no verdict".to_string(),
        })?;

    info!(
        scenario = name,
        evaluated = result.evaluated,
        skipped = result.skipped,
        detection_rate = result.detection_rate,
        precision = result.precision,
        recall = result.recall,
        calibration_match = result.calibration_match,
        verdict = ?verdict.kind,
        "calibration complete"
    );

    Ok(CalibrationRun {
        scenario,
        cycles,
        result,
        calibration_receipt,
        verdict,
    })
}

fn halt_check(cycle_id: &str, verdict: Option<&StopRuleVerdict>) -> Result<(), CalibrationError> {
    match verdict {
        Some(v) if v.kind == VerdictKind::Halt => Err(CalibrationError::Halted {
            cycle_id: cycle_id.to_string(),
            condition: v.condition.clone(),
        }),
        _ => Ok(()),
    }
}

/// Exactly `round(rate × cycles)` distinct cycle indices, sorted.
fn choose_fraud_cycles(rng: &mut Xorshift64, cycles: usize, rate: f64) -> Vec<usize> {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let count = ((rate * cycles as f64).round() as usize).min(cycles);
    let mut idx: Vec<usize> = (0..cycles).collect();
    rng.shuffle(&mut idx);
    idx.truncate(count);
    idx.sort_unstable();
    idx
}
