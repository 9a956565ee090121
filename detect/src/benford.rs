//! Digit-conformity detector (Benford's law).
//!
//! Naturally occurring financial amounts have leading digits distributed as
//! `P(d) = log10(1 + 1/d)`. Fabricated amounts rarely do. The detector
//! counts the leading (or second) significant digit of every qualifying
//! amount in a batch and compares the counts against the Benford
//! expectation with a chi-squared goodness-of-fit test.
//!
//! Qualifying values are numeric, finite and non-zero; the sign is ignored.
//! Text amounts such as `"$1,250.00"` qualify through
//! [`FieldValue::as_f64`](evidentia_kernel::proof::dual_hash::FieldValue::as_f64).
//!
//! Round-number screening runs alongside the digit test and is reported in
//! the receipt, but does not affect the verdict.

use serde::{Deserialize, Serialize};

use evidentia_kernel::finding::{
    BenfordPayload, DetectorKind, DigitPosition, Finding, FindingDetail, Verdict,
};
use evidentia_kernel::proof::dual_hash::{DualHash, RecordBatch};

use crate::stats::{chi_squared, chi_squared_survival};
use crate::suite::Detector;

/// Common approval limits that fabricated amounts tend to sit just below.
pub const APPROVAL_THRESHOLDS: [f64; 7] = [
    1_000.0, 5_000.0, 10_000.0, 25_000.0, 33_000.0, 50_000.0, 100_000.0,
];

/// "Near" a threshold means within this fraction below it.
pub const NEAR_THRESHOLD_BAND: f64 = 0.05;

/// p-value below which a failing batch is escalated to high priority.
pub const HIGH_PRIORITY_P_VALUE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenfordConfig {
    /// FAIL when the chi-squared p-value falls below this.
    pub p_value_threshold: f64,
    /// Fewer qualifying values than this yields `InsufficientData`.
    pub min_sample_size: u64,
    /// Record field holding the amount.
    pub amount_field: String,
    pub digit_position: DigitPosition,
}

impl Default for BenfordConfig {
    fn default() -> Self {
        Self {
            p_value_threshold: 0.05,
            min_sample_size: 50,
            amount_field: "amount".to_string(),
            digit_position: DigitPosition::First,
        }
    }
}

// --- Digits ---

/// Leading significant digit (1..=9) of a finite non-zero value.
#[must_use]
pub fn first_digit(value: f64) -> Option<u8> {
    significant_digits(value).map(|(first, _)| first)
}

/// Second significant digit (0..=9) of a finite non-zero value.
#[must_use]
pub fn second_digit(value: f64) -> Option<u8> {
    significant_digits(value).map(|(_, second)| second)
}

/// First and second significant digits, read from the shortest round-trip
/// scientific rendering so binary representation noise never leaks in.
fn significant_digits(value: f64) -> Option<(u8, u8)> {
    if !value.is_finite() || value == 0.0 {
        return None;
    }
    let rendered = format!("{:e}", value.abs());
    let mut chars = rendered.chars();
    let first = chars.next()?.to_digit(10)?;
    let second = match chars.next() {
        Some('.') => chars.next().and_then(|c| c.to_digit(10)).unwrap_or(0),
        _ => 0,
    };
    let first = u8::try_from(first).ok()?;
    let second = u8::try_from(second).ok()?;
    (first != 0).then_some((first, second))
}

/// Expected Benford proportions for a digit position.
///
/// First digit: 9 classes (1..=9). Second digit: 10 classes (0..=9),
/// `Σ_{k=1..9} log10(1 + 1/(10k + d))`.
#[must_use]
pub fn expected_proportions(position: DigitPosition) -> Vec<f64> {
    match position {
        DigitPosition::First => (1..=9)
            .map(|d| (1.0 + 1.0 / f64::from(d)).log10())
            .collect(),
        DigitPosition::Second => (0..=9)
            .map(|d| {
                (1..=9)
                    .map(|k| (1.0 + 1.0 / f64::from(10 * k + d)).log10())
                    .sum()
            })
            .collect(),
    }
}

/// Count digits of the qualifying values. Returns one count per class.
#[must_use]
pub fn digit_counts(values: &[f64], position: DigitPosition) -> Vec<u64> {
    let (classes, offset) = match position {
        DigitPosition::First => (9, 1),
        DigitPosition::Second => (10, 0),
    };
    let mut counts = vec![0_u64; classes];
    for value in values {
        let digit = match position {
            DigitPosition::First => first_digit(*value),
            DigitPosition::Second => second_digit(*value),
        };
        if let Some(d) = digit {
            counts[usize::from(d) - offset] += 1;
        }
    }
    counts
}

// --- Test ---

/// Result of a chi-squared digit test over a set of values.
#[derive(Debug, Clone, PartialEq)]
pub struct DigitTest {
    pub position: DigitPosition,
    pub sample_size: u64,
    pub observed_counts: Vec<u64>,
    pub chi_squared: f64,
    pub degrees_of_freedom: u32,
    pub p_value: f64,
}

/// Chi-squared goodness-of-fit of `values` against Benford's law.
///
/// Returns `None` when no value qualifies.
#[must_use]
pub fn digit_test(values: &[f64], position: DigitPosition) -> Option<DigitTest> {
    let observed_counts = digit_counts(values, position);
    let sample_size: u64 = observed_counts.iter().sum();
    if sample_size == 0 {
        return None;
    }
    let expected = expected_proportions(position);
    let statistic = chi_squared(&observed_counts, &expected);
    let degrees_of_freedom = match position {
        DigitPosition::First => 8,
        DigitPosition::Second => 9,
    };
    Some(DigitTest {
        position,
        sample_size,
        observed_counts,
        chi_squared: statistic,
        degrees_of_freedom,
        p_value: chi_squared_survival(statistic, degrees_of_freedom),
    })
}

/// Severity label for a verdict and its p-value.
#[must_use]
pub fn severity(verdict: Verdict, p_value: Option<f64>) -> &'static str {
    match (verdict, p_value) {
        (Verdict::InsufficientData, _) => "insufficient_data",
        (Verdict::Pass, _) => "pass",
        (Verdict::Fail, Some(p)) if p < HIGH_PRIORITY_P_VALUE => "high_priority_anomaly",
        (Verdict::Fail, _) => "flag_for_investigation",
    }
}

// --- Round numbers ---

/// Round-number screening over the qualifying values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundNumberScreen {
    /// Fraction of values that are exact multiples of 1,000.
    pub exact_thousands_fraction: f64,
    /// Values within [`NEAR_THRESHOLD_BAND`] below an approval threshold.
    pub near_threshold_count: u64,
}

#[must_use]
pub fn detect_round_numbers(values: &[f64]) -> RoundNumberScreen {
    let qualifying: Vec<f64> = values
        .iter()
        .filter(|v| v.is_finite() && **v != 0.0)
        .map(|v| v.abs())
        .collect();
    if qualifying.is_empty() {
        return RoundNumberScreen {
            exact_thousands_fraction: 0.0,
            near_threshold_count: 0,
        };
    }
    let exact = qualifying
        .iter()
        .filter(|v| **v >= 1_000.0 && (*v % 1_000.0) == 0.0)
        .count();
    let near = qualifying
        .iter()
        .filter(|v| {
            APPROVAL_THRESHOLDS
                .iter()
                .any(|t| **v >= t * (1.0 - NEAR_THRESHOLD_BAND) && **v < *t)
        })
        .count();
    #[allow(clippy::cast_precision_loss)]
    let exact_thousands_fraction = exact as f64 / qualifying.len() as f64;
    RoundNumberScreen {
        exact_thousands_fraction,
        near_threshold_count: near as u64,
    }
}

/// Qualifying amounts of a batch, in record order.
#[must_use]
pub fn extract_amounts(batch: &RecordBatch, field: &str) -> Vec<f64> {
    batch
        .records
        .iter()
        .filter_map(|r| r.get(field).and_then(|v| v.as_f64()))
        .filter(|v| v.is_finite() && *v != 0.0)
        .collect()
}

// --- Detector ---

#[derive(Debug, Clone, Default)]
pub struct BenfordDetector {
    config: BenfordConfig,
}

impl BenfordDetector {
    #[must_use]
    pub fn new(config: BenfordConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &BenfordConfig {
        &self.config
    }

    /// Score a set of amounts. `batch_id` and `evidence` are carried into
    /// the payload unchanged.
    #[must_use]
    pub fn score(&self, batch_id: &str, evidence: &DualHash, values: &[f64]) -> BenfordPayload {
        let position = self.config.digit_position;
        let screen = detect_round_numbers(values);
        let test = digit_test(values, position);
        let sample_size = test.as_ref().map_or(0, |t| t.sample_size);
        let observed_counts = test
            .as_ref()
            .map_or_else(|| digit_counts(&[], position), |t| t.observed_counts.clone());
        let degrees_of_freedom = match position {
            DigitPosition::First => 8,
            DigitPosition::Second => 9,
        };

        let (chi_sq, p_value, pass_fail) = match test {
            Some(t) if sample_size >= self.config.min_sample_size => {
                let verdict = if t.p_value < self.config.p_value_threshold {
                    Verdict::Fail
                } else {
                    Verdict::Pass
                };
                (Some(t.chi_squared), Some(t.p_value), verdict)
            }
            _ => (None, None, Verdict::InsufficientData),
        };

        BenfordPayload {
            batch_id: batch_id.to_string(),
            evidence: evidence.clone(),
            digit_position: position,
            sample_size,
            observed_counts,
            chi_squared: chi_sq,
            degrees_of_freedom,
            p_value,
            threshold: self.config.p_value_threshold,
            pass_fail,
            severity: severity(pass_fail, p_value).to_string(),
            exact_thousands_fraction: screen.exact_thousands_fraction,
            near_threshold_count: screen.near_threshold_count,
        }
    }
}

impl Detector for BenfordDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Benford
    }

    fn analyze(&self, batch: &RecordBatch, evidence: &DualHash) -> Finding {
        let values = extract_amounts(batch, &self.config.amount_field);
        let payload = self.score(&batch.batch_id, evidence, &values);
        tracing::debug!(
            batch_id = %batch.batch_id,
            sample_size = payload.sample_size,
            p_value = ?payload.p_value,
            verdict = ?payload.pass_fail,
            "benford scored"
        );
        Finding::new(FindingDetail::Benford(payload))
    }
}
