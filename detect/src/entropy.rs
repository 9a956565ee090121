//! Compression-anomaly detector.
//!
//! The gzip compression ratio of a serialized batch is a practical proxy for
//! its Kolmogorov complexity. Batches produced by the same process compress
//! alike; fabricated identifiers or synthetic filler shift the ratio. The
//! detector scores a batch's ratio against a [`RollingBaseline`] of ratios
//! from batches that previously passed, and flags one-sided upward
//! deviations (`z > threshold`).
//!
//! Also provided: normalized compression distance ([`ncd`]), byte-level
//! Shannon entropy, and a windowed scan that scores fixed-size slices of a
//! byte stream against each other.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use evidentia_kernel::finding::{DetectorKind, EntropyPayload, Finding, FindingDetail, Verdict};
use evidentia_kernel::proof::dual_hash::{
    canonical_records, CanonicalizationError, DualHash, Record, RecordBatch,
};

use crate::stats::shannon_entropy_bits;
use crate::suite::Detector;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntropyConfig {
    /// FAIL when the z-score exceeds this.
    pub z_score_threshold: f64,
    /// Batches with fewer records yield `InsufficientData`.
    pub min_records: u64,
    /// Stands in for the baseline standard deviation when that is zero.
    pub zero_stddev_fallback: f64,
    /// gzip level, 0..=9.
    pub compression_level: u32,
    /// Number of most recent passing ratios the baseline keeps.
    pub baseline_window: usize,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            z_score_threshold: 2.0,
            min_records: 50,
            zero_stddev_fallback: 0.01,
            compression_level: 9,
            baseline_window: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntropyError {
    #[error("compression failed: {detail}")]
    Compression { detail: String },
    #[error("batch serialization failed: {0}")]
    Serialize(#[from] CanonicalizationError),
}

// --- Compression ---

/// gzip-compressed length of `data`.
///
/// # Errors
///
/// Returns [`EntropyError::Compression`] if the encoder fails.
pub fn compressed_len(data: &[u8], level: u32) -> Result<usize, EntropyError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level.min(9)));
    encoder
        .write_all(data)
        .map_err(|e| EntropyError::Compression {
            detail: e.to_string(),
        })?;
    let compressed = encoder.finish().map_err(|e| EntropyError::Compression {
        detail: e.to_string(),
    })?;
    Ok(compressed.len())
}

/// `compressed / original`. An empty input has ratio 1.0.
///
/// # Errors
///
/// Returns [`EntropyError::Compression`] if the encoder fails.
pub fn compression_ratio(data: &[u8], level: u32) -> Result<f64, EntropyError> {
    if data.is_empty() {
        return Ok(1.0);
    }
    let compressed = compressed_len(data, level)?;
    #[allow(clippy::cast_precision_loss)]
    let ratio = compressed as f64 / data.len() as f64;
    Ok(ratio)
}

/// Normalized compression distance:
/// `(C(xy) − min(C(x), C(y))) / max(C(x), C(y))`.
///
/// Near 0 for near-identical inputs, near 1 for unrelated ones. Either input
/// empty yields 1.0.
///
/// # Errors
///
/// Returns [`EntropyError::Compression`] if the encoder fails.
pub fn ncd(x: &[u8], y: &[u8], level: u32) -> Result<f64, EntropyError> {
    if x.is_empty() || y.is_empty() {
        return Ok(1.0);
    }
    let cx = compressed_len(x, level)?;
    let cy = compressed_len(y, level)?;
    let mut xy = Vec::with_capacity(x.len() + y.len());
    xy.extend_from_slice(x);
    xy.extend_from_slice(y);
    let cxy = compressed_len(&xy, level)?;
    let (lo, hi) = (cx.min(cy), cx.max(cy));
    #[allow(clippy::cast_precision_loss)]
    let distance = cxy.saturating_sub(lo) as f64 / hi as f64;
    Ok(distance)
}

/// Shannon entropy of the byte distribution, bits per byte (0..=8).
#[must_use]
pub fn byte_entropy(data: &[u8]) -> Option<f64> {
    let mut counts = [0_u64; 256];
    for b in data {
        counts[usize::from(*b)] += 1;
    }
    #[allow(clippy::cast_precision_loss)]
    let weights = counts.map(|c| c as f64);
    shannon_entropy_bits(weights)
}

/// Canonical bytes of a batch: one canonical record per line.
///
/// # Errors
///
/// Returns [`CanonicalizationError`] if a record holds a non-finite number.
pub fn serialize_batch(records: &[Record]) -> Result<Vec<u8>, CanonicalizationError> {
    let lines = canonical_records(records)?;
    Ok(lines.join(&b'\n'))
}

/// Severity tier of a z-score.
#[must_use]
pub fn severity(z_score: f64) -> &'static str {
    let z = z_score.abs();
    if z > 3.0 {
        "critical"
    } else if z > 2.0 {
        "high"
    } else if z > 1.5 {
        "medium"
    } else {
        "low"
    }
}

// --- Baseline ---

/// Sample mean and standard deviation over a bounded window of ratios.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingBaseline {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl RollingBaseline {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Baseline pre-filled from a reference population. Non-finite values are
    /// skipped.
    #[must_use]
    pub fn from_samples(capacity: usize, samples: impl IntoIterator<Item = f64>) -> Self {
        let mut baseline = Self::new(capacity);
        for s in samples {
            baseline.observe(s);
        }
        baseline
    }

    /// Add a sample, evicting the oldest when full.
    pub fn observe(&mut self, ratio: f64) {
        if !ratio.is_finite() {
            return;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(ratio);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.samples.len() as f64;
        Some(self.samples.iter().sum::<f64>() / n)
    }

    /// Sample standard deviation (n − 1). `None` below two samples.
    #[must_use]
    pub fn stddev(&self) -> Option<f64> {
        if self.samples.len() < 2 {
            return None;
        }
        let mean = self.mean()?;
        #[allow(clippy::cast_precision_loss)]
        let n = self.samples.len() as f64;
        let var = self
            .samples
            .iter()
            .map(|s| (s - mean) * (s - mean))
            .sum::<f64>()
            / (n - 1.0);
        Some(var.sqrt())
    }

    /// `(x − mean) / stddev`. `None` below two samples.
    ///
    /// A baseline of identical samples has no spread; `zero_fallback` is
    /// used as its standard deviation instead.
    #[must_use]
    pub fn z_score(&self, x: f64, zero_fallback: f64) -> Option<f64> {
        let mean = self.mean()?;
        let mut sd = self.stddev()?;
        if sd < f64::EPSILON {
            sd = zero_fallback;
        }
        if sd <= 0.0 {
            return Some(0.0);
        }
        Some((x - mean) / sd)
    }
}

/// z-score of every member of a population against the population itself.
#[must_use]
pub fn score_population(values: &[f64], zero_fallback: f64) -> Vec<f64> {
    let baseline = RollingBaseline::from_samples(values.len(), values.iter().copied());
    values
        .iter()
        .map(|v| baseline.z_score(*v, zero_fallback).unwrap_or(0.0))
        .collect()
}

// --- Window scan ---

/// One slice of a windowed scan.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowScore {
    pub offset: usize,
    pub len: usize,
    pub compression_ratio: f64,
    pub z_score: f64,
}

/// Score fixed-size windows of `data` against each other.
///
/// Windows whose ratio deviates from the rest of the stream mark regions
/// where the generating pattern changed. The last window may be short.
///
/// # Errors
///
/// Returns [`EntropyError::Compression`] if the encoder fails.
pub fn scan_windows(
    data: &[u8],
    window: usize,
    level: u32,
    zero_fallback: f64,
) -> Result<Vec<WindowScore>, EntropyError> {
    let window = window.max(1);
    let ratios = data
        .chunks(window)
        .map(|chunk| compression_ratio(chunk, level))
        .collect::<Result<Vec<_>, _>>()?;
    let z_scores = score_population(&ratios, zero_fallback);
    Ok(data
        .chunks(window)
        .enumerate()
        .zip(ratios.into_iter().zip(z_scores))
        .map(|((i, chunk), (compression_ratio, z_score))| WindowScore {
            offset: i * window,
            len: chunk.len(),
            compression_ratio,
            z_score,
        })
        .collect())
}

// --- Detector ---

/// Entropy detector with its own baseline of passing ratios.
///
/// The baseline grows through [`EntropyDetector::observe`], or through
/// [`Detector::learn`] with a committed finding whose ratio did not fail.
#[derive(Debug)]
pub struct EntropyDetector {
    config: EntropyConfig,
    baseline: Mutex<RollingBaseline>,
}

impl Default for EntropyDetector {
    fn default() -> Self {
        Self::new(EntropyConfig::default())
    }
}

impl EntropyDetector {
    #[must_use]
    pub fn new(config: EntropyConfig) -> Self {
        let baseline = RollingBaseline::new(config.baseline_window);
        Self {
            config,
            baseline: Mutex::new(baseline),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EntropyConfig {
        &self.config
    }

    /// Copy of the current baseline.
    #[must_use]
    pub fn baseline(&self) -> RollingBaseline {
        self.baseline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Add a reference ratio to the baseline.
    pub fn observe(&self, ratio: f64) {
        self.baseline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observe(ratio);
    }

    /// Score a batch against a fixed baseline.
    #[must_use]
    pub fn score(
        &self,
        batch: &RecordBatch,
        evidence: &DualHash,
        baseline: &RollingBaseline,
    ) -> EntropyPayload {
        let record_count = batch.records.len() as u64;
        let mut payload = EntropyPayload {
            batch_id: batch.batch_id.clone(),
            evidence: evidence.clone(),
            record_count,
            compression_ratio: None,
            shannon_entropy: None,
            baseline_mean: baseline.mean(),
            baseline_stddev: baseline.stddev(),
            baseline_samples: baseline.len() as u64,
            z_score: None,
            threshold: self.config.z_score_threshold,
            is_anomaly: false,
            severity: "insufficient_data".to_string(),
            pass_fail: Verdict::InsufficientData,
            error: None,
        };

        let measured = serialize_batch(&batch.records)
            .map_err(EntropyError::from)
            .and_then(|bytes| {
                let ratio = compression_ratio(&bytes, self.config.compression_level)?;
                Ok((ratio, byte_entropy(&bytes)))
            });
        let (ratio, shannon) = match measured {
            Ok(m) => m,
            Err(e) => {
                payload.error = Some(e.to_string());
                payload.is_anomaly = true;
                payload.severity = "critical".to_string();
                payload.pass_fail = Verdict::Fail;
                return payload;
            }
        };
        payload.compression_ratio = Some(ratio);
        payload.shannon_entropy = shannon;

        if record_count < self.config.min_records {
            return payload;
        }
        let Some(z) = baseline.z_score(ratio, self.config.zero_stddev_fallback) else {
            return payload;
        };
        let is_anomaly = z > self.config.z_score_threshold;
        payload.z_score = Some(z);
        payload.is_anomaly = is_anomaly;
        payload.severity = severity(z).to_string();
        payload.pass_fail = if is_anomaly {
            Verdict::Fail
        } else {
            Verdict::Pass
        };
        payload
    }
}

impl Detector for EntropyDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Entropy
    }

    fn analyze(&self, batch: &RecordBatch, evidence: &DualHash) -> Finding {
        let baseline = self.baseline();
        let payload = self.score(batch, evidence, &baseline);
        tracing::debug!(
            batch_id = %batch.batch_id,
            ratio = ?payload.compression_ratio,
            z_score = ?payload.z_score,
            verdict = ?payload.pass_fail,
            "entropy scored"
        );
        Finding::new(FindingDetail::Entropy(payload))
    }

    /// Admit the finding's ratio into the baseline. Scored passes qualify,
    /// and so do full-size batches that were only too early to score; a
    /// FAIL never enters the reference.
    fn learn(&self, finding: &Finding) -> bool {
        let FindingDetail::Entropy(payload) = &finding.detail else {
            return false;
        };
        let admissible = match payload.pass_fail {
            Verdict::Pass => true,
            Verdict::InsufficientData => payload.record_count >= self.config.min_records,
            Verdict::Fail => false,
        };
        match payload.compression_ratio {
            Some(ratio) if admissible && payload.error.is_none() => {
                self.observe(ratio);
                true
            }
            _ => false,
        }
    }
}
