//! Detector findings: the typed output of one detector over one batch.
//!
//! A [`Finding`] is transient. It only becomes visible to the rest of the
//! system once its [`FindingDetail`] is appended to the ledger as a
//! `benford`, `entropy` or `network` receipt.

use serde::{Deserialize, Serialize};

use crate::proof::dual_hash::DualHash;

/// The three independent detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Benford,
    Entropy,
    Network,
}

impl DetectorKind {
    /// All detectors, in the fixed order their receipts are appended.
    pub const ALL: [DetectorKind; 3] = [Self::Benford, Self::Entropy, Self::Network];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Benford => "benford",
            Self::Entropy => "entropy",
            Self::Network => "network",
        }
    }
}

impl std::fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Threshold comparison outcome of a detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    Fail,
    /// Too few qualifying values for the statistic to mean anything.
    InsufficientData,
}

/// Which digit the digit-conformity test examined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigitPosition {
    First,
    Second,
}

/// Payload of a `benford` receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenfordPayload {
    pub batch_id: String,
    pub evidence: DualHash,
    pub digit_position: DigitPosition,
    pub sample_size: u64,
    /// Observed count per digit class (9 classes for first digit, 10 for second).
    pub observed_counts: Vec<u64>,
    pub chi_squared: Option<f64>,
    pub degrees_of_freedom: u32,
    pub p_value: Option<f64>,
    pub threshold: f64,
    pub pass_fail: Verdict,
    pub severity: String,
    /// Fraction of qualifying values that are exact multiples of 1,000.
    pub exact_thousands_fraction: f64,
    /// Values sitting within 5% below a common approval threshold.
    pub near_threshold_count: u64,
}

/// Payload of an `entropy` receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntropyPayload {
    pub batch_id: String,
    pub evidence: DualHash,
    pub record_count: u64,
    pub compression_ratio: Option<f64>,
    /// Shannon entropy of the serialized batch, bits per byte.
    pub shannon_entropy: Option<f64>,
    pub baseline_mean: Option<f64>,
    pub baseline_stddev: Option<f64>,
    pub baseline_samples: u64,
    pub z_score: Option<f64>,
    pub threshold: f64,
    pub is_anomaly: bool,
    pub severity: String,
    pub pass_fail: Verdict,
    /// Set when serialization or compression failed; the verdict is then FAIL.
    pub error: Option<String>,
}

/// A node whose centrality exceeded the hub threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubNode {
    pub node: String,
    pub centrality: f64,
}

/// Payload of a `network` receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkPayload {
    pub batch_id: String,
    pub evidence: DualHash,
    pub measure: String,
    pub node_count: u64,
    pub edge_count: u64,
    /// Shannon entropy of the edge-weight distribution, bits.
    pub graph_entropy: Option<f64>,
    /// `graph_entropy / log2(distinct edges)`, in `[0, 1]`.
    pub normalized_entropy: Option<f64>,
    pub max_centrality: Option<f64>,
    pub hubs: Vec<HubNode>,
    pub threshold: f64,
    pub pass_fail: Verdict,
}

/// Detector-specific body of a finding (and of its receipt).
#[derive(Debug, Clone, PartialEq)]
pub enum FindingDetail {
    Benford(BenfordPayload),
    Entropy(EntropyPayload),
    Network(NetworkPayload),
}

/// One detector's result over one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub detector: DetectorKind,
    pub verdict: Verdict,
    /// Headline statistic: p-value, z-score or maximum centrality.
    pub statistic: Option<f64>,
    pub threshold: f64,
    /// Dual hash of the batch examined.
    pub evidence: DualHash,
    pub detail: FindingDetail,
}

impl Finding {
    /// Build a finding from its detail; the summary fields are read from it.
    #[must_use]
    pub fn new(detail: FindingDetail) -> Self {
        let (detector, verdict, statistic, threshold, evidence) = match &detail {
            FindingDetail::Benford(p) => (
                DetectorKind::Benford,
                p.pass_fail,
                p.p_value,
                p.threshold,
                p.evidence.clone(),
            ),
            FindingDetail::Entropy(p) => (
                DetectorKind::Entropy,
                p.pass_fail,
                p.z_score,
                p.threshold,
                p.evidence.clone(),
            ),
            FindingDetail::Network(p) => (
                DetectorKind::Network,
                p.pass_fail,
                p.max_centrality,
                p.threshold,
                p.evidence.clone(),
            ),
        };
        Self {
            detector,
            verdict,
            statistic,
            threshold,
            evidence,
            detail,
        }
    }

    #[must_use]
    pub fn is_fail(&self) -> bool {
        self.verdict == Verdict::Fail
    }
}
