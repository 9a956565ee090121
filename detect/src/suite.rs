//! The detector seam and the standard three-detector suite.

use std::collections::BTreeMap;
use std::sync::Arc;

use evidentia_kernel::finding::{DetectorKind, Finding};
use evidentia_kernel::proof::dual_hash::{DualHash, RecordBatch};

use crate::benford::{BenfordConfig, BenfordDetector};
use crate::entropy::{EntropyConfig, EntropyDetector};
use crate::network::{NetworkConfig, NetworkDetector};

/// A statistical detector: a pure function from a batch to a finding.
///
/// Implementations never fail. Conditions a detector cannot evaluate are
/// reported as `InsufficientData`; internal errors as FAIL with detail.
pub trait Detector: Send + Sync {
    fn kind(&self) -> DetectorKind;

    fn analyze(&self, batch: &RecordBatch, evidence: &DualHash) -> Finding;

    /// Take in a committed finding of this detector's kind. Returns whether
    /// the detector's state changed; stateless detectors keep the default.
    fn learn(&self, _finding: &Finding) -> bool {
        false
    }
}

/// One detector per [`DetectorKind`].
#[derive(Clone)]
pub struct DetectionSuite {
    detectors: BTreeMap<DetectorKind, Arc<dyn Detector>>,
}

impl std::fmt::Debug for DetectionSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionSuite")
            .field("detectors", &self.detectors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for DetectionSuite {
    fn default() -> Self {
        Self::new(
            BenfordConfig::default(),
            EntropyConfig::default(),
            NetworkConfig::default(),
        )
    }
}

impl DetectionSuite {
    #[must_use]
    pub fn new(benford: BenfordConfig, entropy: EntropyConfig, network: NetworkConfig) -> Self {
        let mut detectors: BTreeMap<DetectorKind, Arc<dyn Detector>> = BTreeMap::new();
        detectors.insert(
            DetectorKind::Benford,
            Arc::new(BenfordDetector::new(benford)),
        );
        detectors.insert(
            DetectorKind::Entropy,
            Arc::new(EntropyDetector::new(entropy)),
        );
        detectors.insert(
            DetectorKind::Network,
            Arc::new(NetworkDetector::new(network)),
        );
        Self { detectors }
    }

    /// Swap in a detector for its kind. Returns the one it replaced; later
    /// learning goes to the new one.
    pub fn replace(&mut self, detector: Arc<dyn Detector>) -> Option<Arc<dyn Detector>> {
        self.detectors.insert(detector.kind(), detector)
    }

    /// Detectors in kind order.
    pub fn detectors(&self) -> impl Iterator<Item = &Arc<dyn Detector>> {
        self.detectors.values()
    }

    /// Run every detector on the calling thread, in kind order.
    #[must_use]
    pub fn run(&self, batch: &RecordBatch, evidence: &DualHash) -> Vec<Finding> {
        self.detectors()
            .map(|d| d.analyze(batch, evidence))
            .collect()
    }

    /// Hand a committed finding to the active detector of its kind.
    /// Returns whether that detector's state changed.
    pub fn learn(&self, finding: &Finding) -> bool {
        self.detectors
            .get(&finding.detector)
            .is_some_and(|d| d.learn(finding))
    }
}
