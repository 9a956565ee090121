//! Pipeline configuration.
//!
//! Every field has a default; a JSON file only needs to name what it
//! changes. The canonical form of the full configuration is hashed into a
//! snapshot digest that calibration receipts record, so a calibration
//! result is always bound to the thresholds that produced it.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use evidentia_detect::benford::BenfordConfig;
use evidentia_detect::entropy::EntropyConfig;
use evidentia_detect::network::NetworkConfig;
use evidentia_kernel::proof::canon::canonical_json_of;
use evidentia_kernel::proof::hash::{canonical_hash, ContentHash, HashDomain};
use evidentia_kernel::stoprule::DEFAULT_CALIBRATION_THRESHOLD;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub benford: BenfordConfig,
    pub entropy: EntropyConfig,
    pub network: NetworkConfig,
    /// Calibration match below this halts a calibration run.
    pub calibration_threshold: f64,
    /// How long the StopRule checkpoint waits for all detectors.
    pub detector_timeout_ms: u64,
    /// Anchor after this many completed cycles (HALT always anchors).
    pub anchor_every_cycles: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            benford: BenfordConfig::default(),
            entropy: EntropyConfig::default(),
            network: NetworkConfig::default(),
            calibration_threshold: DEFAULT_CALIBRATION_THRESHOLD,
            detector_timeout_ms: 5_000,
            anchor_every_cycles: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {detail}")]
    Read { path: String, detail: String },
    #[error("config parse error: {detail}")]
    Parse { detail: String },
    #[error("config field {field}: {detail}")]
    Invalid { field: &'static str, detail: String },
    #[error("config canonicalization failed: {detail}")]
    Canon { detail: String },
}

fn invalid(field: &'static str, detail: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        detail: detail.into(),
    }
}

fn check_unit_open(field: &'static str, v: f64) -> Result<(), ConfigError> {
    if v.is_finite() && v > 0.0 && v < 1.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("{v} is outside (0, 1)")))
    }
}

fn check_name(field: &'static str, v: &str) -> Result<(), ConfigError> {
    if v.trim().is_empty() {
        Err(invalid(field, "must not be empty"))
    } else {
        Ok(())
    }
}

impl PipelineConfig {
    /// Parse and validate a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON or unknown keys and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            detail: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, otherwise
    /// see [`PipelineConfig::from_json_str`].
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        Self::from_json_str(&json)
    }

    /// Reject values the detectors cannot work with.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Invalid`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit_open("benford.p_value_threshold", self.benford.p_value_threshold)?;
        if self.benford.min_sample_size == 0 {
            return Err(invalid("benford.min_sample_size", "must be at least 1"));
        }
        check_name("benford.amount_field", &self.benford.amount_field)?;

        let z = self.entropy.z_score_threshold;
        if !(z.is_finite() && z > 0.0) {
            return Err(invalid("entropy.z_score_threshold", format!("{z} must be > 0")));
        }
        let fallback = self.entropy.zero_stddev_fallback;
        if !(fallback.is_finite() && fallback > 0.0) {
            return Err(invalid(
                "entropy.zero_stddev_fallback",
                format!("{fallback} must be > 0"),
            ));
        }
        if self.entropy.compression_level > 9 {
            return Err(invalid(
                "entropy.compression_level",
                format!("{} is outside 0..=9", self.entropy.compression_level),
            ));
        }
        if self.entropy.baseline_window < 2 {
            return Err(invalid("entropy.baseline_window", "must hold at least 2 samples"));
        }

        let c = self.network.centrality_threshold;
        if !(c.is_finite() && c > 0.0 && c <= 1.0) {
            return Err(invalid(
                "network.centrality_threshold",
                format!("{c} is outside (0, 1]"),
            ));
        }
        check_name("network.source_field", &self.network.source_field)?;
        check_name("network.target_field", &self.network.target_field)?;

        let m = self.calibration_threshold;
        if !(m.is_finite() && (0.0..=1.0).contains(&m)) {
            return Err(invalid("calibration_threshold", format!("{m} is outside [0, 1]")));
        }
        if self.detector_timeout_ms == 0 {
            return Err(invalid("detector_timeout_ms", "must be positive"));
        }
        if self.anchor_every_cycles == 0 {
            return Err(invalid("anchor_every_cycles", "must be at least 1"));
        }
        Ok(())
    }

    #[must_use]
    pub fn detector_timeout(&self) -> Duration {
        Duration::from_millis(self.detector_timeout_ms)
    }

    /// Digest of the canonical JSON form of this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Canon`] if a value cannot be canonicalized.
    pub fn snapshot_digest(&self) -> Result<ContentHash, ConfigError> {
        let bytes = canonical_json_of(self).map_err(|e| ConfigError::Canon {
            detail: e.to_string(),
        })?;
        Ok(canonical_hash(HashDomain::ConfigSnapshot, &bytes))
    }
}
