//! Evidentia Detect: the three independent statistical detectors.
//!
//! - [`benford`] -- digit-distribution conformity (chi-squared vs Benford's law)
//! - [`entropy`] -- compression-ratio anomaly against a rolling baseline, plus NCD
//! - [`network`] -- hub centrality and edge-weight entropy of relationship graphs
//!
//! Every detector implements [`suite::Detector`]: a pure function from a
//! record batch to a [`evidentia_kernel::finding::Finding`]. Statistical
//! failures are FAIL verdicts, never errors. Detectors do not touch the
//! ledger; the pipeline appends their findings.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod benford;
pub mod entropy;
pub mod network;
pub mod stats;
pub mod suite;
