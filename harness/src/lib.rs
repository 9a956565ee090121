//! Evidentia harness: configuration, the cycle pipeline, calibration runs,
//! receipt persistence and output documents.
//!
//! The harness owns orchestration only. Hashing, receipts, the ledger and
//! the StopRule live in `evidentia-kernel`; the statistics live in
//! `evidentia-detect`.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod calibration;
pub mod config;
pub mod output;
pub mod pipeline;
pub mod rng;
pub mod store;
