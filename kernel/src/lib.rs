//! Evidentia Kernel: the evidentiary core of the fraud-detection pipeline.
//!
//! # API Surface
//!
//! - [`proof::dual_hash::dual_hash`] -- order-sensitive + content hash of a record batch
//! - [`ledger::Ledger`] -- append-only, hash-chained receipt log with Merkle anchoring
//! - [`stoprule::StopRuleEngine`] -- CONTINUE / FLAG / HALT classification of a cycle
//!
//! # Module Dependency Direction
//!
//! `proof` ← `finding` ← `receipt` ← `ledger`, `stoprule`
//!
//! One-way only. `proof` depends on nothing internal. `ledger` and `stoprule`
//! never depend on each other: the pipeline hands the committed verdict
//! receipt from one to the other.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod finding;
pub mod ledger;
pub mod proof;
pub mod receipt;
pub mod stoprule;
