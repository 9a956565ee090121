//! Proof module: canonical JSON, domain-separated hashing, dual hashing, Merkle trees.
//!
//! Nothing in `proof` depends on receipts or the ledger.

pub mod canon;
pub mod dual_hash;
pub mod hash;
pub mod hash_domain;
pub mod merkle;
