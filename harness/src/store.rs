//! JSONL receipt persistence.
//!
//! One canonical receipt JSON per line, in sequence order. A persisted file
//! is replayed with [`read_jsonl`] and checked end to end with
//! [`verify_jsonl`]; neither needs a live ledger.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use evidentia_kernel::ledger::{verify_receipts, ChainError, ReceiptStore, StoreError};
use evidentia_kernel::receipt::Receipt;

/// Error reading a persisted receipt file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JsonlError {
    #[error("cannot read {path}: {detail}")]
    Io { path: String, detail: String },
    #[error("line {line}: {detail}")]
    Malformed { line: usize, detail: String },
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Append-only JSONL store. Each receipt is written and synced before the
/// ledger commits it.
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    file: File,
}

impl JsonlStore {
    /// Create (or truncate) the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the file cannot be opened for writing.
    pub fn create(path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| StoreError {
                detail: format!("{}: {e}", path.display()),
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReceiptStore for JsonlStore {
    fn persist(&mut self, receipt: &Receipt) -> Result<(), StoreError> {
        let fail = |detail: String| StoreError {
            detail: format!("{}: {detail}", self.path.display()),
        };
        let mut line = receipt
            .to_canonical_json()
            .map_err(|e| fail(e.to_string()))?;
        line.push(b'\n');
        self.file.write_all(&line).map_err(|e| fail(e.to_string()))?;
        self.file.sync_data().map_err(|e| fail(e.to_string()))
    }
}

/// Parse a JSONL receipt file. Blank lines are skipped.
///
/// # Errors
///
/// Returns [`JsonlError::Io`] if the file cannot be read and
/// [`JsonlError::Malformed`] for the first line that is not a receipt.
pub fn read_jsonl(path: &Path) -> Result<Vec<Receipt>, JsonlError> {
    let io = |e: std::io::Error| JsonlError::Io {
        path: path.display().to_string(),
        detail: e.to_string(),
    };
    let reader = BufReader::new(File::open(path).map_err(io)?);
    let mut receipts = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line.map_err(io)?;
        if line.trim().is_empty() {
            continue;
        }
        let receipt: Receipt =
            serde_json::from_str(&line).map_err(|e| JsonlError::Malformed {
                line: n + 1,
                detail: e.to_string(),
            })?;
        receipts.push(receipt);
    }
    Ok(receipts)
}

/// Read and verify a persisted chain from genesis.
///
/// # Errors
///
/// Returns the read error, or [`JsonlError::Chain`] naming the first broken
/// link or hash mismatch.
pub fn verify_jsonl(path: &Path) -> Result<Vec<Receipt>, JsonlError> {
    let receipts = read_jsonl(path)?;
    verify_receipts(&receipts)?;
    Ok(receipts)
}
