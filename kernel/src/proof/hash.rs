//! Canonical hashing types and the single domain-separated hash function.
//!
//! Algorithm: SHA-256 for every V1 artifact. All digests are computed as
//! `SHA-256(domain_prefix || data)` where `domain_prefix` comes from
//! [`HashDomain`].
//!
//! **Exactly one place defines canonical hashing.** Nothing else in the
//! workspace constructs a `Sha256` hasher for evidence.

use sha2::{Digest, Sha256};

pub use super::hash_domain::HashDomain;

/// Algorithm identifier carried in every [`ContentHash`].
pub const HASH_ALGORITHM: &str = "sha256";

/// A content-addressed hash with algorithm identifier.
///
/// Format: `"algorithm:hex_digest"` (e.g., `"sha256:abcdef..."`)
///
/// Invariant: the inner string always contains exactly one `:` separator,
/// with non-empty substrings on both sides (enforced by [`ContentHash::parse`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash {
    full: String,
    colon: usize,
}

impl ContentHash {
    /// Parse from `"algorithm:hex"` format.
    ///
    /// Returns `None` if the format is invalid (missing colon, extra colon,
    /// empty algorithm, or empty digest).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let colon = s.find(':')?;
        if colon == 0 || colon == s.len() - 1 || s[colon + 1..].contains(':') {
            return None;
        }
        Some(Self {
            full: s.to_string(),
            colon,
        })
    }

    /// Wrap a raw SHA-256 digest.
    #[must_use]
    pub fn from_digest(digest: &[u8; 32]) -> Self {
        let full = format!("{HASH_ALGORITHM}:{}", hex::encode(digest));
        Self {
            colon: HASH_ALGORITHM.len(),
            full,
        }
    }

    /// The all-zero hash: `previous_hash` of the first receipt in a ledger.
    #[must_use]
    pub fn genesis() -> Self {
        Self::from_digest(&[0u8; 32])
    }

    /// The algorithm portion (e.g., "sha256").
    #[must_use]
    pub fn algorithm(&self) -> &str {
        &self.full[..self.colon]
    }

    /// The hex digest portion.
    #[must_use]
    pub fn hex_digest(&self) -> &str {
        &self.full[self.colon + 1..]
    }

    /// The full string representation (`"algorithm:hex_digest"`).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// Decode the digest to raw bytes, if this is a well-formed SHA-256 hash.
    #[must_use]
    pub fn digest_bytes(&self) -> Option<[u8; 32]> {
        if self.algorithm() != HASH_ALGORITHM {
            return None;
        }
        let bytes = hex::decode(self.hex_digest()).ok()?;
        bytes.try_into().ok()
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full)
    }
}

impl serde::Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.full)
    }
}

impl<'de> serde::Deserialize<'de> for ContentHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("malformed content hash: {s:?}")))
    }
}

/// Compute the canonical hash of a byte slice with domain separation.
///
/// Result format: `"sha256:<hex_digest>"`.
#[must_use]
pub fn canonical_hash(domain: HashDomain, data: &[u8]) -> ContentHash {
    ContentHash::from_digest(&raw_hash(domain, data))
}

/// `SHA-256(domain || data)` as raw bytes.
#[must_use]
pub fn raw_hash(domain: HashDomain, data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain.as_bytes());
    hasher.update(data);
    hasher.finalize().into()
}

/// `SHA-256(domain || a || b)` as raw bytes.
#[must_use]
pub fn raw_hash2(domain: HashDomain, a: &[u8], b: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain.as_bytes());
    hasher.update(a);
    hasher.update(b);
    hasher.finalize().into()
}

/// Incremental domain-separated hasher for length-framed sequences.
///
/// Each frame is written as `u64le(len) || bytes`, so frame boundaries are
/// part of the digest.
pub struct FramedHasher {
    inner: Sha256,
}

impl FramedHasher {
    #[must_use]
    pub fn new(domain: HashDomain) -> Self {
        let mut inner = Sha256::new();
        inner.update(domain.as_bytes());
        Self { inner }
    }

    pub fn frame(&mut self, bytes: &[u8]) {
        self.inner.update((bytes.len() as u64).to_le_bytes());
        self.inner.update(bytes);
    }

    #[must_use]
    pub fn finish(self) -> ContentHash {
        let digest: [u8; 32] = self.inner.finalize().into();
        ContentHash::from_digest(&digest)
    }
}
