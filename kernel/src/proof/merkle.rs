//! Binary Merkle tree over receipt self-hashes.
//!
//! # Construction
//!
//! - Leaf:  `H(MerkleLeaf || leaf_string)` where `leaf_string` is the
//!   `"sha256:<hex>"` form of the receipt self-hash.
//! - Node:  `H(MerkleNode || left || right)` over raw 32-byte children.
//! - Odd levels duplicate their last node before pairing.
//! - Empty leaf set: `H(MerkleEmpty)`.
//!
//! Leaf and node prefixes differ, so an interior node can never be passed
//! off as a leaf. Leaves are taken in emission order; the root is a pure
//! function of the ordered leaf sequence.

use serde::{Deserialize, Serialize};

use super::hash::{raw_hash, raw_hash2, ContentHash, HashDomain};

fn leaf_digest(leaf: &ContentHash) -> [u8; 32] {
    raw_hash(HashDomain::MerkleLeaf, leaf.as_str().as_bytes())
}

fn node_digest(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    raw_hash2(HashDomain::MerkleNode, left, right)
}

fn next_level(level: &[[u8; 32]]) -> Vec<[u8; 32]> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => node_digest(left, right),
            [only] => node_digest(only, only),
            _ => unreachable!("chunks(2) yields one or two elements"),
        })
        .collect()
}

/// Merkle root over the ordered leaves.
#[must_use]
pub fn merkle_root(leaves: &[ContentHash]) -> ContentHash {
    if leaves.is_empty() {
        return ContentHash::from_digest(&raw_hash(HashDomain::MerkleEmpty, b""));
    }
    let mut level: Vec<[u8; 32]> = leaves.iter().map(leaf_digest).collect();
    while level.len() > 1 {
        level = next_level(&level);
    }
    ContentHash::from_digest(&level[0])
}

/// Which side the sibling sits on when folding a proof upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiblingSide {
    Left,
    Right,
}

/// One step of an inclusion proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub side: SiblingSide,
    pub sibling: ContentHash,
}

/// Proof that a leaf at `leaf_index` is included under a root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    pub leaf_index: usize,
    pub leaf_count: usize,
    pub steps: Vec<ProofStep>,
}

/// Build an inclusion proof for `leaves[index]`.
///
/// Returns `None` if `index` is out of range.
#[must_use]
pub fn inclusion_proof(leaves: &[ContentHash], index: usize) -> Option<InclusionProof> {
    if index >= leaves.len() {
        return None;
    }
    let mut level: Vec<[u8; 32]> = leaves.iter().map(leaf_digest).collect();
    let mut idx = index;
    let mut steps = Vec::new();
    while level.len() > 1 {
        let step = if idx % 2 == 0 {
            // A missing right sibling is the duplicated node itself.
            let sibling = level.get(idx + 1).unwrap_or(&level[idx]);
            ProofStep {
                side: SiblingSide::Right,
                sibling: ContentHash::from_digest(sibling),
            }
        } else {
            ProofStep {
                side: SiblingSide::Left,
                sibling: ContentHash::from_digest(&level[idx - 1]),
            }
        };
        steps.push(step);
        level = next_level(&level);
        idx /= 2;
    }
    Some(InclusionProof {
        leaf_index: index,
        leaf_count: leaves.len(),
        steps,
    })
}

/// Verify that `leaf` folds up to `root` along `proof`.
#[must_use]
pub fn verify_inclusion(leaf: &ContentHash, proof: &InclusionProof, root: &ContentHash) -> bool {
    let mut acc = leaf_digest(leaf);
    for step in &proof.steps {
        let Some(sibling) = step.sibling.digest_bytes() else {
            return false;
        };
        acc = match step.side {
            SiblingSide::Left => node_digest(&sibling, &acc),
            SiblingSide::Right => node_digest(&acc, &sibling),
        };
    }
    ContentHash::from_digest(&acc) == *root
}
