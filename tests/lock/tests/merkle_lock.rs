//! Merkle anchoring lock tests.
//!
//! Proves:
//! 1. Golden roots for the empty set and a three-leaf (odd) set
//! 2. Same ordered leaves, same root; any leaf change or reorder moves it
//! 3. Every leaf of every size up to 17 has a verifying inclusion proof
//! 4. A ledger anchor equals the root over the cycle's self-hashes

use evidentia_kernel::proof::hash::ContentHash;
use evidentia_kernel::proof::merkle::{inclusion_proof, merkle_root, verify_inclusion};
use evidentia_kernel::receipt::payload::{CancelPayload, MerkleAnchor};
use evidentia_kernel::receipt::{ReceiptPayload, ReceiptType};
use lock_tests::fixtures::fixed_ledger;
use sha2::{Digest, Sha256};

fn leaf(i: u8) -> ContentHash {
    let digest: [u8; 32] = Sha256::digest([i]).into();
    ContentHash::from_digest(&digest)
}

fn leaves(n: u8) -> Vec<ContentHash> {
    (0..n).map(leaf).collect()
}

// --- Golden ---

#[test]
fn golden_empty_root() {
    assert_eq!(
        merkle_root(&[]).as_str(),
        "sha256:96ea87e1726ed92cc2626d9acba592bbe843365eae2316417adfd46580dec9f2"
    );
}

#[test]
fn golden_odd_root() {
    assert_eq!(
        leaf(0).as_str(),
        "sha256:6e340b9cffb37a989ca544e6bb780a2c78901d3fb33738768511a30617afa01d"
    );
    assert_eq!(
        merkle_root(&leaves(3)).as_str(),
        "sha256:827e16c2785c537f25de1b9d8fc61c5e228acb70f09ed3cb51198be086c76ce9"
    );
}

// --- Stability ---

#[test]
fn same_leaves_same_root() {
    for n in 1..=12 {
        assert_eq!(merkle_root(&leaves(n)), merkle_root(&leaves(n)));
    }
}

#[test]
fn any_leaf_change_moves_root() {
    let base = leaves(9);
    let root = merkle_root(&base);
    for i in 0..base.len() {
        let mut changed = base.clone();
        changed[i] = leaf(200);
        assert_ne!(merkle_root(&changed), root, "leaf {i} change not detected");
    }
}

#[test]
fn reorder_moves_root() {
    let base = leaves(4);
    let mut swapped = base.clone();
    swapped.swap(1, 2);
    assert_ne!(merkle_root(&base), merkle_root(&swapped));
}

#[test]
fn single_leaf_is_not_its_own_root() {
    let one = leaves(1);
    assert_ne!(merkle_root(&one), one[0]);
}

// --- Inclusion ---

#[test]
fn every_leaf_has_a_verifying_proof() {
    for n in 1..=17 {
        let set = leaves(n);
        let root = merkle_root(&set);
        for (i, l) in set.iter().enumerate() {
            let proof = inclusion_proof(&set, i).unwrap();
            assert!(verify_inclusion(l, &proof, &root), "n={n} i={i}");
            assert!(!verify_inclusion(&leaf(250), &proof, &root));
        }
        assert!(inclusion_proof(&set, set.len()).is_none());
    }
}

// --- Ledger anchors ---

#[test]
fn ledger_anchor_matches_recomputed_root() {
    let mut ledger = fixed_ledger();
    for i in 0..5 {
        ledger
            .append(&ReceiptPayload::Cancel(CancelPayload {
                cycle_id: format!("c-{i}"),
                stage: "ingest".into(),
                reason: "lock".into(),
            }))
            .unwrap();
    }
    let hashes: Vec<ContentHash> = ledger.committed().iter().map(|r| r.self_hash.clone()).collect();
    let anchor = ledger.anchor("cycle-1").unwrap();
    assert_eq!(anchor.merkle_root, merkle_root(&hashes));
    assert_eq!(anchor.leaf_count, 5);
    assert_eq!((anchor.first_sequence, anchor.last_sequence), (Some(0), Some(4)));

    let receipt = ledger.last().unwrap();
    assert_eq!(receipt.receipt_type, ReceiptType::Anchor);
    let stored: MerkleAnchor = serde_json::from_value(receipt.payload.clone()).unwrap();
    assert_eq!(stored, anchor);
}

#[test]
fn next_anchor_starts_at_previous_anchor_receipt() {
    let mut ledger = fixed_ledger();
    let first = ledger.anchor("empty").unwrap();
    assert_eq!(first.leaf_count, 0);
    assert_eq!(first.merkle_root, merkle_root(&[]));

    let second = ledger.anchor("only-anchor").unwrap();
    assert_eq!(second.leaf_count, 1);
    assert_eq!(second.first_sequence, Some(0));
    assert_eq!(
        second.merkle_root,
        merkle_root(&[ledger.committed()[0].self_hash.clone()])
    );
}
