//! Dual-hash lock tests.
//!
//! Proves:
//! 1. Golden digests for a fixed batch (byte-level wire lock)
//! 2. Determinism across repeated calls
//! 3. Content hash is permutation-invariant; order hash is not
//! 4. Value tampering moves both hashes
//! 5. Non-finite fields are refused with the record index

use evidentia_kernel::proof::dual_hash::{
    dual_hash, dual_hash_records, dual_hash_value, CanonicalizationError, FieldValue, Record,
};
use lock_tests::fixtures::{batch_of, spread_batch};

fn id_record(id: i64, vendor: &str) -> Record {
    let mut r = Record::new();
    r.insert("id".into(), FieldValue::Int(id));
    r.insert("vendor".into(), FieldValue::from(vendor));
    r
}

// --- Golden ---

#[test]
fn golden_dual_hash() {
    let records = vec![id_record(1, "acme"), id_record(2, "zenith"), id_record(0, "acme")];
    let h = dual_hash_records(&records).unwrap();
    assert_eq!(
        h.order_sensitive_hash.as_str(),
        "sha256:55f331c47329a124b6c3a00da2ffd574e36292fbd260376784bd46addb5febcd"
    );
    assert_eq!(
        h.content_hash.as_str(),
        "sha256:cd815b68c98947af5cf0a456a30835e54abdc425c6be67a98a4aca69f59000b8"
    );
}

// --- Determinism ---

#[test]
fn repeated_calls_agree() {
    let batch = spread_batch("b", 300);
    let first = dual_hash(&batch).unwrap();
    for _ in 0..10 {
        assert_eq!(dual_hash(&batch).unwrap(), first);
    }
}

#[test]
fn batch_metadata_is_not_evidence() {
    let a = spread_batch("b-1", 40);
    let mut b = spread_batch("b-2", 40);
    b.source_id = "elsewhere".into();
    b.ingested_at = "2027-06-30T12:00:00.000Z".into();
    assert_eq!(dual_hash(&a).unwrap(), dual_hash(&b).unwrap());
}

// --- Permutation ---

#[test]
fn permutations_keep_content_hash() {
    let batch = spread_batch("b", 50);
    let base = dual_hash(&batch).unwrap();

    let mut reversed = batch.records.clone();
    reversed.reverse();
    let mut rotated = batch.records.clone();
    rotated.rotate_left(17);
    let mut swapped = batch.records.clone();
    swapped.swap(3, 41);

    for records in [reversed, rotated, swapped] {
        let h = dual_hash(&batch_of("b", records)).unwrap();
        assert_eq!(h.content_hash, base.content_hash);
        assert_ne!(h.order_sensitive_hash, base.order_sensitive_hash);
    }
}

#[test]
fn identity_permutation_keeps_both() {
    let batch = spread_batch("b", 20);
    let same = batch_of("b", batch.records.clone());
    assert_eq!(dual_hash(&batch).unwrap(), dual_hash(&same).unwrap());
}

// --- Tamper ---

#[test]
fn value_change_moves_both_hashes() {
    let batch = spread_batch("b", 30);
    let base = dual_hash(&batch).unwrap();
    let mut tampered = batch.clone();
    tampered.records[12].insert("amount".into(), FieldValue::Float(999_999.99));
    let h = dual_hash(&tampered).unwrap();
    assert_ne!(h.content_hash, base.content_hash);
    assert_ne!(h.order_sensitive_hash, base.order_sensitive_hash);
}

#[test]
fn field_type_is_part_of_the_hash() {
    let mut as_int = Record::new();
    as_int.insert("amount".into(), FieldValue::Int(2));
    let mut as_float = Record::new();
    as_float.insert("amount".into(), FieldValue::Float(2.0));
    assert_ne!(
        dual_hash_records(&[as_int]).unwrap(),
        dual_hash_records(&[as_float]).unwrap()
    );
}

#[test]
fn duplicate_records_are_counted() {
    let one = vec![id_record(1, "acme")];
    let two = vec![id_record(1, "acme"), id_record(1, "acme")];
    assert_ne!(
        dual_hash_records(&one).unwrap().content_hash,
        dual_hash_records(&two).unwrap().content_hash
    );
}

// --- Refusal ---

#[test]
fn non_finite_field_is_refused() {
    let mut batch = spread_batch("b", 10);
    batch.records[7].insert("amount".into(), FieldValue::Float(f64::INFINITY));
    assert_eq!(
        dual_hash(&batch),
        Err(CanonicalizationError::NonFiniteField {
            record_index: 7,
            field: "amount".into()
        })
    );
}

// --- Payloads ---

#[test]
fn payload_arrays_are_order_free_in_content_hash() {
    let a = serde_json::json!({"hubs": ["x", "y", "z"], "n": 3});
    let b = serde_json::json!({"n": 3, "hubs": ["z", "x", "y"]});
    let ha = dual_hash_value(&a).unwrap();
    let hb = dual_hash_value(&b).unwrap();
    assert_eq!(ha.content_hash, hb.content_hash);
    assert_ne!(ha.order_sensitive_hash, hb.order_sensitive_hash);
}
