//! Receipt ledger lock tests.
//!
//! Proves:
//! 1. Recomputing a stored receipt's self-hash reproduces it
//! 2. Mutating any hashed field is detected (payload, type, link)
//! 3. The chain links genesis → last and `verify_chain` walks it
//! 4. Unknown types and schema violations are refused without side effects
//! 5. A failing store leaves the ledger unchanged
//! 6. HALT blocks everything except `anchor` and the matching `reset`

use evidentia_kernel::ledger::{
    ChainError, FixedClock, Ledger, LedgerError, ReceiptStore, ResetAuthorization, StoreError,
};
use evidentia_kernel::proof::hash::ContentHash;
use evidentia_kernel::receipt::payload::{
    CancelPayload, CheckSummary, StopRulePayload, StopRuleState, StopRuleVerdict, VerdictKind,
};
use evidentia_kernel::receipt::schema::SchemaError;
use evidentia_kernel::receipt::{ReceiptPayload, ReceiptType};
use lock_tests::fixtures::fixed_ledger;

fn cancel(i: usize) -> ReceiptPayload {
    ReceiptPayload::Cancel(CancelPayload {
        cycle_id: format!("c-{i}"),
        stage: "detection".into(),
        reason: "lock".into(),
    })
}

fn verdict(kind: VerdictKind, condition: &str) -> ReceiptPayload {
    ReceiptPayload::StopRule(StopRulePayload {
        cycle_id: "c-halt".into(),
        verdict: StopRuleVerdict {
            kind,
            condition: condition.into(),
            observed: 1.0,
            threshold: 0.0,
        },
        state_before: StopRuleState::Normal,
        state_after: match kind {
            VerdictKind::Continue => StopRuleState::Normal,
            VerdictKind::Flag => StopRuleState::Flagged,
            VerdictKind::Halt => StopRuleState::Halted,
        },
        finding_receipts: Vec::new(),
        checks: CheckSummary::default(),
    })
}

fn ledger_with(n: usize) -> Ledger {
    let mut ledger = fixed_ledger();
    for i in 0..n {
        ledger.append(&cancel(i)).unwrap();
    }
    ledger
}

// --- Self-hash ---

#[test]
fn stored_self_hash_recomputes() {
    let ledger = ledger_with(6);
    for r in ledger.committed() {
        assert_eq!(r.recompute_self_hash().unwrap(), r.self_hash);
        assert!(ledger.verify(r));
    }
}

#[test]
fn payload_mutation_is_detected() {
    let ledger = ledger_with(3);
    let mut r = ledger.committed()[1].clone();
    r.payload["reason"] = serde_json::json!("edited");
    assert!(!r.is_self_consistent());
    assert!(!ledger.verify(&r));
}

#[test]
fn type_and_link_mutations_are_detected() {
    let ledger = ledger_with(3);
    let mut retyped = ledger.committed()[2].clone();
    retyped.receipt_type = ReceiptType::Reset;
    assert!(!retyped.is_self_consistent());

    let mut relinked = ledger.committed()[2].clone();
    relinked.previous_hash = ContentHash::genesis();
    assert!(!relinked.is_self_consistent());
}

#[test]
fn timestamp_is_observational_but_verified() {
    let ledger = ledger_with(2);
    let mut r = ledger.committed()[0].clone();
    r.timestamp = "1999-12-31T23:59:59.000Z".into();
    // Not part of the self-hash, but the committed copy differs.
    assert!(r.is_self_consistent());
    assert!(!ledger.verify(&r));
}

// --- Chain ---

#[test]
fn chain_links_from_genesis() {
    let ledger = ledger_with(5);
    let receipts = ledger.committed();
    assert_eq!(receipts[0].previous_hash, ContentHash::genesis());
    for pair in receipts.windows(2) {
        assert_eq!(pair[1].previous_hash, pair[0].self_hash);
        assert_eq!(pair[1].sequence, pair[0].sequence + 1);
    }
    ledger.verify_chain().unwrap();
}

#[test]
fn identical_inputs_give_identical_chains() {
    let a = ledger_with(4);
    let b = ledger_with(4);
    assert_eq!(a.committed(), b.committed());
}

#[test]
fn standalone_verification_finds_the_break() {
    let ledger = ledger_with(4);
    let mut receipts = ledger.committed().to_vec();
    receipts[2].payload["stage"] = serde_json::json!("ingest");
    assert!(matches!(
        evidentia_kernel::ledger::verify_receipts(&receipts),
        Err(ChainError::HashMismatch { sequence: 2, .. })
    ));
}

// --- Refusals ---

#[test]
fn unknown_type_is_refused() {
    let mut ledger = ledger_with(1);
    assert!(matches!(
        ledger.append_raw("test", serde_json::json!({"message": "hi"})),
        Err(LedgerError::Receipt(_))
    ));
    assert_eq!(ledger.len(), 1);
}

#[test]
fn schema_violations_are_refused() {
    let mut ledger = ledger_with(1);
    let missing = serde_json::json!({"cycle_id": "c", "stage": "ingest"});
    assert!(matches!(
        ledger.append_raw("cancel", missing),
        Err(LedgerError::Schema(SchemaError::MissingField { .. }))
    ));
    let wrong = serde_json::json!({"cycle_id": 7, "stage": "ingest", "reason": "r"});
    assert!(matches!(
        ledger.append_raw("cancel", wrong),
        Err(LedgerError::Schema(SchemaError::WrongType { .. }))
    ));
    let extra = serde_json::json!({"cycle_id": "c", "stage": "s", "reason": "r", "tenant": "x"});
    assert!(matches!(
        ledger.append_raw("cancel", extra),
        Err(LedgerError::Schema(SchemaError::UndeclaredField { .. }))
    ));
    assert_eq!(ledger.len(), 1);
    ledger.verify_chain().unwrap();
}

struct BrokenStore;

impl ReceiptStore for BrokenStore {
    fn persist(&mut self, _: &evidentia_kernel::receipt::Receipt) -> Result<(), StoreError> {
        Err(StoreError {
            detail: "disk full".into(),
        })
    }
}

#[test]
fn store_failure_commits_nothing() {
    let mut ledger = Ledger::new(Box::new(BrokenStore), Box::new(FixedClock::default())).unwrap();
    assert!(matches!(
        ledger.append(&cancel(0)),
        Err(LedgerError::Store(StoreError { .. }))
    ));
    assert!(ledger.is_empty());
    assert!(ledger.last().is_none());
}

// --- HALT ---

#[test]
fn flag_does_not_halt_the_ledger() {
    let mut ledger = ledger_with(1);
    ledger.append(&verdict(VerdictKind::Flag, "benford")).unwrap();
    assert!(!ledger.is_halted());
    ledger.append(&cancel(9)).unwrap();
}

#[test]
fn halt_blocks_until_matching_reset() {
    let mut ledger = ledger_with(1);
    let halt = ledger
        .append(&verdict(VerdictKind::Halt, "integrity violation"))
        .unwrap();
    assert!(ledger.is_halted());
    assert_eq!(ledger.halted_by(), Some(&halt.self_hash));

    assert!(matches!(
        ledger.append(&cancel(2)),
        Err(LedgerError::Halted {
            receipt_type: ReceiptType::Cancel,
            ..
        })
    ));
    // Sealing the halted cycle is still allowed.
    ledger.anchor("c-halt").unwrap();

    let wrong = serde_json::json!({
        "operator_id": "ops-1",
        "reason": "reviewed",
        "halted_receipt": ContentHash::genesis().as_str(),
    });
    assert!(matches!(
        ledger.append_raw("reset", wrong),
        Err(LedgerError::ResetMismatch { .. })
    ));

    let reset = ledger
        .reset(&ResetAuthorization {
            operator_id: "ops-1".into(),
            reason: "reviewed".into(),
        })
        .unwrap();
    assert_eq!(reset.payload["halted_receipt"], halt.self_hash.as_str());
    assert!(!ledger.is_halted());
    ledger.append(&cancel(3)).unwrap();
    ledger.verify_chain().unwrap();
}

#[test]
fn reset_without_halt_is_refused() {
    let mut ledger = ledger_with(1);
    assert_eq!(
        ledger.reset(&ResetAuthorization {
            operator_id: "ops-1".into(),
            reason: "nothing to clear".into(),
        }),
        Err(LedgerError::NotHalted)
    );
}
