/*!
 * Workflow Integration Tests
 *
 * End-to-end dispensing flows over the in-memory store:
 * - happy path from intake to picked_up
 * - Schedule II refill refusal
 * - duplicate intake suppression
 * - terminal-transition idempotency
 * - optimistic-concurrency conflicts
 */

mod test_utils;

use rxflow_engine::models::audit::AuditFilter;
use rxflow_engine::models::drug::DeaSchedule;
use rxflow_engine::models::fill::FillStatus;
use rxflow_engine::models::inventory::TransactionType;
use rxflow_engine::models::prescription::PrescriptionStatus;
use rxflow_engine::models::RxSource;
use rxflow_engine::utils::errors::EngineError;

use rxflow_engine::ports::Store;
use test_utils::{expect_err, TestHarness};

#[tokio::test]
async fn test_happy_path_lisinopril() {
    let h = TestHarness::new();
    h.seed_drug_and_stock("00071015523", "Lisinopril", 10.0, DeaSchedule::Legend, 100.0)
        .await;
    let before = h
        .engine
        .audit
        .list(&AuditFilter::default())
        .await
        .unwrap()
        .len();

    let (rx, fill) = h.run_happy_path("MRN-001").await;

    assert_eq!(rx.status, PrescriptionStatus::PickedUp);
    assert_eq!(fill.status, FillStatus::Dispensed);
    assert_eq!(fill.quantity_dispensed, 30.0);

    // Claim approved with patient pay 10.00 and insurance 0.00
    let claims = h.store.list_claims_by_rx(rx.id).await.unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].patient_pay_cents, Some(1000));
    assert_eq!(claims[0].insurance_pay_cents, Some(0));
    assert!(!claims[0].pay_mismatch);

    // Inventory decremented by exactly one dispense transaction
    let item = h
        .store
        .get_inventory_item(h.engine.profile.id, "00071015523")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.quantity_on_hand, 70.0);
    assert_eq!(item.quantity_allocated, 0.0);
    let log = h
        .store
        .list_inventory_transactions(h.engine.profile.id, "00071015523")
        .await
        .unwrap();
    let dispenses = log
        .iter()
        .filter(|tx| tx.transaction_type == TransactionType::Dispense)
        .count();
    assert_eq!(dispenses, 1);

    // Exactly one audit row per port-level operation in the chain:
    // accept, data-entry complete, claim submit, fill start, fill
    // finalize, verify decide, dispense hand
    let after = h.engine.audit.list(&AuditFilter::default()).await.unwrap();
    assert_eq!(after.len() - before, 7);
    let actions: Vec<&str> = after[before..].iter().map(|e| e.action.as_str()).collect();
    assert_eq!(
        actions,
        vec![
            "intake.accept",
            "data_entry.complete",
            "claim.submit",
            "fill.start",
            "fill.finalize",
            "verify.decide",
            "dispense.hand",
        ]
    );
}

#[tokio::test]
async fn test_schedule_ii_second_fill_is_refused() {
    let h = TestHarness::new();
    h.seed_drug_and_stock("00406055201", "Oxycodone", 5.0, DeaSchedule::ScheduleIi, 500.0)
        .await;
    let rx = h
        .accept_insured(h.payload("MRN-CII", "Oxycodone", "00406055201", DeaSchedule::ScheduleIi, 0))
        .await;
    h.complete_data_entry(rx.id).await;
    h.switch.push_approved(2500, 500, 2000);
    h.submit_claim(rx.id).await;
    let fill = h.fill(rx.id).await;
    h.verify(&fill).await.unwrap();
    h.engine
        .dispense
        .hand(fill.id, true, Some(vec![1, 2, 3]), "TOKEN-CII", &h.tech)
        .await
        .unwrap();

    let audits_before = h
        .engine
        .audit
        .list(&AuditFilter::default())
        .await
        .unwrap()
        .len();

    // Second fill attempt on the controlled prescription
    let err = expect_err(h.engine.fills.start(rx.id, &h.tech).await);
    assert!(matches!(err, EngineError::ScheduleIiRefill));

    let current = h.store.get_prescription(rx.id).await.unwrap().unwrap();
    assert_eq!(current.status, PrescriptionStatus::PickedUp);

    // Only the policy-rejection row was appended
    let audits = h.engine.audit.list(&AuditFilter::default()).await.unwrap();
    assert_eq!(audits.len() - audits_before, 1);
    assert_eq!(audits.last().unwrap().action, "fill.start");
    assert_eq!(
        audits.last().unwrap().outcome,
        rxflow_engine::models::audit::AuditOutcome::Denied
    );
}

#[tokio::test]
async fn test_duplicate_intake_suppressed() {
    let h = TestHarness::new();
    h.seed_drug_and_stock("00071015523", "Lisinopril", 10.0, DeaSchedule::Legend, 100.0)
        .await;
    let payload = h.payload("MRN-DUP", "Lisinopril", "00071015523", DeaSchedule::Legend, 3);
    let first = h.accept_insured(payload.clone()).await;
    assert_eq!(first.status, PrescriptionStatus::DataEntry);

    // Same drug, quantity, and prescriber within 24 hours
    let mut duplicate = h.payload("MRN-DUP", "Lisinopril", "00071015523", DeaSchedule::Legend, 3);
    duplicate.prescriber_id = payload.prescriber_id;
    let err = expect_err(
        h.engine
            .intake
            .accept(RxSource::Fax, duplicate, &h.tech)
            .await,
    );
    assert!(matches!(err, EngineError::InvalidField { .. }));
}

#[tokio::test]
async fn test_terminal_dispense_is_idempotent() {
    let h = TestHarness::new();
    h.seed_drug_and_stock("00071015523", "Lisinopril", 10.0, DeaSchedule::Legend, 100.0)
        .await;
    let (_rx, fill) = h.run_happy_path("MRN-IDEM").await;

    let audits_before = h
        .engine
        .audit
        .list(&AuditFilter::default())
        .await
        .unwrap()
        .len();

    // Replaying with the same token returns the same record and
    // appends no audit row
    let replay = h
        .engine
        .dispense
        .hand(fill.id, true, None, "TOKEN-1", &h.tech)
        .await
        .unwrap();
    assert_eq!(replay.confirmation_token, "TOKEN-1");

    let audits_after = h
        .engine
        .audit
        .list(&AuditFilter::default())
        .await
        .unwrap()
        .len();
    assert_eq!(audits_after, audits_before);

    // A divergent payload with the same token fails
    let err = expect_err(
        h.engine
            .dispense
            .hand(fill.id, false, None, "TOKEN-1", &h.tech)
            .await,
    );
    assert!(matches!(err, EngineError::ConcurrentMutation { .. }));
}

#[tokio::test]
async fn test_illegal_transition_rejected() {
    let h = TestHarness::new();
    h.seed_drug_and_stock("00071015523", "Lisinopril", 10.0, DeaSchedule::Legend, 100.0)
        .await;
    let rx = h
        .accept_insured(h.payload("MRN-ILL", "Lisinopril", "00071015523", DeaSchedule::Legend, 3))
        .await;

    // DataEntry cannot jump straight to Filled
    let err = expect_err(
        h.engine
            .workflow
            .transition(
                rx.id,
                PrescriptionStatus::Filled,
                &h.tech,
                serde_json::json!({}),
            )
            .await,
    );
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_stale_version_conflicts() {
    let h = TestHarness::new();
    h.seed_drug_and_stock("00071015523", "Lisinopril", 10.0, DeaSchedule::Legend, 100.0)
        .await;
    let rx = h
        .accept_insured(h.payload("MRN-VER", "Lisinopril", "00071015523", DeaSchedule::Legend, 3))
        .await;

    let copy_a = h.store.get_prescription(rx.id).await.unwrap().unwrap();
    let mut copy_b = copy_a.clone();

    let mut copy_a = copy_a;
    copy_a.sig = "Take 1 tablet by mouth every morning".to_string();
    h.store.save_prescription(&copy_a).await.unwrap();

    copy_b.sig = "Take 2 tablets by mouth daily".to_string();
    let err = expect_err(h.store.save_prescription(&copy_b).await);
    assert!(matches!(err, EngineError::ConcurrentMutation { .. }));
}

#[tokio::test]
async fn test_cancel_is_audited_terminal() {
    let h = TestHarness::new();
    h.seed_drug_and_stock("00071015523", "Lisinopril", 10.0, DeaSchedule::Legend, 100.0)
        .await;
    let rx = h
        .accept_insured(h.payload("MRN-CXL", "Lisinopril", "00071015523", DeaSchedule::Legend, 3))
        .await;

    let cancelled = h
        .engine
        .workflow
        .cancel(rx.id, &h.tech, "patient request")
        .await
        .unwrap();
    assert_eq!(cancelled.status, PrescriptionStatus::Cancelled);

    // No further transitions from a terminal state
    let err = expect_err(
        h.engine
            .workflow
            .transition(
                rx.id,
                PrescriptionStatus::DataEntry,
                &h.tech,
                serde_json::json!({}),
            )
            .await,
    );
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}
