/*!
 * Claim Adjudication Integration Tests
 *
 * Rejection resolution paths: refill-too-soon override, resubmit,
 * cash conversion, reversal, permanent switch failure, and the
 * patient-pay invariant.
 */

mod test_utils;

use rxflow_engine::models::claim::{ClaimResponse, ClaimStatus};
use rxflow_engine::models::drug::DeaSchedule;
use rxflow_engine::models::prescription::PrescriptionStatus;
use rxflow_engine::utils::errors::EngineError;
use tokio_util::sync::CancellationToken;

use rxflow_engine::ports::Store;
use test_utils::{expect_err, TestHarness};

#[tokio::test]
async fn test_refill_too_soon_override_path() {
    let h = TestHarness::new();
    h.seed_drug_and_stock("00071015523", "Lisinopril", 10.0, DeaSchedule::Legend, 100.0)
        .await;
    let (rx, _fill) = h.run_happy_path("MRN-RTS").await;

    // Second fill requested 20 days into a 30-day supply
    h.clock.advance_days(20);
    let check = h
        .engine
        .fills
        .request_refill(rx.id, &h.tech)
        .await
        .unwrap();
    assert!(check.ok);
    assert_eq!(check.warnings.len(), 1);
    assert_eq!(check.days_until_eligible, Some(4));

    // The plan rejects 79 Refill Too Soon
    h.switch.push_rejected("79", "REFILL TOO SOON");
    let rejected = h.submit_claim(rx.id).await;
    assert_eq!(rejected.status, ClaimStatus::Rejected);
    assert_eq!(rejected.reject_code.as_deref(), Some("79"));

    let current = h.store.get_prescription(rx.id).await.unwrap().unwrap();
    assert_eq!(current.status, PrescriptionStatus::ClaimRejected);

    // Pharmacist submits the override
    h.switch.push_approved(1000, 1000, 0);
    let approved = h
        .engine
        .claims
        .submit_with_override(
            rejected.id,
            "4A",
            "Patient traveling 3 weeks",
            &h.pharmacist,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(approved.status, ClaimStatus::Approved);
    assert_eq!(approved.override_code.as_deref(), Some("4A"));
    assert_eq!(approved.attempt_no, 3);

    let current = h.store.get_prescription(rx.id).await.unwrap().unwrap();
    assert_eq!(current.status, PrescriptionStatus::FillPending);

    // The original rejected claim is retained untouched
    let claims = h.store.list_claims_by_rx(rx.id).await.unwrap();
    assert!(claims
        .iter()
        .any(|c| c.id == rejected.id && c.status == ClaimStatus::Rejected));
}

#[tokio::test]
async fn test_override_refused_for_non_overridable_code() {
    let h = TestHarness::new();
    h.seed_drug_and_stock("00071015523", "Lisinopril", 10.0, DeaSchedule::Legend, 100.0)
        .await;
    let rx = h
        .accept_insured(h.payload("MRN-NOC", "Lisinopril", "00071015523", DeaSchedule::Legend, 3))
        .await;
    h.complete_data_entry(rx.id).await;

    // 75 Prior Authorization Required is not overridable
    h.switch.push_rejected("75", "PRIOR AUTH REQUIRED");
    let rejected = h.submit_claim(rx.id).await;

    let err = expect_err(
        h.engine
            .claims
            .submit_with_override(
                rejected.id,
                "4A",
                "Trying to push this through anyway",
                &h.pharmacist,
                &CancellationToken::new(),
            )
            .await,
    );
    assert!(matches!(err, EngineError::NonOverridable(code) if code == "75"));
}

#[tokio::test]
async fn test_resubmit_retains_original() {
    let h = TestHarness::new();
    h.seed_drug_and_stock("00071015523", "Lisinopril", 10.0, DeaSchedule::Legend, 100.0)
        .await;
    let rx = h
        .accept_insured(h.payload("MRN-RSB", "Lisinopril", "00071015523", DeaSchedule::Legend, 3))
        .await;
    h.complete_data_entry(rx.id).await;

    h.switch.push_rejected("70", "NOT COVERED");
    let first = h.submit_claim(rx.id).await;

    h.switch.push_approved(1200, 200, 1000);
    let second = h
        .engine
        .claims
        .resubmit(first.id, &h.tech, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.status, ClaimStatus::Approved);
    assert_eq!(second.attempt_no, 2);
    assert_ne!(second.id, first.id);

    let claims = h.store.list_claims_by_rx(rx.id).await.unwrap();
    assert_eq!(claims.len(), 2);
}

#[tokio::test]
async fn test_cash_conversion_unblocks_fill() {
    let h = TestHarness::new();
    h.seed_drug_and_stock("00071015523", "Lisinopril", 10.0, DeaSchedule::Legend, 100.0)
        .await;
    let rx = h
        .accept_insured(h.payload("MRN-CSH", "Lisinopril", "00071015523", DeaSchedule::Legend, 3))
        .await;
    h.complete_data_entry(rx.id).await;

    h.switch.push_rejected("70", "NOT COVERED");
    let rejected = h.submit_claim(rx.id).await;

    let conversion = h
        .engine
        .claims
        .convert_to_cash(rejected.id, &h.tech)
        .await
        .unwrap();
    // 450 acquisition + 20% margin + 1050 fee
    assert_eq!(conversion.cash_price_cents, 1590);

    let current = h.store.get_prescription(rx.id).await.unwrap().unwrap();
    assert_eq!(current.status, PrescriptionStatus::FillPending);

    // A fill can proceed on the cash price
    let (fill, _) = h.engine.fills.start(rx.id, &h.tech).await.unwrap();
    assert_eq!(fill.fill_number, 0);
}

#[tokio::test]
async fn test_reversal_blocked_after_dispense() {
    let h = TestHarness::new();
    h.seed_drug_and_stock("00071015523", "Lisinopril", 10.0, DeaSchedule::Legend, 100.0)
        .await;
    let (rx, _fill) = h.run_happy_path("MRN-RVD").await;

    let claims = h.store.list_claims_by_rx(rx.id).await.unwrap();
    let err = expect_err(
        h.engine
            .claims
            .reverse(claims[0].id, &h.tech, &CancellationToken::new())
            .await,
    );
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_reversal_before_fill() {
    let h = TestHarness::new();
    h.seed_drug_and_stock("00071015523", "Lisinopril", 10.0, DeaSchedule::Legend, 100.0)
        .await;
    let rx = h
        .accept_insured(h.payload("MRN-REV", "Lisinopril", "00071015523", DeaSchedule::Legend, 3))
        .await;
    h.complete_data_entry(rx.id).await;
    h.switch.push_approved(1000, 1000, 0);
    let approved = h.submit_claim(rx.id).await;
    assert_eq!(approved.status, ClaimStatus::Approved);

    let reversed = h
        .engine
        .claims
        .reverse(approved.id, &h.tech, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(reversed.status, ClaimStatus::Reversed);

    // The B2 went over the wire
    let sent = h.switch.sent.lock().unwrap();
    assert_eq!(sent.last().unwrap().transaction_code, "B2");
    drop(sent);

    // The prescription returns to the rejected queue for resolution
    let current = h.store.get_prescription(rx.id).await.unwrap().unwrap();
    assert_eq!(current.status, PrescriptionStatus::ClaimRejected);
}

#[tokio::test]
async fn test_permanent_switch_failure_becomes_e0() {
    let h = TestHarness::new();
    h.seed_drug_and_stock("00071015523", "Lisinopril", 10.0, DeaSchedule::Legend, 100.0)
        .await;
    let rx = h
        .accept_insured(h.payload("MRN-E0", "Lisinopril", "00071015523", DeaSchedule::Legend, 3))
        .await;
    h.complete_data_entry(rx.id).await;

    h.switch.push(Err(EngineError::ExternalReject {
        service: "claim_switch".to_string(),
        code: "PARSE".to_string(),
    }));
    let claim = h.submit_claim(rx.id).await;
    assert_eq!(claim.status, ClaimStatus::Rejected);
    assert_eq!(claim.reject_code.as_deref(), Some("E0"));

    let current = h.store.get_prescription(rx.id).await.unwrap().unwrap();
    assert_eq!(current.status, PrescriptionStatus::ClaimRejected);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let h = TestHarness::new();
    h.seed_drug_and_stock("00071015523", "Lisinopril", 10.0, DeaSchedule::Legend, 100.0)
        .await;
    let rx = h
        .accept_insured(h.payload("MRN-TRN", "Lisinopril", "00071015523", DeaSchedule::Legend, 3))
        .await;
    h.complete_data_entry(rx.id).await;

    h.switch
        .push(Err(EngineError::ExternalUnavailable("claim_switch".to_string())));
    h.switch.push(Ok(ClaimResponse::Approved {
        gross_price_cents: 1000,
        patient_pay_cents: 1000,
        insurance_pay_cents: 0,
    }));
    let claim = h.submit_claim(rx.id).await;
    assert_eq!(claim.status, ClaimStatus::Approved);
    assert_eq!(h.switch.sent_count(), 2);
}

#[tokio::test]
async fn test_pay_mismatch_is_flagged_not_failed() {
    let h = TestHarness::new();
    h.seed_drug_and_stock("00071015523", "Lisinopril", 10.0, DeaSchedule::Legend, 100.0)
        .await;
    let rx = h
        .accept_insured(h.payload("MRN-PAY", "Lisinopril", "00071015523", DeaSchedule::Legend, 3))
        .await;
    h.complete_data_entry(rx.id).await;

    // 300 + 500 != 1000
    h.switch.push_approved(1000, 300, 500);
    let claim = h.submit_claim(rx.id).await;
    assert_eq!(claim.status, ClaimStatus::Approved);
    assert!(claim.pay_mismatch);
}
