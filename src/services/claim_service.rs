/*!
 * Claim Adjudication Service
 *
 * Shapes NCPDP requests, transmits them through the `ClaimSwitch`
 * port, and resolves rejections: resubmit, override submission, cash
 * conversion, and B2 reversal.
 *
 * Transport failures are retried with exponential backoff; a permanent
 * parse failure from the switch fails the claim with reject code E0.
 * For an approved response the adjudicator checks
 * patient_pay + insurance_pay = gross_price and flags divergences
 * without failing the claim.
 */

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::claim::{
    CashConversion, Claim, ClaimRequest, ClaimResponse, ClaimStatus, RejectCode,
};
use crate::models::fill::FillStatus;
use crate::models::prescription::{Prescription, PrescriptionStatus};
use crate::models::user::Actor;
use crate::ports::{ClaimSwitch, Clock, Store};
use crate::services::audit_log_service::AuditLogService;
use crate::services::fill_service::{cash_price_cents, PharmacyProfile};
use crate::services::workflow_service::WorkflowService;
use crate::utils::errors::{EngineError, Result};
use crate::utils::permissions::{self, Action, Resource};
use crate::utils::retry::{retry_transient, RetryPolicy};
use crate::utils::validators::validate_member_id;

/// Claim adjudication service
#[derive(Clone)]
pub struct ClaimService {
    store: Arc<dyn Store>,
    switch: Arc<dyn ClaimSwitch>,
    clock: Arc<dyn Clock>,
    audit: AuditLogService,
    workflow: WorkflowService,
    profile: PharmacyProfile,
    retry: RetryPolicy,
    timeout: Duration,
}

impl ClaimService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        switch: Arc<dyn ClaimSwitch>,
        clock: Arc<dyn Clock>,
        audit: AuditLogService,
        workflow: WorkflowService,
        profile: PharmacyProfile,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            switch,
            clock,
            audit,
            workflow,
            profile,
            retry,
            timeout,
        }
    }

    async fn load_rx(&self, rx_id: Uuid) -> Result<Prescription> {
        self.store
            .get_prescription(rx_id)
            .await?
            .ok_or_else(|| EngineError::not_found("prescription", rx_id))
    }

    async fn load_claim(&self, claim_id: Uuid) -> Result<Claim> {
        self.store
            .get_claim(claim_id)
            .await?
            .ok_or_else(|| EngineError::not_found("claim", claim_id))
    }

    /// Submit a claim for the prescription's current fill cycle
    pub async fn submit(
        &self,
        rx_id: Uuid,
        fill_id: Option<Uuid>,
        actor: &Actor,
        cancel: &CancellationToken,
    ) -> Result<Claim> {
        permissions::require(actor, Resource::Billing, Action::Create)?;
        let rx = self.load_rx(rx_id).await?;
        if rx.status != PrescriptionStatus::ClaimPending {
            return Err(EngineError::InvalidTransition {
                from: format!("{:?}", rx.status),
                to: "ClaimPending".to_string(),
            });
        }
        let claim = self
            .transmit(&rx, fill_id, None, None, actor, cancel)
            .await?;
        self.audit
            .record(
                actor,
                "claim.submit",
                "claim",
                claim.id,
                false,
                serde_json::json!({
                    "rx": rx.rx_number,
                    "status": format!("{:?}", claim.status),
                    "reject_code": claim.reject_code,
                }),
            )
            .await?;
        Ok(claim)
    }

    /// Resubmit after rejection; the original claim row is retained
    pub async fn resubmit(
        &self,
        claim_id: Uuid,
        actor: &Actor,
        cancel: &CancellationToken,
    ) -> Result<Claim> {
        permissions::require(actor, Resource::Billing, Action::Create)?;
        let prior = self.load_claim(claim_id).await?;
        if !prior.can_resubmit() {
            return Err(EngineError::InvalidTransition {
                from: format!("{:?}", prior.status),
                to: "Pending".to_string(),
            });
        }
        let rx = self.load_rx(prior.rx_id).await?;
        if rx.status == PrescriptionStatus::ClaimRejected {
            self.workflow
                .transition(
                    rx.id,
                    PrescriptionStatus::ClaimPending,
                    actor,
                    serde_json::json!({ "resubmit_of": prior.id }),
                )
                .await?;
        }
        let rx = self.load_rx(prior.rx_id).await?;
        let claim = self
            .transmit(&rx, prior.fill_id, None, None, actor, cancel)
            .await?;
        self.audit
            .record(
                actor,
                "claim.resubmit",
                "claim",
                claim.id,
                false,
                serde_json::json!({ "prior": prior.id, "attempt": claim.attempt_no }),
            )
            .await?;
        Ok(claim)
    }

    /// Submit with an override code attached. Only reject codes whose
    /// taxonomy entry allows overrides qualify.
    pub async fn submit_with_override(
        &self,
        claim_id: Uuid,
        override_code: &str,
        reason: &str,
        actor: &Actor,
        cancel: &CancellationToken,
    ) -> Result<Claim> {
        permissions::require(actor, Resource::Billing, Action::Create)?;
        let prior = self.load_claim(claim_id).await?;
        if !prior.can_resubmit() {
            return Err(EngineError::InvalidTransition {
                from: format!("{:?}", prior.status),
                to: "Pending".to_string(),
            });
        }
        let reject = prior
            .reject_code
            .as_deref()
            .map(RejectCode::lookup)
            .ok_or_else(|| EngineError::MissingRequired("reject_code".to_string()))?;
        if !reject.overridable {
            return Err(EngineError::NonOverridable(reject.code));
        }
        if reason.trim().len() < 10 {
            return Err(EngineError::invalid_field(
                "reason",
                "override reason must be at least 10 characters",
            ));
        }

        let rx = self.load_rx(prior.rx_id).await?;
        if rx.status == PrescriptionStatus::ClaimRejected {
            self.workflow
                .transition(
                    rx.id,
                    PrescriptionStatus::ClaimPending,
                    actor,
                    serde_json::json!({ "override_of": prior.id }),
                )
                .await?;
        }
        let rx = self.load_rx(prior.rx_id).await?;
        let claim = self
            .transmit(&rx, prior.fill_id, Some(override_code), Some(reason), actor, cancel)
            .await?;
        self.audit
            .record(
                actor,
                "claim.override_submit",
                "claim",
                claim.id,
                false,
                serde_json::json!({
                    "prior": prior.id,
                    "override_code": override_code,
                    "original_reject": reject.code,
                }),
            )
            .await?;
        Ok(claim)
    }

    /// Abandon adjudication and let the patient pay cash
    pub async fn convert_to_cash(&self, claim_id: Uuid, actor: &Actor) -> Result<CashConversion> {
        permissions::require(actor, Resource::Billing, Action::Create)?;
        let claim = self.load_claim(claim_id).await?;
        if !matches!(claim.status, ClaimStatus::Rejected | ClaimStatus::Pending) {
            return Err(EngineError::InvalidTransition {
                from: format!("{:?}", claim.status),
                to: "CashConversion".to_string(),
            });
        }
        let rx = self.load_rx(claim.rx_id).await?;

        // Price from the fill when one exists, else from the shelf
        let acquisition = match self
            .store
            .list_fills(rx.id)
            .await?
            .into_iter()
            .max_by_key(|f| f.fill_number)
        {
            Some(fill) => fill.acquisition_cost_cents,
            None => self
                .store
                .get_inventory_item(self.profile.id, &rx.drug_ndc)
                .await?
                .map(|item| item.acquisition_cost_cents)
                .unwrap_or(0),
        };
        let cash_price = cash_price_cents(
            acquisition,
            self.profile.dispensing_fee_cents,
            self.profile.cash_margin_percent,
        );

        let conversion = CashConversion {
            id: Uuid::new_v4(),
            claim_id: claim.id,
            rx_id: rx.id,
            cash_price_cents: cash_price,
            converted_by: actor.id,
            converted_at: self.clock.now(),
        };
        self.store.insert_cash_conversion(&conversion).await?;

        if matches!(
            rx.status,
            PrescriptionStatus::ClaimPending | PrescriptionStatus::ClaimRejected
        ) {
            self.workflow
                .transition(
                    rx.id,
                    PrescriptionStatus::FillPending,
                    actor,
                    serde_json::json!({ "cash_conversion": conversion.id }),
                )
                .await?;
        }

        self.audit
            .record(
                actor,
                "claim.cash_convert",
                "claim",
                claim.id,
                false,
                serde_json::json!({ "cash_price_cents": cash_price }),
            )
            .await?;
        Ok(conversion)
    }

    /// B2 reversal of an approved claim; blocked once dispensed
    pub async fn reverse(
        &self,
        claim_id: Uuid,
        actor: &Actor,
        cancel: &CancellationToken,
    ) -> Result<Claim> {
        permissions::require(actor, Resource::Billing, Action::Create)?;
        let mut claim = self.load_claim(claim_id).await?;
        if !claim.can_reverse() {
            return Err(EngineError::InvalidTransition {
                from: format!("{:?}", claim.status),
                to: "Reversed".to_string(),
            });
        }
        let rx = self.load_rx(claim.rx_id).await?;
        let fills = self.store.list_fills(rx.id).await?;
        let dispensed = fills.iter().any(|f| f.status == FillStatus::Dispensed);
        if dispensed {
            return Err(EngineError::InvalidTransition {
                from: "Dispensed".to_string(),
                to: "Reversed".to_string(),
            });
        }

        let patient = self.patient_for(&rx).await?;
        let plan = patient
            .insurance
            .ok_or_else(|| EngineError::MissingRequired("insurance".to_string()))?;
        let request = ClaimRequest {
            claim_id: claim.id,
            transaction_code: "B2".to_string(),
            bin: plan.bin,
            pcn: plan.pcn,
            group_id: plan.group_id,
            member_id: plan.member_id,
            ndc: rx.drug_ndc.clone(),
            quantity: rx.quantity,
            days_supply: rx.days_supply,
            daw_code: rx.daw_code.value(),
            prescriber_dea: rx.prescriber_dea.clone(),
            prescriber_npi: rx.prescriber_npi.clone(),
            override_code: None,
            attempt_no: claim.attempt_no,
        };
        self.send_with_retry(&request, cancel).await?;

        claim.status = ClaimStatus::Reversed;
        claim.resolved_at = Some(self.clock.now());
        claim.updated_at = self.clock.now();
        if cancel.is_cancelled() {
            claim.interrupted = true;
        }
        let saved = self.store.save_claim(&claim).await?;

        // A payable prescription that lost its approval goes back to
        // the rejected queue for resolution.
        if rx.status == PrescriptionStatus::FillPending
            && !fills
                .iter()
                .any(|f| matches!(f.status, FillStatus::InProgress | FillStatus::Filled))
        {
            let mut reopened = self.load_rx(rx.id).await?;
            reopened.status = PrescriptionStatus::ClaimRejected;
            reopened.updated_at = self.clock.now();
            self.store.save_prescription(&reopened).await?;
        }

        self.audit
            .record(
                actor,
                "claim.reverse",
                "claim",
                saved.id,
                false,
                serde_json::json!({ "transaction": "B2" }),
            )
            .await?;
        Ok(saved)
    }

    async fn patient_for(&self, rx: &Prescription) -> Result<crate::models::patient::Patient> {
        let patient_id = rx
            .patient_id
            .ok_or_else(|| EngineError::MissingRequired("patient_id".to_string()))?;
        self.store
            .get_patient(patient_id)
            .await?
            .ok_or_else(|| EngineError::not_found("patient", patient_id))
    }

    /// Build, transmit, parse, persist, and advance the workflow
    async fn transmit(
        &self,
        rx: &Prescription,
        fill_id: Option<Uuid>,
        override_code: Option<&str>,
        override_reason: Option<&str>,
        actor: &Actor,
        cancel: &CancellationToken,
    ) -> Result<Claim> {
        let patient = self.patient_for(rx).await?;
        let plan = patient
            .insurance
            .ok_or_else(|| EngineError::MissingRequired("insurance".to_string()))?;
        validate_member_id(&plan.member_id)?;

        let attempt_no = self.store.list_claims_by_rx(rx.id).await?.len() as i32 + 1;
        let now = self.clock.now();
        let claim = Claim {
            id: Uuid::new_v4(),
            version: 0,
            rx_id: rx.id,
            fill_id,
            bin: plan.bin.clone(),
            pcn: plan.pcn.clone(),
            group_id: plan.group_id.clone(),
            member_id: plan.member_id.clone(),
            status: ClaimStatus::Pending,
            attempt_no,
            reject_code: None,
            reject_message: None,
            override_code: override_code.map(str::to_string),
            override_reason: override_reason.map(str::to_string),
            gross_price_cents: None,
            patient_pay_cents: None,
            insurance_pay_cents: None,
            pay_mismatch: false,
            interrupted: false,
            submitted_at: Some(now),
            resolved_at: None,
            created_at: now,
            updated_at: now,
        };
        let mut claim = self.store.insert_claim(&claim).await?;

        let request = ClaimRequest {
            claim_id: claim.id,
            transaction_code: "B1".to_string(),
            bin: plan.bin,
            pcn: plan.pcn,
            group_id: plan.group_id,
            member_id: plan.member_id,
            ndc: rx.drug_ndc.clone(),
            quantity: rx.quantity,
            days_supply: rx.days_supply,
            daw_code: rx.daw_code.value(),
            prescriber_dea: rx.prescriber_dea.clone(),
            prescriber_npi: rx.prescriber_npi.clone(),
            override_code: override_code.map(str::to_string),
            attempt_no,
        };

        let response = match self.send_with_retry(&request, cancel).await {
            Ok(response) => response,
            Err(err) if err.is_transient() => {
                // Exhausted retries: leave the claim pending and surface
                tracing::warn!(claim = %claim.id, "claim transmission exhausted retries");
                return Err(err);
            }
            Err(EngineError::ExternalReject { .. }) => {
                // Permanent parse/provider failure: system reject E0
                ClaimResponse::Rejected {
                    code: "E0".to_string(),
                    message: "Claim switch returned an unprocessable response".to_string(),
                }
            }
            Err(err) => return Err(err),
        };

        if cancel.is_cancelled() {
            // The transmission side-effect happened; run to completion
            // and mark the record instead of orphaning it.
            claim.interrupted = true;
        }

        match response {
            ClaimResponse::Approved {
                gross_price_cents,
                patient_pay_cents,
                insurance_pay_cents,
            } => {
                claim.status = ClaimStatus::Approved;
                claim.gross_price_cents = Some(gross_price_cents);
                claim.patient_pay_cents = Some(patient_pay_cents);
                claim.insurance_pay_cents = Some(insurance_pay_cents);
                if patient_pay_cents + insurance_pay_cents != gross_price_cents {
                    tracing::warn!(
                        claim = %claim.id,
                        patient_pay_cents,
                        insurance_pay_cents,
                        gross_price_cents,
                        "approved claim pays do not sum to gross price"
                    );
                    claim.pay_mismatch = true;
                }
                claim.resolved_at = Some(self.clock.now());
            }
            ClaimResponse::Rejected { code, message } => {
                claim.status = ClaimStatus::Rejected;
                claim.reject_code = Some(code);
                claim.reject_message = Some(message);
                claim.resolved_at = Some(self.clock.now());
            }
            ClaimResponse::Pending => {
                claim.status = ClaimStatus::Pending;
            }
        }
        claim.updated_at = self.clock.now();
        let saved = self.store.save_claim(&claim).await?;

        match saved.status {
            ClaimStatus::Approved => {
                self.workflow
                    .transition(
                        rx.id,
                        PrescriptionStatus::FillPending,
                        actor,
                        serde_json::json!({ "claim": saved.id }),
                    )
                    .await?;
            }
            ClaimStatus::Rejected => {
                self.workflow
                    .transition(
                        rx.id,
                        PrescriptionStatus::ClaimRejected,
                        actor,
                        serde_json::json!({
                            "claim": saved.id,
                            "reject_code": saved.reject_code,
                        }),
                    )
                    .await?;
            }
            _ => {}
        }
        Ok(saved)
    }

    async fn send_with_retry(
        &self,
        request: &ClaimRequest,
        cancel: &CancellationToken,
    ) -> Result<ClaimResponse> {
        let timeout = self.timeout;
        retry_transient(&self.retry, cancel, || async {
            match tokio::time::timeout(timeout, self.switch.send(request)).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::ExternalTimeout("claim_switch".to_string())),
            }
        })
        .await
    }

    /// Resolution guidance for a reject code (reference data)
    pub fn resolutions_for(code: &str) -> RejectCode {
        RejectCode::lookup(code)
    }
}
