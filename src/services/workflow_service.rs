/*!
 * Prescription Workflow Service
 *
 * Owns every prescription state transition. Legality comes from the
 * transition table on `PrescriptionStatus`; this service adds the
 * per-transition guards (claim approved, fill validated, session
 * complete), per-prescription serialization, optimistic versioning,
 * and terminal-transition idempotency.
 */

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::models::claim::ClaimStatus;
use crate::models::drug::DeaSchedule;
use crate::models::fill::{Fill, FillStatus};
use crate::models::prescription::{Prescription, PrescriptionStatus};
use crate::models::user::Actor;
use crate::ports::{Clock, Store};
use crate::services::audit_log_service::AuditLogService;
use crate::services::fill_service;
use crate::utils::errors::{EngineError, Result};
use crate::utils::locks::LockRegistry;
use crate::utils::permissions::{self, Action, Resource};

/// Prescription state machine orchestrator
#[derive(Clone)]
pub struct WorkflowService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    audit: AuditLogService,
    locks: Arc<LockRegistry>,
}

impl WorkflowService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        audit: AuditLogService,
        locks: Arc<LockRegistry>,
    ) -> Self {
        Self {
            store,
            clock,
            audit,
            locks,
        }
    }

    /// Apply a transition with guards. `context` is the
    /// operation-specific payload; for terminal transitions it is
    /// stored and replays must present the same value.
    ///
    /// This is the mechanics layer: it does NOT write an audit row.
    /// Each port-level operation (accept, submit, start, decide, hand,
    /// cancel) audits exactly once around its transitions.
    pub async fn transition(
        &self,
        rx_id: Uuid,
        to: PrescriptionStatus,
        actor: &Actor,
        context: Value,
    ) -> Result<Prescription> {
        permissions::require(actor, Resource::Medication, Action::Update)?;

        let _guard = self.locks.acquire(&format!("rx:{}", rx_id)).await;

        let rx = self
            .store
            .get_prescription(rx_id)
            .await?
            .ok_or_else(|| EngineError::not_found("prescription", rx_id))?;

        // Terminal idempotency: replaying the same terminal transition
        // with the same payload returns the stored record untouched.
        if rx.status.is_terminal() {
            if rx.status == to && rx.terminal_context.as_ref() == Some(&context) {
                return Ok(rx);
            }
            return Err(EngineError::InvalidTransition {
                from: format!("{:?}", rx.status),
                to: format!("{:?}", to),
            });
        }

        if !rx.status.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                from: format!("{:?}", rx.status),
                to: format!("{:?}", to),
            });
        }

        self.check_guard(&rx, to, &context).await?;

        let from = rx.status;
        let mut updated = rx;
        updated.status = to;
        updated.updated_at = self.clock.now();
        if to.is_terminal() {
            updated.terminal_context = Some(context.clone());
        }
        let saved = self.store.save_prescription(&updated).await?;

        tracing::info!(rx = %saved.rx_number, ?from, ?to, "prescription transitioned");
        Ok(saved)
    }

    /// Guard conditions per target state
    async fn check_guard(
        &self,
        rx: &Prescription,
        to: PrescriptionStatus,
        context: &Value,
    ) -> Result<()> {
        match to {
            PrescriptionStatus::DataEntry => self.guard_data_entry(rx).await,
            PrescriptionStatus::ClaimPending => self.guard_claim_pending(rx).await,
            PrescriptionStatus::FillPending => self.guard_fill_pending(rx, context).await,
            PrescriptionStatus::Filled => self.guard_filled(rx).await,
            PrescriptionStatus::VerificationPending => self.guard_verification_pending(rx).await,
            PrescriptionStatus::Verified => self.guard_verified(rx).await,
            _ => Ok(()),
        }
    }

    /// Admission requires a patient link and no duplicate prescribing
    /// event (same drug, quantity, prescriber) in the last 24 hours.
    async fn guard_data_entry(&self, rx: &Prescription) -> Result<()> {
        let patient_id = rx
            .patient_id
            .ok_or_else(|| EngineError::MissingRequired("patient_id".to_string()))?;

        let cutoff = self.clock.now() - chrono::Duration::hours(24);
        let siblings = self.store.list_prescriptions_by_patient(patient_id).await?;
        let duplicate = siblings.iter().any(|other| {
            other.id != rx.id
                && other.created_at >= cutoff
                && other.drug_ndc == rx.drug_ndc
                && (other.quantity - rx.quantity).abs() < f64::EPSILON
                && other.prescriber_id == rx.prescriber_id
        });
        if duplicate {
            return Err(EngineError::invalid_field(
                "prescription",
                "duplicate prescribing event within 24 hours",
            ));
        }
        Ok(())
    }

    /// Claim submission requires the full required field set
    async fn guard_claim_pending(&self, rx: &Prescription) -> Result<()> {
        let patient_id = rx
            .patient_id
            .ok_or_else(|| EngineError::MissingRequired("patient_id".to_string()))?;
        let patient = self
            .store
            .get_patient(patient_id)
            .await?
            .ok_or_else(|| EngineError::not_found("patient", patient_id))?;

        if patient.first_name.trim().is_empty() {
            return Err(EngineError::MissingRequired("patient.first_name".into()));
        }
        if patient.last_name.trim().is_empty() {
            return Err(EngineError::MissingRequired("patient.last_name".into()));
        }
        if rx.drug_name.trim().is_empty() || rx.drug_ndc.trim().is_empty() {
            return Err(EngineError::MissingRequired("drug".into()));
        }
        if rx.quantity <= 0.0 {
            return Err(EngineError::MissingRequired("quantity".into()));
        }
        if rx.sig.trim().is_empty() {
            return Err(EngineError::MissingRequired("sig".into()));
        }
        if rx.prescriber_name.trim().is_empty() {
            return Err(EngineError::MissingRequired("prescriber".into()));
        }
        Ok(())
    }

    /// Fillable when a claim approved, a cash conversion exists, or a
    /// documented Schedule II emergency partial in an LTC context.
    async fn guard_fill_pending(&self, rx: &Prescription, context: &Value) -> Result<()> {
        let claims = self.store.list_claims_by_rx(rx.id).await?;
        if claims.iter().any(|c| c.status == ClaimStatus::Approved) {
            return Ok(());
        }
        if self.store.find_cash_conversion_by_rx(rx.id).await?.is_some() {
            return Ok(());
        }

        let emergency = context
            .get("emergency_partial")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if emergency {
            if rx.dea_schedule != DeaSchedule::ScheduleIi || !rx.ltc_context {
                return Err(EngineError::NotAuthorized(
                    "emergency partial fills apply only to Schedule II in LTC".to_string(),
                ));
            }
            let documented = context
                .get("documentation")
                .and_then(Value::as_str)
                .map(|s| s.trim().len() >= 10)
                .unwrap_or(false);
            if !documented {
                return Err(EngineError::MissingRequired(
                    "emergency_partial.documentation".to_string(),
                ));
            }
            return Ok(());
        }

        Err(EngineError::InvalidTransition {
            from: format!("{:?}", rx.status),
            to: "FillPending".to_string(),
        })
    }

    async fn guard_filled(&self, rx: &Prescription) -> Result<()> {
        let fill = self.latest_fill(rx.id).await?;
        match fill {
            Some(f) if f.status == FillStatus::Filled => Ok(()),
            _ => Err(EngineError::invalid_field(
                "fill",
                "no finalized fill for this prescription",
            )),
        }
    }

    async fn guard_verification_pending(&self, rx: &Prescription) -> Result<()> {
        let fill = self
            .latest_fill(rx.id)
            .await?
            .ok_or_else(|| EngineError::invalid_field("fill", "no fill to verify"))?;
        let report = fill_service::validate_fill_for_verification(
            &fill,
            rx,
            self.clock.today(),
        );
        if !report.valid {
            return Err(EngineError::SafetyHold {
                resource: format!("fill:{}", fill.id),
                codes: report.errors,
            });
        }
        Ok(())
    }

    async fn guard_verified(&self, rx: &Prescription) -> Result<()> {
        let fill = self
            .latest_fill(rx.id)
            .await?
            .ok_or_else(|| EngineError::invalid_field("fill", "no fill to verify"))?;
        let sessions_open = self.store.find_open_session_by_fill(fill.id).await?;
        if sessions_open.is_some() {
            return Err(EngineError::invalid_field(
                "verification_session",
                "session still open",
            ));
        }
        // The fill itself carries the approved verification outcome
        let current = self
            .store
            .get_fill(fill.id)
            .await?
            .ok_or_else(|| EngineError::not_found("fill", fill.id))?;
        if current.verification != crate::models::fill::FillVerification::Approved {
            return Err(EngineError::invalid_field(
                "verification_session",
                "no approved verification for the fill",
            ));
        }
        Ok(())
    }

    async fn latest_fill(&self, rx_id: Uuid) -> Result<Option<Fill>> {
        let fills = self.store.list_fills(rx_id).await?;
        Ok(fills.into_iter().max_by_key(|f| f.fill_number))
    }

    /// Re-open a dispensed prescription for a refill cycle.
    ///
    /// The state diagram treats `picked_up`/`delivered` as terminal for
    /// the dispensing cycle; a refill with remaining authorization
    /// starts a new cycle at `claim_pending`. The refill service is
    /// responsible for calendar and Schedule II checks before calling.
    pub async fn reopen_for_refill(&self, rx_id: Uuid, actor: &Actor) -> Result<Prescription> {
        permissions::require(actor, Resource::Medication, Action::Update)?;
        let _guard = self.locks.acquire(&format!("rx:{}", rx_id)).await;
        let rx = self
            .store
            .get_prescription(rx_id)
            .await?
            .ok_or_else(|| EngineError::not_found("prescription", rx_id))?;
        if !matches!(
            rx.status,
            PrescriptionStatus::PickedUp | PrescriptionStatus::Delivered
        ) {
            return Err(EngineError::InvalidTransition {
                from: format!("{:?}", rx.status),
                to: "ClaimPending".to_string(),
            });
        }
        if rx.refills_remaining <= 0 {
            return Err(EngineError::invalid_field(
                "refills_remaining",
                "no refills remaining",
            ));
        }
        let mut updated = rx;
        updated.status = PrescriptionStatus::ClaimPending;
        updated.terminal_context = None;
        updated.updated_at = self.clock.now();
        self.store.save_prescription(&updated).await
    }

    /// Cancel a prescription (port-level operation; audited)
    pub async fn cancel(&self, rx_id: Uuid, actor: &Actor, reason: &str) -> Result<Prescription> {
        let cancelled = self
            .transition(
                rx_id,
                PrescriptionStatus::Cancelled,
                actor,
                serde_json::json!({ "reason": reason }),
            )
            .await?;
        self.audit
            .record(
                actor,
                "prescription.cancel",
                "prescription",
                cancelled.id,
                true,
                serde_json::json!({ "reason": reason }),
            )
            .await?;
        Ok(cancelled)
    }

    /// Expire a lapsed prescription; no-op when still in date or
    /// already terminal.
    pub async fn expire_if_lapsed(&self, rx_id: Uuid, actor: &Actor) -> Result<Option<Prescription>> {
        let rx = self
            .store
            .get_prescription(rx_id)
            .await?
            .ok_or_else(|| EngineError::not_found("prescription", rx_id))?;
        if rx.status.is_terminal() || rx.expiration_date >= self.clock.today() {
            return Ok(None);
        }
        if !rx.status.can_transition_to(PrescriptionStatus::Expired) {
            return Ok(None);
        }
        let expired = self
            .transition(
                rx_id,
                PrescriptionStatus::Expired,
                actor,
                serde_json::json!({ "reason": "expiration_date_lapsed" }),
            )
            .await?;
        self.audit
            .record(
                actor,
                "prescription.expire",
                "prescription",
                expired.id,
                true,
                serde_json::json!({}),
            )
            .await?;
        Ok(Some(expired))
    }

    /// Record used by verification to push work back to data entry
    pub async fn return_for_rework(&self, rx_id: Uuid, actor: &Actor, notes: &str) -> Result<Prescription> {
        let rx = self
            .transition(
                rx_id,
                PrescriptionStatus::Rework,
                actor,
                serde_json::json!({ "notes": notes }),
            )
            .await?;
        self.transition(
            rx.id,
            PrescriptionStatus::DataEntry,
            actor,
            serde_json::json!({ "from_rework": true }),
        )
        .await
    }
}
