/*!
 * Verification Service
 *
 * The pharmacist's release gate. A session snapshots the DUR alert set
 * when it opens and walks checklist -> DUR acknowledgement -> barcode
 * scan -> decision. Approval requires:
 *  (a) every required checklist item checked,
 *  (b) the scanned NDC matching (exact, or package-variant with
 *      explicit operator consent),
 *  (c) every high-severity DUR alert resolved or overridden,
 *  (d) for controlled substances, a PDMP review or a documented skip
 *      reason.
 */

use std::sync::Arc;

use uuid::Uuid;

use crate::models::dur::{DurOverride, DurSeverity};
use crate::models::fill::{Fill, FillStatus, FillVerification};
use crate::models::prescription::{Prescription, PrescriptionStatus};
use crate::models::user::Actor;
use crate::models::verification::{
    Checklist, NdcMatch, ScanRecord, SessionDecision, SessionState, VerificationSession,
};
use crate::ports::{Clock, Store};
use crate::services::audit_log_service::AuditLogService;
use crate::services::dur_service::{CurrentMedication, DurInput, DurService};
use crate::services::fill_service::PharmacyProfile;
use crate::services::inventory_service::InventoryService;
use crate::services::workflow_service::WorkflowService;
use crate::utils::errors::{EngineError, Result};
use crate::utils::ndc::parse_barcode;
use crate::utils::permissions::require_pharmacist;

/// Verification session orchestrator
#[derive(Clone)]
pub struct VerificationService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    audit: AuditLogService,
    dur: DurService,
    workflow: WorkflowService,
    inventory: InventoryService,
    profile: PharmacyProfile,
}

impl VerificationService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        audit: AuditLogService,
        dur: DurService,
        workflow: WorkflowService,
        inventory: InventoryService,
        profile: PharmacyProfile,
    ) -> Self {
        Self {
            store,
            clock,
            audit,
            dur,
            workflow,
            inventory,
            profile,
        }
    }

    async fn load_session(&self, session_id: Uuid) -> Result<VerificationSession> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| EngineError::not_found("verification_session", session_id))
    }

    async fn load_fill(&self, fill_id: Uuid) -> Result<Fill> {
        self.store
            .get_fill(fill_id)
            .await?
            .ok_or_else(|| EngineError::not_found("fill", fill_id))
    }

    async fn load_rx(&self, rx_id: Uuid) -> Result<Prescription> {
        self.store
            .get_prescription(rx_id)
            .await?
            .ok_or_else(|| EngineError::not_found("prescription", rx_id))
    }

    /// Open a session for a finalized fill. Snapshots the DUR result
    /// computed against the patient's current profile.
    pub async fn open(&self, fill_id: Uuid, pharmacist: &Actor) -> Result<VerificationSession> {
        require_pharmacist(pharmacist)?;
        let fill = self.load_fill(fill_id).await?;
        if fill.status != FillStatus::Filled {
            return Err(EngineError::InvalidTransition {
                from: format!("{:?}", fill.status),
                to: "Verified".to_string(),
            });
        }
        let rx = self.load_rx(fill.rx_id).await?;
        if rx.status != PrescriptionStatus::VerificationPending {
            return Err(EngineError::InvalidTransition {
                from: format!("{:?}", rx.status),
                to: "Verified".to_string(),
            });
        }

        let dur_result = self.dur.check(&self.build_dur_input(&rx).await?);

        let session = VerificationSession {
            id: Uuid::new_v4(),
            version: 0,
            rx_id: rx.id,
            fill_id,
            pharmacist_id: pharmacist.id,
            state: if dur_result.has_high_severity_alerts {
                SessionState::PendingDur
            } else {
                SessionState::InProgress
            },
            checklist: Checklist::for_fill(rx.is_controlled()),
            scan: None,
            dur_alerts: dur_result.alerts,
            dur_overrides: vec![],
            pdmp_skip_reason: None,
            decision: None,
            decision_notes: None,
            rejection_reason: None,
            started_at: self.clock.now(),
            completed_at: None,
        };
        let inserted = self.store.insert_session(&session).await?;

        let mut fill = fill;
        fill.verification = FillVerification::InProgress;
        fill.updated_at = self.clock.now();
        self.store.save_fill(&fill).await?;

        tracing::info!(session = %inserted.id, fill = %fill_id, "verification opened");
        Ok(inserted)
    }

    /// Assemble the DUR input from the patient profile and their other
    /// active prescriptions.
    async fn build_dur_input(&self, rx: &Prescription) -> Result<DurInput> {
        let patient_id = rx
            .patient_id
            .ok_or_else(|| EngineError::MissingRequired("patient_id".to_string()))?;
        let patient = self
            .store
            .get_patient(patient_id)
            .await?
            .ok_or_else(|| EngineError::not_found("patient", patient_id))?;

        let current_medications = self
            .store
            .list_prescriptions_by_patient(patient_id)
            .await?
            .into_iter()
            .filter(|other| other.id != rx.id)
            .filter(|other| {
                !matches!(
                    other.status,
                    PrescriptionStatus::Cancelled
                        | PrescriptionStatus::Expired
                        | PrescriptionStatus::Rejected
                )
            })
            .map(|other| CurrentMedication {
                name: other.drug_name,
                therapeutic_class: None,
            })
            .collect();

        let strength_mg = self
            .store
            .get_drug(&rx.drug_ndc)
            .await?
            .map(|d| d.strength)
            .unwrap_or(0.0);

        Ok(DurInput {
            drug_name: rx.drug_name.clone(),
            therapeutic_class: None,
            ndc: Some(rx.drug_ndc.clone()),
            current_medications,
            allergies: patient.allergies.clone(),
            conditions: patient.conditions.clone(),
            age: Some(patient.age_on(self.clock.today())),
            pregnant: patient.pregnant,
            nursing: patient.nursing,
            creatinine_clearance: patient.creatinine_clearance,
            hepatic_function: patient.hepatic_function,
            quantity: rx.quantity,
            strength_mg,
            days_supply: rx.days_supply,
            route: None,
        })
    }

    /// Record the checklist snapshot
    pub async fn complete_checklist(
        &self,
        session_id: Uuid,
        checklist: Checklist,
        actor: &Actor,
    ) -> Result<VerificationSession> {
        require_pharmacist(actor)?;
        let mut session = self.open_session_for_update(session_id).await?;
        session.checklist = checklist;
        session.state = self.next_state(&session);
        self.store.save_session(&session).await
    }

    /// Record a barcode scan against the dispensed product
    pub async fn scan(
        &self,
        session_id: Uuid,
        barcode: &str,
        variant_consent: bool,
        actor: &Actor,
    ) -> Result<VerificationSession> {
        require_pharmacist(actor)?;
        let mut session = self.open_session_for_update(session_id).await?;
        let fill = self.load_fill(session.fill_id).await?;
        let rx = self.load_rx(session.rx_id).await?;

        let parsed = parse_barcode(barcode)
            .map_err(|err| EngineError::invalid_field("barcode", err.to_string()))?;
        let expected = fill
            .dispensed_ndc
            .clone()
            .unwrap_or_else(|| rx.drug_ndc.clone());
        let outcome = NdcMatch::compare(&expected, &parsed.ndc);

        session.scan = Some(ScanRecord {
            raw_barcode: barcode.to_string(),
            scanned_ndc: parsed.ndc,
            outcome,
            variant_consented: variant_consent,
            scanned_at: self.clock.now(),
        });
        session.state = self.next_state(&session);
        self.store.save_session(&session).await
    }

    /// Acknowledge a DUR alert with an override code and reason
    pub async fn acknowledge(
        &self,
        session_id: Uuid,
        alert_id: Uuid,
        code: &str,
        reason: &str,
        actor: &Actor,
    ) -> Result<VerificationSession> {
        let mut session = self.open_session_for_update(session_id).await?;
        let alert = session
            .dur_alerts
            .iter()
            .find(|a| a.id == alert_id)
            .ok_or_else(|| EngineError::not_found("dur_alert", alert_id))?
            .clone();

        self.dur.validate_override(&alert, code, reason, actor)?;

        let record = DurOverride {
            id: Uuid::new_v4(),
            alert_id,
            session_id,
            code: code.to_string(),
            reason: reason.to_string(),
            actor_id: actor.id,
            acknowledged_at: self.clock.now(),
        };
        self.store.insert_dur_override(&record).await?;
        session.dur_overrides.push(record);
        session.state = self.next_state(&session);
        self.store.save_session(&session).await
    }

    /// Document that the PDMP review was skipped (non-routine)
    pub async fn skip_pdmp(
        &self,
        session_id: Uuid,
        reason: &str,
        actor: &Actor,
    ) -> Result<VerificationSession> {
        require_pharmacist(actor)?;
        if reason.trim().len() < 10 {
            return Err(EngineError::invalid_field(
                "reason",
                "PDMP skip reason must be documented (at least 10 characters)",
            ));
        }
        let mut session = self.open_session_for_update(session_id).await?;
        session.pdmp_skip_reason = Some(reason.to_string());
        self.store.save_session(&session).await
    }

    /// Final decision. Approval enforces the completion rule; the
    /// other decisions route the work accordingly.
    pub async fn decide(
        &self,
        session_id: Uuid,
        decision: SessionDecision,
        notes: Option<&str>,
        rejection_reason: Option<&str>,
        actor: &Actor,
    ) -> Result<VerificationSession> {
        require_pharmacist(actor)?;
        let mut session = self.open_session_for_update(session_id).await?;
        let mut fill = self.load_fill(session.fill_id).await?;
        let rx = self.load_rx(session.rx_id).await?;

        match decision {
            SessionDecision::Approved => {
                self.enforce_completion(&session, &rx)?;
                session.state = SessionState::Approved;
                fill.verification = FillVerification::Approved;
                fill.status = FillStatus::Verified;
            }
            SessionDecision::Rejected => {
                let reason = rejection_reason.ok_or_else(|| {
                    EngineError::MissingRequired("rejection_reason".to_string())
                })?;
                session.rejection_reason = Some(reason.to_string());
                session.state = SessionState::Rejected;
                fill.verification = FillVerification::Rejected;
                fill.status = FillStatus::Cancelled;
            }
            SessionDecision::ReturnedForRework => {
                session.state = SessionState::ReturnedForRework;
                fill.verification = FillVerification::Rejected;
                fill.status = FillStatus::Cancelled;
            }
        }
        session.decision = Some(decision);
        session.decision_notes = notes.map(str::to_string);
        session.completed_at = Some(self.clock.now());
        let saved_session = self.store.save_session(&session).await?;

        fill.updated_at = self.clock.now();
        self.store.save_fill(&fill).await?;

        match decision {
            SessionDecision::Approved => {
                self.workflow
                    .transition(
                        rx.id,
                        PrescriptionStatus::Verified,
                        actor,
                        serde_json::json!({ "session": session_id }),
                    )
                    .await?;
                self.workflow
                    .transition(
                        rx.id,
                        PrescriptionStatus::ReadyForPickup,
                        actor,
                        serde_json::json!({ "session": session_id }),
                    )
                    .await?;
            }
            SessionDecision::Rejected => {
                // The rejected product goes back on the shelf
                self.inventory
                    .deallocate(self.profile.id, &rx.drug_ndc, fill.quantity_prescribed)
                    .await?;
                self.workflow
                    .transition(
                        rx.id,
                        PrescriptionStatus::Rejected,
                        actor,
                        serde_json::json!({ "session": session_id }),
                    )
                    .await?;
            }
            SessionDecision::ReturnedForRework => {
                self.inventory
                    .deallocate(self.profile.id, &rx.drug_ndc, fill.quantity_prescribed)
                    .await?;
                self.workflow
                    .return_for_rework(rx.id, actor, notes.unwrap_or(""))
                    .await?;
            }
        }

        self.audit
            .record(
                actor,
                "verify.decide",
                "verification_session",
                session_id,
                true,
                serde_json::json!({ "decision": format!("{:?}", decision) }),
            )
            .await?;
        Ok(saved_session)
    }

    async fn open_session_for_update(&self, session_id: Uuid) -> Result<VerificationSession> {
        let session = self.load_session(session_id).await?;
        if session.state.is_terminal() {
            return Err(EngineError::InvalidTransition {
                from: format!("{:?}", session.state),
                to: "updated".to_string(),
            });
        }
        Ok(session)
    }

    /// Session state from its accumulated evidence
    fn next_state(&self, session: &VerificationSession) -> SessionState {
        if !session.unresolved_high_alerts().is_empty() {
            return SessionState::PendingDur;
        }
        let scan_ok = matches!(
            session.scan.as_ref().map(|s| (s.outcome, s.variant_consented)),
            Some((NdcMatch::Exact, _)) | Some((NdcMatch::PackageVariant, true))
        );
        if !scan_ok {
            return SessionState::PendingScan;
        }
        SessionState::InProgress
    }

    /// The approval completion rule
    fn enforce_completion(&self, session: &VerificationSession, rx: &Prescription) -> Result<()> {
        let missing = session.checklist.missing_items();
        if !missing.is_empty() {
            return Err(EngineError::invalid_field(
                "checklist",
                format!("{} item(s) unchecked", missing.len()),
            ));
        }

        let unresolved: Vec<String> = session
            .unresolved_high_alerts()
            .iter()
            .map(|alert| alert.code.clone())
            .collect();
        if !unresolved.is_empty() {
            return Err(EngineError::SafetyHold {
                resource: format!("fill:{}", session.fill_id),
                codes: unresolved,
            });
        }

        match session.scan.as_ref() {
            None => {
                return Err(EngineError::SafetyHold {
                    resource: format!("fill:{}", session.fill_id),
                    codes: vec!["NDC-SCAN-MISSING".to_string()],
                })
            }
            Some(scan) => match scan.outcome {
                NdcMatch::Exact => {}
                NdcMatch::PackageVariant if scan.variant_consented => {}
                NdcMatch::PackageVariant => {
                    return Err(EngineError::SafetyHold {
                        resource: format!("fill:{}", session.fill_id),
                        codes: vec!["NDC-PACKAGE-VARIANT".to_string()],
                    })
                }
                NdcMatch::NoMatch => {
                    return Err(EngineError::SafetyHold {
                        resource: format!("fill:{}", session.fill_id),
                        codes: vec!["NDC-MISMATCH".to_string()],
                    })
                }
            },
        }

        if rx.is_controlled() {
            let pdmp_done = session.checklist.pdmp_reviewed == Some(true);
            if !pdmp_done && session.pdmp_skip_reason.is_none() {
                return Err(EngineError::SafetyHold {
                    resource: format!("fill:{}", session.fill_id),
                    codes: vec!["PDMP-NOT-REVIEWED".to_string()],
                });
            }
        }
        Ok(())
    }

    /// DUR severity threshold that blocks approval (informational)
    pub fn blocking_severity() -> DurSeverity {
        DurSeverity::High
    }
}
