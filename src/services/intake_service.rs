/*!
 * Intake Service
 *
 * Admits inbound prescriptions (e-Rx, fax, phone, walk-in): links or
 * creates the patient by MRN + DOB, assigns the Rx number, and moves
 * the record into data entry. A prescribing event that duplicates one
 * admitted in the last 24 hours (same drug, quantity, prescriber) is
 * refused at admission.
 */

use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::models::drug::DeaSchedule;
use crate::models::patient::{Gender, HepaticFunction, Patient};
use crate::models::prescription::{
    DawCode, Prescription, PrescriptionPriority, PrescriptionStatus, RxSource,
};
use crate::models::user::Actor;
use crate::ports::{Clock, IdGen, Store};
use crate::services::audit_log_service::AuditLogService;
use crate::services::workflow_service::WorkflowService;
use crate::utils::errors::{EngineError, Result};
use crate::utils::permissions::{self, Action, Resource};
use crate::utils::validators::{validate_days_supply, validate_ndc, validate_quantity, validate_sig};

/// Inbound prescription payload
#[derive(Debug, Clone)]
pub struct IntakePayload {
    // Patient identity for matching (MRN + DOB) or creation
    pub patient_mrn: String,
    pub patient_first_name: String,
    pub patient_last_name: String,
    pub patient_dob: NaiveDate,
    pub patient_gender: Gender,

    pub drug_name: String,
    pub drug_ndc: String,
    pub dea_schedule: DeaSchedule,
    pub quantity: f64,
    pub days_supply: i32,
    pub sig: String,
    pub daw_code: u8,
    pub refills_authorized: i32,
    pub written_date: NaiveDate,
    /// Defaults to the schedule's fill window after the written date
    pub expiration_date: Option<NaiveDate>,
    pub indication: Option<String>,
    pub priority: PrescriptionPriority,
    pub ltc_context: bool,

    pub prescriber_id: Uuid,
    pub prescriber_name: String,
    pub prescriber_dea: Option<String>,
    pub prescriber_npi: Option<String>,
}

/// Intake service
#[derive(Clone)]
pub struct IntakeService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGen>,
    audit: AuditLogService,
    workflow: WorkflowService,
}

impl IntakeService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGen>,
        audit: AuditLogService,
        workflow: WorkflowService,
    ) -> Self {
        Self {
            store,
            clock,
            ids,
            audit,
            workflow,
        }
    }

    /// Accept an inbound prescription and admit it to data entry
    pub async fn accept(
        &self,
        source: RxSource,
        payload: IntakePayload,
        actor: &Actor,
    ) -> Result<Prescription> {
        permissions::require(actor, Resource::Medication, Action::Create)?;

        let ndc = validate_ndc(&payload.drug_ndc)?;
        validate_quantity(payload.quantity)?;
        validate_days_supply(payload.days_supply)?;
        validate_sig(&payload.sig)?;
        let daw_code = DawCode::new(payload.daw_code)?;
        if payload.dea_schedule == DeaSchedule::ScheduleIi && payload.refills_authorized != 0 {
            return Err(EngineError::invalid_field(
                "refills_authorized",
                "Schedule II prescriptions cannot authorize refills",
            ));
        }

        let patient = self.link_or_create_patient(&payload).await?;

        let expiration_date = payload.expiration_date.unwrap_or_else(|| {
            payload.written_date
                + chrono::Duration::days(payload.dea_schedule.fill_window_days())
        });

        let now = self.clock.now();
        let rx = Prescription {
            id: Uuid::new_v4(),
            version: 0,
            rx_number: self.ids.new_id("RX"),
            patient_id: Some(patient.id),
            prescriber_id: payload.prescriber_id,
            prescriber_name: payload.prescriber_name.clone(),
            prescriber_dea: payload.prescriber_dea.clone(),
            prescriber_npi: payload.prescriber_npi.clone(),
            drug_ndc: ndc,
            drug_name: payload.drug_name.clone(),
            dea_schedule: payload.dea_schedule,
            quantity: payload.quantity,
            days_supply: payload.days_supply,
            sig: payload.sig.clone(),
            daw_code,
            refills_authorized: payload.refills_authorized,
            refills_remaining: payload.refills_authorized,
            written_date: payload.written_date,
            expiration_date,
            indication: payload.indication.clone(),
            status: PrescriptionStatus::Intake,
            priority: payload.priority,
            source,
            ltc_context: payload.ltc_context,
            last_fill_date: None,
            terminal_context: None,
            created_at: now,
            updated_at: now,
        };
        let inserted = self.store.insert_prescription(&rx).await?;

        // Admission: duplicate suppression runs inside the guard
        let admitted = match self
            .workflow
            .transition(
                inserted.id,
                PrescriptionStatus::DataEntry,
                actor,
                serde_json::json!({ "source": format!("{:?}", source) }),
            )
            .await
        {
            Ok(admitted) => admitted,
            Err(err) => {
                self.audit
                    .record_denied(actor, "intake.accept", "prescription", inserted.id)
                    .await?;
                return Err(err);
            }
        };

        self.audit
            .record(
                actor,
                "intake.accept",
                "prescription",
                admitted.id,
                true,
                serde_json::json!({
                    "source": format!("{:?}", source),
                    "rx": admitted.rx_number,
                }),
            )
            .await?;
        Ok(admitted)
    }

    /// Match by MRN + DOB; create when no match exists
    async fn link_or_create_patient(&self, payload: &IntakePayload) -> Result<Patient> {
        if let Some(existing) = self
            .store
            .find_patient_by_identity(&payload.patient_mrn, payload.patient_dob)
            .await?
        {
            return Ok(existing);
        }
        let now = self.clock.now();
        let patient = Patient {
            id: Uuid::new_v4(),
            version: 0,
            mrn: payload.patient_mrn.clone(),
            first_name: payload.patient_first_name.clone(),
            last_name: payload.patient_last_name.clone(),
            date_of_birth: payload.patient_dob,
            gender: payload.patient_gender,
            address: None,
            phone: None,
            allergies: vec![],
            conditions: vec![],
            pregnant: false,
            nursing: false,
            creatinine_clearance: None,
            hepatic_function: HepaticFunction::Normal,
            insurance: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_patient(&patient).await
    }
}
