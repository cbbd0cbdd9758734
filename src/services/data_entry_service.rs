/*!
 * Data Entry Service
 *
 * Field-by-field completion of an admitted prescription, optionally
 * seeded by the `Suggestor` port. Extracted fields are tagged variants
 * with per-field validators; the confidence policy decides how each
 * may be accepted:
 *
 *   confidence >= 95  auto-accept allowed
 *   85..=94           explicit confirmation (manual) required
 *   < 85              manual override required
 *
 * Sessions live in memory; the durable outcome is the updated
 * prescription produced by `complete`.
 */

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::models::prescription::{DawCode, PrescriptionStatus};
use crate::models::user::Actor;
use crate::ports::{Clock, FieldSuggestion, Store, Suggestor};
use crate::services::audit_log_service::AuditLogService;
use crate::services::workflow_service::WorkflowService;
use crate::utils::errors::{EngineError, Result};
use crate::utils::permissions::{self, Action, Resource};
use crate::utils::validators::{validate_days_supply, validate_ndc, validate_quantity, validate_sig};

/// A typed, validated data-entry field
#[derive(Debug, Clone, PartialEq)]
pub enum EntryField {
    PatientFirstName(String),
    PatientLastName(String),
    PatientDob(NaiveDate),
    DrugName(String),
    DrugNdc(String),
    Quantity(f64),
    DaysSupply(i32),
    Sig(String),
    PrescriberName(String),
    Daw(u8),
    Indication(String),
}

impl EntryField {
    /// Stable field name used for suggestion lookup and audit context
    pub fn name(&self) -> &'static str {
        match self {
            Self::PatientFirstName(_) => "patient_first_name",
            Self::PatientLastName(_) => "patient_last_name",
            Self::PatientDob(_) => "patient_dob",
            Self::DrugName(_) => "drug_name",
            Self::DrugNdc(_) => "drug_ndc",
            Self::Quantity(_) => "quantity",
            Self::DaysSupply(_) => "days_supply",
            Self::Sig(_) => "sig",
            Self::PrescriberName(_) => "prescriber_name",
            Self::Daw(_) => "daw_code",
            Self::Indication(_) => "indication",
        }
    }

    /// Per-field validation
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::PatientFirstName(v) | Self::PatientLastName(v) | Self::PrescriberName(v) => {
                if v.trim().is_empty() {
                    return Err(EngineError::MissingRequired(self.name().to_string()));
                }
                Ok(())
            }
            Self::PatientDob(_) => Ok(()),
            Self::DrugName(v) => {
                if v.trim().is_empty() {
                    return Err(EngineError::MissingRequired("drug_name".to_string()));
                }
                Ok(())
            }
            Self::DrugNdc(v) => validate_ndc(v).map(|_| ()),
            Self::Quantity(v) => validate_quantity(*v),
            Self::DaysSupply(v) => validate_days_supply(*v),
            Self::Sig(v) => validate_sig(v),
            Self::Daw(v) => DawCode::new(*v).map(|_| ()),
            Self::Indication(_) => Ok(()),
        }
    }
}

/// How the operator accepted a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// Accepted as suggested without review
    Auto,
    /// Operator explicitly confirmed the value
    Manual,
    /// Operator overrode/typed the value themselves
    Override,
}

/// In-memory entry session
#[derive(Debug, Clone)]
pub struct EntrySession {
    pub id: Uuid,
    pub rx_id: Uuid,
    pub suggestions: Vec<FieldSuggestion>,
    pub committed: HashMap<&'static str, EntryField>,
}

/// Data entry service
#[derive(Clone)]
pub struct DataEntryService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    suggestor: Option<Arc<dyn Suggestor>>,
    suggestor_timeout: Duration,
    audit: AuditLogService,
    workflow: WorkflowService,
    sessions: Arc<Mutex<HashMap<Uuid, EntrySession>>>,
}

impl DataEntryService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        suggestor: Option<Arc<dyn Suggestor>>,
        suggestor_timeout: Duration,
        audit: AuditLogService,
        workflow: WorkflowService,
    ) -> Self {
        Self {
            store,
            clock,
            suggestor,
            suggestor_timeout,
            audit,
            workflow,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Open a session; consults the suggestor when a source document
    /// is provided. A suggestor timeout yields no suggestions (never
    /// an error: suggestions are not safety-critical).
    pub async fn open_session(
        &self,
        rx_id: Uuid,
        document: Option<&[u8]>,
        actor: &Actor,
    ) -> Result<EntrySession> {
        permissions::require(actor, Resource::Medication, Action::Update)?;
        let rx = self
            .store
            .get_prescription(rx_id)
            .await?
            .ok_or_else(|| EngineError::not_found("prescription", rx_id))?;
        if rx.status != PrescriptionStatus::DataEntry {
            return Err(EngineError::InvalidTransition {
                from: format!("{:?}", rx.status),
                to: "DataEntry".to_string(),
            });
        }

        let suggestions = match (document, self.suggestor.as_ref()) {
            (Some(document), Some(suggestor)) => {
                match tokio::time::timeout(self.suggestor_timeout, suggestor.extract(document)).await
                {
                    Ok(Ok(fields)) => fields,
                    Ok(Err(err)) => {
                        tracing::warn!(error = %err, "suggestor failed; continuing without");
                        vec![]
                    }
                    Err(_) => {
                        tracing::warn!("suggestor timed out; continuing without");
                        vec![]
                    }
                }
            }
            _ => vec![],
        };

        let session = EntrySession {
            id: Uuid::new_v4(),
            rx_id,
            suggestions,
            committed: HashMap::new(),
        };
        self.sessions
            .lock()
            .expect("entry sessions poisoned")
            .insert(session.id, session.clone());
        Ok(session)
    }

    fn confidence_for(session: &EntrySession, field_name: &str) -> Option<u8> {
        session
            .suggestions
            .iter()
            .find(|s| s.field == field_name)
            .map(|s| s.confidence)
    }

    /// Commit one field under the acceptance policy
    pub fn commit_field(
        &self,
        session_id: Uuid,
        field: EntryField,
        acceptance: Acceptance,
    ) -> Result<()> {
        field.validate()?;

        let mut sessions = self.sessions.lock().expect("entry sessions poisoned");
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| EngineError::not_found("entry_session", session_id))?;

        let confidence = Self::confidence_for(session, field.name());
        match (confidence, acceptance) {
            // Auto-acceptance is only legal at confidence >= 95
            (Some(confidence), Acceptance::Auto) if confidence < 95 => {
                return Err(EngineError::invalid_field(
                    field.name(),
                    format!(
                        "confidence {} requires explicit confirmation",
                        confidence
                    ),
                ));
            }
            (None, Acceptance::Auto) => {
                return Err(EngineError::invalid_field(
                    field.name(),
                    "no suggestion to auto-accept",
                ));
            }
            // 85-94 may be confirmed; below 85 only a manual override
            (Some(confidence), Acceptance::Manual) if confidence < 85 => {
                return Err(EngineError::invalid_field(
                    field.name(),
                    format!("confidence {} requires manual override", confidence),
                ));
            }
            _ => {}
        }

        session.committed.insert(field.name(), field);
        Ok(())
    }

    /// Apply the committed fields, enforce the required set, and move
    /// the prescription to claim_pending.
    pub async fn complete(&self, session_id: Uuid, actor: &Actor) -> Result<()> {
        permissions::require(actor, Resource::Medication, Action::Update)?;
        let session = {
            let sessions = self.sessions.lock().expect("entry sessions poisoned");
            sessions
                .get(&session_id)
                .cloned()
                .ok_or_else(|| EngineError::not_found("entry_session", session_id))?
        };

        let mut rx = self
            .store
            .get_prescription(session.rx_id)
            .await?
            .ok_or_else(|| EngineError::not_found("prescription", session.rx_id))?;

        // Apply prescription-level fields
        for field in session.committed.values() {
            match field {
                EntryField::DrugName(v) => rx.drug_name = v.clone(),
                EntryField::DrugNdc(v) => {
                    rx.drug_ndc = validate_ndc(v)?;
                }
                EntryField::Quantity(v) => rx.quantity = *v,
                EntryField::DaysSupply(v) => rx.days_supply = *v,
                EntryField::Sig(v) => rx.sig = v.clone(),
                EntryField::PrescriberName(v) => rx.prescriber_name = v.clone(),
                EntryField::Daw(v) => rx.daw_code = DawCode::new(*v)?,
                EntryField::Indication(v) => rx.indication = Some(v.clone()),
                // Patient identity fields update the patient aggregate
                EntryField::PatientFirstName(_)
                | EntryField::PatientLastName(_)
                | EntryField::PatientDob(_) => {}
            }
        }

        // Patient-level fields
        if let Some(patient_id) = rx.patient_id {
            let mut patient = self
                .store
                .get_patient(patient_id)
                .await?
                .ok_or_else(|| EngineError::not_found("patient", patient_id))?;
            let mut changed = false;
            for field in session.committed.values() {
                match field {
                    EntryField::PatientFirstName(v) => {
                        patient.first_name = v.clone();
                        changed = true;
                    }
                    EntryField::PatientLastName(v) => {
                        patient.last_name = v.clone();
                        changed = true;
                    }
                    EntryField::PatientDob(v) => {
                        patient.date_of_birth = *v;
                        changed = true;
                    }
                    _ => {}
                }
            }
            if changed {
                patient.updated_at = self.clock.now();
                self.store.save_patient(&patient).await?;
            }
        }

        rx.updated_at = self.clock.now();
        self.store.save_prescription(&rx).await?;

        // The claim_pending guard enforces the required field set
        self.workflow
            .transition(
                rx.id,
                PrescriptionStatus::ClaimPending,
                actor,
                serde_json::json!({ "entry_session": session_id }),
            )
            .await?;

        self.sessions
            .lock()
            .expect("entry sessions poisoned")
            .remove(&session_id);

        self.audit
            .record(
                actor,
                "data_entry.complete",
                "prescription",
                rx.id,
                true,
                serde_json::json!({ "fields": session.committed.len() }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_validation() {
        assert!(EntryField::Quantity(30.0).validate().is_ok());
        assert!(EntryField::Quantity(0.0).validate().is_err());
        assert!(EntryField::Sig("Take 1 tablet daily".into()).validate().is_ok());
        assert!(EntryField::Sig("  ".into()).validate().is_err());
        assert!(EntryField::Daw(9).validate().is_ok());
        assert!(EntryField::Daw(12).validate().is_err());
        assert!(EntryField::DrugNdc("12345-678-90".into()).validate().is_ok());
        assert!(EntryField::DrugNdc("bogus".into()).validate().is_err());
    }

    #[test]
    fn test_field_names_are_stable() {
        assert_eq!(EntryField::Quantity(1.0).name(), "quantity");
        assert_eq!(EntryField::Sig("x".into()).name(), "sig");
        assert_eq!(
            EntryField::PatientFirstName("a".into()).name(),
            "patient_first_name"
        );
    }
}
