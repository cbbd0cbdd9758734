/*!
 * Dispense Service
 *
 * Records the final hand-off to the patient: writes the dispense
 * inventory transaction, moves the prescription to picked_up, and
 * stores the hand-off record.
 *
 * Idempotent on (fill, confirmation token): a replay with the same
 * payload returns the original record and writes no second audit row;
 * a replay with a divergent payload fails.
 */

use std::sync::Arc;

use uuid::Uuid;

use crate::models::fill::{DispenseRecord, Fill, FillStatus};
use crate::models::prescription::PrescriptionStatus;
use crate::models::user::Actor;
use crate::ports::{Clock, Store};
use crate::services::audit_log_service::AuditLogService;
use crate::services::fill_service::PharmacyProfile;
use crate::services::inventory_service::InventoryService;
use crate::services::workflow_service::WorkflowService;
use crate::utils::errors::{EngineError, Result};
use crate::utils::permissions::{self, Action, Resource};

/// Dispense (hand-off) service
#[derive(Clone)]
pub struct DispenseService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    audit: AuditLogService,
    inventory: InventoryService,
    workflow: WorkflowService,
    profile: PharmacyProfile,
}

impl DispenseService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        audit: AuditLogService,
        inventory: InventoryService,
        workflow: WorkflowService,
        profile: PharmacyProfile,
    ) -> Self {
        Self {
            store,
            clock,
            audit,
            inventory,
            workflow,
            profile,
        }
    }

    /// Hand a verified fill to the patient
    pub async fn hand(
        &self,
        fill_id: Uuid,
        patient_id_confirmed: bool,
        signature: Option<Vec<u8>>,
        confirmation_token: &str,
        actor: &Actor,
    ) -> Result<DispenseRecord> {
        permissions::require(actor, Resource::Medication, Action::Update)?;
        if confirmation_token.trim().is_empty() {
            return Err(EngineError::MissingRequired("confirmation_token".to_string()));
        }

        // Idempotent replay
        if let Some(existing) = self
            .store
            .find_dispense_record(fill_id, confirmation_token)
            .await?
        {
            if existing.actor_id == actor.id
                && existing.patient_id_confirmed == patient_id_confirmed
            {
                return Ok(existing);
            }
            return Err(EngineError::stale("dispense_record", fill_id));
        }

        let fill = self.load_fill(fill_id).await?;
        if fill.status != FillStatus::Verified {
            return Err(EngineError::InvalidTransition {
                from: format!("{:?}", fill.status),
                to: "Dispensed".to_string(),
            });
        }
        let rx = self
            .store
            .get_prescription(fill.rx_id)
            .await?
            .ok_or_else(|| EngineError::not_found("prescription", fill.rx_id))?;
        if rx.status != PrescriptionStatus::ReadyForPickup {
            return Err(EngineError::InvalidTransition {
                from: format!("{:?}", rx.status),
                to: "PickedUp".to_string(),
            });
        }
        if !patient_id_confirmed {
            return Err(EngineError::invalid_field(
                "patient_id_confirmed",
                "identity must be confirmed at hand-off",
            ));
        }
        // Controlled hand-offs also require a signature on file
        if rx.is_controlled() && signature.is_none() {
            return Err(EngineError::MissingRequired("signature".to_string()));
        }

        let ndc = fill
            .dispensed_ndc
            .clone()
            .unwrap_or_else(|| rx.drug_ndc.clone());
        self.inventory
            .apply_dispense(
                self.profile.id,
                &ndc,
                fill.quantity_dispensed,
                &fill.id.to_string(),
                actor,
            )
            .await?;

        let mut fill = fill;
        fill.status = FillStatus::Dispensed;
        fill.updated_at = self.clock.now();
        self.store.save_fill(&fill).await?;

        self.workflow
            .transition(
                rx.id,
                PrescriptionStatus::PickedUp,
                actor,
                serde_json::json!({ "confirmation_token": confirmation_token }),
            )
            .await?;

        let record = DispenseRecord {
            id: Uuid::new_v4(),
            fill_id,
            rx_id: rx.id,
            actor_id: actor.id,
            confirmation_token: confirmation_token.to_string(),
            patient_id_confirmed,
            signature,
            interrupted: false,
            dispensed_at: self.clock.now(),
        };
        self.store.insert_dispense_record(&record).await?;

        self.audit
            .record(
                actor,
                "dispense.hand",
                "fill",
                fill_id,
                true,
                serde_json::json!({ "rx": rx.rx_number }),
            )
            .await?;
        Ok(record)
    }

    async fn load_fill(&self, fill_id: Uuid) -> Result<Fill> {
        self.store
            .get_fill(fill_id)
            .await?
            .ok_or_else(|| EngineError::not_found("fill", fill_id))
    }
}
