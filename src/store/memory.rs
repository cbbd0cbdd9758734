/*!
 * In-Memory Store
 *
 * Reference `Store` implementation backed by hash maps. Implements the
 * same optimistic-versioning contract a database-backed store must
 * honor: saves succeed only when the caller's version matches, and
 * uniqueness constraints ((rx, fill_number), one open session per
 * fill, (fill, confirmation_token)) are enforced on insert.
 */

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::audit::{AuditEntry, AuditFilter};
use crate::models::claim::{CashConversion, Claim};
use crate::models::drug::Drug;
use crate::models::dur::DurOverride;
use crate::models::fill::{DispenseRecord, Fill};
use crate::models::inventory::{InventoryItem, InventoryTransaction};
use crate::models::patient::Patient;
use crate::models::pdmp::PdmpResult;
use crate::models::prescription::Prescription;
use crate::models::verification::VerificationSession;
use crate::ports::Store;
use crate::utils::errors::{EngineError, Result};

#[derive(Default)]
struct Inner {
    patients: HashMap<Uuid, Patient>,
    drugs: HashMap<String, Drug>,
    prescriptions: HashMap<Uuid, Prescription>,
    fills: HashMap<Uuid, Fill>,
    claims: HashMap<Uuid, Claim>,
    cash_conversions: Vec<CashConversion>,
    sessions: HashMap<Uuid, VerificationSession>,
    dur_overrides: Vec<DurOverride>,
    pdmp_results: HashMap<Uuid, PdmpResult>,
    inventory_items: HashMap<(Uuid, String), InventoryItem>,
    inventory_log: Vec<InventoryTransaction>,
    dispense_records: Vec<DispenseRecord>,
    audit_log: Vec<AuditEntry>,
}

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn stale_check(resource: &str, id: impl std::fmt::Display, stored: i64, incoming: i64) -> Result<()> {
    if stored != incoming {
        return Err(EngineError::stale(resource, id));
    }
    Ok(())
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_patient(&self, patient: &Patient) -> Result<Patient> {
        let mut inner = self.inner.write().await;
        if inner.patients.contains_key(&patient.id) {
            return Err(EngineError::stale("patient", patient.id));
        }
        inner.patients.insert(patient.id, patient.clone());
        Ok(patient.clone())
    }

    async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>> {
        Ok(self.inner.read().await.patients.get(&id).cloned())
    }

    async fn find_patient_by_identity(&self, mrn: &str, dob: NaiveDate) -> Result<Option<Patient>> {
        Ok(self
            .inner
            .read()
            .await
            .patients
            .values()
            .find(|p| p.matches_identity(mrn, dob))
            .cloned())
    }

    async fn save_patient(&self, patient: &Patient) -> Result<Patient> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .patients
            .get(&patient.id)
            .ok_or_else(|| EngineError::not_found("patient", patient.id))?;
        stale_check("patient", patient.id, stored.version, patient.version)?;
        let mut updated = patient.clone();
        updated.version += 1;
        inner.patients.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn upsert_drug(&self, drug: &Drug) -> Result<()> {
        self.inner
            .write()
            .await
            .drugs
            .insert(drug.ndc.clone(), drug.clone());
        Ok(())
    }

    async fn get_drug(&self, ndc: &str) -> Result<Option<Drug>> {
        Ok(self.inner.read().await.drugs.get(ndc).cloned())
    }

    async fn insert_prescription(&self, rx: &Prescription) -> Result<Prescription> {
        rx.validate_invariants()?;
        let mut inner = self.inner.write().await;
        if inner.prescriptions.contains_key(&rx.id) {
            return Err(EngineError::stale("prescription", rx.id));
        }
        // (patient_id, rx_number) uniqueness
        if let Some(patient_id) = rx.patient_id {
            let duplicate = inner.prescriptions.values().any(|other| {
                other.patient_id == Some(patient_id) && other.rx_number == rx.rx_number
            });
            if duplicate {
                return Err(EngineError::stale("prescription", &rx.rx_number));
            }
        }
        inner.prescriptions.insert(rx.id, rx.clone());
        Ok(rx.clone())
    }

    async fn get_prescription(&self, id: Uuid) -> Result<Option<Prescription>> {
        Ok(self.inner.read().await.prescriptions.get(&id).cloned())
    }

    async fn save_prescription(&self, rx: &Prescription) -> Result<Prescription> {
        rx.validate_invariants()?;
        let mut inner = self.inner.write().await;
        let stored = inner
            .prescriptions
            .get(&rx.id)
            .ok_or_else(|| EngineError::not_found("prescription", rx.id))?;
        stale_check("prescription", rx.id, stored.version, rx.version)?;
        let mut updated = rx.clone();
        updated.version += 1;
        inner.prescriptions.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn list_prescriptions_by_patient(&self, patient_id: Uuid) -> Result<Vec<Prescription>> {
        let mut list: Vec<Prescription> = self
            .inner
            .read()
            .await
            .prescriptions
            .values()
            .filter(|rx| rx.patient_id == Some(patient_id))
            .cloned()
            .collect();
        list.sort_by_key(|rx| rx.created_at);
        Ok(list)
    }

    async fn list_prescriptions_by_status(
        &self,
        status: crate::models::prescription::PrescriptionStatus,
    ) -> Result<Vec<Prescription>> {
        let mut list: Vec<Prescription> = self
            .inner
            .read()
            .await
            .prescriptions
            .values()
            .filter(|rx| rx.status == status)
            .cloned()
            .collect();
        list.sort_by_key(|rx| rx.created_at);
        Ok(list)
    }

    async fn insert_fill(&self, fill: &Fill) -> Result<Fill> {
        let mut inner = self.inner.write().await;
        if inner
            .fills
            .values()
            .any(|f| f.rx_id == fill.rx_id && f.fill_number == fill.fill_number)
        {
            return Err(EngineError::DuplicateFill(fill.fill_number));
        }
        inner.fills.insert(fill.id, fill.clone());
        Ok(fill.clone())
    }

    async fn get_fill(&self, id: Uuid) -> Result<Option<Fill>> {
        Ok(self.inner.read().await.fills.get(&id).cloned())
    }

    async fn save_fill(&self, fill: &Fill) -> Result<Fill> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .fills
            .get(&fill.id)
            .ok_or_else(|| EngineError::not_found("fill", fill.id))?;
        stale_check("fill", fill.id, stored.version, fill.version)?;
        let mut updated = fill.clone();
        updated.version += 1;
        inner.fills.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn list_fills(&self, rx_id: Uuid) -> Result<Vec<Fill>> {
        let mut list: Vec<Fill> = self
            .inner
            .read()
            .await
            .fills
            .values()
            .filter(|f| f.rx_id == rx_id)
            .cloned()
            .collect();
        list.sort_by_key(|f| f.fill_number);
        Ok(list)
    }

    async fn insert_claim(&self, claim: &Claim) -> Result<Claim> {
        let mut inner = self.inner.write().await;
        if inner.claims.contains_key(&claim.id) {
            return Err(EngineError::stale("claim", claim.id));
        }
        inner.claims.insert(claim.id, claim.clone());
        Ok(claim.clone())
    }

    async fn get_claim(&self, id: Uuid) -> Result<Option<Claim>> {
        Ok(self.inner.read().await.claims.get(&id).cloned())
    }

    async fn save_claim(&self, claim: &Claim) -> Result<Claim> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .claims
            .get(&claim.id)
            .ok_or_else(|| EngineError::not_found("claim", claim.id))?;
        stale_check("claim", claim.id, stored.version, claim.version)?;
        let mut updated = claim.clone();
        updated.version += 1;
        inner.claims.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn list_claims_by_rx(&self, rx_id: Uuid) -> Result<Vec<Claim>> {
        let mut list: Vec<Claim> = self
            .inner
            .read()
            .await
            .claims
            .values()
            .filter(|c| c.rx_id == rx_id)
            .cloned()
            .collect();
        list.sort_by_key(|c| (c.created_at, c.attempt_no));
        Ok(list)
    }

    async fn insert_cash_conversion(&self, conversion: &CashConversion) -> Result<()> {
        self.inner
            .write()
            .await
            .cash_conversions
            .push(conversion.clone());
        Ok(())
    }

    async fn find_cash_conversion_by_rx(&self, rx_id: Uuid) -> Result<Option<CashConversion>> {
        Ok(self
            .inner
            .read()
            .await
            .cash_conversions
            .iter()
            .find(|c| c.rx_id == rx_id)
            .cloned())
    }

    async fn insert_session(&self, session: &VerificationSession) -> Result<VerificationSession> {
        let mut inner = self.inner.write().await;
        let open_exists = inner
            .sessions
            .values()
            .any(|s| s.fill_id == session.fill_id && !s.state.is_terminal());
        if open_exists {
            return Err(EngineError::stale("verification_session", session.fill_id));
        }
        inner.sessions.insert(session.id, session.clone());
        Ok(session.clone())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<VerificationSession>> {
        Ok(self.inner.read().await.sessions.get(&id).cloned())
    }

    async fn save_session(&self, session: &VerificationSession) -> Result<VerificationSession> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .sessions
            .get(&session.id)
            .ok_or_else(|| EngineError::not_found("verification_session", session.id))?;
        stale_check(
            "verification_session",
            session.id,
            stored.version,
            session.version,
        )?;
        let mut updated = session.clone();
        updated.version += 1;
        inner.sessions.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn find_open_session_by_fill(&self, fill_id: Uuid) -> Result<Option<VerificationSession>> {
        Ok(self
            .inner
            .read()
            .await
            .sessions
            .values()
            .find(|s| s.fill_id == fill_id && !s.state.is_terminal())
            .cloned())
    }

    async fn insert_dur_override(&self, record: &DurOverride) -> Result<()> {
        self.inner.write().await.dur_overrides.push(record.clone());
        Ok(())
    }

    async fn list_dur_overrides_by_session(&self, session_id: Uuid) -> Result<Vec<DurOverride>> {
        Ok(self
            .inner
            .read()
            .await
            .dur_overrides
            .iter()
            .filter(|o| o.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn insert_pdmp_result(&self, result: &PdmpResult) -> Result<PdmpResult> {
        let mut inner = self.inner.write().await;
        if inner.pdmp_results.contains_key(&result.id) {
            return Err(EngineError::stale("pdmp_result", result.id));
        }
        inner.pdmp_results.insert(result.id, result.clone());
        Ok(result.clone())
    }

    async fn get_pdmp_result(&self, id: Uuid) -> Result<Option<PdmpResult>> {
        Ok(self.inner.read().await.pdmp_results.get(&id).cloned())
    }

    async fn save_pdmp_result(&self, result: &PdmpResult) -> Result<PdmpResult> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .pdmp_results
            .get(&result.id)
            .ok_or_else(|| EngineError::not_found("pdmp_result", result.id))?;
        stale_check("pdmp_result", result.id, stored.version, result.version)?;
        let mut updated = result.clone();
        updated.version += 1;
        inner.pdmp_results.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn get_inventory_item(
        &self,
        pharmacy_id: Uuid,
        ndc: &str,
    ) -> Result<Option<InventoryItem>> {
        Ok(self
            .inner
            .read()
            .await
            .inventory_items
            .get(&(pharmacy_id, ndc.to_string()))
            .cloned())
    }

    async fn save_inventory_item(&self, item: &InventoryItem) -> Result<InventoryItem> {
        let mut inner = self.inner.write().await;
        let key = (item.pharmacy_id, item.ndc.clone());
        let stored = inner
            .inventory_items
            .get(&key)
            .ok_or_else(|| EngineError::not_found("inventory_item", &item.ndc))?;
        stale_check("inventory_item", &item.ndc, stored.version, item.version)?;
        let mut updated = item.clone();
        updated.version += 1;
        inner.inventory_items.insert(key, updated.clone());
        Ok(updated)
    }

    async fn insert_inventory_item(&self, item: &InventoryItem) -> Result<InventoryItem> {
        let mut inner = self.inner.write().await;
        let key = (item.pharmacy_id, item.ndc.clone());
        if inner.inventory_items.contains_key(&key) {
            return Err(EngineError::stale("inventory_item", &item.ndc));
        }
        inner.inventory_items.insert(key, item.clone());
        Ok(item.clone())
    }

    async fn list_inventory_items(&self, pharmacy_id: Uuid) -> Result<Vec<InventoryItem>> {
        let mut list: Vec<InventoryItem> = self
            .inner
            .read()
            .await
            .inventory_items
            .values()
            .filter(|item| item.pharmacy_id == pharmacy_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.ndc.cmp(&b.ndc));
        Ok(list)
    }

    async fn append_inventory_transaction(&self, tx: &InventoryTransaction) -> Result<()> {
        self.inner.write().await.inventory_log.push(tx.clone());
        Ok(())
    }

    async fn list_inventory_transactions(
        &self,
        pharmacy_id: Uuid,
        ndc: &str,
    ) -> Result<Vec<InventoryTransaction>> {
        Ok(self
            .inner
            .read()
            .await
            .inventory_log
            .iter()
            .filter(|tx| tx.pharmacy_id == pharmacy_id && tx.ndc == ndc)
            .cloned()
            .collect())
    }

    async fn insert_dispense_record(&self, record: &DispenseRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        let duplicate = inner.dispense_records.iter().any(|r| {
            r.fill_id == record.fill_id && r.confirmation_token == record.confirmation_token
        });
        if duplicate {
            return Err(EngineError::stale("dispense_record", record.fill_id));
        }
        inner.dispense_records.push(record.clone());
        Ok(())
    }

    async fn find_dispense_record(
        &self,
        fill_id: Uuid,
        confirmation_token: &str,
    ) -> Result<Option<DispenseRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .dispense_records
            .iter()
            .find(|r| r.fill_id == fill_id && r.confirmation_token == confirmation_token)
            .cloned())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        self.inner.write().await.audit_log.push(entry.clone());
        Ok(())
    }

    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        Ok(self
            .inner
            .read()
            .await
            .audit_log
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::drug::DeaSchedule;
    use crate::models::prescription::{
        DawCode, PrescriptionPriority, PrescriptionStatus, RxSource,
    };
    use chrono::Utc;

    fn sample_rx() -> Prescription {
        let written = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        Prescription {
            id: Uuid::new_v4(),
            version: 0,
            rx_number: "RX-000001".into(),
            patient_id: Some(Uuid::new_v4()),
            prescriber_id: Uuid::new_v4(),
            prescriber_name: "Dr. Osei".into(),
            prescriber_dea: None,
            prescriber_npi: None,
            drug_ndc: "00071015523".into(),
            drug_name: "Lisinopril".into(),
            dea_schedule: DeaSchedule::Legend,
            quantity: 30.0,
            days_supply: 30,
            sig: "Take 1 tablet by mouth daily".into(),
            daw_code: DawCode::default(),
            refills_authorized: 5,
            refills_remaining: 5,
            written_date: written,
            expiration_date: written + chrono::Duration::days(365),
            indication: None,
            status: PrescriptionStatus::Intake,
            priority: PrescriptionPriority::Normal,
            source: RxSource::ERx,
            ltc_context: false,
            last_fill_date: None,
            terminal_context: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_optimistic_versioning() {
        let store = MemoryStore::new();
        let rx = sample_rx();
        store.insert_prescription(&rx).await.unwrap();

        let mut first = store.get_prescription(rx.id).await.unwrap().unwrap();
        let mut second = first.clone();

        first.status = PrescriptionStatus::DataEntry;
        let saved = store.save_prescription(&first).await.unwrap();
        assert_eq!(saved.version, 1);

        // The second copy is now stale
        second.status = PrescriptionStatus::Cancelled;
        let err = store.save_prescription(&second).await.unwrap_err();
        assert!(matches!(err, EngineError::ConcurrentMutation { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_fill_number_rejected() {
        let store = MemoryStore::new();
        let rx = sample_rx();
        store.insert_prescription(&rx).await.unwrap();

        let mut fill = crate::models::fill::Fill {
            id: Uuid::new_v4(),
            version: 0,
            rx_id: rx.id,
            fill_number: 0,
            dispensed_ndc: None,
            lot_number: None,
            lot_expiration: None,
            quantity_prescribed: 30.0,
            quantity_dispensed: 0.0,
            days_supply: 30,
            is_partial_fill: false,
            partial_fill_reason: None,
            remaining_quantity: 0.0,
            aux_labels: vec![],
            packaging: None,
            acquisition_cost_cents: 0,
            dispensing_fee_cents: 0,
            patient_pay_cents: None,
            status: crate::models::fill::FillStatus::InProgress,
            verification: crate::models::fill::FillVerification::NotStarted,
            fill_date: None,
            filled_by: None,
            interrupted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.insert_fill(&fill).await.unwrap();

        fill.id = Uuid::new_v4();
        let err = store.insert_fill(&fill).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateFill(0)));
    }

    #[tokio::test]
    async fn test_one_open_session_per_fill() {
        let store = MemoryStore::new();
        let fill_id = Uuid::new_v4();
        let session = VerificationSession {
            id: Uuid::new_v4(),
            version: 0,
            rx_id: Uuid::new_v4(),
            fill_id,
            pharmacist_id: Uuid::new_v4(),
            state: crate::models::verification::SessionState::InProgress,
            checklist: crate::models::verification::Checklist::for_fill(false),
            scan: None,
            dur_alerts: vec![],
            dur_overrides: vec![],
            pdmp_skip_reason: None,
            decision: None,
            decision_notes: None,
            rejection_reason: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        store.insert_session(&session).await.unwrap();

        let mut second = session.clone();
        second.id = Uuid::new_v4();
        assert!(store.insert_session(&second).await.is_err());
    }
}
