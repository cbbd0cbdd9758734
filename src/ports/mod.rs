/*!
 * Ports Module
 *
 * Interfaces the engine consumes: persistence (`Store`), the claim
 * switch, the PDMP provider, the immunization registry, the document
 * suggestor, plus `Clock` and `IdGen`. Transport and storage details
 * live behind these traits; the engine itself never opens a socket.
 *
 * Store writes use optimistic versioning: `save_*` succeeds only when
 * the entity's `version` matches the stored row, and bumps it by one.
 */

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::audit::{AuditEntry, AuditFilter};
use crate::models::claim::{CashConversion, Claim, ClaimRequest, ClaimResponse};
use crate::models::drug::Drug;
use crate::models::dur::DurOverride;
use crate::models::fill::{DispenseRecord, Fill};
use crate::models::inventory::{InventoryItem, InventoryTransaction};
use crate::models::patient::Patient;
use crate::models::pdmp::{PdmpPrescription, PdmpQuery, PdmpResult};
use crate::models::prescription::Prescription;
use crate::models::verification::VerificationSession;
use crate::utils::errors::Result;

/// Transactional persistence port with optimistic versioning
#[async_trait]
pub trait Store: Send + Sync {
    // Patients
    async fn insert_patient(&self, patient: &Patient) -> Result<Patient>;
    async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>>;
    async fn find_patient_by_identity(&self, mrn: &str, dob: NaiveDate) -> Result<Option<Patient>>;
    async fn save_patient(&self, patient: &Patient) -> Result<Patient>;

    // Drug reference data
    async fn upsert_drug(&self, drug: &Drug) -> Result<()>;
    async fn get_drug(&self, ndc: &str) -> Result<Option<Drug>>;

    // Prescriptions
    async fn insert_prescription(&self, rx: &Prescription) -> Result<Prescription>;
    async fn get_prescription(&self, id: Uuid) -> Result<Option<Prescription>>;
    async fn save_prescription(&self, rx: &Prescription) -> Result<Prescription>;
    async fn list_prescriptions_by_patient(&self, patient_id: Uuid) -> Result<Vec<Prescription>>;
    async fn list_prescriptions_by_status(
        &self,
        status: crate::models::prescription::PrescriptionStatus,
    ) -> Result<Vec<Prescription>>;

    // Fills; insert enforces unique (rx_id, fill_number)
    async fn insert_fill(&self, fill: &Fill) -> Result<Fill>;
    async fn get_fill(&self, id: Uuid) -> Result<Option<Fill>>;
    async fn save_fill(&self, fill: &Fill) -> Result<Fill>;
    async fn list_fills(&self, rx_id: Uuid) -> Result<Vec<Fill>>;

    // Claims
    async fn insert_claim(&self, claim: &Claim) -> Result<Claim>;
    async fn get_claim(&self, id: Uuid) -> Result<Option<Claim>>;
    async fn save_claim(&self, claim: &Claim) -> Result<Claim>;
    async fn list_claims_by_rx(&self, rx_id: Uuid) -> Result<Vec<Claim>>;

    // Cash conversions
    async fn insert_cash_conversion(&self, conversion: &CashConversion) -> Result<()>;
    async fn find_cash_conversion_by_rx(&self, rx_id: Uuid) -> Result<Option<CashConversion>>;

    // Verification sessions; insert enforces one non-terminal per fill
    async fn insert_session(&self, session: &VerificationSession) -> Result<VerificationSession>;
    async fn get_session(&self, id: Uuid) -> Result<Option<VerificationSession>>;
    async fn save_session(&self, session: &VerificationSession) -> Result<VerificationSession>;
    async fn find_open_session_by_fill(&self, fill_id: Uuid) -> Result<Option<VerificationSession>>;

    // DUR overrides (also snapshotted on the session)
    async fn insert_dur_override(&self, record: &DurOverride) -> Result<()>;
    async fn list_dur_overrides_by_session(&self, session_id: Uuid) -> Result<Vec<DurOverride>>;

    // PDMP results
    async fn insert_pdmp_result(&self, result: &PdmpResult) -> Result<PdmpResult>;
    async fn get_pdmp_result(&self, id: Uuid) -> Result<Option<PdmpResult>>;
    async fn save_pdmp_result(&self, result: &PdmpResult) -> Result<PdmpResult>;

    // Inventory: snapshot cache plus append-only transaction log
    async fn get_inventory_item(&self, pharmacy_id: Uuid, ndc: &str) -> Result<Option<InventoryItem>>;
    async fn save_inventory_item(&self, item: &InventoryItem) -> Result<InventoryItem>;
    async fn insert_inventory_item(&self, item: &InventoryItem) -> Result<InventoryItem>;
    async fn list_inventory_items(&self, pharmacy_id: Uuid) -> Result<Vec<InventoryItem>>;
    async fn append_inventory_transaction(&self, tx: &InventoryTransaction) -> Result<()>;
    async fn list_inventory_transactions(
        &self,
        pharmacy_id: Uuid,
        ndc: &str,
    ) -> Result<Vec<InventoryTransaction>>;

    // Dispense records, keyed by (fill, confirmation token)
    async fn insert_dispense_record(&self, record: &DispenseRecord) -> Result<()>;
    async fn find_dispense_record(
        &self,
        fill_id: Uuid,
        confirmation_token: &str,
    ) -> Result<Option<DispenseRecord>>;

    // Audit log (append-only)
    async fn append_audit(&self, entry: &AuditEntry) -> Result<()>;
    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>>;
}

/// NCPDP claim switch transport
#[async_trait]
pub trait ClaimSwitch: Send + Sync {
    async fn send(&self, request: &ClaimRequest) -> Result<ClaimResponse>;
}

/// State PDMP registry
#[async_trait]
pub trait PdmpProvider: Send + Sync {
    /// Query a single state; the pipeline fans out per state and
    /// tolerates individual timeouts
    async fn query(&self, state: &str, query: &PdmpQuery) -> Result<Vec<PdmpPrescription>>;
}

/// Immunization submitted to a state IIS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImmunizationRecord {
    pub patient_id: Uuid,
    pub cvx_code: String,
    pub administered_date: NaiveDate,
    pub lot_number: Option<String>,
    pub state: String,
}

/// IIS acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryAck {
    pub accepted: bool,
    pub registry_id: Option<String>,
    pub message: Option<String>,
}

/// State immunization registry client
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn submit(&self, record: &ImmunizationRecord) -> Result<RegistryAck>;
}

/// A confidence-scored field extracted from a scanned document.
/// Never part of the safety-critical path: suggestions enter the
/// workflow only through data-entry acceptance rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSuggestion {
    pub field: String,
    pub value: String,
    /// Confidence score in [0, 100]
    pub confidence: u8,
    /// Source bounding box (x, y, w, h) in page coordinates
    pub bbox: Option<[f32; 4]>,
}

/// Document field-extraction provider (OCR)
#[async_trait]
pub trait Suggestor: Send + Sync {
    async fn extract(&self, document: &[u8]) -> Result<Vec<FieldSuggestion>>;
}

/// Time source
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall-clock implementation
#[derive(Debug, Default, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed clock for deterministic tests
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: DateTime<Utc>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn on_date(date: NaiveDate) -> Self {
        Self {
            now: date.and_hms_opt(12, 0, 0).unwrap().and_utc(),
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

/// Identifier generator
pub trait IdGen: Send + Sync {
    /// Produce a prefixed, unique identifier, e.g. "RX-4F2A9C01"
    fn new_id(&self, prefix: &str) -> String;
}

/// UUID-backed generator
#[derive(Debug, Default, Clone)]
pub struct UuidGen;

impl IdGen for UuidGen {
    fn new_id(&self, prefix: &str) -> String {
        let id = Uuid::new_v4().simple().to_string();
        format!("{}-{}", prefix, &id[..8].to_uppercase())
    }
}

/// Sequential generator for deterministic tests
#[derive(Debug, Default)]
pub struct SequentialIdGen {
    counter: std::sync::atomic::AtomicU64,
}

impl IdGen for SequentialIdGen {
    fn new_id(&self, prefix: &str) -> String {
        let n = self
            .counter
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        format!("{}-{:06}", prefix, n + 1)
    }
}
