/*!
 * Test Utilities
 *
 * Shared harness for integration tests: an engine wired to the
 * in-memory store, programmable port mocks, and a mutable test clock.
 */

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use rxflow_engine::config::Config;
use rxflow_engine::models::claim::{Claim, ClaimRequest, ClaimResponse};
use rxflow_engine::models::drug::{DeaSchedule, Drug};
use rxflow_engine::models::fill::Fill;
use rxflow_engine::models::patient::InsurancePlan;
use rxflow_engine::models::pdmp::{PdmpPrescription, PdmpQuery};
use rxflow_engine::models::prescription::{Prescription, PrescriptionPriority, RxSource};
use rxflow_engine::models::user::{Actor, UserRole};
use rxflow_engine::models::verification::{Checklist, SessionDecision};
use rxflow_engine::models::Gender;
use rxflow_engine::ports::{
    ClaimSwitch, Clock, ImmunizationRecord, PdmpProvider, RegistryAck, RegistryClient,
    SequentialIdGen, Store, Suggestor,
};
use rxflow_engine::services::{Engine, EngineDeps, IntakePayload, PharmacyProfile};
use rxflow_engine::store::MemoryStore;
use rxflow_engine::utils::errors::{EngineError, Result};

/// Clock whose current instant tests can advance
pub struct TestClock {
    now: Mutex<DateTime<Utc>>,
}

impl TestClock {
    pub fn starting(date: NaiveDate) -> Self {
        Self {
            now: Mutex::new(date.and_hms_opt(9, 0, 0).unwrap().and_utc()),
        }
    }

    pub fn advance_days(&self, days: i64) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::days(days);
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Claim switch with a programmable response queue. When the queue is
/// empty it approves with patient pay = gross, insurance 0.
#[derive(Default)]
pub struct MockClaimSwitch {
    pub responses: Mutex<VecDeque<Result<ClaimResponse>>>,
    pub sent: Mutex<Vec<ClaimRequest>>,
}

impl MockClaimSwitch {
    pub fn push(&self, response: Result<ClaimResponse>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn push_approved(&self, gross: i64, patient: i64, insurance: i64) {
        self.push(Ok(ClaimResponse::Approved {
            gross_price_cents: gross,
            patient_pay_cents: patient,
            insurance_pay_cents: insurance,
        }));
    }

    pub fn push_rejected(&self, code: &str, message: &str) {
        self.push(Ok(ClaimResponse::Rejected {
            code: code.to_string(),
            message: message.to_string(),
        }));
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl ClaimSwitch for MockClaimSwitch {
    async fn send(&self, request: &ClaimRequest) -> Result<ClaimResponse> {
        self.sent.lock().unwrap().push(request.clone());
        match self.responses.lock().unwrap().pop_front() {
            Some(response) => response,
            None => Ok(ClaimResponse::Approved {
                gross_price_cents: 1000,
                patient_pay_cents: 1000,
                insurance_pay_cents: 0,
            }),
        }
    }
}

/// PDMP provider returning fixed per-state histories; states in
/// `slow_states` sleep past any reasonable timeout.
#[derive(Default)]
pub struct MockPdmpProvider {
    pub by_state: Mutex<HashMap<String, Vec<PdmpPrescription>>>,
    pub slow_states: Mutex<Vec<String>>,
}

impl MockPdmpProvider {
    pub fn set_state(&self, state: &str, records: Vec<PdmpPrescription>) {
        self.by_state
            .lock()
            .unwrap()
            .insert(state.to_string(), records);
    }

    pub fn make_slow(&self, state: &str) {
        self.slow_states.lock().unwrap().push(state.to_string());
    }
}

#[async_trait]
impl PdmpProvider for MockPdmpProvider {
    async fn query(&self, state: &str, _query: &PdmpQuery) -> Result<Vec<PdmpPrescription>> {
        let slow = self
            .slow_states
            .lock()
            .unwrap()
            .iter()
            .any(|s| s == state);
        if slow {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        }
        Ok(self
            .by_state
            .lock()
            .unwrap()
            .get(state)
            .cloned()
            .unwrap_or_default())
    }
}

/// Registry client that accepts everything
pub struct MockRegistry;

#[async_trait]
impl RegistryClient for MockRegistry {
    async fn submit(&self, _record: &ImmunizationRecord) -> Result<RegistryAck> {
        Ok(RegistryAck {
            accepted: true,
            registry_id: Some("IIS-1".to_string()),
            message: None,
        })
    }
}

/// Suggestor returning a fixed suggestion set
#[derive(Default)]
pub struct MockSuggestor {
    pub fields: Mutex<Vec<rxflow_engine::ports::FieldSuggestion>>,
}

#[async_trait]
impl Suggestor for MockSuggestor {
    async fn extract(
        &self,
        _document: &[u8],
    ) -> Result<Vec<rxflow_engine::ports::FieldSuggestion>> {
        Ok(self.fields.lock().unwrap().clone())
    }
}

/// Assembled test harness
pub struct TestHarness {
    pub engine: Engine,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<TestClock>,
    pub switch: Arc<MockClaimSwitch>,
    pub pdmp: Arc<MockPdmpProvider>,
    pub suggestor: Arc<MockSuggestor>,
    pub tech: Actor,
    pub pharmacist: Actor,
}

pub fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()
}

impl TestHarness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(TestClock::starting(start_date()));
        let switch = Arc::new(MockClaimSwitch::default());
        let pdmp = Arc::new(MockPdmpProvider::default());
        let suggestor = Arc::new(MockSuggestor::default());

        let mut config = Config::default();
        config.pdmp.timeout = std::time::Duration::from_millis(200);

        let engine = Engine::new(EngineDeps {
            store: store.clone(),
            claim_switch: switch.clone(),
            pdmp_provider: pdmp.clone(),
            registry_client: Arc::new(MockRegistry),
            suggestor: Some(suggestor.clone()),
            clock: clock.clone(),
            ids: Arc::new(SequentialIdGen::default()),
            config,
            profile: PharmacyProfile::default(),
            dur_policy: Default::default(),
        });

        Self {
            engine,
            store,
            clock,
            switch,
            pdmp,
            suggestor,
            tech: Actor::new("tech", UserRole::Doctor),
            pharmacist: Actor::pharmacist("Dana Okafor", "RPH-100"),
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    /// Seed a drug reference row and shelf stock for it
    pub async fn seed_drug_and_stock(
        &self,
        ndc: &str,
        name: &str,
        strength: f64,
        schedule: DeaSchedule,
        on_hand: f64,
    ) {
        let mut drug = Drug::new(ndc, name, strength, "mg").unwrap();
        drug.dea_schedule = schedule;
        self.store.upsert_drug(&drug).await.unwrap();
        self.engine
            .inventory
            .receive(
                self.engine.profile.id,
                &drug.ndc,
                name,
                on_hand,
                "L123",
                self.today() + chrono::Duration::days(730),
                450,
                "PO-1",
                &Actor::new("receiver", UserRole::Admin),
            )
            .await
            .unwrap();
    }

    /// Standard intake payload for the given drug
    pub fn payload(
        &self,
        mrn: &str,
        drug_name: &str,
        ndc: &str,
        schedule: DeaSchedule,
        refills: i32,
    ) -> IntakePayload {
        IntakePayload {
            patient_mrn: mrn.to_string(),
            patient_first_name: "Ada".to_string(),
            patient_last_name: "Nguyen".to_string(),
            patient_dob: NaiveDate::from_ymd_opt(1980, 3, 14).unwrap(),
            patient_gender: Gender::Female,
            drug_name: drug_name.to_string(),
            drug_ndc: ndc.to_string(),
            dea_schedule: schedule,
            quantity: 30.0,
            days_supply: 30,
            sig: "Take 1 tablet by mouth daily".to_string(),
            daw_code: 0,
            refills_authorized: refills,
            written_date: self.today(),
            expiration_date: None,
            indication: None,
            priority: PrescriptionPriority::Normal,
            ltc_context: false,
            prescriber_id: Uuid::new_v4(),
            prescriber_name: "Dr. Osei".to_string(),
            prescriber_dea: Some("BO1234563".to_string()),
            prescriber_npi: Some("1234567890".to_string()),
        }
    }

    /// Accept a prescription and give the patient an insurance plan
    pub async fn accept_insured(&self, payload: IntakePayload) -> Prescription {
        let rx = self
            .engine
            .intake
            .accept(RxSource::ERx, payload, &self.tech)
            .await
            .unwrap();
        let mut patient = self
            .store
            .get_patient(rx.patient_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        if patient.insurance.is_none() {
            patient.insurance = Some(InsurancePlan {
                bin: "610591".to_string(),
                pcn: "PDMI".to_string(),
                group_id: "RX1000".to_string(),
                member_id: "A1B2C3".to_string(),
            });
            self.store.save_patient(&patient).await.unwrap();
        }
        rx
    }

    /// Data entry pass-through (fields arrived complete from intake)
    pub async fn complete_data_entry(&self, rx_id: Uuid) {
        let session = self
            .engine
            .data_entry
            .open_session(rx_id, None, &self.tech)
            .await
            .unwrap();
        self.engine
            .data_entry
            .complete(session.id, &self.tech)
            .await
            .unwrap();
    }

    pub async fn submit_claim(&self, rx_id: Uuid) -> Claim {
        self.engine
            .claims
            .submit(rx_id, None, &self.tech, &CancellationToken::new())
            .await
            .unwrap()
    }

    /// Start and finalize a fill with the prescribed NDC
    pub async fn fill(&self, rx_id: Uuid) -> Fill {
        let (fill, _warnings) = self.engine.fills.start(rx_id, &self.tech).await.unwrap();
        let rx = self.store.get_prescription(rx_id).await.unwrap().unwrap();
        self.engine
            .fills
            .finalize(
                fill.id,
                "L123",
                self.today() + chrono::Duration::days(730),
                &rx.drug_ndc,
                None,
                None,
                &self.tech,
            )
            .await
            .unwrap()
    }

    /// Full verification pass: checklist, scan, approve
    pub async fn verify(&self, fill: &Fill) -> Result<()> {
        let rx = self
            .store
            .get_prescription(fill.rx_id)
            .await
            .unwrap()
            .unwrap();
        let session = self
            .engine
            .verification
            .open(fill.id, &self.pharmacist)
            .await?;
        self.engine
            .verification
            .complete_checklist(
                session.id,
                Checklist::completed(rx.is_controlled()),
                &self.pharmacist,
            )
            .await?;
        let barcode = fill
            .dispensed_ndc
            .clone()
            .unwrap_or_else(|| rx.drug_ndc.clone());
        self.engine
            .verification
            .scan(session.id, &barcode, false, &self.pharmacist)
            .await?;
        self.engine
            .verification
            .decide(
                session.id,
                SessionDecision::Approved,
                None,
                None,
                &self.pharmacist,
            )
            .await?;
        Ok(())
    }

    /// Run intake through dispense for a plain maintenance drug.
    /// Callers must have seeded the Lisinopril drug and stock first.
    pub async fn run_happy_path(&self, mrn: &str) -> (Prescription, Fill) {
        let rx = self
            .accept_insured(self.payload(mrn, "Lisinopril", "00071015523", DeaSchedule::Legend, 5))
            .await;
        self.complete_data_entry(rx.id).await;
        self.switch.push_approved(1000, 1000, 0);
        self.submit_claim(rx.id).await;
        let fill = self.fill(rx.id).await;
        self.verify(&fill).await.unwrap();
        self.engine
            .dispense
            .hand(fill.id, true, None, "TOKEN-1", &self.tech)
            .await
            .unwrap();
        let rx = self.store.get_prescription(rx.id).await.unwrap().unwrap();
        let fill = self.store.get_fill(fill.id).await.unwrap().unwrap();
        (rx, fill)
    }
}

/// Convenience: unwrap-or-panic with the engine error printed
pub fn expect_err(result: Result<impl std::fmt::Debug>) -> EngineError {
    match result {
        Ok(value) => panic!("expected error, got {:?}", value),
        Err(err) => err,
    }
}
