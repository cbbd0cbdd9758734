/*!
 * Fill Service
 *
 * Refill eligibility (including controlled-substance calendar rules),
 * fill lifecycle (start/finalize), pre-verification validation,
 * auxiliary-label derivation, and label data assembly.
 *
 * The eligibility and validation functions are pure; the service
 * methods orchestrate them against the store, the inventory ledger,
 * and the prescription workflow.
 */

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::models::drug::DeaSchedule;
use crate::models::fill::{AuxLabel, Fill, FillStatus, FillVerification, LabelData};
use crate::models::prescription::{Prescription, PrescriptionStatus};
use crate::models::user::Actor;
use crate::ports::{Clock, Store};
use crate::services::audit_log_service::AuditLogService;
use crate::services::inventory_service::InventoryService;
use crate::services::workflow_service::WorkflowService;
use crate::utils::errors::{EngineError, Result};
use crate::utils::ndc::normalize_ndc;
use crate::utils::permissions::{self, Action, Resource};

/// Refill eligibility result
#[derive(Debug, Clone, serde::Serialize)]
pub struct RefillCheck {
    pub ok: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Days until the refill-too-soon window clears, when warned
    pub days_until_eligible: Option<i64>,
}

/// Pre-verification fill validation report
#[derive(Debug, Clone, serde::Serialize)]
pub struct FillValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Dispensing pharmacy identity stamped onto labels
#[derive(Debug, Clone)]
pub struct PharmacyProfile {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub phone: String,
    pub dispensing_fee_cents: i64,
    /// Cash-price margin over acquisition, in percent
    pub cash_margin_percent: i64,
}

impl Default for PharmacyProfile {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "Main Street Pharmacy".to_string(),
            address: "100 Main St".to_string(),
            phone: "555-0100".to_string(),
            dispensing_fee_cents: 1050,
            cash_margin_percent: 20,
        }
    }
}

/// Calendar gate for ANY fill attempt, first fill included: the
/// prescription must be unexpired and inside its schedule's fill
/// window after the written date (C-II 90 days, C-III-V 180 days).
pub fn check_fill_window(rx: &Prescription, today: NaiveDate) -> Vec<String> {
    let mut errors = Vec::new();
    if rx.expiration_date < today {
        errors.push("prescription has expired".to_string());
    }
    let window = rx.dea_schedule.fill_window_days();
    if rx.age_in_days(today) > window {
        errors.push(format!(
            "{} prescription written more than {} days ago",
            rx.dea_schedule.display_name(),
            window
        ));
    }
    errors
}

/// Refill eligibility for a prescription as of `today`
pub fn can_refill(rx: &Prescription, today: NaiveDate) -> RefillCheck {
    let mut errors = check_fill_window(rx, today);
    let mut warnings = Vec::new();
    let mut days_until_eligible = None;

    if rx.refills_remaining <= 0 {
        errors.push("no refills remaining".to_string());
    }
    if rx.dea_schedule == DeaSchedule::ScheduleIi {
        errors.push("Schedule II prescriptions cannot be refilled".to_string());
    }

    if let Some(last_fill) = rx.last_fill_date {
        let days_since = (today - last_fill).num_days();
        let threshold = 0.8 * rx.days_supply as f64;
        if (days_since as f64) < threshold {
            let eligible_in = threshold.ceil() as i64 - days_since;
            warnings.push(format!(
                "refill too soon: {} days since last fill of a {}-day supply",
                days_since, rx.days_supply
            ));
            days_until_eligible = Some(eligible_in);
        }
    }

    RefillCheck {
        ok: errors.is_empty(),
        errors,
        warnings,
        days_until_eligible,
    }
}

/// Validate a fill against the release gate's preconditions
pub fn validate_fill_for_verification(
    fill: &Fill,
    rx: &Prescription,
    today: NaiveDate,
) -> FillValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    match fill.dispensed_ndc.as_deref() {
        None => errors.push("dispensed NDC missing".to_string()),
        Some(ndc) if normalize_ndc(ndc).is_none() => {
            errors.push("dispensed NDC is malformed".to_string())
        }
        _ => {}
    }

    if fill.quantity_dispensed <= 0.0 {
        errors.push("dispensed quantity must be positive".to_string());
    } else if fill.quantity_dispensed > fill.quantity_prescribed && !fill.is_partial_fill {
        errors.push("dispensed quantity exceeds prescribed quantity".to_string());
    }

    if fill.is_partial_fill {
        if fill.partial_fill_reason.is_none() {
            errors.push("partial fill requires a reason".to_string());
        }
        if fill.remaining_quantity <= 0.0 {
            errors.push("partial fill requires a positive remaining quantity".to_string());
        }
    }

    match fill.lot_expiration {
        Some(expiry) if expiry < today => {
            errors.push("dispensed lot is expired".to_string());
        }
        Some(expiry) => {
            if expiry < today + chrono::Duration::days(fill.days_supply as i64) {
                warnings.push("lot expires within the days supply".to_string());
            }
        }
        None => errors.push("lot expiration missing".to_string()),
    }

    if fill.lot_number.is_none() {
        if rx.is_controlled() {
            errors.push("lot number is required for controlled substances".to_string());
        } else {
            warnings.push("lot number not recorded".to_string());
        }
    }

    let recommended = derive_aux_labels(&rx.drug_name, "", rx.dea_schedule);
    let missing: Vec<&AuxLabel> = recommended
        .iter()
        .filter(|label| !fill.aux_labels.contains(label))
        .collect();
    if !missing.is_empty() {
        warnings.push(format!(
            "{} recommended auxiliary label(s) not applied",
            missing.len()
        ));
    }

    FillValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Derive auxiliary labels from drug name / form keywords. The output
/// is deduplicated and deterministic (sorted by label code).
pub fn derive_aux_labels(drug_name: &str, dosage_form: &str, schedule: DeaSchedule) -> Vec<AuxLabel> {
    let name = drug_name.to_lowercase();
    let form = dosage_form.to_lowercase();
    let mut labels = BTreeSet::new();

    let antibiotic = name.contains("cillin")
        || name.contains("cef")
        || name.contains("cycline")
        || name.contains("floxacin")
        || name.contains("azithromycin")
        || name.contains("erythromycin")
        || name.contains("sulfamethoxazole")
        || name.contains("nitrofurantoin");
    if antibiotic {
        labels.insert(AuxLabel::CompleteEntireCourse);
    }
    if name.contains("floxacin") {
        labels.insert(AuxLabel::AvoidSunlight);
        labels.insert(AuxLabel::TakeWithWater);
    }
    if name.contains("cycline") {
        labels.insert(AuxLabel::AvoidSunlight);
    }
    let nsaid = name.contains("ibuprofen")
        || name.contains("naproxen")
        || name.contains("meloxicam")
        || name.contains("diclofenac")
        || name.contains("ketorolac");
    if nsaid {
        labels.insert(AuxLabel::TakeWithFood);
    }
    let sedating = name.contains("oxycodone")
        || name.contains("hydrocodone")
        || name.contains("morphine")
        || name.contains("tramadol")
        || name.contains("codeine")
        || name.contains("methadone")
        || name.contains("alprazolam")
        || name.contains("diazepam")
        || name.contains("lorazepam")
        || name.contains("clonazepam")
        || name.contains("zolpidem");
    if sedating {
        labels.insert(AuxLabel::MayCauseDrowsiness);
        labels.insert(AuxLabel::AvoidAlcohol);
    }
    if form.contains("suspension") || name.contains("suspension") {
        labels.insert(AuxLabel::ShakeWell);
    }
    let extended = name.contains(" er")
        || name.contains(" xr")
        || name.contains(" xl")
        || name.contains(" sr")
        || name.contains("extended")
        || form.contains("extended");
    if extended {
        labels.insert(AuxLabel::DoNotCrush);
    }
    if name.contains("insulin") {
        labels.insert(AuxLabel::Refrigerate);
        labels.insert(AuxLabel::HighAlert);
    }
    if schedule.is_controlled() {
        labels.insert(AuxLabel::FederalTransferWarning);
    }

    labels.into_iter().collect()
}

/// Cash price: acquisition plus margin plus dispensing fee, in cents
pub fn cash_price_cents(acquisition_cents: i64, fee_cents: i64, margin_percent: i64) -> i64 {
    acquisition_cents + (acquisition_cents * margin_percent) / 100 + fee_cents
}

/// Discard-by date: the earlier of lot expiry and fill date plus days
/// supply plus a 14-day grace
pub fn discard_by(lot_expiration: NaiveDate, fill_date: NaiveDate, days_supply: i32) -> NaiveDate {
    let by_supply = fill_date + chrono::Duration::days(days_supply as i64 + 14);
    lot_expiration.min(by_supply)
}

/// Fill orchestration service
#[derive(Clone)]
pub struct FillService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    audit: AuditLogService,
    inventory: InventoryService,
    workflow: WorkflowService,
    profile: PharmacyProfile,
}

impl FillService {
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

    async fn load_rx(&self, rx_id: Uuid) -> Result<Prescription> {
        self.store
            .get_prescription(rx_id)
            .await?
            .ok_or_else(|| EngineError::not_found("prescription", rx_id))
    }

    async fn load_fill(&self, fill_id: Uuid) -> Result<Fill> {
        self.store
            .get_fill(fill_id)
            .await?
            .ok_or_else(|| EngineError::not_found("fill", fill_id))
    }

    /// Request a refill on a dispensed prescription: runs the calendar
    /// checks and re-opens the prescription at claim_pending.
    pub async fn request_refill(&self, rx_id: Uuid, actor: &Actor) -> Result<RefillCheck> {
        permissions::require(actor, Resource::Medication, Action::Update)?;
        let rx = self.load_rx(rx_id).await?;
        let check = can_refill(&rx, self.clock.today());

        if rx.dea_schedule == DeaSchedule::ScheduleIi {
            self.audit
                .record_denied(actor, "fill.refill_request", "prescription", rx_id)
                .await?;
            return Err(EngineError::ScheduleIiRefill);
        }
        if !check.ok {
            self.audit
                .record_denied(actor, "fill.refill_request", "prescription", rx_id)
                .await?;
            return Err(EngineError::invalid_field(
                "refill",
                check.errors.join("; "),
            ));
        }

        self.workflow.reopen_for_refill(rx_id, actor).await?;
        self.audit
            .record(
                actor,
                "fill.refill_request",
                "prescription",
                rx_id,
                true,
                serde_json::json!({
                    "warnings": check.warnings,
                    "days_until_eligible": check.days_until_eligible,
                }),
            )
            .await?;
        Ok(check)
    }

    /// Begin a fill: allocates inventory and creates the fill record.
    /// The prescription must be payable (fill_pending).
    pub async fn start(&self, rx_id: Uuid, actor: &Actor) -> Result<(Fill, Vec<String>)> {
        permissions::require(actor, Resource::Medication, Action::Update)?;

        // A lapsed prescription expires here rather than filling
        if let Some(expired) = self.workflow.expire_if_lapsed(rx_id, actor).await? {
            return Err(EngineError::InvalidTransition {
                from: format!("{:?}", expired.status),
                to: "Filled".to_string(),
            });
        }
        let rx = self.load_rx(rx_id).await?;

        // A fill attempt on a dispensed prescription is a refill
        // request that has not been adjudicated yet.
        if matches!(
            rx.status,
            PrescriptionStatus::PickedUp | PrescriptionStatus::Delivered
        ) {
            if rx.dea_schedule == DeaSchedule::ScheduleIi {
                self.audit
                    .record_denied(actor, "fill.start", "prescription", rx_id)
                    .await?;
                return Err(EngineError::ScheduleIiRefill);
            }
            return Err(EngineError::InvalidTransition {
                from: format!("{:?}", rx.status),
                to: "FillPending".to_string(),
            });
        }

        if rx.status != PrescriptionStatus::FillPending {
            return Err(EngineError::InvalidTransition {
                from: format!("{:?}", rx.status),
                to: "Filled".to_string(),
            });
        }

        // Calendar gate applies to every fill attempt, the first
        // included: a 91-day-old Schedule II never reaches the shelf.
        let window_errors = check_fill_window(&rx, self.clock.today());
        if !window_errors.is_empty() {
            self.audit
                .record_denied(actor, "fill.start", "prescription", rx_id)
                .await?;
            return Err(EngineError::invalid_field(
                "fill_window",
                window_errors.join("; "),
            ));
        }

        let existing = self.store.list_fills(rx_id).await?;
        let mut warnings = Vec::new();
        if !existing.is_empty() {
            let check = can_refill(&rx, self.clock.today());
            if rx.dea_schedule == DeaSchedule::ScheduleIi {
                self.audit
                    .record_denied(actor, "fill.start", "prescription", rx_id)
                    .await?;
                return Err(EngineError::ScheduleIiRefill);
            }
            if !check.ok {
                self.audit
                    .record_denied(actor, "fill.start", "prescription", rx_id)
                    .await?;
                return Err(EngineError::invalid_field("refill", check.errors.join("; ")));
            }
            warnings = check.warnings;
        }

        let item = self
            .inventory
            .allocate(self.profile.id, &rx.drug_ndc, rx.quantity)
            .await?;

        let now = self.clock.now();
        let fill = Fill {
            id: Uuid::new_v4(),
            version: 0,
            rx_id,
            fill_number: existing.len() as i32,
            dispensed_ndc: None,
            lot_number: None,
            lot_expiration: None,
            quantity_prescribed: rx.quantity,
            quantity_dispensed: 0.0,
            days_supply: rx.days_supply,
            is_partial_fill: false,
            partial_fill_reason: None,
            remaining_quantity: 0.0,
            aux_labels: vec![],
            packaging: None,
            acquisition_cost_cents: item.acquisition_cost_cents,
            dispensing_fee_cents: self.profile.dispensing_fee_cents,
            patient_pay_cents: None,
            status: FillStatus::InProgress,
            verification: FillVerification::NotStarted,
            fill_date: None,
            filled_by: None,
            interrupted: false,
            created_at: now,
            updated_at: now,
        };

        let inserted = match self.store.insert_fill(&fill).await {
            Ok(inserted) => inserted,
            Err(err) => {
                // Roll the reservation back before surfacing
                self.inventory
                    .deallocate(self.profile.id, &rx.drug_ndc, rx.quantity)
                    .await?;
                return Err(err);
            }
        };

        self.audit
            .record(
                actor,
                "fill.start",
                "fill",
                inserted.id,
                true,
                serde_json::json!({ "rx": rx.rx_number, "fill_number": inserted.fill_number }),
            )
            .await?;
        Ok((inserted, warnings))
    }

    /// Finalize a fill: record lot/expiry/NDC, derive auxiliary
    /// labels, and move the prescription to verification.
    #[allow(clippy::too_many_arguments)]
    pub async fn finalize(
        &self,
        fill_id: Uuid,
        lot: &str,
        lot_expiration: NaiveDate,
        dispensed_ndc: &str,
        quantity_dispensed: Option<f64>,
        partial_reason: Option<&str>,
        actor: &Actor,
    ) -> Result<Fill> {
        permissions::require(actor, Resource::Medication, Action::Update)?;
        let mut fill = self.load_fill(fill_id).await?;
        if fill.status != FillStatus::InProgress {
            return Err(EngineError::InvalidTransition {
                from: format!("{:?}", fill.status),
                to: "Filled".to_string(),
            });
        }
        let rx = self.load_rx(fill.rx_id).await?;

        let ndc = normalize_ndc(dispensed_ndc)
            .ok_or_else(|| EngineError::invalid_field("dispensed_ndc", "not a valid NDC"))?;

        let today = self.clock.today();
        if lot_expiration <= today {
            return Err(EngineError::invalid_field(
                "lot_expiration",
                "lot is already expired",
            ));
        }

        let quantity = quantity_dispensed.unwrap_or(fill.quantity_prescribed);
        if quantity <= 0.0 || quantity > fill.quantity_prescribed {
            return Err(EngineError::invalid_field(
                "quantity_dispensed",
                "must be positive and no more than prescribed",
            ));
        }
        if quantity < fill.quantity_prescribed {
            let reason = partial_reason.ok_or_else(|| {
                EngineError::MissingRequired("partial_fill_reason".to_string())
            })?;
            fill.is_partial_fill = true;
            fill.partial_fill_reason = Some(reason.to_string());
            fill.remaining_quantity = fill.quantity_prescribed - quantity;
        }

        let dosage_form = self
            .store
            .get_drug(&rx.drug_ndc)
            .await?
            .map(|d| d.dosage_form)
            .unwrap_or_default();

        fill.dispensed_ndc = Some(ndc);
        fill.lot_number = Some(lot.to_string());
        fill.lot_expiration = Some(lot_expiration);
        fill.quantity_dispensed = quantity;
        fill.aux_labels = derive_aux_labels(&rx.drug_name, &dosage_form, rx.dea_schedule);
        fill.status = FillStatus::Filled;
        fill.fill_date = Some(today);
        fill.filled_by = Some(actor.id);
        fill.updated_at = self.clock.now();
        let saved = self.store.save_fill(&fill).await?;

        // Refill arithmetic: a refill consumes one authorization
        let mut rx = self.load_rx(fill.rx_id).await?;
        if saved.fill_number > 0 {
            rx.refills_remaining -= 1;
        }
        rx.last_fill_date = Some(today);
        rx.updated_at = self.clock.now();
        self.store.save_prescription(&rx).await?;

        self.workflow
            .transition(rx.id, PrescriptionStatus::Filled, actor, serde_json::json!({}))
            .await?;
        self.workflow
            .transition(
                rx.id,
                PrescriptionStatus::VerificationPending,
                actor,
                serde_json::json!({}),
            )
            .await?;

        self.audit
            .record(
                actor,
                "fill.finalize",
                "fill",
                saved.id,
                true,
                serde_json::json!({ "lot": lot, "quantity": quantity }),
            )
            .await?;
        Ok(saved)
    }

    /// Port-level validation of a fill (read-only)
    pub async fn validate(&self, fill_id: Uuid) -> Result<FillValidationReport> {
        let fill = self.load_fill(fill_id).await?;
        let rx = self.load_rx(fill.rx_id).await?;
        Ok(validate_fill_for_verification(&fill, &rx, self.clock.today()))
    }

    /// Structured label payload for a finalized fill
    pub async fn label_data(&self, fill_id: Uuid) -> Result<LabelData> {
        let fill = self.load_fill(fill_id).await?;
        let rx = self.load_rx(fill.rx_id).await?;
        let patient = match rx.patient_id {
            Some(patient_id) => self.store.get_patient(patient_id).await?,
            None => None,
        }
        .ok_or_else(|| EngineError::MissingRequired("patient".to_string()))?;

        let fill_date = fill
            .fill_date
            .ok_or_else(|| EngineError::MissingRequired("fill_date".to_string()))?;
        let expiry = fill
            .lot_expiration
            .ok_or_else(|| EngineError::MissingRequired("lot_expiration".to_string()))?;

        let drug = self.store.get_drug(&rx.drug_ndc).await?;
        let report = validate_fill_for_verification(&fill, &rx, self.clock.today());

        Ok(LabelData {
            pharmacy_name: self.profile.name.clone(),
            pharmacy_address: self.profile.address.clone(),
            pharmacy_phone: self.profile.phone.clone(),
            patient_name: format!("{} {}", patient.first_name, patient.last_name),
            rx_number: rx.rx_number.clone(),
            drug_name: rx.drug_name.clone(),
            strength: drug
                .as_ref()
                .map(|d| format!("{} {}", d.strength, d.strength_unit))
                .unwrap_or_default(),
            dosage_form: drug.map(|d| d.dosage_form).unwrap_or_default(),
            ndc: fill.dispensed_ndc.clone().unwrap_or_else(|| rx.drug_ndc.clone()),
            quantity: fill.quantity_dispensed,
            days_supply: fill.days_supply,
            sig: rx.sig.clone(),
            fill_date,
            discard_by: discard_by(expiry, fill_date, fill.days_supply),
            auxiliary_labels: fill.aux_labels.iter().map(|l| l.text().to_string()).collect(),
            warnings: report.warnings,
        })
    }

    /// Will-call entries: verified fills awaiting pickup, with aging
    pub async fn will_call_list(&self) -> Result<Vec<WillCallEntry>> {
        let today = self.clock.today();
        let waiting = self
            .store
            .list_prescriptions_by_status(PrescriptionStatus::ReadyForPickup)
            .await?;
        let mut entries = Vec::new();
        for rx in waiting {
            let fills = self.store.list_fills(rx.id).await?;
            if let Some(fill) = fills.into_iter().max_by_key(|f| f.fill_number) {
                let days_waiting = fill
                    .fill_date
                    .map(|d| (today - d).num_days())
                    .unwrap_or(0);
                entries.push(WillCallEntry {
                    rx_id: rx.id,
                    rx_number: rx.rx_number.clone(),
                    patient_id: rx.patient_id,
                    fill_id: fill.id,
                    controlled: rx.is_controlled(),
                    days_waiting,
                });
            }
        }
        entries.sort_by(|a, b| b.days_waiting.cmp(&a.days_waiting));
        Ok(entries)
    }

    /// Return fills that aged out of will-call: release the inventory
    /// reservation, mark the fill returned, cancel the cycle.
    pub async fn sweep_will_call(
        &self,
        return_after_days: i64,
        actor: &Actor,
    ) -> Result<Vec<Uuid>> {
        permissions::require(actor, Resource::Medication, Action::Update)?;
        let mut returned = Vec::new();
        for entry in self.will_call_list().await? {
            if entry.days_waiting < return_after_days {
                continue;
            }
            let rx = self.load_rx(entry.rx_id).await?;
            let mut fill = self.load_fill(entry.fill_id).await?;

            // The reservation was taken for the prescribed quantity
            self.inventory
                .deallocate(self.profile.id, &rx.drug_ndc, fill.quantity_prescribed)
                .await?;
            fill.status = FillStatus::ReturnedToStock;
            fill.updated_at = self.clock.now();
            self.store.save_fill(&fill).await?;

            self.workflow
                .transition(
                    rx.id,
                    PrescriptionStatus::Cancelled,
                    actor,
                    serde_json::json!({ "reason": "will_call_return", "fill": fill.id }),
                )
                .await?;
            self.audit
                .record(
                    actor,
                    "fill.will_call_return",
                    "fill",
                    fill.id,
                    true,
                    serde_json::json!({ "days_waiting": entry.days_waiting }),
                )
                .await?;
            returned.push(fill.id);
        }
        Ok(returned)
    }
}

/// A dispensed prescription awaiting pickup
#[derive(Debug, Clone, serde::Serialize)]
pub struct WillCallEntry {
    pub rx_id: Uuid,
    pub rx_number: String,
    pub patient_id: Option<Uuid>,
    pub fill_id: Uuid,
    pub controlled: bool,
    pub days_waiting: i64,
}
