/*!
 * Prescription Model
 *
 * The root aggregate of the dispensing workflow. Status is a strict
 * state machine; every transition goes through the workflow service,
 * which enforces the legality table below plus per-transition guards.
 *
 * Invariants:
 * - refills_remaining <= refills_authorized
 * - Schedule II: refills_authorized == 0
 * - expiration_date > written_date
 */

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::drug::DeaSchedule;
use crate::utils::errors::{EngineError, Result};

/// Prescription lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrescriptionStatus {
    /// Admitted from an inbound source; not yet linked to a patient
    Intake,
    /// Fields being entered or corrected
    DataEntry,
    /// Claim submitted, awaiting adjudication
    ClaimPending,
    /// Claim rejected; resolvable by resubmit, override, or cash
    ClaimRejected,
    /// Payable; awaiting fill
    FillPending,
    /// Product counted and labeled
    Filled,
    /// Awaiting pharmacist verification
    VerificationPending,
    /// Verification sent the work back for correction
    Rework,
    /// Pharmacist approved the fill
    Verified,
    /// In the will-call bin
    ReadyForPickup,
    /// Handed to the patient. Terminal.
    PickedUp,
    /// Delivered/shipped. Terminal.
    Delivered,
    /// Pharmacist rejected at verification. Terminal.
    Rejected,
    /// Cancelled. Terminal.
    Cancelled,
    /// Lapsed past its expiration date. Terminal.
    Expired,
}

impl PrescriptionStatus {
    /// Returns true if no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::PickedUp | Self::Delivered | Self::Rejected | Self::Cancelled | Self::Expired
        )
    }

    /// Legal next states, before guard evaluation
    pub fn allowed_transitions(&self) -> &'static [PrescriptionStatus] {
        use PrescriptionStatus::*;
        match self {
            Intake => &[DataEntry, Cancelled, Expired],
            DataEntry => &[ClaimPending, Cancelled, Expired],
            ClaimPending => &[ClaimRejected, FillPending, Cancelled, Expired],
            ClaimRejected => &[ClaimPending, FillPending, Cancelled, Expired],
            FillPending => &[Filled, Cancelled, Expired],
            Filled => &[VerificationPending, Cancelled],
            VerificationPending => &[Rework, Rejected, Verified],
            Rework => &[DataEntry, Cancelled],
            Verified => &[ReadyForPickup],
            ReadyForPickup => &[PickedUp, Delivered, Cancelled],
            PickedUp | Delivered | Rejected | Cancelled | Expired => &[],
        }
    }

    pub fn can_transition_to(&self, next: PrescriptionStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }
}

/// Fill priority used for queue ordering
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrescriptionPriority {
    Stat,
    Urgent,
    Normal,
    Low,
}

impl PrescriptionPriority {
    /// Queue weight; higher is dispensed first
    pub fn weight(&self) -> u8 {
        match self {
            Self::Stat => 4,
            Self::Urgent => 3,
            Self::Normal => 2,
            Self::Low => 1,
        }
    }
}

impl Default for PrescriptionPriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Inbound prescription source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RxSource {
    ERx,
    Fax,
    Phone,
    WalkIn,
}

/// Dispense-As-Written code (NCPDP field 408-D8)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "u8", into = "u8")]
pub struct DawCode(u8);

impl DawCode {
    pub fn new(code: u8) -> Result<Self> {
        if code <= 9 {
            Ok(Self(code))
        } else {
            Err(EngineError::invalid_field(
                "daw_code",
                format!("must be 0-9, got {}", code),
            ))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Substitution is blocked by the prescriber (DAW 1)
    pub fn substitution_blocked(&self) -> bool {
        self.0 == 1
    }
}

impl Default for DawCode {
    fn default() -> Self {
        Self(0)
    }
}

impl TryFrom<u8> for DawCode {
    type Error = String;
    fn try_from(code: u8) -> std::result::Result<Self, String> {
        DawCode::new(code).map_err(|e| e.to_string())
    }
}

impl From<DawCode> for u8 {
    fn from(daw: DawCode) -> u8 {
        daw.0
    }
}

/// Prescription aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prescription {
    pub id: Uuid,
    /// Optimistic concurrency version, bumped by the store on save
    pub version: i64,
    /// Human-facing Rx number, unique per patient
    pub rx_number: String,

    // References (by id only)
    pub patient_id: Option<Uuid>,
    pub prescriber_id: Uuid,
    pub prescriber_name: String,
    pub prescriber_dea: Option<String>,
    pub prescriber_npi: Option<String>,

    // Drug snapshot at time of writing
    pub drug_ndc: String,
    pub drug_name: String,
    pub dea_schedule: DeaSchedule,

    pub quantity: f64,
    pub days_supply: i32,
    pub sig: String,
    pub daw_code: DawCode,
    pub refills_authorized: i32,
    pub refills_remaining: i32,

    pub written_date: NaiveDate,
    pub expiration_date: NaiveDate,
    /// Diagnosis / indication (ICD-10), when transmitted
    pub indication: Option<String>,

    pub status: PrescriptionStatus,
    pub priority: PrescriptionPriority,
    pub source: RxSource,
    /// Long-term-care context; enables the narrow C-II emergency
    /// partial-fill path
    pub ltc_context: bool,

    pub last_fill_date: Option<NaiveDate>,
    /// Payload recorded by the terminal transition; replays must match
    pub terminal_context: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Prescription {
    /// Enforce the aggregate invariants; called on every save path
    pub fn validate_invariants(&self) -> Result<()> {
        if self.refills_remaining > self.refills_authorized {
            return Err(EngineError::invalid_field(
                "refills_remaining",
                "exceeds refills_authorized",
            ));
        }
        if self.refills_remaining < 0 {
            return Err(EngineError::invalid_field(
                "refills_remaining",
                "cannot be negative",
            ));
        }
        if self.dea_schedule == DeaSchedule::ScheduleIi && self.refills_authorized != 0 {
            return Err(EngineError::invalid_field(
                "refills_authorized",
                "Schedule II prescriptions cannot authorize refills",
            ));
        }
        if self.expiration_date <= self.written_date {
            return Err(EngineError::invalid_field(
                "expiration_date",
                "must be after the written date",
            ));
        }
        Ok(())
    }

    pub fn is_controlled(&self) -> bool {
        self.dea_schedule.is_controlled()
    }

    /// Days elapsed since the written date
    pub fn age_in_days(&self, today: NaiveDate) -> i64 {
        (today - self.written_date).num_days()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prescription(schedule: DeaSchedule, refills: i32) -> Prescription {
        let written = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        Prescription {
            id: Uuid::new_v4(),
            version: 0,
            rx_number: "RX-100001".into(),
            patient_id: Some(Uuid::new_v4()),
            prescriber_id: Uuid::new_v4(),
            prescriber_name: "Dr. Osei".into(),
            prescriber_dea: Some("BO1234563".into()),
            prescriber_npi: Some("1234567890".into()),
            drug_ndc: "00071015523".into(),
            drug_name: "Lisinopril".into(),
            dea_schedule: schedule,
            quantity: 30.0,
            days_supply: 30,
            sig: "Take 1 tablet by mouth daily".into(),
            daw_code: DawCode::default(),
            refills_authorized: refills,
            refills_remaining: refills,
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

    #[test]
    fn test_transition_table_legality() {
        use PrescriptionStatus::*;
        assert!(Intake.can_transition_to(DataEntry));
        assert!(DataEntry.can_transition_to(ClaimPending));
        assert!(ClaimPending.can_transition_to(ClaimRejected));
        assert!(ClaimRejected.can_transition_to(ClaimPending));
        assert!(VerificationPending.can_transition_to(Rework));
        assert!(Rework.can_transition_to(DataEntry));
        assert!(!Intake.can_transition_to(Filled));
        assert!(!Verified.can_transition_to(DataEntry));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        use PrescriptionStatus::*;
        for terminal in [PickedUp, Delivered, Rejected, Cancelled, Expired] {
            assert!(terminal.is_terminal());
            assert!(terminal.allowed_transitions().is_empty());
        }
    }

    #[test]
    fn test_schedule_ii_refill_invariant() {
        let valid = prescription(DeaSchedule::ScheduleIi, 0);
        assert!(valid.validate_invariants().is_ok());

        let invalid = prescription(DeaSchedule::ScheduleIi, 2);
        assert!(invalid.validate_invariants().is_err());
    }

    #[test]
    fn test_refills_remaining_bound() {
        let mut rx = prescription(DeaSchedule::Legend, 3);
        rx.refills_remaining = 4;
        assert!(rx.validate_invariants().is_err());
        rx.refills_remaining = 3;
        assert!(rx.validate_invariants().is_ok());
    }

    #[test]
    fn test_daw_code_bounds() {
        assert!(DawCode::new(0).is_ok());
        assert!(DawCode::new(9).is_ok());
        assert!(DawCode::new(10).is_err());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(PrescriptionPriority::Stat.weight() > PrescriptionPriority::Urgent.weight());
        assert!(PrescriptionPriority::Normal.weight() > PrescriptionPriority::Low.weight());
    }
}
