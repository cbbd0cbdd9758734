/*!
 * Fill Model
 *
 * One row per fill attempt, child of a prescription. Fill numbers are
 * dense and monotone per prescription, starting at 0. A fill cannot
 * reach `verified` without a complete checklist, a scanned-NDC match,
 * and every high-severity DUR alert acknowledged.
 *
 * All money fields are fixed-point cents.
 */

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fill status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FillStatus {
    /// Allocation taken, counting in progress
    InProgress,
    /// Counted and labeled, awaiting verification
    Filled,
    /// Pharmacist approved
    Verified,
    /// Handed off to the patient
    Dispensed,
    /// Returned to stock from will-call
    ReturnedToStock,
    Cancelled,
}

/// Verification status carried on the fill
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FillVerification {
    NotStarted,
    InProgress,
    Approved,
    Rejected,
}

/// Auxiliary label applied to the vial
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuxLabel {
    CompleteEntireCourse,
    AvoidSunlight,
    TakeWithWater,
    TakeWithFood,
    MayCauseDrowsiness,
    AvoidAlcohol,
    ShakeWell,
    DoNotCrush,
    Refrigerate,
    HighAlert,
    FederalTransferWarning,
}

impl AuxLabel {
    /// Patient-facing label text
    pub fn text(&self) -> &'static str {
        match self {
            Self::CompleteEntireCourse => "Finish all this medication unless otherwise directed",
            Self::AvoidSunlight => "Avoid prolonged exposure to sunlight",
            Self::TakeWithWater => "Take with a full glass of water",
            Self::TakeWithFood => "Take with food",
            Self::MayCauseDrowsiness => "May cause drowsiness",
            Self::AvoidAlcohol => "Do not drink alcohol while taking this medication",
            Self::ShakeWell => "Shake well before using",
            Self::DoNotCrush => "Do not crush or chew; swallow whole",
            Self::Refrigerate => "Keep refrigerated",
            Self::HighAlert => "High alert medication",
            Self::FederalTransferWarning => {
                "Caution: federal law prohibits the transfer of this drug to any person other than the patient for whom it was prescribed"
            }
        }
    }
}

/// Fill aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub id: Uuid,
    pub version: i64,
    pub rx_id: Uuid,
    /// Monotone per prescription, starting at 0
    pub fill_number: i32,

    /// Product actually dispensed; may be a substitution of the
    /// prescribed NDC subject to the DAW code
    pub dispensed_ndc: Option<String>,
    pub lot_number: Option<String>,
    pub lot_expiration: Option<NaiveDate>,

    pub quantity_prescribed: f64,
    pub quantity_dispensed: f64,
    pub days_supply: i32,

    pub is_partial_fill: bool,
    pub partial_fill_reason: Option<String>,
    /// Quantity still owed when partial
    pub remaining_quantity: f64,

    pub aux_labels: Vec<AuxLabel>,
    pub packaging: Option<String>,

    pub acquisition_cost_cents: i64,
    pub dispensing_fee_cents: i64,
    pub patient_pay_cents: Option<i64>,

    pub status: FillStatus,
    pub verification: FillVerification,

    pub fill_date: Option<NaiveDate>,
    pub filled_by: Option<Uuid>,
    /// Set when a cancellation raced a dispense-side effect
    pub interrupted: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Fill {
    /// Quantity invariant: dispensed <= prescribed unless flagged
    /// partial, and partial fills owe a remainder with a reason.
    pub fn quantity_consistent(&self) -> bool {
        if self.is_partial_fill {
            self.remaining_quantity > 0.0
                && self.partial_fill_reason.is_some()
                && self.quantity_dispensed < self.quantity_prescribed
        } else {
            self.quantity_dispensed <= self.quantity_prescribed
        }
    }
}

/// Hand-off record written when a fill is dispensed. Keyed by
/// (fill, confirmation token) so replays are idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispenseRecord {
    pub id: Uuid,
    pub fill_id: Uuid,
    pub rx_id: Uuid,
    pub actor_id: Uuid,
    pub confirmation_token: String,
    pub patient_id_confirmed: bool,
    pub signature: Option<Vec<u8>>,
    pub interrupted: bool,
    pub dispensed_at: DateTime<Utc>,
}

/// Structured label payload handed to printing devices (no formatting)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelData {
    pub pharmacy_name: String,
    pub pharmacy_address: String,
    pub pharmacy_phone: String,
    pub patient_name: String,
    pub rx_number: String,
    pub drug_name: String,
    pub strength: String,
    pub dosage_form: String,
    pub ndc: String,
    pub quantity: f64,
    pub days_supply: i32,
    pub sig: String,
    pub fill_date: NaiveDate,
    /// min(lot expiry, fill date + days supply + 14 days)
    pub discard_by: NaiveDate,
    pub auxiliary_labels: Vec<String>,
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill() -> Fill {
        Fill {
            id: Uuid::new_v4(),
            version: 0,
            rx_id: Uuid::new_v4(),
            fill_number: 0,
            dispensed_ndc: Some("00071015523".into()),
            lot_number: Some("L123".into()),
            lot_expiration: NaiveDate::from_ymd_opt(2028, 1, 1),
            quantity_prescribed: 30.0,
            quantity_dispensed: 30.0,
            days_supply: 30,
            is_partial_fill: false,
            partial_fill_reason: None,
            remaining_quantity: 0.0,
            aux_labels: vec![],
            packaging: None,
            acquisition_cost_cents: 450,
            dispensing_fee_cents: 1000,
            patient_pay_cents: None,
            status: FillStatus::InProgress,
            verification: FillVerification::NotStarted,
            fill_date: None,
            filled_by: None,
            interrupted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_full_fill_quantity() {
        let mut f = fill();
        assert!(f.quantity_consistent());
        f.quantity_dispensed = 31.0;
        assert!(!f.quantity_consistent());
    }

    #[test]
    fn test_partial_fill_requires_reason_and_remainder() {
        let mut f = fill();
        f.is_partial_fill = true;
        f.quantity_dispensed = 10.0;
        f.remaining_quantity = 20.0;
        assert!(!f.quantity_consistent()); // no reason yet
        f.partial_fill_reason = Some("insufficient stock".into());
        assert!(f.quantity_consistent());
        f.remaining_quantity = 0.0;
        assert!(!f.quantity_consistent());
    }

    #[test]
    fn test_aux_label_text_nonempty() {
        for label in [
            AuxLabel::CompleteEntireCourse,
            AuxLabel::FederalTransferWarning,
            AuxLabel::HighAlert,
        ] {
            assert!(!label.text().is_empty());
        }
    }
}
