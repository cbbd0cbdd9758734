/*!
 * Verification Session Model
 *
 * The pharmacist's final gate before a fill can be released. A session
 * walks in_progress -> pending_dur -> pending_scan -> decision; it may
 * reach `approved` only with a complete checklist, a scanned-NDC match,
 * every DUR alert resolved or overridden, and (for controlled
 * substances) a PDMP review or a documented skip reason.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::dur::{DurAlert, DurOverride};
use crate::utils::ndc::labeler_product;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    InProgress,
    PendingDur,
    PendingScan,
    Approved,
    Rejected,
    ReturnedForRework,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::ReturnedForRework)
    }
}

/// Final decision recorded on the session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionDecision {
    Approved,
    Rejected,
    ReturnedForRework,
}

/// Verification checklist: required booleans plus controlled-substance
/// items that stay `None` for non-controlled fills
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checklist {
    // Patient
    pub patient_name_confirmed: bool,
    pub patient_dob_confirmed: bool,
    pub allergies_reviewed: bool,
    // Prescription
    pub drug_correct: bool,
    pub strength_correct: bool,
    pub quantity_correct: bool,
    pub days_supply_correct: bool,
    pub sig_correct: bool,
    // Clinical
    pub interactions_cleared: bool,
    pub allergy_conflicts_cleared: bool,
    // Product
    pub ndc_verified: bool,
    pub expiry_valid: bool,
    // Presentation
    pub label_correct: bool,
    pub packaging_appropriate: bool,
    pub appearance_correct: bool,
    // Controlled substances only
    pub schedule_verified: Option<bool>,
    pub pdmp_reviewed: Option<bool>,
    pub id_requirement_noted: Option<bool>,
}

impl Checklist {
    /// Blank checklist; controlled items initialized when applicable
    pub fn for_fill(controlled: bool) -> Self {
        let mut checklist = Self::default();
        if controlled {
            checklist.schedule_verified = Some(false);
            checklist.pdmp_reviewed = Some(false);
            checklist.id_requirement_noted = Some(false);
        }
        checklist
    }

    /// Required booleans that are still unchecked
    pub fn missing_items(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        let required = [
            (self.patient_name_confirmed, "patient_name_confirmed"),
            (self.patient_dob_confirmed, "patient_dob_confirmed"),
            (self.allergies_reviewed, "allergies_reviewed"),
            (self.drug_correct, "drug_correct"),
            (self.strength_correct, "strength_correct"),
            (self.quantity_correct, "quantity_correct"),
            (self.days_supply_correct, "days_supply_correct"),
            (self.sig_correct, "sig_correct"),
            (self.interactions_cleared, "interactions_cleared"),
            (self.allergy_conflicts_cleared, "allergy_conflicts_cleared"),
            (self.ndc_verified, "ndc_verified"),
            (self.expiry_valid, "expiry_valid"),
            (self.label_correct, "label_correct"),
            (self.packaging_appropriate, "packaging_appropriate"),
            (self.appearance_correct, "appearance_correct"),
        ];
        for (checked, name) in required {
            if !checked {
                missing.push(name);
            }
        }
        if self.schedule_verified == Some(false) {
            missing.push("schedule_verified");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_items().is_empty()
    }

    /// Check every required item (test/bench convenience)
    pub fn completed(controlled: bool) -> Self {
        Self {
            patient_name_confirmed: true,
            patient_dob_confirmed: true,
            allergies_reviewed: true,
            drug_correct: true,
            strength_correct: true,
            quantity_correct: true,
            days_supply_correct: true,
            sig_correct: true,
            interactions_cleared: true,
            allergy_conflicts_cleared: true,
            ndc_verified: true,
            expiry_valid: true,
            label_correct: true,
            packaging_appropriate: true,
            appearance_correct: true,
            schedule_verified: controlled.then_some(true),
            pdmp_reviewed: controlled.then_some(true),
            id_requirement_noted: controlled.then_some(true),
        }
    }
}

/// Scan comparison outcome
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NdcMatch {
    /// Same 11 digits
    Exact,
    /// Same labeler+product, different package; needs operator consent
    PackageVariant,
    NoMatch,
}

impl NdcMatch {
    /// Compare a scanned canonical NDC against the prescribed one
    pub fn compare(prescribed: &str, scanned: &str) -> Self {
        if prescribed == scanned {
            return Self::Exact;
        }
        match (labeler_product(prescribed), labeler_product(scanned)) {
            (Some(a), Some(b)) if a == b => Self::PackageVariant,
            _ => Self::NoMatch,
        }
    }
}

/// Recorded scan event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub raw_barcode: String,
    pub scanned_ndc: String,
    pub outcome: NdcMatch,
    /// Operator accepted a package-variant match
    pub variant_consented: bool,
    pub scanned_at: DateTime<Utc>,
}

/// Verification session aggregate, child of a fill
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSession {
    pub id: Uuid,
    pub version: i64,
    pub rx_id: Uuid,
    pub fill_id: Uuid,
    pub pharmacist_id: Uuid,

    pub state: SessionState,
    pub checklist: Checklist,
    pub scan: Option<ScanRecord>,

    /// DUR alerts snapshotted when the session opened
    pub dur_alerts: Vec<DurAlert>,
    pub dur_overrides: Vec<DurOverride>,
    /// Documented reason a PDMP review was skipped
    pub pdmp_skip_reason: Option<String>,

    pub decision: Option<SessionDecision>,
    pub decision_notes: Option<String>,
    pub rejection_reason: Option<String>,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl VerificationSession {
    /// Alerts at high severity or above lacking an override record
    pub fn unresolved_high_alerts(&self) -> Vec<&DurAlert> {
        self.dur_alerts
            .iter()
            .filter(|alert| alert.severity >= crate::models::dur::DurSeverity::High)
            .filter(|alert| {
                !self
                    .dur_overrides
                    .iter()
                    .any(|o| o.alert_id == alert.id)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checklist_controlled_items() {
        let plain = Checklist::for_fill(false);
        assert_eq!(plain.schedule_verified, None);

        let controlled = Checklist::for_fill(true);
        assert_eq!(controlled.schedule_verified, Some(false));
        assert!(controlled
            .missing_items()
            .contains(&"schedule_verified"));
    }

    #[test]
    fn test_completed_checklist_is_complete() {
        assert!(Checklist::completed(false).is_complete());
        assert!(Checklist::completed(true).is_complete());
        assert!(!Checklist::for_fill(false).is_complete());
    }

    #[test]
    fn test_ndc_match_levels() {
        assert_eq!(
            NdcMatch::compare("12345678901", "12345678901"),
            NdcMatch::Exact
        );
        // Same labeler+product, different package size
        assert_eq!(
            NdcMatch::compare("12345678901", "12345678990"),
            NdcMatch::PackageVariant
        );
        assert_eq!(
            NdcMatch::compare("12345678901", "99945678901"),
            NdcMatch::NoMatch
        );
    }
}
