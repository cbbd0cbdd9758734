/*!
 * PDMP Model
 *
 * Query results from state prescription drug monitoring programs and
 * the alerts the analyzer derives from them. Result prescriptions are
 * immutable once the query completes.
 */

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A dispensing record returned by a state registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdmpPrescription {
    pub drug_name: String,
    pub ndc: Option<String>,
    pub quantity: f64,
    /// Strength per unit in mg, when reported
    pub strength_mg: Option<f64>,
    pub days_supply: i32,
    pub dispensed_date: NaiveDate,
    pub prescriber_name: String,
    pub prescriber_dea: Option<String>,
    pub pharmacy_name: String,
    pub pharmacy_dea: Option<String>,
    /// True when the patient paid cash rather than billing insurance
    pub cash_payment: bool,
    pub state: String,
}

impl PdmpPrescription {
    /// Active means the supply window covers `on`
    pub fn active_on(&self, on: NaiveDate) -> bool {
        let end = self.dispensed_date + chrono::Duration::days(self.days_supply as i64);
        self.dispensed_date <= on && end >= on
    }
}

/// Query sent to the PDMP provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdmpQuery {
    pub patient_first_name: String,
    pub patient_last_name: String,
    pub patient_dob: NaiveDate,
    /// Two-letter state codes to query
    pub states: Vec<String>,
    /// Lookback window in months
    pub lookback_months: u32,
}

/// Alert types the analyzer can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PdmpAlertType {
    MultiplePrescribers,
    MultiplePharmacies,
    HighMme,
    DangerousCombination,
    EarlyRefill,
    CashOnly,
    OverlappingPrescriptions,
    DoctorShopping,
}

/// Severity of a PDMP alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PdmpSeverity {
    Low,
    Moderate,
    High,
    Critical,
}

/// A single analyzer alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdmpAlert {
    pub id: Uuid,
    pub alert_type: PdmpAlertType,
    pub severity: PdmpSeverity,
    pub description: String,
    pub recommendation: String,
    /// Critical alerts require pharmacist action before dispensing
    pub requires_action: bool,
    pub acknowledged_by: Option<Uuid>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledgement_notes: Option<String>,
}

/// Composite risk level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    /// Score bands: <20 low, 20-39 moderate, 40-59 high, >=60 critical
    pub fn from_score(score: u32) -> Self {
        match score {
            0..=19 => Self::Low,
            20..=39 => Self::Moderate,
            40..=59 => Self::High,
            _ => Self::Critical,
        }
    }
}

/// Review decision recorded by the pharmacist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PdmpReviewDecision {
    Approve,
    Deny,
    Investigate,
}

/// PDMP query result aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdmpResult {
    pub id: Uuid,
    pub version: i64,
    pub rx_id: Option<Uuid>,
    pub patient_id: Uuid,
    /// States that answered within the timeout
    pub queried_states: Vec<String>,
    /// States skipped because of provider timeouts
    pub unavailable_states: Vec<String>,
    pub prescriptions: Vec<PdmpPrescription>,
    pub alerts: Vec<PdmpAlert>,
    /// Weighted composite in [0, 100]
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    pub requires_pharmacist_review: bool,
    pub review_decision: Option<PdmpReviewDecision>,
    pub review_notes: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub queried_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_bands() {
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(19), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(20), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_score(39), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_score(40), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(59), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(60), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(100), RiskLevel::Critical);
    }

    #[test]
    fn test_active_window() {
        let record = PdmpPrescription {
            drug_name: "Oxycodone".into(),
            ndc: None,
            quantity: 60.0,
            strength_mg: Some(5.0),
            days_supply: 30,
            dispensed_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            prescriber_name: "Dr. A".into(),
            prescriber_dea: None,
            pharmacy_name: "Main St Pharmacy".into(),
            pharmacy_dea: None,
            cash_payment: false,
            state: "OH".into(),
        };
        assert!(record.active_on(NaiveDate::from_ymd_opt(2026, 3, 15).unwrap()));
        assert!(record.active_on(NaiveDate::from_ymd_opt(2026, 3, 31).unwrap()));
        assert!(!record.active_on(NaiveDate::from_ymd_opt(2026, 4, 1).unwrap()));
        assert!(!record.active_on(NaiveDate::from_ymd_opt(2026, 2, 28).unwrap()));
    }
}
