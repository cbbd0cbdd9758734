/*!
 * Drug Reference Model
 *
 * Read-mostly reference data: one row per dispensable product keyed by
 * the canonical 11-digit NDC. Carries the DEA schedule snapshot used
 * by refill calendar rules and controlled-substance handling.
 */

use serde::{Deserialize, Serialize};

use crate::utils::ndc::normalize_ndc;

/// DEA controlled-substance schedule
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeaSchedule {
    ScheduleI,
    ScheduleIi,
    ScheduleIii,
    ScheduleIv,
    ScheduleV,
    /// Prescription-required, non-controlled
    Legend,
    /// Over-the-counter
    Otc,
}

impl DeaSchedule {
    /// Any schedule I-V substance
    pub fn is_controlled(&self) -> bool {
        matches!(
            self,
            Self::ScheduleI | Self::ScheduleIi | Self::ScheduleIii | Self::ScheduleIv | Self::ScheduleV
        )
    }

    /// Days after the written date a prescription stays fillable.
    /// Schedule II: 90 days; III-V: 180 days; non-controlled: one year.
    pub fn fill_window_days(&self) -> i64 {
        match self {
            Self::ScheduleIi => 90,
            Self::ScheduleIii | Self::ScheduleIv | Self::ScheduleV => 180,
            _ => 365,
        }
    }

    /// Roman-numeral display form
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::ScheduleI => "C-I",
            Self::ScheduleIi => "C-II",
            Self::ScheduleIii => "C-III",
            Self::ScheduleIv => "C-IV",
            Self::ScheduleV => "C-V",
            Self::Legend => "LEGEND",
            Self::Otc => "OTC",
        }
    }
}

/// Drug reference record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drug {
    /// Canonical 11-digit NDC
    pub ndc: String,
    pub generic_name: String,
    pub brand_name: Option<String>,
    /// Strength per dispensing unit
    pub strength: f64,
    pub strength_unit: String,
    pub dosage_form: String,
    pub route: String,
    pub dea_schedule: DeaSchedule,
    /// RxNorm concept id, when mapped
    pub rxnorm_cui: Option<String>,
    pub therapeutic_class: Option<String>,
    pub manufacturer: Option<String>,
}

impl Drug {
    /// Construct with NDC normalization; returns None for a bad NDC
    pub fn new(ndc: &str, generic_name: impl Into<String>, strength: f64, unit: &str) -> Option<Self> {
        Some(Self {
            ndc: normalize_ndc(ndc)?,
            generic_name: generic_name.into(),
            brand_name: None,
            strength,
            strength_unit: unit.to_string(),
            dosage_form: "tablet".to_string(),
            route: "oral".to_string(),
            dea_schedule: DeaSchedule::Legend,
            rxnorm_cui: None,
            therapeutic_class: None,
            manufacturer: None,
        })
    }

    pub fn is_controlled(&self) -> bool {
        self.dea_schedule.is_controlled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_classification() {
        assert!(DeaSchedule::ScheduleIi.is_controlled());
        assert!(DeaSchedule::ScheduleV.is_controlled());
        assert!(!DeaSchedule::Legend.is_controlled());
        assert!(!DeaSchedule::Otc.is_controlled());
    }

    #[test]
    fn test_fill_windows() {
        assert_eq!(DeaSchedule::ScheduleIi.fill_window_days(), 90);
        assert_eq!(DeaSchedule::ScheduleIv.fill_window_days(), 180);
        assert_eq!(DeaSchedule::Legend.fill_window_days(), 365);
    }

    #[test]
    fn test_new_normalizes_ndc() {
        let drug = Drug::new("12345-678-90", "lisinopril", 10.0, "mg").unwrap();
        assert_eq!(drug.ndc, "12345067890");
        assert!(Drug::new("nope", "x", 1.0, "mg").is_none());
    }
}
