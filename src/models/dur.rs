/*!
 * Drug Utilization Review Model
 *
 * Alert types emitted by the DUR engine. Ordering is deterministic:
 * severity descending, then category, then code; equal keys keep their
 * input order so identical inputs always produce identical output.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity levels for DUR alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurSeverity {
    Low,
    Moderate,
    High,
    Critical,
}

impl DurSeverity {
    /// Get severity priority (higher = more severe)
    pub fn priority(&self) -> u8 {
        match self {
            Self::Critical => 4,
            Self::High => 3,
            Self::Moderate => 2,
            Self::Low => 1,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::High => "High",
            Self::Moderate => "Moderate",
            Self::Low => "Low",
        }
    }
}

/// Alert categories, one per rule family
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurCategory {
    AgeAlert,
    Allergy,
    Contraindication,
    DrugInteraction,
    DuplicateTherapy,
    HepaticAdjustment,
    MonitoringRequired,
    OpioidDose,
    PregnancyNursing,
    RenalAdjustment,
}

impl DurCategory {
    /// Stable lexical key used for deterministic ordering
    pub fn sort_key(&self) -> &'static str {
        match self {
            Self::AgeAlert => "age_alert",
            Self::Allergy => "allergy",
            Self::Contraindication => "contraindication",
            Self::DrugInteraction => "drug_interaction",
            Self::DuplicateTherapy => "duplicate_therapy",
            Self::HepaticAdjustment => "hepatic_adjustment",
            Self::MonitoringRequired => "monitoring_required",
            Self::OpioidDose => "opioid_dose",
            Self::PregnancyNursing => "pregnancy_nursing",
            Self::RenalAdjustment => "renal_adjustment",
        }
    }
}

/// A single DUR alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurAlert {
    pub id: Uuid,
    pub category: DurCategory,
    pub severity: DurSeverity,
    /// Stable rule code, e.g. "DDI-014"
    pub code: String,
    pub message: String,
    pub recommendation: Option<String>,
    /// Alternatives surfaced by contraindication entries
    pub alternatives: Vec<String>,
    pub overridable: bool,
    pub requires_documentation: bool,
}

impl DurAlert {
    /// Deterministic ordering: severity desc, category, code
    pub fn sort_alerts(alerts: &mut [DurAlert]) {
        alerts.sort_by(|a, b| {
            b.severity
                .priority()
                .cmp(&a.severity.priority())
                .then_with(|| a.category.sort_key().cmp(b.category.sort_key()))
                .then_with(|| a.code.cmp(&b.code))
        });
    }
}

/// Acknowledged override of an alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurOverride {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub session_id: Uuid,
    /// NCPDP-style professional service / result-of-service code
    pub code: String,
    pub reason: String,
    pub actor_id: Uuid,
    pub acknowledged_at: DateTime<Utc>,
}

/// Result of a DUR check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurResult {
    pub alerts: Vec<DurAlert>,
    /// No alert at high severity or above
    pub passed: bool,
    pub has_high_severity_alerts: bool,
}

impl DurResult {
    pub fn from_alerts(mut alerts: Vec<DurAlert>) -> Self {
        DurAlert::sort_alerts(&mut alerts);
        let has_high = alerts
            .iter()
            .any(|a| a.severity >= DurSeverity::High);
        Self {
            passed: !has_high,
            has_high_severity_alerts: has_high,
            alerts,
        }
    }

    pub fn high_severity_alerts(&self) -> impl Iterator<Item = &DurAlert> {
        self.alerts
            .iter()
            .filter(|a| a.severity >= DurSeverity::High)
    }
}

/// Override acceptance policy: the code set is configuration, not code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurPolicy {
    pub accepted_override_codes: Vec<String>,
    pub min_reason_length: usize,
}

impl Default for DurPolicy {
    fn default() -> Self {
        Self {
            accepted_override_codes: ["M0", "P0", "1A", "2A", "3A", "4A", "5A", "6A", "7A", "99"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_reason_length: 10,
        }
    }
}

impl DurPolicy {
    pub fn accepts_code(&self, code: &str) -> bool {
        self.accepted_override_codes.iter().any(|c| c == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(severity: DurSeverity, category: DurCategory, code: &str) -> DurAlert {
        DurAlert {
            id: Uuid::new_v4(),
            category,
            severity,
            code: code.to_string(),
            message: "test".into(),
            recommendation: None,
            alternatives: vec![],
            overridable: true,
            requires_documentation: false,
        }
    }

    #[test]
    fn test_severity_ordering() {
        assert!(DurSeverity::Critical > DurSeverity::High);
        assert!(DurSeverity::High > DurSeverity::Moderate);
        assert!(DurSeverity::Moderate > DurSeverity::Low);
    }

    #[test]
    fn test_alert_sort_order() {
        let mut alerts = vec![
            alert(DurSeverity::Low, DurCategory::AgeAlert, "AGE-001"),
            alert(DurSeverity::High, DurCategory::DrugInteraction, "DDI-014"),
            alert(DurSeverity::High, DurCategory::Allergy, "ALG-002"),
            alert(DurSeverity::High, DurCategory::Allergy, "ALG-001"),
        ];
        DurAlert::sort_alerts(&mut alerts);
        let codes: Vec<&str> = alerts.iter().map(|a| a.code.as_str()).collect();
        assert_eq!(codes, vec!["ALG-001", "ALG-002", "DDI-014", "AGE-001"]);
    }

    #[test]
    fn test_result_pass_threshold() {
        let passing = DurResult::from_alerts(vec![alert(
            DurSeverity::Moderate,
            DurCategory::DuplicateTherapy,
            "DUP-001",
        )]);
        assert!(passing.passed);
        assert!(!passing.has_high_severity_alerts);

        let failing = DurResult::from_alerts(vec![alert(
            DurSeverity::High,
            DurCategory::DrugInteraction,
            "DDI-001",
        )]);
        assert!(!failing.passed);
        assert!(failing.has_high_severity_alerts);
    }

    #[test]
    fn test_default_policy_codes() {
        let policy = DurPolicy::default();
        assert!(policy.accepts_code("M0"));
        assert!(policy.accepts_code("4A"));
        assert!(policy.accepts_code("99"));
        assert!(!policy.accepts_code("XX"));
    }
}
