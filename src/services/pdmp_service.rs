/*!
 * PDMP Service
 *
 * Queries state prescription monitoring registries through the
 * `PdmpProvider` port and analyzes the returned dispensing history.
 * The analyzer is a pure function over the record list: pattern
 * detection, weighted risk scoring, and alert generation.
 *
 * Risk weights: multi-prescriber 15, multi-pharmacy 15, high MME 25,
 * dangerous combination 30, early refill 10, cash-only 5, overlap 10,
 * doctor shopping 30; the sum is capped at 100.
 */

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::models::pdmp::{
    PdmpAlert, PdmpAlertType, PdmpPrescription, PdmpQuery, PdmpResult, PdmpReviewDecision,
    PdmpSeverity, RiskLevel,
};
use crate::models::user::Actor;
use crate::ports::{Clock, PdmpProvider, Store};
use crate::services::audit_log_service::AuditLogService;
use crate::services::dur_service::{daily_mme, infer_class, names_match};
use crate::utils::errors::{EngineError, Result};
use crate::utils::permissions::require_pharmacist;

/// Threshold at which prescriber/pharmacy counts are flagged
const MULTI_SOURCE_THRESHOLD: usize = 4;
/// Cash-only transaction count that triggers an alert
const CASH_ONLY_THRESHOLD: usize = 3;
/// Daily MME considered high-risk
const HIGH_MME_THRESHOLD: f64 = 90.0;

/// Analyzer output before persistence
#[derive(Debug, Clone)]
pub struct PdmpAnalysis {
    pub alerts: Vec<PdmpAlert>,
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    pub total_daily_mme: f64,
    pub prescriber_count: usize,
    pub pharmacy_count: usize,
}

/// Analyze a dispensing history as of `now`. Pure.
pub fn analyze(records: &[PdmpPrescription], now: NaiveDate) -> PdmpAnalysis {
    let mut alerts = Vec::new();
    let mut score: u32 = 0;

    let prescribers: HashSet<&str> = records
        .iter()
        .map(|r| r.prescriber_name.as_str())
        .collect();
    let pharmacies: HashSet<&str> = records.iter().map(|r| r.pharmacy_name.as_str()).collect();
    let multi_prescriber = prescribers.len() >= MULTI_SOURCE_THRESHOLD;
    let multi_pharmacy = pharmacies.len() >= MULTI_SOURCE_THRESHOLD;

    if multi_prescriber {
        score += 15;
        alerts.push(make_alert(
            PdmpAlertType::MultiplePrescribers,
            PdmpSeverity::High,
            format!(
                "{} distinct prescribers in the query window",
                prescribers.len()
            ),
            "Verify coordination of care with each prescriber",
        ));
    }
    if multi_pharmacy {
        score += 15;
        alerts.push(make_alert(
            PdmpAlertType::MultiplePharmacies,
            PdmpSeverity::High,
            format!("{} distinct pharmacies in the query window", pharmacies.len()),
            "Confirm the patient's primary pharmacy",
        ));
    }

    // Total daily MME over currently-active prescriptions
    let active: Vec<&PdmpPrescription> =
        records.iter().filter(|r| r.active_on(now)).collect();
    let total_daily_mme: f64 = active
        .iter()
        .filter_map(|r| {
            daily_mme(
                &r.drug_name,
                r.quantity,
                r.strength_mg.unwrap_or(0.0),
                r.days_supply,
            )
        })
        .sum();
    if total_daily_mme >= HIGH_MME_THRESHOLD {
        score += 25;
        alerts.push(make_alert(
            PdmpAlertType::HighMme,
            PdmpSeverity::High,
            format!(
                "Total daily opioid burden {:.1} MME across active prescriptions",
                total_daily_mme
            ),
            "Review total opioid burden; consider naloxone co-prescription",
        ));
    }

    // Concurrent opioid + benzodiazepine
    let has_active_opioid = active
        .iter()
        .any(|r| infer_class(&r.drug_name) == Some("opioid"));
    let has_active_benzo = active
        .iter()
        .any(|r| infer_class(&r.drug_name) == Some("benzodiazepine"));
    if has_active_opioid && has_active_benzo {
        score += 30;
        alerts.push(make_alert(
            PdmpAlertType::DangerousCombination,
            PdmpSeverity::Critical,
            "Concurrent opioid and benzodiazepine therapy".to_string(),
            "Contact prescribers; combined use raises overdose risk",
        ));
    }

    // Early refills: same drug, next fill before 80% of the prior
    // days supply elapsed
    let early_refills = count_early_refills(records);
    if early_refills > 0 {
        score += 10;
        alerts.push(make_alert(
            PdmpAlertType::EarlyRefill,
            PdmpSeverity::Moderate,
            format!("{} early refill attempt(s) in the window", early_refills),
            "Discuss refill timing with the patient",
        ));
    }

    // Cash-only pattern
    let cash_count = records.iter().filter(|r| r.cash_payment).count();
    if cash_count >= CASH_ONLY_THRESHOLD {
        score += 5;
        alerts.push(make_alert(
            PdmpAlertType::CashOnly,
            PdmpSeverity::Moderate,
            format!("{} cash transactions in the window", cash_count),
            "Cash payment can bypass plan safety edits; review history",
        ));
    }

    // Overlapping active prescriptions (pairwise, distinct drugs)
    let overlap_days = max_pairwise_overlap(&active);
    if overlap_days > 0 {
        score += 10;
        alerts.push(make_alert(
            PdmpAlertType::OverlappingPrescriptions,
            PdmpSeverity::Moderate,
            format!(
                "Overlapping supplies ({} day(s) at maximum overlap)",
                overlap_days
            ),
            "Confirm intentional overlap with the prescriber",
        ));
    }

    // Doctor-shopping composite
    if multi_prescriber && multi_pharmacy {
        score += 30;
        alerts.push(make_alert(
            PdmpAlertType::DoctorShopping,
            PdmpSeverity::Critical,
            "Multiple prescribers combined with multiple pharmacies".to_string(),
            "Hold dispensing pending pharmacist review",
        ));
    }

    let risk_score = score.min(100);
    PdmpAnalysis {
        alerts,
        risk_score,
        risk_level: RiskLevel::from_score(risk_score),
        total_daily_mme,
        prescriber_count: prescribers.len(),
        pharmacy_count: pharmacies.len(),
    }
}

fn make_alert(
    alert_type: PdmpAlertType,
    severity: PdmpSeverity,
    description: String,
    recommendation: &str,
) -> PdmpAlert {
    PdmpAlert {
        id: Uuid::new_v4(),
        alert_type,
        severity,
        description,
        recommendation: recommendation.to_string(),
        requires_action: severity == PdmpSeverity::Critical,
        acknowledged_by: None,
        acknowledged_at: None,
        acknowledgement_notes: None,
    }
}

fn count_early_refills(records: &[PdmpPrescription]) -> usize {
    let mut count = 0;
    for (i, first) in records.iter().enumerate() {
        for second in records.iter().skip(i + 1) {
            if !names_match(&first.drug_name, &second.drug_name) {
                continue;
            }
            let (earlier, later) = if first.dispensed_date <= second.dispensed_date {
                (first, second)
            } else {
                (second, first)
            };
            let elapsed = (later.dispensed_date - earlier.dispensed_date).num_days() as f64;
            if elapsed < 0.8 * earlier.days_supply as f64 {
                count += 1;
            }
        }
    }
    count
}

fn max_pairwise_overlap(active: &[&PdmpPrescription]) -> i64 {
    let mut max_overlap = 0;
    for (i, a) in active.iter().enumerate() {
        for b in active.iter().skip(i + 1) {
            if names_match(&a.drug_name, &b.drug_name) {
                continue; // same-drug overlap is the early-refill signal
            }
            let a_end = a.dispensed_date + chrono::Duration::days(a.days_supply as i64);
            let b_end = b.dispensed_date + chrono::Duration::days(b.days_supply as i64);
            let start = a.dispensed_date.max(b.dispensed_date);
            let end = a_end.min(b_end);
            let overlap = (end - start).num_days();
            if overlap > max_overlap {
                max_overlap = overlap;
            }
        }
    }
    max_overlap.max(0)
}

/// PDMP query pipeline
#[derive(Clone)]
pub struct PdmpService {
    store: Arc<dyn Store>,
    provider: Arc<dyn PdmpProvider>,
    clock: Arc<dyn Clock>,
    audit: AuditLogService,
    timeout: Duration,
}

impl PdmpService {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn PdmpProvider>,
        clock: Arc<dyn Clock>,
        audit: AuditLogService,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            clock,
            audit,
            timeout,
        }
    }

    /// Fan out one query per state; states that time out are recorded
    /// as unavailable and the partial result is accepted.
    pub async fn query(
        &self,
        patient_id: Uuid,
        rx_id: Option<Uuid>,
        query: PdmpQuery,
        actor: &Actor,
    ) -> Result<PdmpResult> {
        require_pharmacist(actor)?;

        // Fan out one bounded query per state
        let lookups = query.states.iter().map(|state| {
            let provider = self.provider.clone();
            let query = &query;
            let timeout = self.timeout;
            async move {
                let outcome =
                    tokio::time::timeout(timeout, provider.query(state, query)).await;
                (state.clone(), outcome)
            }
        });
        let outcomes = futures::future::join_all(lookups).await;

        let mut prescriptions = Vec::new();
        let mut queried_states = Vec::new();
        let mut unavailable_states = Vec::new();
        for (state, outcome) in outcomes {
            match outcome {
                Ok(Ok(records)) => {
                    prescriptions.extend(records);
                    queried_states.push(state);
                }
                Ok(Err(err)) => {
                    tracing::warn!(%state, error = %err, "PDMP state query failed");
                    unavailable_states.push(state);
                }
                Err(_) => {
                    tracing::warn!(%state, "PDMP state query timed out");
                    unavailable_states.push(state);
                }
            }
        }

        if queried_states.is_empty() && !query.states.is_empty() {
            return Err(EngineError::ExternalUnavailable("pdmp_provider".to_string()));
        }

        let analysis = analyze(&prescriptions, self.clock.today());
        let requires_review = analysis.risk_level >= RiskLevel::High
            || analysis.alerts.iter().any(|a| a.requires_action);

        let result = PdmpResult {
            id: Uuid::new_v4(),
            version: 0,
            rx_id,
            patient_id,
            queried_states,
            unavailable_states,
            prescriptions,
            alerts: analysis.alerts,
            risk_score: analysis.risk_score,
            risk_level: analysis.risk_level,
            requires_pharmacist_review: requires_review,
            review_decision: None,
            review_notes: None,
            reviewed_by: None,
            queried_at: self.clock.now(),
        };
        let inserted = self.store.insert_pdmp_result(&result).await?;

        self.audit
            .record(
                actor,
                "pdmp.query",
                "pdmp_result",
                inserted.id,
                true,
                serde_json::json!({
                    "risk_score": inserted.risk_score,
                    "states": inserted.queried_states,
                    "partial": !inserted.unavailable_states.is_empty(),
                }),
            )
            .await?;
        Ok(inserted)
    }

    /// Pharmacist acknowledgement clears a critical alert
    pub async fn acknowledge(
        &self,
        result_id: Uuid,
        alert_id: Uuid,
        notes: &str,
        actor: &Actor,
    ) -> Result<PdmpResult> {
        require_pharmacist(actor)?;
        let mut result = self
            .store
            .get_pdmp_result(result_id)
            .await?
            .ok_or_else(|| EngineError::not_found("pdmp_result", result_id))?;

        let alert = result
            .alerts
            .iter_mut()
            .find(|a| a.id == alert_id)
            .ok_or_else(|| EngineError::not_found("pdmp_alert", alert_id))?;
        alert.acknowledged_by = Some(actor.id);
        alert.acknowledged_at = Some(self.clock.now());
        alert.acknowledgement_notes = Some(notes.to_string());
        alert.requires_action = false;

        let saved = self.store.save_pdmp_result(&result).await?;
        self.audit
            .record(
                actor,
                "pdmp.acknowledge",
                "pdmp_result",
                result_id,
                true,
                serde_json::json!({ "alert": alert_id }),
            )
            .await?;
        Ok(saved)
    }

    /// Record the pharmacist's review decision
    pub async fn review(
        &self,
        result_id: Uuid,
        decision: PdmpReviewDecision,
        notes: Option<&str>,
        actor: &Actor,
    ) -> Result<PdmpResult> {
        require_pharmacist(actor)?;
        let mut result = self
            .store
            .get_pdmp_result(result_id)
            .await?
            .ok_or_else(|| EngineError::not_found("pdmp_result", result_id))?;
        result.review_decision = Some(decision);
        result.review_notes = notes.map(str::to_string);
        result.reviewed_by = Some(actor.id);
        let saved = self.store.save_pdmp_result(&result).await?;
        self.audit
            .record(
                actor,
                "pdmp.review",
                "pdmp_result",
                result_id,
                true,
                serde_json::json!({ "decision": format!("{:?}", decision) }),
            )
            .await?;
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        drug: &str,
        strength: f64,
        quantity: f64,
        days: i32,
        dispensed: NaiveDate,
        prescriber: &str,
        pharmacy: &str,
        cash: bool,
    ) -> PdmpPrescription {
        PdmpPrescription {
            drug_name: drug.to_string(),
            ndc: None,
            quantity,
            strength_mg: Some(strength),
            days_supply: days,
            dispensed_date: dispensed,
            prescriber_name: prescriber.to_string(),
            prescriber_dea: None,
            pharmacy_name: pharmacy.to_string(),
            pharmacy_dea: None,
            cash_payment: cash,
            state: "OH".to_string(),
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_quiet_history_scores_low() {
        let now = day(2026, 6, 1);
        let records = vec![record(
            "Lisinopril",
            10.0,
            30.0,
            30,
            day(2026, 5, 20),
            "Dr. A",
            "Main St Pharmacy",
            false,
        )];
        let analysis = analyze(&records, now);
        assert_eq!(analysis.risk_score, 0);
        assert_eq!(analysis.risk_level, RiskLevel::Low);
        assert!(analysis.alerts.is_empty());
    }

    #[test]
    fn test_doctor_shopping_composite() {
        let now = day(2026, 6, 1);
        // 5 prescribers, 4 pharmacies; each fill well apart, inactive
        let mut records = Vec::new();
        for (i, (prescriber, pharmacy)) in [
            ("Dr. A", "P1"),
            ("Dr. B", "P2"),
            ("Dr. C", "P3"),
            ("Dr. D", "P4"),
            ("Dr. E", "P1"),
        ]
        .iter()
        .enumerate()
        {
            records.push(record(
                "Lisinopril",
                10.0,
                30.0,
                10,
                day(2025, 7 + i as u32, 1),
                prescriber,
                pharmacy,
                false,
            ));
        }
        let analysis = analyze(&records, now);
        assert!(analysis
            .alerts
            .iter()
            .any(|a| a.alert_type == PdmpAlertType::MultiplePrescribers));
        assert!(analysis
            .alerts
            .iter()
            .any(|a| a.alert_type == PdmpAlertType::MultiplePharmacies));
        let shopping = analysis
            .alerts
            .iter()
            .find(|a| a.alert_type == PdmpAlertType::DoctorShopping)
            .unwrap();
        assert!(shopping.requires_action);
        // 15 + 15 + 30
        assert_eq!(analysis.risk_score, 60);
        assert_eq!(analysis.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn test_critical_scenario_composite_score() {
        let now = day(2026, 6, 1);
        let mut records = Vec::new();
        // 5 prescribers, 4 pharmacies, active high-MME opioids with an
        // 8-day overlap between two different agents
        records.push(record(
            "Oxycodone",
            10.0,
            180.0,
            30,
            day(2026, 5, 10),
            "Dr. A",
            "P1",
            false,
        ));
        records.push(record(
            "Morphine",
            15.0,
            60.0,
            30,
            day(2026, 5, 18),
            "Dr. B",
            "P2",
            false,
        ));
        records.push(record(
            "Lisinopril",
            10.0,
            30.0,
            30,
            day(2026, 5, 20),
            "Dr. C",
            "P3",
            false,
        ));
        records.push(record(
            "Metformin",
            500.0,
            60.0,
            30,
            day(2026, 5, 25),
            "Dr. D",
            "P4",
            false,
        ));
        records.push(record(
            "Atorvastatin",
            20.0,
            30.0,
            30,
            day(2026, 5, 26),
            "Dr. E",
            "P1",
            false,
        ));

        let analysis = analyze(&records, now);
        // Oxycodone: 60mg/day x 1.5 = 90; Morphine: 30mg/day x 1 = 30
        assert!(analysis.total_daily_mme >= 90.0);
        // multi-prescriber 15 + multi-pharmacy 15 + high MME 25 +
        // overlap 10 + doctor shopping 30 = 95
        assert_eq!(analysis.risk_score, 95);
        assert_eq!(analysis.risk_level, RiskLevel::Critical);
        for expected in [
            PdmpAlertType::MultiplePrescribers,
            PdmpAlertType::MultiplePharmacies,
            PdmpAlertType::HighMme,
            PdmpAlertType::OverlappingPrescriptions,
            PdmpAlertType::DoctorShopping,
        ] {
            assert!(
                analysis.alerts.iter().any(|a| a.alert_type == expected),
                "missing {:?}",
                expected
            );
        }
    }

    #[test]
    fn test_early_refill_detection() {
        let now = day(2026, 6, 1);
        let records = vec![
            record(
                "Alprazolam",
                0.5,
                30.0,
                30,
                day(2026, 5, 1),
                "Dr. A",
                "P1",
                false,
            ),
            // 15 days later: before 80% of a 30-day supply elapsed
            record(
                "Alprazolam",
                0.5,
                30.0,
                30,
                day(2026, 5, 16),
                "Dr. A",
                "P1",
                false,
            ),
        ];
        let analysis = analyze(&records, now);
        assert!(analysis
            .alerts
            .iter()
            .any(|a| a.alert_type == PdmpAlertType::EarlyRefill));
    }

    #[test]
    fn test_cash_only_threshold() {
        let now = day(2026, 6, 1);
        let mut records: Vec<PdmpPrescription> = (0..2)
            .map(|i| {
                record(
                    "Zolpidem",
                    10.0,
                    30.0,
                    30,
                    day(2026, 2 + i, 1),
                    "Dr. A",
                    "P1",
                    true,
                )
            })
            .collect();
        assert!(!analyze(&records, now)
            .alerts
            .iter()
            .any(|a| a.alert_type == PdmpAlertType::CashOnly));

        records.push(record(
            "Zolpidem",
            10.0,
            30.0,
            30,
            day(2026, 4, 1),
            "Dr. A",
            "P1",
            true,
        ));
        assert!(analyze(&records, now)
            .alerts
            .iter()
            .any(|a| a.alert_type == PdmpAlertType::CashOnly));
    }

    #[test]
    fn test_opioid_benzo_combination_is_critical() {
        let now = day(2026, 6, 1);
        let records = vec![
            record(
                "Oxycodone",
                5.0,
                60.0,
                30,
                day(2026, 5, 20),
                "Dr. A",
                "P1",
                false,
            ),
            record(
                "Alprazolam",
                0.5,
                30.0,
                30,
                day(2026, 5, 22),
                "Dr. A",
                "P1",
                false,
            ),
        ];
        let analysis = analyze(&records, now);
        let combo = analysis
            .alerts
            .iter()
            .find(|a| a.alert_type == PdmpAlertType::DangerousCombination)
            .unwrap();
        assert_eq!(combo.severity, PdmpSeverity::Critical);
        assert!(combo.requires_action);
    }

    #[test]
    fn test_score_cap_at_100() {
        let now = day(2026, 6, 1);
        let mut records = Vec::new();
        // Everything at once: shopping + combo + MME + overlap + cash + early
        for (i, (prescriber, pharmacy)) in [
            ("Dr. A", "P1"),
            ("Dr. B", "P2"),
            ("Dr. C", "P3"),
            ("Dr. D", "P4"),
        ]
        .iter()
        .enumerate()
        {
            records.push(record(
                "Oxycodone",
                30.0,
                120.0,
                30,
                day(2026, 5, 10 + i as u32),
                prescriber,
                pharmacy,
                true,
            ));
        }
        records.push(record(
            "Alprazolam",
            1.0,
            60.0,
            30,
            day(2026, 5, 12),
            "Dr. A",
            "P1",
            true,
        ));
        let analysis = analyze(&records, now);
        assert_eq!(analysis.risk_score, 100);
        assert_eq!(analysis.risk_level, RiskLevel::Critical);
    }
}
