/*!
 * Claim Model
 *
 * Adjudication aggregate, child of a fill. Carries the NCPDP reject
 * taxonomy as reference data: each known code maps to a resolution
 * list surfaced to the user; unknown codes pass through at severity
 * `warning` with a "Contact prescriber" fallback.
 *
 * Money is fixed-point cents. For an approved claim the adjudicator
 * expects patient_pay + insurance_pay = gross_price; a divergent
 * response is accepted but flagged (`pay_mismatch`).
 */

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Claim adjudication state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    Pending,
    Approved,
    Rejected,
    Appealing,
    Reversed,
}

/// Severity attached to a reject code
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RejectSeverity {
    Warning,
    Blocking,
}

/// A reject-code taxonomy entry
#[derive(Debug, Clone)]
pub struct RejectCodeEntry {
    pub code: &'static str,
    pub description: &'static str,
    pub severity: RejectSeverity,
    /// Whether submitWithOverride may be attempted for this code
    pub overridable: bool,
    pub resolutions: &'static [&'static str],
}

static REJECT_TAXONOMY: Lazy<HashMap<&'static str, RejectCodeEntry>> = Lazy::new(|| {
    let entries = [
        RejectCodeEntry {
            code: "70",
            description: "Product/Service Not Covered",
            severity: RejectSeverity::Blocking,
            overridable: false,
            resolutions: &[
                "Verify the NDC billed matches the product on the shelf",
                "Check plan formulary for a covered alternative",
                "Offer cash price to the patient",
            ],
        },
        RejectCodeEntry {
            code: "75",
            description: "Prior Authorization Required",
            severity: RejectSeverity::Blocking,
            overridable: false,
            resolutions: &[
                "Initiate prior authorization with the prescriber's office",
                "Ask the plan for an expedited review when clinically urgent",
            ],
        },
        RejectCodeEntry {
            code: "76",
            description: "Plan Limitations Exceeded",
            severity: RejectSeverity::Blocking,
            overridable: true,
            resolutions: &[
                "Reduce quantity or days supply to the plan limit",
                "Submit with a clarification override when the limit is clinical",
            ],
        },
        RejectCodeEntry {
            code: "79",
            description: "Refill Too Soon",
            severity: RejectSeverity::Blocking,
            overridable: true,
            resolutions: &[
                "Confirm the date the patient will run out",
                "Submit a vacation/lost-medication override when applicable",
            ],
        },
        RejectCodeEntry {
            code: "88",
            description: "DUR Reject",
            severity: RejectSeverity::Blocking,
            overridable: true,
            resolutions: &[
                "Review the DUR conflict detail returned by the plan",
                "Submit DUR override codes after pharmacist review",
            ],
        },
        RejectCodeEntry {
            code: "E0",
            description: "System Error",
            severity: RejectSeverity::Blocking,
            overridable: false,
            resolutions: &["Retry the claim; contact the switch help desk if it persists"],
        },
    ];
    entries.into_iter().map(|e| (e.code, e)).collect()
});

/// Reject-code lookup with pass-through for unknown codes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RejectCode {
    pub code: String,
    pub description: String,
    pub severity: RejectSeverity,
    pub overridable: bool,
    pub resolutions: Vec<String>,
}

impl RejectCode {
    pub fn lookup(code: &str) -> Self {
        match REJECT_TAXONOMY.get(code) {
            Some(entry) => Self {
                code: entry.code.to_string(),
                description: entry.description.to_string(),
                severity: entry.severity,
                overridable: entry.overridable,
                resolutions: entry.resolutions.iter().map(|s| s.to_string()).collect(),
            },
            // Unknown codes pass through with a conservative default
            None => Self {
                code: code.to_string(),
                description: format!("Unrecognized reject code {}", code),
                severity: RejectSeverity::Warning,
                overridable: false,
                resolutions: vec!["Contact prescriber".to_string()],
            },
        }
    }
}

/// Claim aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: Uuid,
    pub version: i64,
    pub rx_id: Uuid,
    /// Nullable until a fill exists (pre-fill test claims)
    pub fill_id: Option<Uuid>,

    pub bin: String,
    pub pcn: String,
    pub group_id: String,
    pub member_id: String,

    pub status: ClaimStatus,
    pub attempt_no: i32,
    pub reject_code: Option<String>,
    pub reject_message: Option<String>,
    pub override_code: Option<String>,
    pub override_reason: Option<String>,

    pub gross_price_cents: Option<i64>,
    pub patient_pay_cents: Option<i64>,
    pub insurance_pay_cents: Option<i64>,
    /// Approved response whose pays did not sum to gross
    pub pay_mismatch: bool,

    /// Set when a cancellation arrived after transmission
    pub interrupted: bool,

    pub submitted_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Claim {
    /// A claim may be resubmitted only from the rejected state
    pub fn can_resubmit(&self) -> bool {
        self.status == ClaimStatus::Rejected
    }

    /// Reversal is permitted only while approved
    pub fn can_reverse(&self) -> bool {
        self.status == ClaimStatus::Approved
    }
}

/// Cash conversion record emitted when a claim is abandoned for cash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashConversion {
    pub id: Uuid,
    pub claim_id: Uuid,
    pub rx_id: Uuid,
    pub cash_price_cents: i64,
    pub converted_by: Uuid,
    pub converted_at: DateTime<Utc>,
}

/// Request shape transmitted to the claim switch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub claim_id: Uuid,
    /// NCPDP transaction code: B1 billing, B2 reversal
    pub transaction_code: String,
    pub bin: String,
    pub pcn: String,
    pub group_id: String,
    pub member_id: String,
    pub ndc: String,
    pub quantity: f64,
    pub days_supply: i32,
    pub daw_code: u8,
    pub prescriber_dea: Option<String>,
    pub prescriber_npi: Option<String>,
    pub override_code: Option<String>,
    pub attempt_no: i32,
}

/// Parsed switch response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum ClaimResponse {
    Approved {
        gross_price_cents: i64,
        patient_pay_cents: i64,
        insurance_pay_cents: i64,
    },
    Rejected {
        code: String,
        message: String,
    },
    Pending,
}
