/*!
 * Audit Model
 *
 * One append-only row per state-changing operation, written before the
 * caller is acknowledged. Rows carry a PHI-touch flag for compliance
 * reporting; the context blob holds non-PHI operation detail.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome recorded on an audit row
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Denied,
    Failed,
}

/// A single audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub actor_name: String,
    /// Verb, e.g. "fill.start", "claim.submit"
    pub action: String,
    /// Resource type, e.g. "prescription", "inventory"
    pub resource: String,
    pub resource_id: String,
    pub outcome: AuditOutcome,
    /// True when the operation read or wrote PHI
    pub phi_touch: bool,
    pub occurred_at: DateTime<Utc>,
    /// Structured, non-PHI context
    pub context: serde_json::Value,
}

/// Filter for audit queries and exports
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub actor_id: Option<Uuid>,
    pub action: Option<String>,
    pub resource: Option<String>,
    pub resource_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub phi_only: bool,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(actor_id) = self.actor_id {
            if entry.actor_id != actor_id {
                return false;
            }
        }
        if let Some(ref action) = self.action {
            if &entry.action != action {
                return false;
            }
        }
        if let Some(ref resource) = self.resource {
            if &entry.resource != resource {
                return false;
            }
        }
        if let Some(ref resource_id) = self.resource_id {
            if &entry.resource_id != resource_id {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.occurred_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.occurred_at >= until {
                return false;
            }
        }
        if self.phi_only && !entry.phi_touch {
            return false;
        }
        true
    }
}
