/*!
 * Audit Log Service
 *
 * Writes one audit row per state-changing operation and provides
 * filtered queries, per-actor activity summaries, and CSV/JSON export
 * for the audit-export CLI command.
 *
 * Services call `record` (or `record_denied` / `record_failed`) BEFORE
 * acknowledging the caller, so a successful response implies the row
 * exists.
 */

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::audit::{AuditEntry, AuditFilter, AuditOutcome};
use crate::models::user::Actor;
use crate::ports::{Clock, Store};
use crate::utils::errors::{EngineError, Result};

/// Per-actor activity rollup
#[derive(Debug, Clone, serde::Serialize)]
pub struct ActorActivity {
    pub actor_id: Uuid,
    pub actor_name: String,
    pub total_actions: usize,
    pub phi_actions: usize,
    pub denied_actions: usize,
}

/// Aggregate statistics over a filtered slice of the log
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuditStatistics {
    pub total: usize,
    pub by_action: HashMap<String, usize>,
    pub by_outcome: HashMap<String, usize>,
    pub phi_touches: usize,
}

/// Service for recording and querying audit entries
#[derive(Clone)]
pub struct AuditLogService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl AuditLogService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Append a success row
    pub async fn record(
        &self,
        actor: &Actor,
        action: &str,
        resource: &str,
        resource_id: impl std::fmt::Display,
        phi_touch: bool,
        context: serde_json::Value,
    ) -> Result<()> {
        self.append(actor, action, resource, resource_id, AuditOutcome::Success, phi_touch, context)
            .await
    }

    /// Append a permission-denied row
    pub async fn record_denied(
        &self,
        actor: &Actor,
        action: &str,
        resource: &str,
        resource_id: impl std::fmt::Display,
    ) -> Result<()> {
        self.append(
            actor,
            action,
            resource,
            resource_id,
            AuditOutcome::Denied,
            false,
            serde_json::json!({}),
        )
        .await
    }

    /// Append a failure row (surfaced errors)
    pub async fn record_failed(
        &self,
        actor: &Actor,
        action: &str,
        resource: &str,
        resource_id: impl std::fmt::Display,
        error: &EngineError,
    ) -> Result<()> {
        self.append(
            actor,
            action,
            resource,
            resource_id,
            AuditOutcome::Failed,
            false,
            serde_json::json!({ "error_category": format!("{:?}", error.category()) }),
        )
        .await
    }

    async fn append(
        &self,
        actor: &Actor,
        action: &str,
        resource: &str,
        resource_id: impl std::fmt::Display,
        outcome: AuditOutcome,
        phi_touch: bool,
        context: serde_json::Value,
    ) -> Result<()> {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            actor_id: actor.id,
            actor_name: actor.name.clone(),
            action: action.to_string(),
            resource: resource.to_string(),
            resource_id: resource_id.to_string(),
            outcome,
            phi_touch,
            occurred_at: self.clock.now(),
            context,
        };
        tracing::debug!(action, resource, outcome = ?outcome, "audit");
        self.store.append_audit(&entry).await
    }

    /// Filtered query, ordered by occurrence
    pub async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let mut entries = self.store.list_audit(filter).await?;
        entries.sort_by_key(|e| e.occurred_at);
        Ok(entries)
    }

    /// Aggregate statistics over a filtered slice
    pub async fn statistics(&self, filter: &AuditFilter) -> Result<AuditStatistics> {
        let entries = self.list(filter).await?;
        let mut by_action: HashMap<String, usize> = HashMap::new();
        let mut by_outcome: HashMap<String, usize> = HashMap::new();
        let mut phi_touches = 0;
        for entry in &entries {
            *by_action.entry(entry.action.clone()).or_default() += 1;
            let outcome = format!("{:?}", entry.outcome).to_lowercase();
            *by_outcome.entry(outcome).or_default() += 1;
            if entry.phi_touch {
                phi_touches += 1;
            }
        }
        Ok(AuditStatistics {
            total: entries.len(),
            by_action,
            by_outcome,
            phi_touches,
        })
    }

    /// Per-actor rollup since a timestamp
    pub async fn actor_activity(&self, since: DateTime<Utc>) -> Result<Vec<ActorActivity>> {
        let filter = AuditFilter {
            since: Some(since),
            ..Default::default()
        };
        let entries = self.list(&filter).await?;
        let mut by_actor: HashMap<Uuid, ActorActivity> = HashMap::new();
        for entry in entries {
            let activity = by_actor.entry(entry.actor_id).or_insert_with(|| ActorActivity {
                actor_id: entry.actor_id,
                actor_name: entry.actor_name.clone(),
                total_actions: 0,
                phi_actions: 0,
                denied_actions: 0,
            });
            activity.total_actions += 1;
            if entry.phi_touch {
                activity.phi_actions += 1;
            }
            if entry.outcome == AuditOutcome::Denied {
                activity.denied_actions += 1;
            }
        }
        let mut list: Vec<ActorActivity> = by_actor.into_values().collect();
        list.sort_by(|a, b| b.total_actions.cmp(&a.total_actions));
        Ok(list)
    }

    /// Export a filtered slice as CSV
    pub async fn export_csv(&self, filter: &AuditFilter) -> Result<String> {
        let entries = self.list(filter).await?;
        let mut wtr = csv::WriterBuilder::new().from_writer(Vec::new());
        wtr.write_record([
            "occurred_at",
            "actor_id",
            "actor_name",
            "action",
            "resource",
            "resource_id",
            "outcome",
            "phi_touch",
        ])
        .map_err(|e| EngineError::SystemFailure(format!("csv write failed: {}", e)))?;
        for entry in &entries {
            wtr.write_record([
                entry.occurred_at.to_rfc3339(),
                entry.actor_id.to_string(),
                entry.actor_name.clone(),
                entry.action.clone(),
                entry.resource.clone(),
                entry.resource_id.clone(),
                format!("{:?}", entry.outcome).to_lowercase(),
                entry.phi_touch.to_string(),
            ])
            .map_err(|e| EngineError::SystemFailure(format!("csv write failed: {}", e)))?;
        }
        let bytes = wtr
            .into_inner()
            .map_err(|e| EngineError::SystemFailure(format!("csv flush failed: {}", e)))?;
        String::from_utf8(bytes).map_err(|e| EngineError::SystemFailure(e.to_string()))
    }

    /// Export a filtered slice as JSON lines
    pub async fn export_json(&self, filter: &AuditFilter) -> Result<String> {
        let entries = self.list(filter).await?;
        let mut out = String::new();
        for entry in &entries {
            let line = serde_json::to_string(entry)
                .map_err(|e| EngineError::SystemFailure(e.to_string()))?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::UserRole;
    use crate::ports::SystemClock;
    use crate::store::MemoryStore;

    fn service() -> AuditLogService {
        AuditLogService::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn test_record_and_list() {
        let audit = service();
        let actor = Actor::new("tech", UserRole::User);
        audit
            .record(&actor, "claim.submit", "claim", "C-1", false, serde_json::json!({}))
            .await
            .unwrap();
        audit
            .record(&actor, "fill.start", "fill", "F-1", true, serde_json::json!({}))
            .await
            .unwrap();

        let all = audit.list(&AuditFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let phi = audit
            .list(&AuditFilter {
                phi_only: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(phi.len(), 1);
        assert_eq!(phi[0].action, "fill.start");
    }

    #[tokio::test]
    async fn test_statistics() {
        let audit = service();
        let actor = Actor::new("tech", UserRole::User);
        for _ in 0..3 {
            audit
                .record(&actor, "claim.submit", "claim", "C-1", false, serde_json::json!({}))
                .await
                .unwrap();
        }
        audit
            .record_denied(&actor, "inventory.adjust", "inventory", "N-1")
            .await
            .unwrap();

        let stats = audit.statistics(&AuditFilter::default()).await.unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.by_action["claim.submit"], 3);
        assert_eq!(stats.by_outcome["denied"], 1);
    }

    #[tokio::test]
    async fn test_csv_export_shape() {
        let audit = service();
        let actor = Actor::new("tech", UserRole::User);
        audit
            .record(&actor, "claim.submit", "claim", "C-1", false, serde_json::json!({}))
            .await
            .unwrap();
        let csv_text = audit.export_csv(&AuditFilter::default()).await.unwrap();
        let mut lines = csv_text.lines();
        assert!(lines.next().unwrap().starts_with("occurred_at,"));
        assert!(lines.next().unwrap().contains("claim.submit"));
    }
}
