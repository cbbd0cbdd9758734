/*!
 * Registry Service
 *
 * Submits immunization records to state IIS registries through the
 * `RegistryClient` port. A submission that times out is parked on a
 * deferred queue and retried by `flush_deferred` (called by the
 * scheduler or the CLI), never dropped.
 */

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::models::user::Actor;
use crate::ports::{ImmunizationRecord, RegistryAck, RegistryClient};
use crate::services::audit_log_service::AuditLogService;
use crate::utils::errors::Result;
use crate::utils::permissions::{self, Action, Resource};

/// Outcome of a submission attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Accepted(Option<String>),
    Rejected(String),
    /// Timed out; parked for deferred retry
    Deferred,
}

/// IIS submission service
#[derive(Clone)]
pub struct RegistryService {
    client: Arc<dyn RegistryClient>,
    audit: AuditLogService,
    timeout: Duration,
    deferred: Arc<Mutex<Vec<ImmunizationRecord>>>,
}

impl RegistryService {
    pub fn new(client: Arc<dyn RegistryClient>, audit: AuditLogService, timeout: Duration) -> Self {
        Self {
            client,
            audit,
            timeout,
            deferred: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Submit one record; timeouts defer rather than fail
    pub async fn submit(
        &self,
        record: ImmunizationRecord,
        actor: &Actor,
    ) -> Result<SubmissionOutcome> {
        permissions::require(actor, Resource::Fhir, Action::Create)?;

        let outcome = match tokio::time::timeout(self.timeout, self.client.submit(&record)).await {
            Ok(Ok(RegistryAck { accepted: true, registry_id, .. })) => {
                SubmissionOutcome::Accepted(registry_id)
            }
            Ok(Ok(RegistryAck { message, .. })) => {
                SubmissionOutcome::Rejected(message.unwrap_or_else(|| "rejected".to_string()))
            }
            Ok(Err(err)) if err.is_transient() => {
                self.park(record.clone());
                SubmissionOutcome::Deferred
            }
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                self.park(record.clone());
                SubmissionOutcome::Deferred
            }
        };

        self.audit
            .record(
                actor,
                "registry.submit",
                "immunization",
                record.patient_id,
                true,
                serde_json::json!({
                    "state": record.state,
                    "outcome": format!("{:?}", std::mem::discriminant(&outcome)),
                }),
            )
            .await?;
        Ok(outcome)
    }

    fn park(&self, record: ImmunizationRecord) {
        self.deferred
            .lock()
            .expect("deferred queue poisoned")
            .push(record);
    }

    pub fn deferred_count(&self) -> usize {
        self.deferred.lock().expect("deferred queue poisoned").len()
    }

    /// Retry every parked submission once; still-failing records stay
    /// parked. Returns the number delivered.
    pub async fn flush_deferred(&self, actor: &Actor) -> Result<usize> {
        permissions::require(actor, Resource::Fhir, Action::Create)?;
        let parked: Vec<ImmunizationRecord> = {
            let mut queue = self.deferred.lock().expect("deferred queue poisoned");
            std::mem::take(&mut *queue)
        };
        let mut delivered = 0;
        for record in parked {
            match tokio::time::timeout(self.timeout, self.client.submit(&record)).await {
                Ok(Ok(RegistryAck { accepted: true, .. })) => delivered += 1,
                Ok(Ok(_)) => {
                    // Final rejection: drop from the queue but log it
                    tracing::warn!(state = %record.state, "deferred IIS submission rejected");
                }
                _ => self.park(record),
            }
        }
        Ok(delivered)
    }
}

impl std::fmt::Debug for RegistryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryService")
            .field("timeout", &self.timeout)
            .field("deferred", &self.deferred_count())
            .finish()
    }
}

