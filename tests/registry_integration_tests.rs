/*!
 * Registry Integration Tests
 *
 * IIS submissions over the registry port, including the deferred
 * queue behavior on timeouts.
 */

mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use rxflow_engine::models::user::{Actor, UserRole};
use rxflow_engine::ports::{ImmunizationRecord, RegistryAck, RegistryClient, SystemClock};
use rxflow_engine::services::{AuditLogService, RegistryService, SubmissionOutcome};
use rxflow_engine::store::MemoryStore;
use rxflow_engine::utils::errors::Result;

use test_utils::TestHarness;

fn record(state: &str) -> ImmunizationRecord {
    ImmunizationRecord {
        patient_id: Uuid::new_v4(),
        cvx_code: "208".to_string(),
        administered_date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
        lot_number: Some("FLU-9".to_string()),
        state: state.to_string(),
    }
}

#[tokio::test]
async fn test_submission_accepted() {
    let h = TestHarness::new();
    let outcome = h
        .engine
        .registry
        .submit(record("OH"), &h.tech)
        .await
        .unwrap();
    assert_eq!(outcome, SubmissionOutcome::Accepted(Some("IIS-1".to_string())));
}

/// Client that times out until told otherwise
struct FlakyRegistry {
    healthy: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl RegistryClient for FlakyRegistry {
    async fn submit(&self, _record: &ImmunizationRecord) -> Result<RegistryAck> {
        if self.healthy.load(std::sync::atomic::Ordering::SeqCst) {
            Ok(RegistryAck {
                accepted: true,
                registry_id: Some("IIS-2".to_string()),
                message: None,
            })
        } else {
            tokio::time::sleep(Duration::from_secs(10)).await;
            unreachable!("the submission should have timed out first")
        }
    }
}

#[tokio::test]
async fn test_timeout_defers_then_flushes() {
    let store = Arc::new(MemoryStore::new());
    let audit = AuditLogService::new(store, Arc::new(SystemClock));
    let client = Arc::new(FlakyRegistry {
        healthy: std::sync::atomic::AtomicBool::new(false),
    });
    let service = RegistryService::new(client.clone(), audit, Duration::from_millis(50));
    let operator = Actor::new("nurse", UserRole::Doctor);

    let outcome = service.submit(record("OH"), &operator).await.unwrap();
    assert_eq!(outcome, SubmissionOutcome::Deferred);
    assert_eq!(service.deferred_count(), 1);

    // Registry recovers; the deferred record is delivered
    client.healthy.store(true, std::sync::atomic::Ordering::SeqCst);
    let delivered = service.flush_deferred(&operator).await.unwrap();
    assert_eq!(delivered, 1);
    assert_eq!(service.deferred_count(), 0);
}
