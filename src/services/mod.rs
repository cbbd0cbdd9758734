/*!
 * Services Module
 *
 * Contains business logic and service layer implementations, plus the
 * `Engine` bundle that wires every service to the configured ports.
 */

pub mod audit_log_service;
pub mod claim_service;
pub mod data_entry_service;
pub mod dispense_service;
pub mod dur_service;
pub mod fill_service;
pub mod intake_service;
pub mod inventory_service;
pub mod pdmp_service;
pub mod registry_service;
pub mod verification_service;
pub mod workflow_service;

use std::sync::Arc;
use std::time::Duration;

pub use audit_log_service::{ActorActivity, AuditLogService, AuditStatistics};
pub use claim_service::ClaimService;
pub use data_entry_service::{Acceptance, DataEntryService, EntryField, EntrySession};
pub use dispense_service::DispenseService;
pub use dur_service::{daily_mme, names_match, normalize_name, CurrentMedication, DurInput, DurService};
pub use fill_service::{
    can_refill, cash_price_cents, check_fill_window, derive_aux_labels, discard_by,
    validate_fill_for_verification, FillService, FillValidationReport, PharmacyProfile,
    RefillCheck, WillCallEntry,
};
pub use intake_service::{IntakePayload, IntakeService};
pub use inventory_service::{DriftEntry, InventoryService};
pub use pdmp_service::{analyze as analyze_pdmp, PdmpAnalysis, PdmpService};
pub use registry_service::{RegistryService, SubmissionOutcome};
pub use verification_service::VerificationService;
pub use workflow_service::WorkflowService;

use crate::config::Config;
use crate::models::dur::DurPolicy;
use crate::ports::{
    ClaimSwitch, Clock, IdGen, PdmpProvider, RegistryClient, Store, Suggestor,
};
use crate::utils::locks::LockRegistry;
use crate::utils::retry::RetryPolicy;

/// Everything the engine consumes, supplied by the embedding process
pub struct EngineDeps {
    pub store: Arc<dyn Store>,
    pub claim_switch: Arc<dyn ClaimSwitch>,
    pub pdmp_provider: Arc<dyn PdmpProvider>,
    pub registry_client: Arc<dyn RegistryClient>,
    pub suggestor: Option<Arc<dyn Suggestor>>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGen>,
    pub config: Config,
    pub profile: PharmacyProfile,
    pub dur_policy: DurPolicy,
}

/// The assembled workflow engine
#[derive(Clone)]
pub struct Engine {
    pub audit: AuditLogService,
    pub workflow: WorkflowService,
    pub intake: IntakeService,
    pub data_entry: DataEntryService,
    pub dur: DurService,
    pub claims: ClaimService,
    pub inventory: InventoryService,
    pub fills: FillService,
    pub verification: VerificationService,
    pub pdmp: PdmpService,
    pub dispense: DispenseService,
    pub registry: RegistryService,
    pub profile: PharmacyProfile,
}

impl Engine {
    pub fn new(deps: EngineDeps) -> Self {
        let EngineDeps {
            store,
            claim_switch,
            pdmp_provider,
            registry_client,
            suggestor,
            clock,
            ids,
            config,
            profile,
            dur_policy,
        } = deps;

        let locks = Arc::new(LockRegistry::new());
        let audit = AuditLogService::new(store.clone(), clock.clone());
        let workflow = WorkflowService::new(
            store.clone(),
            clock.clone(),
            audit.clone(),
            locks.clone(),
        );
        let dur = DurService::new(dur_policy);
        let inventory = InventoryService::new(
            store.clone(),
            clock.clone(),
            audit.clone(),
            locks.clone(),
        );
        let intake = IntakeService::new(
            store.clone(),
            clock.clone(),
            ids,
            audit.clone(),
            workflow.clone(),
        );
        let data_entry = DataEntryService::new(
            store.clone(),
            clock.clone(),
            suggestor,
            config.suggestor.timeout,
            audit.clone(),
            workflow.clone(),
        );
        let claims = ClaimService::new(
            store.clone(),
            claim_switch,
            clock.clone(),
            audit.clone(),
            workflow.clone(),
            profile.clone(),
            RetryPolicy {
                max_attempts: config.claim_switch.max_attempts,
                ..RetryPolicy::default()
            },
            config.claim_switch.timeout,
        );
        let fills = FillService::new(
            store.clone(),
            clock.clone(),
            audit.clone(),
            inventory.clone(),
            workflow.clone(),
            profile.clone(),
        );
        let verification = VerificationService::new(
            store.clone(),
            clock.clone(),
            audit.clone(),
            dur.clone(),
            workflow.clone(),
            inventory.clone(),
            profile.clone(),
        );
        let pdmp = PdmpService::new(
            store.clone(),
            pdmp_provider,
            clock.clone(),
            audit.clone(),
            config.pdmp.timeout,
        );
        let dispense = DispenseService::new(
            store,
            clock,
            audit.clone(),
            inventory.clone(),
            workflow.clone(),
            profile.clone(),
        );
        let registry = RegistryService::new(registry_client, audit.clone(), config.registry.timeout);

        Self {
            audit,
            workflow,
            intake,
            data_entry,
            dur,
            claims,
            inventory,
            fills,
            verification,
            pdmp,
            dispense,
            registry,
            profile,
        }
    }
}

/// Default external-port timeouts, mirrored from the configuration
/// defaults for callers that construct services directly.
pub mod timeouts {
    use super::Duration;

    pub const CLAIM_SWITCH: Duration = Duration::from_secs(30);
    pub const PDMP: Duration = Duration::from_secs(10);
    pub const REGISTRY: Duration = Duration::from_secs(30);
    pub const SUGGESTOR: Duration = Duration::from_secs(15);
}
