/*!
 * RxFlow Engine - Pharmacy Dispensing Workflow Engine
 *
 * Administrative CLI entry point. The engine itself is a library;
 * transports embed it directly. This binary provides the operational
 * commands:
 *
 *   migrate                 bootstrap the configured store
 *   reindex                 rebuild derived snapshots and caches
 *   reconcile-inventory     rebuild inventory snapshots from the log
 *   audit-export --since=   export audit entries as CSV to stdout
 *   --health-check          readiness probe
 */

// Module declarations
mod config;
mod models;
mod ports;
mod services;
mod store;
mod utils;

use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use models::audit::AuditFilter;
use models::claim::{ClaimRequest, ClaimResponse};
use models::pdmp::{PdmpPrescription, PdmpQuery};
use models::user::{Actor, UserRole};
use ports::{
    ClaimSwitch, ImmunizationRecord, PdmpProvider, RegistryAck, RegistryClient, SystemClock,
    UuidGen,
};
use services::{Engine, EngineDeps, PharmacyProfile};
use store::MemoryStore;
use utils::errors::EngineError;

/// Port stub used by offline administrative commands; no admin command
/// transmits claims or queries a registry.
struct OfflinePort;

#[async_trait]
impl ClaimSwitch for OfflinePort {
    async fn send(&self, _request: &ClaimRequest) -> utils::errors::Result<ClaimResponse> {
        Err(EngineError::ExternalUnavailable("claim_switch".to_string()))
    }
}

#[async_trait]
impl PdmpProvider for OfflinePort {
    async fn query(
        &self,
        _state: &str,
        _query: &PdmpQuery,
    ) -> utils::errors::Result<Vec<PdmpPrescription>> {
        Err(EngineError::ExternalUnavailable("pdmp_provider".to_string()))
    }
}

#[async_trait]
impl RegistryClient for OfflinePort {
    async fn submit(&self, _record: &ImmunizationRecord) -> utils::errors::Result<RegistryAck> {
        Err(EngineError::ExternalUnavailable("registry".to_string()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() > 1 && args[1] == "--health-check" {
        return health_check().await;
    }

    tracing::info!("RxFlow Engine build {}", env!("RXFLOW_BUILD"));

    let config = Config::from_env()?;
    if let Some(ref db_url) = config.store.db_url {
        // External store backends are provided by the embedding
        // process; the CLI operates on the built-in store.
        tracing::warn!(
            "DB_URL is set ({} chars) but this build uses the built-in store",
            db_url.len()
        );
    }

    let engine = build_engine(config);
    let operator = Actor::new("cli-operator", UserRole::Admin);

    match args.get(1).map(String::as_str) {
        Some("migrate") => {
            // The built-in store is schemaless; migration validates
            // that the store answers reads and writes.
            engine
                .audit
                .record(
                    &operator,
                    "admin.migrate",
                    "store",
                    "builtin",
                    false,
                    serde_json::json!({}),
                )
                .await?;
            println!("migrate: store ready");
        }
        Some("reindex") => {
            let drift = engine.inventory.reconcile(engine.profile.id, &operator).await?;
            println!("reindex: {} snapshot(s) rebuilt", drift.len());
        }
        Some("reconcile-inventory") => {
            let drift = engine.inventory.reconcile(engine.profile.id, &operator).await?;
            if drift.is_empty() {
                println!("reconcile-inventory: no drift");
            } else {
                for entry in drift {
                    println!(
                        "reconcile-inventory: {} snapshot {} ledger {} drift {}",
                        entry.ndc, entry.snapshot_on_hand, entry.ledger_on_hand, entry.drift
                    );
                }
            }
        }
        Some("audit-export") => {
            let since = parse_since(&args)?;
            let filter = AuditFilter {
                since,
                ..Default::default()
            };
            let csv = engine.audit.export_csv(&filter).await?;
            let rows = csv.lines().count().saturating_sub(1);
            print!("{}", csv);
            // Provenance note on stderr so stdout stays parseable CSV
            eprintln!("audit-export: {} row(s), engine {}", rows, env!("RXFLOW_BUILD"));
        }
        Some(other) => {
            eprintln!("unknown command: {}", other);
            eprintln!("commands: migrate | reindex | reconcile-inventory | audit-export --since=<rfc3339> | --health-check");
            std::process::exit(2);
        }
        None => {
            eprintln!("usage: rxflow-engine <command>");
            eprintln!("commands: migrate | reindex | reconcile-inventory | audit-export --since=<rfc3339> | --health-check");
            std::process::exit(2);
        }
    }

    Ok(())
}

fn build_engine(config: Config) -> Engine {
    let port = Arc::new(OfflinePort);
    Engine::new(EngineDeps {
        store: Arc::new(MemoryStore::new()),
        claim_switch: port.clone(),
        pdmp_provider: port.clone(),
        registry_client: port,
        suggestor: None,
        clock: Arc::new(SystemClock),
        ids: Arc::new(UuidGen),
        config,
        profile: PharmacyProfile::default(),
        dur_policy: Default::default(),
    })
}

fn parse_since(args: &[String]) -> anyhow::Result<Option<DateTime<Utc>>> {
    for arg in args.iter().skip(2) {
        if let Some(raw) = arg.strip_prefix("--since=") {
            let parsed = DateTime::parse_from_rfc3339(raw)
                .map_err(|e| anyhow::anyhow!("invalid --since value: {}", e))?;
            return Ok(Some(parsed.with_timezone(&Utc)));
        }
    }
    Ok(None)
}

async fn health_check() -> anyhow::Result<()> {
    // Readiness: the store answers a round-trip
    let store = MemoryStore::new();
    let clock = SystemClock;
    let audit = services::AuditLogService::new(
        Arc::new(store),
        Arc::new(clock),
    );
    let probe = Actor::new("health-probe", UserRole::Admin);
    audit
        .record(
            &probe,
            "admin.health_check",
            "store",
            "builtin",
            false,
            serde_json::json!({}),
        )
        .await?;
    println!("OK {}", env!("RXFLOW_BUILD"));
    Ok(())
}
