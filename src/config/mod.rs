/*!
 * Configuration Module
 *
 * Handles engine configuration loading from environment variables
 * and provides structured access to configuration values.
 */

use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Engine configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Claim switch endpoint configuration
    pub claim_switch: ClaimSwitchConfig,
    /// PDMP provider configuration
    pub pdmp: PdmpConfig,
    /// Immunization registry endpoints, keyed by two-letter state code
    pub registry: RegistryConfig,
    /// Document suggestion provider configuration
    pub suggestor: SuggestorConfig,
    /// Storage backend configuration
    pub store: StoreConfig,
    /// Clock tolerance and workflow timing configuration
    pub workflow: WorkflowConfig,
}

/// Claim switch (NCPDP transport) configuration
#[derive(Debug, Clone)]
pub struct ClaimSwitchConfig {
    /// Switch endpoint URL
    pub url: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    /// Maximum transmit attempts for transient failures
    pub max_attempts: u32,
}

/// PDMP provider configuration
#[derive(Debug, Clone)]
pub struct PdmpConfig {
    /// Provider endpoint URL
    pub url: Option<String>,
    /// Per-state query timeout; states that exceed it are reported as
    /// unqueried and the result is marked partial
    pub timeout: Duration,
}

/// Immunization registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Endpoint per state, from REGISTRY_URL_<STATE> variables
    pub endpoints: HashMap<String, String>,
    /// Submission timeout; timeouts are retried on a deferred schedule
    pub timeout: Duration,
}

/// Suggestor (OCR / field extraction) configuration
#[derive(Debug, Clone)]
pub struct SuggestorConfig {
    /// Provider identifier (e.g. "textract", "none")
    pub provider: String,
    /// Extraction timeout; a timed-out extraction returns no fields
    pub timeout: Duration,
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Backend URL; absent means the built-in in-memory store
    pub db_url: Option<String>,
}

/// Workflow timing configuration
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Maximum tolerated skew between the engine clock and timestamps
    /// carried on inbound records
    pub clock_skew_max: Duration,
    /// Days a ready-for-pickup fill waits before the will-call sweep
    /// returns it to stock
    pub will_call_return_days: i64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Reads a `.env` file when present (development convenience),
    /// then the process environment. Every value has a default except
    /// the external endpoint URLs, which stay `None` until configured.
    pub fn from_env() -> anyhow::Result<Self> {
        // Ignore a missing .env file; env vars may come from the host
        let _ = dotenvy::dotenv();

        let claim_switch = ClaimSwitchConfig {
            url: env::var("CLAIM_SWITCH_URL").ok(),
            timeout: duration_var("CLAIM_SWITCH_TIMEOUT_MS", 30_000)?,
            max_attempts: parse_var("CLAIM_SWITCH_MAX_ATTEMPTS", 5)?,
        };

        let pdmp = PdmpConfig {
            url: env::var("PDMP_PROVIDER_URL").ok(),
            timeout: duration_var("PDMP_TIMEOUT_MS", 10_000)?,
        };

        let registry = RegistryConfig {
            endpoints: registry_endpoints_from_env(),
            timeout: duration_var("REGISTRY_TIMEOUT_MS", 30_000)?,
        };

        let suggestor = SuggestorConfig {
            provider: env::var("SUGGESTOR_PROVIDER").unwrap_or_else(|_| "none".to_string()),
            timeout: duration_var("SUGGESTOR_TIMEOUT_MS", 15_000)?,
        };

        let store = StoreConfig {
            db_url: env::var("DB_URL").ok(),
        };

        let workflow = WorkflowConfig {
            clock_skew_max: duration_var("CLOCK_SKEW_MAX_MS", 5_000)?,
            will_call_return_days: parse_var("WILL_CALL_RETURN_DAYS", 14)?,
        };

        Ok(Self {
            claim_switch,
            pdmp,
            registry,
            suggestor,
            store,
            workflow,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            claim_switch: ClaimSwitchConfig {
                url: None,
                timeout: Duration::from_secs(30),
                max_attempts: 5,
            },
            pdmp: PdmpConfig {
                url: None,
                timeout: Duration::from_secs(10),
            },
            registry: RegistryConfig {
                endpoints: HashMap::new(),
                timeout: Duration::from_secs(30),
            },
            suggestor: SuggestorConfig {
                provider: "none".to_string(),
                timeout: Duration::from_secs(15),
            },
            store: StoreConfig { db_url: None },
            workflow: WorkflowConfig {
                clock_skew_max: Duration::from_secs(5),
                will_call_return_days: 14,
            },
        }
    }
}

/// Collect REGISTRY_URL_<STATE> variables into a state -> URL map
fn registry_endpoints_from_env() -> HashMap<String, String> {
    env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix("REGISTRY_URL_")
                .filter(|state| state.len() == 2 && state.chars().all(|c| c.is_ascii_uppercase()))
                .map(|state| (state.to_string(), value))
        })
        .collect()
}

/// Parse an env var as a millisecond duration with a default
fn duration_var(name: &str, default_ms: u64) -> anyhow::Result<Duration> {
    let ms: u64 = parse_var(name, default_ms)?;
    Ok(Duration::from_millis(ms))
}

/// Parse an env var with a default value
fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {}: {}", name, e)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_timeouts() {
        let config = Config::default();
        assert_eq!(config.claim_switch.timeout, Duration::from_secs(30));
        assert_eq!(config.pdmp.timeout, Duration::from_secs(10));
        assert_eq!(config.registry.timeout, Duration::from_secs(30));
        assert_eq!(config.suggestor.timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_registry_endpoint_filtering() {
        std::env::set_var("REGISTRY_URL_OH", "https://iis.ohio.example");
        std::env::set_var("REGISTRY_URL_BOGUS", "https://nope.example");
        let endpoints = registry_endpoints_from_env();
        assert_eq!(
            endpoints.get("OH").map(String::as_str),
            Some("https://iis.ohio.example")
        );
        assert!(!endpoints.contains_key("BOGUS"));
        std::env::remove_var("REGISTRY_URL_OH");
        std::env::remove_var("REGISTRY_URL_BOGUS");
    }
}
