use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::cleanup::CleanupWorkerConfig;
use crate::fleet::FleetApiConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::store::DbConfig;

/// Where server records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub store: StoreBackend,
    pub database: DbConfig,
    /// Apply migrations on startup.
    pub run_migrations: bool,
    pub fleet_api: FleetApiConfig,
    pub orchestrator: OrchestratorConfig,
    pub cleanup: CleanupWorkerConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let log_level = std::env::var("FLEETD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let store = match std::env::var("FLEETD_STORE")
            .unwrap_or_else(|_| "postgres".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => StoreBackend::Memory,
            "postgres" => StoreBackend::Postgres,
            other => bail!("FLEETD_STORE must be \"memory\" or \"postgres\", got {other:?}"),
        };

        let run_migrations = std::env::var("FLEETD_RUN_MIGRATIONS")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let database = DbConfig::from_env();

        let mut fleet_api = FleetApiConfig::default();
        if let Ok(url) = std::env::var("FLEETD_FLEET_API_URL") {
            fleet_api.base_url = url;
        }
        if let Ok(namespace) = std::env::var("FLEETD_NAMESPACE") {
            fleet_api.namespace = namespace;
        }
        let token_file = std::env::var("FLEETD_FLEET_TOKEN_FILE")
            .unwrap_or_else(|_| "/var/run/secrets/kubernetes.io/serviceaccount/token".to_string());
        let ca_file = std::env::var("FLEETD_FLEET_CA_FILE")
            .unwrap_or_else(|_| "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt".to_string());
        let fleet_api =
            fleet_api.with_credentials_from(&PathBuf::from(token_file), &PathBuf::from(ca_file));

        let defaults = OrchestratorConfig::default();
        let orchestrator = OrchestratorConfig {
            allocation_retry_interval: secs_from_env(
                "FLEETD_ALLOCATION_RETRY_SECS",
                defaults.allocation_retry_interval,
            )?,
            allocation_deadline: secs_from_env(
                "FLEETD_ALLOCATION_DEADLINE_SECS",
                defaults.allocation_deadline,
            )?,
            poll_interval: secs_from_env("FLEETD_POLL_INTERVAL_SECS", defaults.poll_interval)?,
            startup_deadline: secs_from_env(
                "FLEETD_STARTUP_DEADLINE_SECS",
                defaults.startup_deadline,
            )?,
            fail_fast_on_permanent_errors: std::env::var("FLEETD_FAIL_FAST")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(defaults.fail_fast_on_permanent_errors),
        };

        let cleanup_defaults = CleanupWorkerConfig::default();
        let cleanup = CleanupWorkerConfig {
            interval: secs_from_env("FLEETD_CLEANUP_INTERVAL_SECS", cleanup_defaults.interval)?,
            grace_period: secs_from_env("FLEETD_CLEANUP_GRACE_SECS", cleanup_defaults.grace_period)?,
        };

        Ok(Self {
            log_level,
            store,
            database,
            run_migrations,
            fleet_api,
            orchestrator,
            cleanup,
        })
    }
}

fn secs_from_env(name: &str, default: Duration) -> Result<Duration> {
    match std::env::var(name) {
        Ok(value) => {
            let secs: u64 = value
                .parse()
                .with_context(|| format!("{name} must be a whole number of seconds"))?;
            if secs == 0 {
                bail!("{name} must be greater than zero");
            }
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(default),
    }
}
