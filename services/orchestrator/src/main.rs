//! fleetd
//!
//! Provisions game servers from cluster fleets on request, tracks them until
//! they are reachable, and reclaims stopped servers after a grace period.

use std::sync::Arc;

use anyhow::Result;
use gsfleet_orchestrator::{
    cleanup::CleanupWorker,
    config::{self, StoreBackend},
    fleet::{AgonesFleetClient, FleetCatalog, FleetClient},
    notify::LogNotifier,
    orchestrator::Orchestrator,
    store::{InMemoryServerStore, PgServerStore, ServerStore},
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to FLEETD_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting fleetd");
    info!(
        fleet_api = %config.fleet_api.base_url,
        namespace = %config.fleet_api.namespace,
        store = ?config.store,
        "Configuration loaded"
    );

    let store: Arc<dyn ServerStore> = match config.store {
        StoreBackend::Memory => {
            warn!("Using in-memory store; records are lost on restart");
            Arc::new(InMemoryServerStore::new())
        }
        StoreBackend::Postgres => {
            let store = match PgServerStore::connect(&config.database).await {
                Ok(store) => store,
                Err(e) => {
                    error!(error = %e, "Failed to connect to database");
                    return Err(e.into());
                }
            };
            if config.run_migrations {
                if let Err(e) = store.run_migrations().await {
                    error!(error = %e, "Failed to run migrations");
                    return Err(e.into());
                }
            }
            Arc::new(store)
        }
    };

    let fleet = AgonesFleetClient::new(config.fleet_api.clone())?;
    match fleet.health_check().await {
        Ok(()) => info!(namespace = %fleet.namespace(), "Fleet API reachable"),
        Err(e) => warn!(error = %e, "Fleet API health check failed; continuing"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let orchestrator = Orchestrator::new(
        Arc::new(fleet),
        store.clone(),
        Arc::new(LogNotifier),
        FleetCatalog::default(),
        config.orchestrator.clone(),
        shutdown_rx.clone(),
    );

    let cleanup_worker = CleanupWorker::new(store, orchestrator.clone(), config.cleanup.clone());
    let cleanup_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            cleanup_worker.run(shutdown_rx).await;
        }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Received shutdown signal");

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    info!(in_flight = orchestrator.in_flight(), "Waiting for workers to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);

    if tokio::time::timeout(shutdown_timeout, orchestrator.shutdown())
        .await
        .is_err()
    {
        warn!("Provisioning tasks did not shut down in time");
    }

    if let Err(e) = tokio::time::timeout(shutdown_timeout, cleanup_handle).await {
        warn!(error = %e, "Cleanup worker did not shut down in time");
    }

    info!("fleetd shutdown complete");
    Ok(())
}
