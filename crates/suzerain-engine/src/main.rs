//! Cycle engine binary for Suzerain.
//!
//! Wires the session scheduler to its production backends and runs until
//! interrupted.
//!
//! # Startup Sequence
//!
//! 1. Load configuration (`SUZERAIN_CONFIG`, or `suzerain-config.yaml` /
//!    `suzerain-config.{SUZERAIN_ENV}.yaml` in the working directory)
//! 2. Initialize structured logging (tracing)
//! 3. Connect to `PostgreSQL` and run migrations
//! 4. Connect to `Dragonfly`
//! 5. Connect to NATS
//! 6. Resume schedulers for every in-progress session
//! 7. Start the turn replenisher
//! 8. Wait for Ctrl-C, then stop schedulers and close connections

mod adapters;
mod error;
mod nats_bus;

use std::path::PathBuf;
use std::sync::Arc;

use suzerain_core::config::SuzerainConfig;
use suzerain_core::rules::StubRules;
use suzerain_core::store::{DurableStore, EphemeralStore, EventBus};
use suzerain_core::{Context, SessionManager, TurnReplenisher};
use suzerain_db::{DragonflyPool, PostgresConfig, PostgresPool};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::adapters::{DragonflyProjectionStore, PgDurableStore};
use crate::error::EngineError;
use crate::nats_bus::NatsEventBus;

/// Application entry point for the cycle engine.
///
/// # Errors
///
/// Returns an error if configuration, a backend connection, or session
/// resumption fails during startup.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config = load_config()?;

    // 2. Initialize structured logging.
    init_tracing(&config);
    info!(
        interval_ms = config.cycle.interval_ms,
        total_cycles = config.cycle.total_cycles,
        rules_timeout_ms = config.cycle.rules_timeout_ms,
        replenish_interval_secs = config.turns.replenish_interval_secs,
        "suzerain-engine starting"
    );

    // 3. PostgreSQL.
    let infra = &config.infrastructure;
    let pg_config = PostgresConfig::new(&infra.postgres_url)
        .with_statement_timeout(infra.store_timeout());
    let pg = PostgresPool::connect(&pg_config)
        .await
        .map_err(EngineError::from)?;
    pg.run_migrations().await.map_err(EngineError::from)?;
    let durable = Arc::new(PgDurableStore::new(pg));

    // 4. Dragonfly.
    let dragonfly = DragonflyPool::connect(&infra.dragonfly_url)
        .await
        .map_err(EngineError::from)?;
    let ephemeral = Arc::new(DragonflyProjectionStore::new(dragonfly));
    info!("Dragonfly connected");

    // 5. NATS.
    info!(nats_url = %infra.nats_url, "Connecting to NATS");
    let events = Arc::new(
        NatsEventBus::connect(&infra.nats_url)
            .await
            .map_err(|e| EngineError::Nats {
                message: format!("failed to connect to NATS at {}: {e}", infra.nats_url),
            })?,
    );
    info!("NATS event bus connected");

    let ctx = Context::new(
        Arc::clone(&durable) as Arc<dyn DurableStore>,
        Arc::clone(&ephemeral) as Arc<dyn EphemeralStore>,
        Arc::clone(&events) as Arc<dyn EventBus>,
        Arc::new(StubRules::new()),
        config,
    );

    // 6. Resume sessions left running by a previous process.
    let manager = SessionManager::new(ctx.clone());
    let resumed = manager.resume_in_progress().await.map_err(EngineError::from)?;
    info!(resumed, "Session schedulers running");

    // 7. Turn replenishment.
    let (stop_tx, stop_rx) = watch::channel(false);
    let replenisher =
        TurnReplenisher::new(ctx, Arc::clone(manager.registry())).spawn(stop_rx);

    // 8. Run until interrupted.
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C; shutting down");
    }
    info!("Shutdown requested");

    stop_tx.send_replace(true);
    if let Err(e) = replenisher.await {
        warn!(error = %e, "Turn replenisher ended abnormally");
    }
    manager.shutdown().await;
    events.flush().await;
    ephemeral.close().await;
    durable.close().await;

    info!("suzerain-engine shutdown complete");
    Ok(())
}

/// Install the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `logging.level` applies.
fn init_tracing(config: &SuzerainConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Resolve which config file to read.
fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("SUZERAIN_CONFIG") {
        return PathBuf::from(path);
    }
    match std::env::var("SUZERAIN_ENV") {
        Ok(env) if !env.is_empty() && env != "production" => {
            PathBuf::from(format!("suzerain-config.{env}.yaml"))
        }
        _ => PathBuf::from("suzerain-config.yaml"),
    }
}

/// Load configuration, falling back to defaults when no file exists.
///
/// Runs before logging is initialized, so it reports on stderr.
fn load_config() -> Result<SuzerainConfig, EngineError> {
    let path = config_path();
    if path.exists() {
        Ok(SuzerainConfig::from_file(&path)?)
    } else {
        eprintln!("config file {} not found, using defaults", path.display());
        let mut config = SuzerainConfig::default();
        config.infrastructure.apply_env_overrides();
        Ok(config)
    }
}
