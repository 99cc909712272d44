//! Balloteer service binary.
//!
//! Wires the governance engine to `PostgreSQL` (write-through persistence
//! and wallet lookup) and to NATS (commands in, replies and notices out),
//! then runs the serial event loop until shutdown.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `balloteer-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Connect to `PostgreSQL` and run migrations
//! 4. Boot the engine from the persisted state
//! 5. Connect to NATS and start forwarding commands
//! 6. Arm auto-close timers for open proposals and start the sweep
//! 7. Run the event loop until Ctrl-C
//! 8. Close the database pool

mod error;
mod nats_gateway;
mod pg_gateway;

use std::path::Path;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use balloteer_core::config::LoggingConfig;
use balloteer_core::{AutoCloseScheduler, BalloteerConfig, Engine, run_engine};
use balloteer_db::PostgresPool;

use crate::error::ServiceError;
use crate::nats_gateway::NatsReplySink;
use crate::pg_gateway::{PgGateway, PgIdentity};

/// Configuration file looked up in the working directory.
const CONFIG_PATH: &str = "balloteer-config.yaml";

/// Capacity of the inbound command channel.
const INBOUND_CAPACITY: usize = 1024;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any startup step fails.
#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    // 1. Load configuration.
    let (config, from_file) = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(from_file, "balloteer-engine starting");
    info!(
        sweep_interval_secs = config.engine.sweep_interval_secs,
        require_wallet_link = config.engine.require_wallet_link,
        post_vote_close = ?config.engine.post_vote_close,
        "Configuration loaded"
    );

    // 3. Connect to PostgreSQL.
    let db = PostgresPool::connect_url(&config.infrastructure.postgres_url).await?;
    db.run_migrations().await?;

    // 4. Boot the engine.
    let mut engine = Engine::boot(
        PgGateway::new(db.clone()),
        PgIdentity::new(db.clone()),
        config.engine.clone(),
    )?;

    // 5. Connect to NATS.
    let nats_url = &config.infrastructure.nats_url;
    info!(nats_url, "Connecting to NATS");
    let client = nats_gateway::connect(nats_url).await?;
    let (inbound_tx, mut inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let scheduler = AutoCloseScheduler::new(&inbound_tx);
    let _forwarder = nats_gateway::spawn_inbound(
        &client,
        &config.infrastructure.inbound_subject,
        inbound_tx,
    )
    .await?;

    // 6. Arm timers.
    let armed = scheduler.arm_all(engine.open_deadlines());
    let _sweep = scheduler.spawn_sweep(Duration::from_secs(config.engine.sweep_interval_secs));
    info!(armed, "Auto-close timers armed");

    // 7. Run the event loop.
    let mut sink = NatsReplySink::new(client, &config.infrastructure.outbound_prefix);
    let summary = run_engine(&mut engine, &mut inbound_rx, &scheduler, &mut sink).await;

    // 8. Shut down.
    db.close().await;
    info!(
        handled = summary.handled,
        failed = summary.failed,
        "balloteer-engine shutdown complete"
    );
    Ok(())
}

/// Load configuration, falling back to defaults when the file is absent.
fn load_config() -> Result<(BalloteerConfig, bool), ServiceError> {
    let config_path = Path::new(CONFIG_PATH);
    if config_path.exists() {
        Ok((BalloteerConfig::from_file(config_path)?, true))
    } else {
        Ok((BalloteerConfig::parse("{}")?, false))
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.is_json() {
        builder.json().init();
    } else {
        builder.init();
    }
}
