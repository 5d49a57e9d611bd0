//! Price Oracle Binary
//!
//! Starts the price oracle service.
//!
//! # Usage
//!
//! ```bash
//! ORACLE_CATALOG_PATH=catalog.json cargo run --bin price-oracle
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `ORACLE_CATALOG_PATH`: JSON instrument catalog
//!
//! ## Optional
//! - `ORACLE_PUBLISHER_KEY`: Identity for sessions that present none
//! - `ORACLE_WS_PORT`: Websocket JSON-RPC port (default: 8910)
//! - `ORACLE_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `ORACLE_CONF_DIVISOR`: Confidence threshold divisor (default: 20)
//! - `ORACLE_MAX_QUOTE_LAG`: Quote staleness in submissions (default: 25)
//! - `ORACLE_TWAP_HALF_LIFE`: twap/twac half-life in submissions (default: 5921)
//! - `ORACLE_TWAP_MAX_GAP`: twap/twac re-seed gap in submissions (default: 4145)
//! - `ORACLE_OUTBOUND_QUEUE_CAPACITY`: Per-session queue bound (default: 1024)
//! - `ORACLE_COMMIT_QUEUE_CAPACITY`: Commit queue bound (default: 4096)
//! - `ORACLE_SCHED_INTERVAL_MS`: `price_sched` cadence, 0 = update-driven (default: 0)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: price-oracle)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use price_oracle::application::services::{CommitQueue, Dispatcher, SchedulePolicy, run_schedule};
use price_oracle::infrastructure::health::{HealthServer, HealthServerState};
use price_oracle::infrastructure::telemetry;
use price_oracle::infrastructure::websocket::{TransportState, WebSocketServer};
use price_oracle::{InMemoryPriceStore, InstrumentRegistry, OracleConfig, PriceStore, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Price Oracle");

    let _metrics_handle = init_metrics();

    let config = OracleConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Catalog
    let store: Arc<dyn PriceStore> =
        Arc::new(InMemoryPriceStore::from_catalog_file(&config.catalog_path).await?);
    let catalog = store.load_catalog().await?;
    let registry = Arc::new(InstrumentRegistry::from_catalog(&catalog)?);
    if registry.is_empty() {
        tracing::warn!("Catalog holds no instruments");
    }

    // Dispatcher and commit worker
    let (commit_queue, commit_worker) = CommitQueue::spawn(
        Arc::clone(&store),
        config.queues.commit_capacity,
        shutdown_token.clone(),
    );
    let dispatcher_config = config.queues.dispatcher_config();
    let dispatcher = Arc::new(
        Dispatcher::new(
            Arc::clone(&registry),
            config.aggregation.policy(),
            dispatcher_config,
        )
        .with_commit_queue(commit_queue),
    );

    if let SchedulePolicy::Interval(period) = dispatcher_config.schedule {
        tokio::spawn(run_schedule(
            Arc::clone(&dispatcher),
            period,
            shutdown_token.clone(),
        ));
    }

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&dispatcher),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Websocket server
    let transport_state = TransportState::new(
        Arc::clone(&dispatcher),
        config
            .default_publisher
            .as_ref()
            .map(|credential| credential.key().to_string()),
        shutdown_token.clone(),
    );
    let ws_server = WebSocketServer::new(config.server.ws_port, transport_state);
    let ws_task = tokio::spawn(async move {
        if let Err(e) = ws_server.run().await {
            tracing::error!(error = %e, "Websocket server error");
        }
    });

    tracing::info!(instruments = registry.len(), "Price oracle ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = ws_task.await;
        let _ = commit_worker.await;
    })
    .await
    .is_err()
    {
        tracing::warn!("Shutdown timed out");
    }

    tracing::info!("Price oracle stopped");
    Ok(())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &OracleConfig) {
    tracing::info!(
        catalog = %config.catalog_path.display(),
        ws_port = config.server.ws_port,
        health_port = config.server.health_port,
        default_publisher = config.default_publisher.is_some(),
        "Configuration loaded"
    );
    tracing::debug!(
        conf_divisor = config.aggregation.conf_divisor,
        max_quote_lag = config.aggregation.max_quote_lag,
        twap_half_life = config.aggregation.twap_half_life,
        twap_max_gap = config.aggregation.twap_max_gap,
        outbound_capacity = config.queues.outbound_capacity,
        commit_capacity = config.queues.commit_capacity,
        sched_interval_ms = config.queues.sched_interval.map(|d| d.as_millis()),
        "Tuning"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
