//! Currency Service Binary
//!
//! Starts the exchange rate server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin currency-service
//! ```
//!
//! # Environment Variables
//!
//! - `CURRENCY_GRPC_PORT`: gRPC server port (default: 9092)
//! - `CURRENCY_HEALTH_PORT`: Health check HTTP port (default: 8092)
//! - `RATE_SNAPSHOT_URL`: Reference rate XML feed (default: ECB daily rates)
//! - `RATE_SNAPSHOT_TIMEOUT_SECS`: Snapshot request timeout (default: 10)
//! - `RATE_UPDATE_INTERVAL_SECS`: Seconds between rate ticks (default: 5)
//! - `RATE_SIGNAL_CAPACITY`: Rate change signals buffered (default: 16)
//! - `SUBSCRIBER_BUFFER_CAPACITY`: Updates buffered per stream (default: 64)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: currency-service)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use currency_service::application::ports::RateChangePublisher;
use currency_service::infrastructure::grpc::proto::currency_service_server::CurrencyServiceServer;
use currency_service::infrastructure::telemetry;
use currency_service::{
    BroadcastConfig, CurrencyServer, CurrencyServerConfig, EcbClient, HealthServer,
    HealthServerState, RateMonitor, RateUpdateHub, ServiceConfig, init_metrics,
    initialize_rate_table,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Err only means another provider was installed first
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Currency Service");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics()?;

    let config = ServiceConfig::from_env()?;
    log_config(&config);

    // Load the startup snapshot; an unreachable feed degrades, a bad one aborts
    let snapshot_client =
        EcbClient::new(&config.rates.snapshot_url, config.rates.snapshot_timeout)?;
    let table = Arc::new(initialize_rate_table(&snapshot_client).await?);

    let shutdown_token = CancellationToken::new();

    // Initialize broadcast hub for rate change signals
    let update_hub = Arc::new(RateUpdateHub::new(BroadcastConfig::from(&config.streaming)));

    // Initialize gRPC server
    let grpc_server_config = CurrencyServerConfig {
        version: env!("CARGO_PKG_VERSION").to_string(),
        subscriber_buffer: config.streaming.subscriber_buffer,
    };
    let grpc_server = Arc::new(CurrencyServer::new(
        grpc_server_config,
        Arc::clone(&table),
        shutdown_token.clone(),
    ));

    // Subscribe before the monitor starts so no signal is missed
    let update_loop = grpc_server.spawn_update_loop(update_hub.subscribe());

    let publisher: Arc<dyn RateChangePublisher> = update_hub;
    let monitor = RateMonitor::new(Arc::clone(&table), publisher, config.rates.update_interval)
        .spawn(shutdown_token.clone());

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(Arc::clone(&grpc_server)));
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

    tokio::spawn(await_shutdown(shutdown_token.clone()));

    // Run gRPC server until shutdown
    let grpc_addr: SocketAddr = format!("0.0.0.0:{}", config.server.grpc_port).parse()?;
    tracing::info!(addr = %grpc_addr, "gRPC server listening");
    tracing::info!("Currency service ready");

    let served = Server::builder()
        .add_service(CurrencyServiceServer::from_arc(grpc_server))
        .serve_with_shutdown(grpc_addr, shutdown_token.cancelled())
        .await;

    // A serve error must still stop the background tasks
    shutdown_token.cancel();
    tracing::info!("gRPC server stopped");

    let drained =
        tokio::time::timeout(SHUTDOWN_TIMEOUT, futures::future::join(monitor, update_loop)).await;
    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Background tasks did not stop in time"
        );
    }

    served?;

    tracing::info!("Currency service stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ServiceConfig) {
    tracing::info!(
        grpc_port = config.server.grpc_port,
        health_port = config.server.health_port,
        update_interval_ms = config.rates.update_interval.as_millis(),
        subscriber_buffer = config.streaming.subscriber_buffer,
        "Configuration loaded"
    );
    tracing::debug!(
        snapshot_url = %config.rates.snapshot_url,
        snapshot_timeout_secs = config.rates.snapshot_timeout.as_secs(),
        "Rate snapshot source"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
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
        () = shutdown_token.cancelled() => return,
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
