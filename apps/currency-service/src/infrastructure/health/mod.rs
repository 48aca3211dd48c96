//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, rate table status reporting, and
//! Prometheus metrics. Used by container orchestrators, load balancers, and
//! monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (not ready once shutdown begins)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::rates::TableOrigin;
use crate::infrastructure::grpc::CurrencyServer;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Rate table status.
    pub rates: RatesStatus,
    /// Subscription statistics.
    pub subscriptions: SubscriptionStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Serving rates from a live snapshot.
    Healthy,
    /// Serving, but the table started without live data.
    Degraded,
    /// Shutting down.
    Unhealthy,
}

/// Rate table status.
#[derive(Debug, Clone, Serialize)]
pub struct RatesStatus {
    /// Table origin: "live" or "degraded".
    pub origin: &'static str,
    /// Why the live snapshot was unavailable, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
    /// Number of currencies with a known value.
    pub currency_count: usize,
    /// Ticks applied since startup.
    pub sequence: u64,
}

/// Subscription statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    /// Streaming connections with at least one registered pair.
    pub connections: usize,
    /// Registered pairs across all connections.
    pub pairs: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    grpc_server: Arc<CurrencyServer>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub const fn new(grpc_server: Arc<CurrencyServer>) -> Self {
        Self { grpc_server }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");
        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError::ServerFailed` if the HTTP server fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), HealthServerError> {
        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state.grpc_server);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    // A degraded table still serves the reference currency
    if state.grpc_server.is_shutting_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(server: &CurrencyServer) -> HealthResponse {
    let table = server.table();
    let snapshot = table.snapshot();
    let stats = server.subscription_stats();

    let degraded_reason = match table.origin() {
        TableOrigin::Live => None,
        TableOrigin::Degraded { reason } => Some(reason.clone()),
    };

    HealthResponse {
        status: determine_health_status(table.origin(), server.is_shutting_down()),
        version: server.version().to_string(),
        uptime_secs: server.uptime().as_secs(),
        current_time: Utc::now(),
        rates: RatesStatus {
            origin: table.origin().as_str(),
            degraded_reason,
            currency_count: snapshot.len(),
            sequence: snapshot.sequence(),
        },
        subscriptions: SubscriptionStatus {
            connections: stats.connection_count,
            pairs: stats.pair_count,
        },
    }
}

const fn determine_health_status(origin: &TableOrigin, shutting_down: bool) -> HealthStatus {
    if shutting_down {
        HealthStatus::Unhealthy
    } else if origin.is_degraded() {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::currency::CurrencyCode;
    use crate::domain::rates::RateTable;
    use crate::infrastructure::grpc::CurrencyServerConfig;

    fn grpc_server(table: RateTable, cancel: CancellationToken) -> Arc<CurrencyServer> {
        Arc::new(CurrencyServer::new(
            CurrencyServerConfig::default(),
            Arc::new(table),
            cancel,
        ))
    }

    fn live_table() -> RateTable {
        RateTable::from_rates([(CurrencyCode::Usd, 1.1), (CurrencyCode::Gbp, 0.85)]).unwrap()
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn determine_status() {
        let degraded = TableOrigin::Degraded {
            reason: "timeout".to_string(),
        };

        assert_eq!(
            determine_health_status(&TableOrigin::Live, false),
            HealthStatus::Healthy
        );
        assert_eq!(
            determine_health_status(&degraded, false),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(&TableOrigin::Live, true),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn response_reports_table_and_subscriptions() {
        let server = grpc_server(live_table(), CancellationToken::new());
        server.table().simulate_tick();

        let response = build_health_response(&server);

        assert_eq!(response.status, HealthStatus::Healthy);
        assert_eq!(response.rates.origin, "live");
        assert_eq!(response.rates.currency_count, 3);
        assert_eq!(response.rates.sequence, 1);
        assert_eq!(response.subscriptions.connections, 0);

        let json = serde_json::to_value(&response).unwrap();
        assert!(json["rates"].get("degraded_reason").is_none());
    }

    #[test]
    fn response_reports_degraded_reason() {
        let server = grpc_server(
            RateTable::degraded("connection refused"),
            CancellationToken::new(),
        );

        let response = build_health_response(&server);

        assert_eq!(response.status, HealthStatus::Degraded);
        assert_eq!(
            response.rates.degraded_reason.as_deref(),
            Some("connection refused")
        );
        assert_eq!(response.rates.currency_count, 1);
    }

    #[tokio::test]
    async fn readiness_flips_on_shutdown() {
        let cancel = CancellationToken::new();
        let state = Arc::new(HealthServerState::new(grpc_server(
            live_table(),
            cancel.clone(),
        )));

        let ready = readiness_handler(State(Arc::clone(&state)))
            .await
            .into_response();
        assert_eq!(ready.status(), StatusCode::OK);

        cancel.cancel();
        let not_ready = readiness_handler(State(state)).await.into_response();
        assert_eq!(not_ready.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn serves_health_over_http() {
        let cancel = CancellationToken::new();
        let state = Arc::new(HealthServerState::new(grpc_server(
            live_table(),
            cancel.clone(),
        )));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = HealthServer::new(addr.port(), state, cancel.clone());
        let handle = tokio::spawn(server.serve(listener));

        let client = reqwest::Client::new();
        let text = client
            .get(format!("http://{addr}/health"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["rates"]["currency_count"], 3);

        let live = client
            .get(format!("http://{addr}/healthz"))
            .send()
            .await
            .unwrap();
        assert_eq!(live.status().as_u16(), 200);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
