#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Currency Service - Exchange Rate Server
//!
//! A gRPC service that answers conversion-rate lookups between currencies
//! and keeps subscribed clients up to date as rates drift.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core rate logic and data types
//!   - `currency`: Currency codes and pairs
//!   - `rates`: Rate table, snapshots and simulated drift
//!   - `subscription`: Per-connection pair registry
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Snapshot source and rate change publisher interfaces
//!   - `services`: Table initialization and the periodic rate monitor
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `ecb`: Reference rate snapshot over HTTP
//!   - `grpc`: gRPC rate server (unary and streaming)
//!   - `broadcast`: Rate change signal channel
//!   - `config`: Configuration from the environment
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! ECB snapshot ──► RateTable ◄── RateMonitor (tick every interval)
//!                     │                │
//!                 GetRate          RateChangeSignal
//!                     │                ▼
//!                     │         ┌─────────────┐     ┌─────────────┐
//!                     │         │  Broadcast  │────►│    gRPC     │──► Subscriber 1
//!                     │         │   Channel   │     │ update loop │──► Subscriber 2
//!                     ▼         └─────────────┘     └─────────────┘──► Subscriber N
//!                  Client
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core rate types with no transport dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::currency::{CurrencyCode, RatePair, UnknownCurrency};
pub use domain::rates::{
    RateChangeSignal, RateError, RateSnapshot, RateTable, SnapshotEntry, TableOrigin,
};
pub use domain::subscription::{ConnectionId, RegistryStats, Subscriber, SubscriptionRegistry};

// Application services
pub use application::ports::{RateChangePublisher, RateSnapshotSource, SnapshotError};
pub use application::services::{RateMonitor, initialize_rate_table};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, RateSettings, ServerSettings, ServiceConfig, StreamingSettings,
};

// Snapshot source
pub use infrastructure::ecb::EcbClient;

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Broadcast hub (for integration tests)
pub use infrastructure::broadcast::{BroadcastConfig, RateUpdateHub};

// gRPC server (for integration tests)
pub use infrastructure::grpc::{BroadcastOutcome, CurrencyServer, CurrencyServerConfig, proto};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
