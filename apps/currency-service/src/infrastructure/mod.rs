//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// gRPC rate server: unary lookups and streaming subscriptions.
pub mod grpc;

/// Broadcast channel carrying rate change signals.
pub mod broadcast;

/// Configuration loaded from the environment.
pub mod config;

/// ECB reference rate client for the startup snapshot.
pub mod ecb;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
