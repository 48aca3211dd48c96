//! Domain Layer - Core exchange-rate types and business logic.
//!
//! This layer contains the rate table, currency identifiers and the
//! subscription registry. Nothing here knows about gRPC or HTTP.

/// Currency codes and currency pairs.
pub mod currency;

/// Rate table, immutable snapshots and simulated drift.
pub mod rates;

/// Per-connection subscription tracking.
pub mod subscription;
