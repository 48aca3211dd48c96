//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (snapshot feed, change fan-out).
pub mod ports;

/// Application services for table initialization and rate monitoring.
pub mod services;
