//! gRPC Currency Server
//!
//! Implements the `currency.v1.CurrencyService` gRPC service.
//!
//! # Architecture
//!
//! `GetRate` reads the rate table directly and never touches subscription
//! state. `SubscribeRates` splits each connection into two activities:
//!
//! 1. A read-loop task appends every inbound pair to the registry
//! 2. The update loop, on every rate change signal, computes each
//!    registered pair from the signal's snapshot and queues it on the
//!    connection's bounded outbound channel
//!
//! When the read-loop ends (client end-of-stream, read error, or shutdown)
//! the connection is removed from the registry and its outbound stream
//! completes.

pub mod server;

// Allow clippy warnings and missing docs in generated code
#[allow(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/currency.v1.rs"));
}

pub use server::{BroadcastOutcome, CurrencyServer, CurrencyServerConfig};
