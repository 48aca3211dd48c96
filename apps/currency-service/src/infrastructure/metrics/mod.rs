//! Prometheus Metrics Module
//!
//! Exposes service metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Rates**: Simulation ticks and the current snapshot sequence
//! - **Lookups**: Unary `GetRate` calls by outcome
//! - **Pushes**: Streamed updates sent and dropped
//! - **Subscriptions**: Connected subscribers and registered pairs
//! - **Latency**: Duration of one broadcast pass
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Safe to call more than once; later calls return the first handle.
///
/// # Errors
///
/// Returns `BuildError` if another global recorder was installed first.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Rate table
    describe_counter!(
        "currency_service_rate_ticks_total",
        "Total simulated rate changes applied to the table"
    );
    describe_gauge!(
        "currency_service_rate_sequence",
        "Sequence number of the current rate snapshot"
    );
    describe_counter!(
        "currency_service_snapshot_loads_total",
        "Initial snapshot loads by resulting table origin"
    );
    describe_counter!(
        "currency_service_signals_lagged_total",
        "Rate change signals skipped by a lagging receiver"
    );

    // Lookups
    describe_counter!(
        "currency_service_lookups_total",
        "Unary rate lookups by outcome"
    );

    // Pushes
    describe_counter!(
        "currency_service_pushes_sent_total",
        "Rate updates queued to streaming subscribers"
    );
    describe_counter!(
        "currency_service_pushes_dropped_total",
        "Rate updates not delivered, by reason"
    );

    // Subscriptions
    describe_gauge!(
        "currency_service_subscribers",
        "Number of streaming connections with registered pairs"
    );
    describe_gauge!(
        "currency_service_registered_pairs",
        "Total registered pairs across all connections"
    );

    // Latency
    describe_histogram!(
        "currency_service_broadcast_seconds",
        "Time to fan out one rate change to every subscriber"
    );
}

// =============================================================================
// Metric Labels
// =============================================================================

/// Outcome of a unary rate lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    /// Rate returned.
    Ok,
    /// Base and destination were equal.
    SameCurrency,
    /// A currency was unknown or missing from the table.
    NotFound,
}

impl LookupOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::SameCurrency => "same_currency",
            Self::NotFound => "not_found",
        }
    }
}

/// Why a push did not reach a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The subscriber's outbound buffer was full.
    BufferFull,
    /// The subscriber's outbound stream was already closed.
    Closed,
    /// The pair's rate could not be computed from the snapshot.
    RateUnavailable,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::BufferFull => "buffer_full",
            Self::Closed => "closed",
            Self::RateUnavailable => "rate_unavailable",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record one applied tick.
#[allow(clippy::cast_precision_loss)]
pub fn record_tick(sequence: u64) {
    counter!("currency_service_rate_ticks_total").increment(1);
    gauge!("currency_service_rate_sequence").set(sequence as f64);
}

/// Record how the table was initialized (`live` or `degraded`).
pub fn record_snapshot_load(origin: &'static str) {
    counter!(
        "currency_service_snapshot_loads_total",
        "origin" => origin
    )
    .increment(1);
}

/// Record signals a receiver skipped because it fell behind.
pub fn record_signals_lagged(count: u64) {
    counter!("currency_service_signals_lagged_total").increment(count);
}

/// Record a unary lookup.
pub fn record_lookup(outcome: LookupOutcome) {
    counter!(
        "currency_service_lookups_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record pushes queued to subscribers.
pub fn record_pushes_sent(count: u64) {
    counter!("currency_service_pushes_sent_total").increment(count);
}

/// Record pushes that were not delivered.
pub fn record_pushes_dropped(reason: DropReason, count: u64) {
    counter!(
        "currency_service_pushes_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(count);
}

/// Update the subscription gauges.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(connections: usize, pairs: usize) {
    gauge!("currency_service_subscribers").set(connections as f64);
    gauge!("currency_service_registered_pairs").set(pairs as f64);
}

/// Record the duration of one broadcast pass.
pub fn record_broadcast_duration(duration: Duration) {
    histogram!("currency_service_broadcast_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_outcome_as_str() {
        assert_eq!(LookupOutcome::Ok.as_str(), "ok");
        assert_eq!(LookupOutcome::SameCurrency.as_str(), "same_currency");
        assert_eq!(LookupOutcome::NotFound.as_str(), "not_found");
    }

    #[test]
    fn drop_reason_as_str() {
        assert_eq!(DropReason::BufferFull.as_str(), "buffer_full");
        assert_eq!(DropReason::Closed.as_str(), "closed");
        assert_eq!(DropReason::RateUnavailable.as_str(), "rate_unavailable");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_tick(1);
        record_signals_lagged(2);
        record_lookup(LookupOutcome::Ok);
        record_pushes_sent(3);
        record_pushes_dropped(DropReason::Closed, 1);
        set_subscriptions(2, 5);
        record_broadcast_duration(Duration::from_millis(1));
    }
}
