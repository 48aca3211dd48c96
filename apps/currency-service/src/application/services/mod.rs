//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `initialize_rate_table`: Loads the startup snapshot into a table
//! - `RateMonitor`: Drives the periodic rate simulation and announces changes

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::ports::{RateChangePublisher, RateSnapshotSource, SnapshotError};
use crate::domain::rates::{RateChangeSignal, RateError, RateTable};
use crate::infrastructure::metrics;

// =============================================================================
// Table Initialization
// =============================================================================

/// Build the rate table from the snapshot source.
///
/// An unreachable source is not fatal: the table starts degraded, holding
/// only the reference currency, and the condition is logged.
///
/// # Errors
///
/// Returns [`RateError::MalformedSnapshot`] if the source answered with a
/// payload that cannot be turned into a table.
pub async fn initialize_rate_table(source: &dyn RateSnapshotSource) -> Result<RateTable, RateError> {
    match source.fetch_snapshot().await {
        Ok(entries) => {
            let table = RateTable::from_snapshot(&entries)?;
            info!(
                entries = entries.len(),
                currencies = table.snapshot().len(),
                "Rate table loaded from snapshot"
            );
            metrics::record_snapshot_load(table.origin().as_str());
            Ok(table)
        }
        Err(SnapshotError::Unavailable(reason)) => {
            warn!(
                reason = %reason,
                "Rate snapshot unavailable, starting with reference currency only"
            );
            let table = RateTable::degraded(reason);
            metrics::record_snapshot_load(table.origin().as_str());
            Ok(table)
        }
        Err(SnapshotError::Malformed(detail)) => Err(RateError::MalformedSnapshot(detail)),
    }
}

// =============================================================================
// Rate Monitor
// =============================================================================

/// Periodically perturbs the rate table and announces every change.
pub struct RateMonitor {
    table: Arc<RateTable>,
    publisher: Arc<dyn RateChangePublisher>,
    interval: Duration,
}

impl std::fmt::Debug for RateMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateMonitor")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl RateMonitor {
    /// Create a new monitor.
    #[must_use]
    pub fn new(
        table: Arc<RateTable>,
        publisher: Arc<dyn RateChangePublisher>,
        interval: Duration,
    ) -> Self {
        Self {
            table,
            publisher,
            interval,
        }
    }

    /// Apply one tick and publish the resulting snapshot.
    pub fn tick_once(&self) -> RateChangeSignal {
        let snapshot = self.table.simulate_tick();
        let sequence = snapshot.sequence();
        metrics::record_tick(sequence);

        let signal = RateChangeSignal::new(snapshot);
        let receivers = self.publisher.publish(signal.clone());
        debug!(sequence, receivers, "Rate change published");

        signal
    }

    /// Tick every interval until cancelled.
    ///
    /// The first tick happens one interval after start. A tick that runs
    /// late pushes the following ones back rather than bursting. An interval
    /// that is zero or cannot be scheduled is logged and the monitor exits.
    pub async fn run(self, cancel: CancellationToken) {
        let start = Instant::now().checked_add(self.interval);
        let Some(start) = start.filter(|_| !self.interval.is_zero()) else {
            error!(
                interval_secs = self.interval.as_secs(),
                "Rate monitor interval cannot be scheduled, rates will not change"
            );
            return;
        };

        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_ms = self.interval.as_millis(), "Rate monitor started");

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick_once();
                }
            }
        }

        info!("Rate monitor stopped");
    }

    /// Run the monitor on its own task.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;
    use tokio::sync::mpsc;

    use super::*;
    use crate::application::ports::{MockRateChangePublisher, MockRateSnapshotSource};
    use crate::domain::currency::CurrencyCode;
    use crate::domain::rates::{SnapshotEntry, TableOrigin};

    fn scenario_table() -> Arc<RateTable> {
        Arc::new(
            RateTable::from_rates([(CurrencyCode::Usd, 1.1), (CurrencyCode::Gbp, 0.85)]).unwrap(),
        )
    }

    struct ChannelPublisher(mpsc::UnboundedSender<RateChangeSignal>);

    impl RateChangePublisher for ChannelPublisher {
        fn publish(&self, signal: RateChangeSignal) -> usize {
            usize::from(self.0.send(signal).is_ok())
        }
    }

    #[tokio::test]
    async fn initialize_from_live_snapshot() {
        let mut source = MockRateSnapshotSource::new();
        source.expect_fetch_snapshot().times(1).returning(|| {
            Ok(vec![
                SnapshotEntry::new("USD", "1.1"),
                SnapshotEntry::new("GBP", "0.85"),
                SnapshotEntry::new("XAU", "0.0005"),
            ])
        });

        let table = initialize_rate_table(&source).await.unwrap();

        assert_eq!(table.origin(), &TableOrigin::Live);
        assert_eq!(
            table.snapshot().currencies(),
            vec![CurrencyCode::Eur, CurrencyCode::Usd, CurrencyCode::Gbp]
        );
    }

    #[tokio::test]
    async fn initialize_degrades_when_source_unavailable() {
        let mut source = MockRateSnapshotSource::new();
        source
            .expect_fetch_snapshot()
            .returning(|| Err(SnapshotError::Unavailable("connection refused".to_string())));

        let table = initialize_rate_table(&source).await.unwrap();

        assert!(table.origin().is_degraded());
        assert_eq!(table.snapshot().currencies(), vec![CurrencyCode::Eur]);
        assert!(
            (table.rate(CurrencyCode::Eur, CurrencyCode::Eur).unwrap() - 1.0).abs() < f64::EPSILON
        );
    }

    #[tokio::test]
    async fn initialize_fails_on_malformed_document() {
        let mut source = MockRateSnapshotSource::new();
        source
            .expect_fetch_snapshot()
            .returning(|| Err(SnapshotError::Malformed("unexpected end of file".to_string())));

        let err = initialize_rate_table(&source).await.unwrap_err();

        assert_eq!(
            err,
            RateError::MalformedSnapshot("unexpected end of file".to_string())
        );
    }

    #[tokio::test]
    async fn initialize_fails_on_unparsable_rate() {
        let mut source = MockRateSnapshotSource::new();
        source
            .expect_fetch_snapshot()
            .returning(|| Ok(vec![SnapshotEntry::new("USD", "abc")]));

        let err = initialize_rate_table(&source).await.unwrap_err();

        assert!(matches!(err, RateError::MalformedSnapshot(_)));
    }

    #[test]
    fn tick_once_publishes_post_tick_snapshot() {
        let table = scenario_table();
        let mut publisher = MockRateChangePublisher::new();
        publisher
            .expect_publish()
            .withf(|signal| signal.sequence() == 1)
            .times(1)
            .returning(|_| 2);

        let monitor = RateMonitor::new(
            Arc::clone(&table),
            Arc::new(publisher),
            Duration::from_secs(5),
        );
        let signal = monitor.tick_once();

        assert_eq!(signal.sequence(), 1);
        assert_eq!(*signal.snapshot, *table.snapshot());
    }

    #[test]
    fn tick_once_publishes_even_without_listeners() {
        let mut publisher = MockRateChangePublisher::new();
        publisher.expect_publish().times(3).returning(|_| 0);

        let monitor = RateMonitor::new(
            scenario_table(),
            Arc::new(publisher),
            Duration::from_secs(5),
        );

        for expected in 1..=3 {
            assert_eq!(monitor.tick_once().sequence(), expected);
        }
    }

    #[test_case(Duration::MAX ; "interval past the clock range")]
    #[test_case(Duration::ZERO ; "zero interval")]
    #[tokio::test]
    async fn run_exits_on_unschedulable_interval(interval: Duration) {
        let mut publisher = MockRateChangePublisher::new();
        publisher.expect_publish().never();
        let table = scenario_table();

        let monitor = RateMonitor::new(Arc::clone(&table), Arc::new(publisher), interval);
        tokio::time::timeout(Duration::from_secs(2), monitor.run(CancellationToken::new()))
            .await
            .unwrap();

        assert_eq!(table.snapshot().sequence(), 0);
    }

    #[tokio::test]
    async fn run_ticks_until_cancelled() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let monitor = RateMonitor::new(
            scenario_table(),
            Arc::new(ChannelPublisher(tx)),
            Duration::from_millis(10),
        );
        let handle = monitor.spawn(cancel.clone());

        for expected in 1..=3 {
            let signal = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(signal.sequence(), expected);
        }

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
