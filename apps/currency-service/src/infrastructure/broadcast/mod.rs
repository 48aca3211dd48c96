//! Broadcast Channel Adapter
//!
//! Distributes rate change signals using a tokio broadcast channel so the
//! rate monitor never waits on its consumers.
//!
//! # Architecture
//!
//! The `RateUpdateHub` has one channel. The monitor publishes into it after
//! every tick; the gRPC update loop (and anything else interested) holds a
//! receiver. A receiver that falls behind skips to the newest signal, which
//! is safe because each signal carries a complete snapshot.

use tokio::sync::broadcast;

use crate::application::ports::RateChangePublisher;
use crate::domain::rates::RateChangeSignal;
use crate::infrastructure::config::StreamingSettings;
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the broadcast channel.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Signals buffered per receiver before the oldest are overwritten.
    pub capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { capacity: 16 }
    }
}

impl From<&StreamingSettings> for BroadcastConfig {
    fn from(settings: &StreamingSettings) -> Self {
        Self {
            capacity: settings.signal_capacity,
        }
    }
}

// =============================================================================
// Hub
// =============================================================================

/// Fan-out hub for rate change signals.
///
/// # Example
///
/// ```rust
/// use currency_service::infrastructure::broadcast::{BroadcastConfig, RateUpdateHub};
///
/// let hub = RateUpdateHub::new(BroadcastConfig::default());
/// let _rx = hub.subscribe();
/// assert_eq!(hub.receiver_count(), 1);
/// ```
#[derive(Debug)]
pub struct RateUpdateHub {
    tx: broadcast::Sender<RateChangeSignal>,
}

impl RateUpdateHub {
    /// Create a new hub.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            tx: broadcast::channel(config.capacity).0,
        }
    }

    /// Create a new hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    /// Get a new receiver for rate change signals.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RateChangeSignal> {
        self.tx.subscribe()
    }

    /// Get the number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl RateChangePublisher for RateUpdateHub {
    fn publish(&self, signal: RateChangeSignal) -> usize {
        // No receivers yet is normal during startup.
        self.tx.send(signal).unwrap_or(0)
    }
}

/// Receive the next signal, skipping past any the receiver missed.
///
/// Returns `None` once the hub has been dropped.
pub async fn recv_latest(
    rx: &mut broadcast::Receiver<RateChangeSignal>,
) -> Option<RateChangeSignal> {
    loop {
        match rx.recv().await {
            Ok(signal) => return Some(signal),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Rate signal receiver lagged, skipping to newest");
                metrics::record_signals_lagged(skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
