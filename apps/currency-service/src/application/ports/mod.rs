//! Port Interfaces
//!
//! Contracts the application layer needs from the outside world, following
//! the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `RateSnapshotSource`: where the initial reference rates come from
//! - `RateChangePublisher`: where rate change signals are announced

use async_trait::async_trait;

use crate::domain::rates::{RateChangeSignal, SnapshotEntry};

/// Failure to obtain a reference rate snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    /// The source could not be reached or answered with a failure status.
    ///
    /// Startup continues with a degraded table.
    #[error("rate snapshot unavailable: {0}")]
    Unavailable(String),

    /// The source answered but the document could not be understood.
    #[error("rate snapshot malformed: {0}")]
    Malformed(String),
}

/// Provider of the reference rate snapshot loaded at startup.
///
/// Entries are returned raw; codes outside the supported set and parsing
/// of the rate strings are the rate table's concern.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateSnapshotSource: Send + Sync {
    /// Fetch the current list of `(currency, rate)` entries.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Unavailable`] on network failure or a
    /// non-success response, and [`SnapshotError::Malformed`] when the
    /// payload cannot be decoded.
    async fn fetch_snapshot(&self) -> Result<Vec<SnapshotEntry>, SnapshotError>;
}

/// Fan-out point for rate change signals.
///
/// Publishing never blocks and never fails; a signal with no listeners is
/// simply discarded.
#[cfg_attr(test, mockall::automock)]
pub trait RateChangePublisher: Send + Sync {
    /// Announce a change and return how many listeners received it.
    fn publish(&self, signal: RateChangeSignal) -> usize;
}
