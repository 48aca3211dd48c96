//! Rate Table
//!
//! Holds the value of every known currency relative to the reference
//! currency and derives pairwise conversion rates from it.
//!
//! # Design
//!
//! The table never mutates a map in place. Each simulation tick builds a
//! new [`RateSnapshot`] from the current one and swaps it in under the
//! write lock, so a reader always sees one complete snapshot:
//!
//! - `rate()` can never observe a half-updated table
//! - a broadcast pass that holds an `Arc<RateSnapshot>` computes every
//!   pair from the same post-tick values
//!
//! The reference currency is pinned to exactly 1 and is skipped by the
//! drift simulation. Drifted values stay within a fixed band so pairwise
//! rates remain finite however long the service runs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;

use crate::domain::currency::CurrencyCode;

/// Largest relative change a single tick applies to one currency.
const MAX_DRIFT: f64 = 0.1;

/// Band drifted values are held in, keeping every pairwise rate finite.
const MIN_DRIFTED_VALUE: f64 = 1e-6;
const MAX_DRIFTED_VALUE: f64 = 1e9;

// =============================================================================
// Errors
// =============================================================================

/// Rate table errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateError {
    /// The currency has no entry in the table.
    #[error("rate not found for {0}")]
    CurrencyNotFound(CurrencyCode),

    /// The initial snapshot could not be turned into a table.
    #[error("malformed rate snapshot: {0}")]
    MalformedSnapshot(String),
}

// =============================================================================
// Snapshot Input
// =============================================================================

/// One `(currency, rate)` row as delivered by an external snapshot feed.
///
/// Both fields are raw text; validation happens when the table is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    /// Currency code as published by the feed.
    pub currency: String,
    /// Value relative to the reference currency, as text.
    pub rate: String,
}

impl SnapshotEntry {
    /// Create a new entry.
    #[must_use]
    pub fn new(currency: impl Into<String>, rate: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
            rate: rate.into(),
        }
    }
}

/// Where the table's starting values came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableOrigin {
    /// Populated from a live snapshot.
    Live,
    /// The snapshot source was unreachable; only the reference currency is known.
    Degraded {
        /// Why the live snapshot could not be fetched.
        reason: String,
    },
}

impl TableOrigin {
    /// Check if the table started without live data.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    /// Get the origin name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Degraded { .. } => "degraded",
        }
    }
}

// =============================================================================
// Rate Snapshot
// =============================================================================

/// An immutable view of the table at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct RateSnapshot {
    sequence: u64,
    rates: HashMap<CurrencyCode, f64>,
}

impl RateSnapshot {
    fn reference_only() -> Self {
        Self {
            sequence: 0,
            rates: HashMap::from([(CurrencyCode::REFERENCE, 1.0)]),
        }
    }

    /// Number of ticks applied before this snapshot was taken (0 = initial).
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Get the value of a currency relative to the reference currency.
    #[must_use]
    pub fn value(&self, code: CurrencyCode) -> Option<f64> {
        self.rates.get(&code).copied()
    }

    /// Conversion rate from `base` to `destination`.
    ///
    /// Returns 1.0 when both are the same currency; rejecting self-pairs is
    /// the caller's decision.
    ///
    /// # Errors
    ///
    /// Returns [`RateError::CurrencyNotFound`] if either currency is absent.
    pub fn rate(&self, base: CurrencyCode, destination: CurrencyCode) -> Result<f64, RateError> {
        let base_value = self
            .value(base)
            .ok_or(RateError::CurrencyNotFound(base))?;
        let destination_value = self
            .value(destination)
            .ok_or(RateError::CurrencyNotFound(destination))?;

        Ok(destination_value / base_value)
    }

    /// Currencies present in this snapshot, in code order.
    #[must_use]
    pub fn currencies(&self) -> Vec<CurrencyCode> {
        let mut codes: Vec<_> = self.rates.keys().copied().collect();
        codes.sort_unstable();
        codes
    }

    /// Number of currencies in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rates.len()
    }

    /// Check if the snapshot holds no currencies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    fn drifted<R: Rng + ?Sized>(&self, rng: &mut R) -> Self {
        let rates = self
            .rates
            .iter()
            .map(|(&code, &value)| {
                if code.is_reference() {
                    (code, 1.0)
                } else {
                    let drifted = value * drift_multiplier(rng);
                    (code, drifted.clamp(MIN_DRIFTED_VALUE, MAX_DRIFTED_VALUE))
                }
            })
            .collect();

        Self {
            sequence: self.sequence + 1,
            rates,
        }
    }
}

/// Draw a magnitude in `[0, MAX_DRIFT)`, then move down or up by it with
/// equal probability.
fn drift_multiplier<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let magnitude = rng.random::<f64>() * MAX_DRIFT;
    if rng.random_bool(0.5) {
        1.0 - magnitude
    } else {
        1.0 + magnitude
    }
}

// =============================================================================
// Rate Table
// =============================================================================

/// Process-wide table of currency values.
///
/// # Example
///
/// ```rust
/// use currency_service::domain::currency::CurrencyCode;
/// use currency_service::domain::rates::RateTable;
///
/// let table = RateTable::from_rates([
///     (CurrencyCode::Usd, 1.1),
///     (CurrencyCode::Gbp, 0.85),
/// ])
/// .unwrap();
///
/// let rate = table.rate(CurrencyCode::Eur, CurrencyCode::Usd).unwrap();
/// assert!((rate - 1.1).abs() < 1e-12);
/// ```
#[derive(Debug)]
pub struct RateTable {
    current: RwLock<Arc<RateSnapshot>>,
    origin: TableOrigin,
}

impl RateTable {
    /// Build a live table from known values.
    ///
    /// The reference currency is always set to 1, whatever was supplied.
    ///
    /// # Errors
    ///
    /// Returns [`RateError::MalformedSnapshot`] for a non-finite or
    /// non-positive value.
    pub fn from_rates(
        rates: impl IntoIterator<Item = (CurrencyCode, f64)>,
    ) -> Result<Self, RateError> {
        let mut snapshot = RateSnapshot::reference_only();

        for (code, value) in rates {
            if code.is_reference() {
                continue;
            }
            if !value.is_finite() || value <= 0.0 {
                return Err(RateError::MalformedSnapshot(format!(
                    "rate for {code} must be positive, got {value}"
                )));
            }
            snapshot.rates.insert(code, value);
        }

        Ok(Self::with_snapshot(snapshot, TableOrigin::Live))
    }

    /// Build a live table from raw feed rows.
    ///
    /// Rows for currencies outside the supported set are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RateError::MalformedSnapshot`] if a rate is not a
    /// positive number.
    pub fn from_snapshot(entries: &[SnapshotEntry]) -> Result<Self, RateError> {
        let mut rates = Vec::with_capacity(entries.len());

        for entry in entries {
            let Ok(code) = entry.currency.parse::<CurrencyCode>() else {
                tracing::debug!(currency = %entry.currency, "Skipping unsupported currency");
                continue;
            };

            let value = entry.rate.trim().parse::<f64>().map_err(|e| {
                RateError::MalformedSnapshot(format!(
                    "rate {:?} for {code} is not a number: {e}",
                    entry.rate
                ))
            })?;

            rates.push((code, value));
        }

        Self::from_rates(rates)
    }

    /// Build a table holding only the reference currency.
    #[must_use]
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self::with_snapshot(
            RateSnapshot::reference_only(),
            TableOrigin::Degraded {
                reason: reason.into(),
            },
        )
    }

    fn with_snapshot(snapshot: RateSnapshot, origin: TableOrigin) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            origin,
        }
    }

    /// Where the starting values came from.
    #[must_use]
    pub const fn origin(&self) -> &TableOrigin {
        &self.origin
    }

    /// Get the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RateSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Conversion rate from `base` to `destination` in the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`RateError::CurrencyNotFound`] if either currency is absent.
    pub fn rate(&self, base: CurrencyCode, destination: CurrencyCode) -> Result<f64, RateError> {
        self.snapshot().rate(base, destination)
    }

    /// Apply one drift pass using the thread-local RNG.
    pub fn simulate_tick(&self) -> Arc<RateSnapshot> {
        self.simulate_tick_with(&mut rand::rng())
    }

    /// Apply one drift pass and return the new snapshot.
    ///
    /// The whole pass runs under the write lock, so concurrent ticks are
    /// serialized and readers see either the old or the new snapshot.
    pub fn simulate_tick_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Arc<RateSnapshot> {
        let mut current = self.current.write();
        let next = Arc::new(current.drifted(rng));
        *current = Arc::clone(&next);
        next
    }
}

// =============================================================================
// Rate Change Signal
// =============================================================================

/// Notification that the table has changed.
///
/// Carries the post-tick snapshot so every consumer of one signal computes
/// rates from the same values, even if another tick lands meanwhile.
#[derive(Debug, Clone)]
pub struct RateChangeSignal {
    /// Snapshot produced by the tick.
    pub snapshot: Arc<RateSnapshot>,
}

impl RateChangeSignal {
    /// Create a signal for a freshly swapped-in snapshot.
    #[must_use]
    pub const fn new(snapshot: Arc<RateSnapshot>) -> Self {
        Self { snapshot }
    }

    /// Sequence number of the carried snapshot.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.snapshot.sequence()
    }
}

// =============================================================================
// Tests
// =============================================================================
