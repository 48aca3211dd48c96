//! Subscription Registry
//!
//! Tracks, for every open streaming connection, the currency pairs it wants
//! pushed on each rate change.
//!
//! # Design
//!
//! - Entries are created lazily on a connection's first registration
//! - Pairs are append-only and keep insertion order; duplicates and
//!   self-pairs are accepted as-is
//! - The whole entry is dropped when the connection's read-loop ends
//!
//! The registry is generic over the outbound handle `S` so the domain does
//! not depend on the transport. Registration and removal take the write
//! lock; iteration takes the read lock, so a broadcast pass never sees a
//! half-written entry.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::domain::currency::RatePair;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for one streaming connection.
pub type ConnectionId = u64;

/// A consistent copy of one registry entry.
#[derive(Debug, Clone)]
pub struct Subscriber<S> {
    /// Connection the entry belongs to.
    pub connection: ConnectionId,
    /// Handle used to push updates to the connection.
    pub outbound: S,
    /// Registered pairs in registration order.
    pub pairs: Vec<RatePair>,
}

#[derive(Debug)]
struct Entry<S> {
    outbound: S,
    pairs: Vec<RatePair>,
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of connections with at least one registered pair.
    pub connection_count: usize,
    /// Total registered pairs across all connections, duplicates included.
    pub pair_count: usize,
}

// =============================================================================
// Registry
// =============================================================================

/// Thread-safe map from connection to its registered pairs.
///
/// # Example
///
/// ```rust
/// use currency_service::domain::currency::{CurrencyCode, RatePair};
/// use currency_service::domain::subscription::SubscriptionRegistry;
///
/// let registry: SubscriptionRegistry<&'static str> = SubscriptionRegistry::new();
/// let pair = RatePair::new(CurrencyCode::Eur, CurrencyCode::Usd);
///
/// registry.register(1, &"outbound-1", pair);
/// registry.register(1, &"outbound-1", pair);
/// assert_eq!(registry.pairs(1), vec![pair, pair]);
///
/// assert_eq!(registry.remove(1), Some(2));
/// assert!(registry.pairs(1).is_empty());
/// ```
#[derive(Debug)]
pub struct SubscriptionRegistry<S> {
    entries: RwLock<HashMap<ConnectionId, Entry<S>>>,
}

impl<S> Default for SubscriptionRegistry<S> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<S: Clone> SubscriptionRegistry<S> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pair to a connection's entry, creating the entry if needed.
    ///
    /// Returns the number of pairs now registered for the connection.
    pub fn register(&self, connection: ConnectionId, outbound: &S, pair: RatePair) -> usize {
        let mut entries = self.entries.write();
        let entry = entries.entry(connection).or_insert_with(|| Entry {
            outbound: outbound.clone(),
            pairs: Vec::new(),
        });
        entry.pairs.push(pair);
        entry.pairs.len()
    }

    /// Visit every entry under a single read lock.
    ///
    /// The visitor must not block; use [`entries`](Self::entries) when the
    /// work per entry can suspend.
    pub fn for_each(&self, mut visit: impl FnMut(ConnectionId, &S, &[RatePair])) {
        for (connection, entry) in self.entries.read().iter() {
            visit(*connection, &entry.outbound, &entry.pairs);
        }
    }

    /// Copy every entry out of the registry.
    #[must_use]
    pub fn entries(&self) -> Vec<Subscriber<S>> {
        let mut out = Vec::new();
        self.for_each(|connection, outbound, pairs| {
            out.push(Subscriber {
                connection,
                outbound: outbound.clone(),
                pairs: pairs.to_vec(),
            });
        });
        out
    }

    /// Get the pairs registered for a connection.
    #[must_use]
    pub fn pairs(&self, connection: ConnectionId) -> Vec<RatePair> {
        self.entries
            .read()
            .get(&connection)
            .map(|e| e.pairs.clone())
            .unwrap_or_default()
    }

    /// Check whether a connection has an entry.
    #[must_use]
    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.entries.read().contains_key(&connection)
    }

    /// Drop all state for a connection.
    ///
    /// Returns how many pairs were registered, or `None` if the connection
    /// never registered anything.
    pub fn remove(&self, connection: ConnectionId) -> Option<usize> {
        self.entries
            .write()
            .remove(&connection)
            .map(|e| e.pairs.len())
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let entries = self.entries.read();
        RegistryStats {
            connection_count: entries.len(),
            pair_count: entries.values().map(|e| e.pairs.len()).sum(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
