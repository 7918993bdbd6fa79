//! Counter Store
//!
//! Storage for per-organizer window counters. The [`CounterStore`] trait is
//! the seam a distributed backend (atomic increment-and-expire in a shared
//! key-value store) would implement; [`MemoryCounterStore`] keeps counters in
//! a sharded in-process map and does not survive restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::plan::ThrottleWindow;

/// Key for identifying a counter
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RateLimitKey {
    /// Organizer the requests are attributed to
    pub organizer_id: String,

    /// Window class
    pub window: ThrottleWindow,
}

impl RateLimitKey {
    /// Create a new counter key
    pub fn new(organizer_id: impl Into<String>, window: ThrottleWindow) -> Self {
        Self {
            organizer_id: organizer_id.into(),
            window,
        }
    }

    pub fn minute(organizer_id: &str) -> Self {
        Self::new(organizer_id, ThrottleWindow::Minute)
    }

    pub fn hour(organizer_id: &str) -> Self {
        Self::new(organizer_id, ThrottleWindow::Hour)
    }

    pub fn day(organizer_id: &str) -> Self {
        Self::new(organizer_id, ThrottleWindow::Day)
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.organizer_id, self.window)
    }
}

/// Requests counted in the current window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitCounter {
    pub count: u64,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitCounter {
    /// Empty counter for a window opening at `now`
    pub fn fresh(now: DateTime<Utc>, window: ThrottleWindow) -> Self {
        Self {
            count: 0,
            reset_at: now + window.duration(),
        }
    }

    /// Whether the window has closed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_at
    }
}

/// Result of an atomic check-and-increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeOutcome {
    /// Whether the request fit in the window
    pub allowed: bool,

    /// Counter state after the operation
    pub counter: RateLimitCounter,
}

/// Counter store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend could not be reached
    #[error("Counter backend unavailable: {0}")]
    Unavailable(String),
}

/// Storage for window counters
///
/// Implementations must make [`CounterStore::try_consume`] atomic per key and
/// must treat expired counters as absent on every access.
#[async_trait]
pub trait CounterStore: Send + Sync + fmt::Debug {
    /// Live counter for a key, `None` when absent or expired
    async fn get(
        &self,
        key: &RateLimitKey,
        now: DateTime<Utc>,
    ) -> Result<Option<RateLimitCounter>, StoreError>;

    /// Add one request, opening a new window when absent or expired
    async fn increment(
        &self,
        key: &RateLimitKey,
        now: DateTime<Utc>,
    ) -> Result<RateLimitCounter, StoreError>;

    /// Add one request only if the counter is below `limit`
    async fn try_consume(
        &self,
        key: &RateLimitKey,
        limit: u64,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome, StoreError>;

    /// Remove every counter with `reset_at <= now`, returning how many went
    async fn cleanup(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Number of stored counters, expired ones included
    async fn len(&self) -> Result<usize, StoreError>;

    /// Copy of every live counter
    async fn snapshot(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(RateLimitKey, RateLimitCounter)>, StoreError>;
}

/// In-memory counter store
#[derive(Debug, Clone, Default)]
pub struct MemoryCounterStore {
    counters: Arc<DashMap<RateLimitKey, RateLimitCounter>>,
}

impl MemoryCounterStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a counter as-is, replacing any existing one
    pub fn seed(&self, key: RateLimitKey, counter: RateLimitCounter) {
        self.counters.insert(key, counter);
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(
        &self,
        key: &RateLimitKey,
        now: DateTime<Utc>,
    ) -> Result<Option<RateLimitCounter>, StoreError> {
        Ok(self
            .counters
            .get(key)
            .map(|entry| *entry.value())
            .filter(|counter| !counter.is_expired(now)))
    }

    async fn increment(
        &self,
        key: &RateLimitKey,
        now: DateTime<Utc>,
    ) -> Result<RateLimitCounter, StoreError> {
        // The entry guard holds the shard lock until it drops
        let mut entry = self
            .counters
            .entry(key.clone())
            .or_insert_with(|| RateLimitCounter::fresh(now, key.window));

        if entry.is_expired(now) {
            *entry = RateLimitCounter::fresh(now, key.window);
        }
        entry.count += 1;

        Ok(*entry)
    }

    async fn try_consume(
        &self,
        key: &RateLimitKey,
        limit: u64,
        now: DateTime<Utc>,
    ) -> Result<ConsumeOutcome, StoreError> {
        let outcome = match self.counters.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let counter = occupied.get_mut();
                if counter.is_expired(now) {
                    *counter = RateLimitCounter::fresh(now, key.window);
                }

                let allowed = counter.count < limit;
                if allowed {
                    counter.count += 1;
                }
                ConsumeOutcome {
                    allowed,
                    counter: *counter,
                }
            }
            Entry::Vacant(vacant) => {
                let mut counter = RateLimitCounter::fresh(now, key.window);
                let allowed = limit > 0;
                if allowed {
                    counter.count = 1;
                    vacant.insert(counter);
                }
                ConsumeOutcome { allowed, counter }
            }
        };

        Ok(outcome)
    }

    async fn cleanup(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut removed = 0;
        self.counters.retain(|_, counter| {
            let keep = !counter.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.counters.len())
    }

    async fn snapshot(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(RateLimitKey, RateLimitCounter)>, StoreError> {
        Ok(self
            .counters
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect())
    }
}
