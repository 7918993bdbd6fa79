//! Throttle Service
//!
//! Central entry point for per-organizer throttling decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use prometheus::IntGauge;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::plan::{PlanLimits, SubscriptionPlan, ThrottleWindow};
use super::store::{CounterStore, RateLimitCounter, RateLimitKey, StoreError};
use crate::clock::Clock;
use crate::metrics;

/// Throttle service errors
#[derive(Debug, thiserror::Error)]
pub enum ThrottleError {
    /// Counter store failure
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),
}

/// Quota state for one organizer in one window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleStatus {
    /// Whether a request may proceed
    pub allowed: bool,

    /// Requests allowed per window
    pub limit: u64,

    /// Requests left in the current window
    pub remaining: u64,

    /// When the current window closes
    pub reset_at: DateTime<Utc>,

    /// Window class
    pub window: ThrottleWindow,
}

impl ThrottleStatus {
    fn from_counter(
        allowed: bool,
        limit: u64,
        counter: &RateLimitCounter,
        window: ThrottleWindow,
    ) -> Self {
        Self {
            allowed,
            limit,
            remaining: limit.saturating_sub(counter.count),
            reset_at: counter.reset_at,
            window,
        }
    }

    /// Reset time as epoch seconds
    pub fn reset_epoch_secs(&self) -> i64 {
        self.reset_at.timestamp()
    }

    /// Whole seconds until the window resets, never less than one
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000).max(1)
    }
}

/// Per-organizer throttle service
#[derive(Debug, Clone)]
pub struct ThrottleService {
    /// Counter storage
    store: Arc<dyn CounterStore>,

    /// Plan x window limits
    limits: PlanLimits,

    /// Time source
    clock: Arc<dyn Clock>,

    /// Gauge tracking the store size
    active_counters: IntGauge,
}

impl ThrottleService {
    /// Create a new throttle service
    pub fn new(store: Arc<dyn CounterStore>, limits: PlanLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            limits,
            clock,
            active_counters: metrics::ACTIVE_COUNTERS.clone(),
        }
    }

    /// Limit for a plan within a window class
    pub fn limit_for(&self, plan: SubscriptionPlan, window: ThrottleWindow) -> u64 {
        self.limits.limit(plan, window)
    }

    /// Current quota state without consuming anything
    pub async fn check_throttle(
        &self,
        organizer_id: &str,
        plan: SubscriptionPlan,
        window: ThrottleWindow,
    ) -> Result<ThrottleStatus, ThrottleError> {
        let now = self.clock.now();
        let key = RateLimitKey::new(organizer_id, window);
        let limit = self.limit_for(plan, window);

        let counter = self
            .store
            .get(&key, now)
            .await?
            .unwrap_or_else(|| RateLimitCounter::fresh(now, window));

        Ok(ThrottleStatus::from_counter(
            counter.count < limit,
            limit,
            &counter,
            window,
        ))
    }

    /// Count one request against the window
    ///
    /// Pairs with [`ThrottleService::check_throttle`]; the pair is not atomic,
    /// so request paths should use [`ThrottleService::try_consume`].
    pub async fn increment_counter(
        &self,
        organizer_id: &str,
        window: ThrottleWindow,
    ) -> Result<RateLimitCounter, ThrottleError> {
        let key = RateLimitKey::new(organizer_id, window);
        let counter = self.store.increment(&key, self.clock.now()).await?;
        debug!("Counter {} now at {}", key, counter.count);
        Ok(counter)
    }

    /// Atomically check the quota and count the request if it fits
    pub async fn try_consume(
        &self,
        organizer_id: &str,
        plan: SubscriptionPlan,
        window: ThrottleWindow,
    ) -> Result<ThrottleStatus, ThrottleError> {
        let key = RateLimitKey::new(organizer_id, window);
        let limit = self.limit_for(plan, window);

        let outcome = self
            .store
            .try_consume(&key, limit, self.clock.now())
            .await?;

        // A count of one means this request opened the window
        if outcome.allowed && outcome.counter.count == 1 {
            self.refresh_active_counters().await;
        }

        Ok(ThrottleStatus::from_counter(
            outcome.allowed,
            limit,
            &outcome.counter,
            window,
        ))
    }

    /// Quota state for every window class
    pub async fn usage_for(
        &self,
        organizer_id: &str,
        plan: SubscriptionPlan,
    ) -> Result<Vec<ThrottleStatus>, ThrottleError> {
        let mut usage = Vec::with_capacity(ThrottleWindow::ALL.len());
        for window in ThrottleWindow::ALL {
            usage.push(self.check_throttle(organizer_id, plan, window).await?);
        }
        Ok(usage)
    }

    /// Drop every expired counter
    ///
    /// Store failures are logged and reported as zero removals.
    pub async fn cleanup(&self) -> usize {
        let now = self.clock.now();
        match self.store.cleanup(now).await {
            Ok(removed) => {
                metrics::COUNTERS_EVICTED_TOTAL.inc_by(removed as u64);
                self.refresh_active_counters().await;
                if removed > 0 {
                    debug!("Evicted {} expired counters", removed);
                }
                removed
            }
            Err(e) => {
                metrics::STORE_ERRORS_TOTAL.inc();
                error!("Counter cleanup failed: {}", e);
                0
            }
        }
    }

    async fn refresh_active_counters(&self) {
        if let Ok(active) = self.store.len().await {
            self.active_counters.set(active as i64);
        }
    }

    /// Run [`ThrottleService::cleanup`] on a fixed interval
    pub fn spawn_cleanup_task(&self, every: Duration) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            info!("Counter sweeper started (interval: {:?})", every);
            loop {
                interval.tick().await;
                service.cleanup().await;
            }
        })
    }

    /// Live counters, for the dashboard
    pub async fn snapshot(&self) -> Result<Vec<(RateLimitKey, RateLimitCounter)>, ThrottleError> {
        Ok(self.store.snapshot(self.clock.now()).await?)
    }

    /// Limit table in use
    pub fn limits(&self) -> &PlanLimits {
        &self.limits
    }

    /// Time source in use
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use crate::throttle::store::{ConsumeOutcome, MemoryCounterStore};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    fn service_with_clock() -> (ThrottleService, ManualClock) {
        let clock = ManualClock::default();
        let service = ThrottleService::new(
            Arc::new(MemoryCounterStore::new()),
            PlanLimits::default(),
            Arc::new(clock.clone()),
        );
        (service, clock)
    }

    #[tokio::test]
    async fn test_check_does_not_consume() {
        let (service, _) = service_with_clock();

        for _ in 0..10 {
            let status = service
                .check_throttle("org_1", SubscriptionPlan::Free, ThrottleWindow::Minute)
                .await
                .unwrap();
            assert!(status.allowed);
            assert_eq!(status.remaining, 5);
        }
    }

    #[tokio::test]
    async fn test_free_hourly_quota_exhausts_after_fifty() {
        let (service, _) = service_with_clock();
        let mut last_remaining = 50;

        for _ in 0..50 {
            let status = service
                .check_throttle("org_1", SubscriptionPlan::Free, ThrottleWindow::Hour)
                .await
                .unwrap();
            assert!(status.allowed);
            assert_eq!(status.remaining, last_remaining);

            service
                .increment_counter("org_1", ThrottleWindow::Hour)
                .await
                .unwrap();
            last_remaining -= 1;
        }

        let status = service
            .check_throttle("org_1", SubscriptionPlan::Free, ThrottleWindow::Hour)
            .await
            .unwrap();
        assert!(!status.allowed);
        assert_eq!(status.limit, 50);
        assert_eq!(status.remaining, 0);
    }

    #[tokio::test]
    async fn test_remaining_never_negative() {
        let (service, _) = service_with_clock();

        // Two-step protocol callers can overshoot the counter
        for _ in 0..8 {
            service
                .increment_counter("org_1", ThrottleWindow::Minute)
                .await
                .unwrap();
        }

        let status = service
            .check_throttle("org_1", SubscriptionPlan::Free, ThrottleWindow::Minute)
            .await
            .unwrap();
        assert!(!status.allowed);
        assert_eq!(status.remaining, 0);
    }

    #[tokio::test]
    async fn test_organizers_are_independent() {
        let (service, _) = service_with_clock();

        for _ in 0..5 {
            service
                .try_consume("org_a", SubscriptionPlan::Free, ThrottleWindow::Minute)
                .await
                .unwrap();
        }

        let a = service
            .check_throttle("org_a", SubscriptionPlan::Free, ThrottleWindow::Minute)
            .await
            .unwrap();
        let b = service
            .check_throttle("org_b", SubscriptionPlan::Free, ThrottleWindow::Minute)
            .await
            .unwrap();

        assert!(!a.allowed);
        assert!(b.allowed);
        assert_eq!(b.remaining, 5);
    }

    #[tokio::test]
    async fn test_window_reset_restores_quota() {
        let (service, clock) = service_with_clock();

        for _ in 0..5 {
            service
                .try_consume("org_1", SubscriptionPlan::Free, ThrottleWindow::Minute)
                .await
                .unwrap();
        }
        let denied = service
            .try_consume("org_1", SubscriptionPlan::Free, ThrottleWindow::Minute)
            .await
            .unwrap();
        assert!(!denied.allowed);

        clock.set(denied.reset_at);

        let status = service
            .try_consume("org_1", SubscriptionPlan::Free, ThrottleWindow::Minute)
            .await
            .unwrap();
        assert!(status.allowed);
        assert_eq!(status.remaining, 4);
    }

    #[tokio::test]
    async fn test_try_consume_remaining_sequence() {
        let (service, _) = service_with_clock();
        let mut seen = Vec::new();

        for _ in 0..5 {
            let status = service
                .try_consume("org_1", SubscriptionPlan::Free, ThrottleWindow::Minute)
                .await
                .unwrap();
            assert!(status.allowed);
            seen.push(status.remaining);
        }
        assert_eq!(seen, vec![4, 3, 2, 1, 0]);

        let status = service
            .try_consume("org_1", SubscriptionPlan::Free, ThrottleWindow::Minute)
            .await
            .unwrap();
        assert!(!status.allowed);
        assert_eq!(status.remaining, 0);
    }

    #[tokio::test]
    async fn test_retry_after_rounds_up() {
        let (service, clock) = service_with_clock();
        let status = service
            .try_consume("org_1", SubscriptionPlan::Free, ThrottleWindow::Minute)
            .await
            .unwrap();

        assert_eq!(status.retry_after_secs(clock.now()), 60);

        clock.advance(ChronoDuration::milliseconds(59_500));
        assert_eq!(status.retry_after_secs(clock.now()), 1);

        clock.advance(ChronoDuration::seconds(10));
        assert_eq!(status.retry_after_secs(clock.now()), 1);
    }

    #[tokio::test]
    async fn test_usage_for_covers_all_windows() {
        let (service, _) = service_with_clock();
        service
            .try_consume("org_1", SubscriptionPlan::Basic, ThrottleWindow::Hour)
            .await
            .unwrap();

        let usage = service
            .usage_for("org_1", SubscriptionPlan::Basic)
            .await
            .unwrap();
        assert_eq!(usage.len(), 3);

        let hour = usage
            .iter()
            .find(|s| s.window == ThrottleWindow::Hour)
            .unwrap();
        assert_eq!(hour.limit, 200);
        assert_eq!(hour.remaining, 199);
    }

    #[tokio::test]
    async fn test_cleanup_after_expiry() {
        let (service, clock) = service_with_clock();

        service
            .try_consume("org_1", SubscriptionPlan::Free, ThrottleWindow::Minute)
            .await
            .unwrap();
        service
            .try_consume("org_1", SubscriptionPlan::Free, ThrottleWindow::Day)
            .await
            .unwrap();

        clock.advance(ChronoDuration::minutes(2));
        assert_eq!(service.cleanup().await, 1);

        let snapshot = service.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0.window, ThrottleWindow::Day);
    }

    #[tokio::test]
    async fn test_active_counter_gauge_follows_store() {
        let (mut service, clock) = service_with_clock();
        service.active_counters = IntGauge::new("test_active_counters", "test").unwrap();

        service
            .try_consume("org_1", SubscriptionPlan::Free, ThrottleWindow::Minute)
            .await
            .unwrap();
        assert_eq!(service.active_counters.get(), 1);

        service
            .try_consume("org_1", SubscriptionPlan::Free, ThrottleWindow::Minute)
            .await
            .unwrap();
        service
            .try_consume("org_2", SubscriptionPlan::Free, ThrottleWindow::Minute)
            .await
            .unwrap();
        assert_eq!(service.active_counters.get(), 2);

        clock.advance(ChronoDuration::minutes(2));
        service.cleanup().await;
        assert_eq!(service.active_counters.get(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consumers_never_overshoot() {
        let (service, _) = service_with_clock();

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .try_consume("org_1", SubscriptionPlan::Free, ThrottleWindow::Minute)
                        .await
                        .unwrap()
                        .allowed
                })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        let allowed = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(allowed, 5);
    }

    #[derive(Debug)]
    struct BrokenStore;

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn get(
            &self,
            _key: &RateLimitKey,
            _now: DateTime<Utc>,
        ) -> Result<Option<RateLimitCounter>, StoreError> {
            Err(StoreError::Unavailable("offline".to_string()))
        }

        async fn increment(
            &self,
            _key: &RateLimitKey,
            _now: DateTime<Utc>,
        ) -> Result<RateLimitCounter, StoreError> {
            Err(StoreError::Unavailable("offline".to_string()))
        }

        async fn try_consume(
            &self,
            _key: &RateLimitKey,
            _limit: u64,
            _now: DateTime<Utc>,
        ) -> Result<ConsumeOutcome, StoreError> {
            Err(StoreError::Unavailable("offline".to_string()))
        }

        async fn cleanup(&self, _now: DateTime<Utc>) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("offline".to_string()))
        }

        async fn len(&self) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("offline".to_string()))
        }

        async fn snapshot(
            &self,
            _now: DateTime<Utc>,
        ) -> Result<Vec<(RateLimitKey, RateLimitCounter)>, StoreError> {
            Err(StoreError::Unavailable("offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_cleanup_swallows_store_errors() {
        let service = ThrottleService::new(
            Arc::new(BrokenStore),
            PlanLimits::default(),
            Arc::new(SystemClock),
        );

        assert_eq!(service.cleanup().await, 0);
        assert!(service
            .check_throttle("org_1", SubscriptionPlan::Free, ThrottleWindow::Minute)
            .await
            .is_err());
    }
}
