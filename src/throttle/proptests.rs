//! Property-based tests for window counting

use proptest::prelude::*;
use std::sync::Arc;

use super::plan::{PlanLimits, SubscriptionPlan, ThrottleWindow, WindowLimits};
use super::service::ThrottleService;
use super::store::MemoryCounterStore;
use crate::clock::ManualClock;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn service(limit: u64, clock: ManualClock) -> ThrottleService {
    let limits = PlanLimits {
        free: WindowLimits::new(limit, limit, limit),
        ..PlanLimits::default()
    };
    ThrottleService::new(Arc::new(MemoryCounterStore::new()), limits, Arc::new(clock))
}

fn window_strategy() -> impl Strategy<Value = ThrottleWindow> {
    prop_oneof![
        Just(ThrottleWindow::Minute),
        Just(ThrottleWindow::Hour),
        Just(ThrottleWindow::Day),
    ]
}

proptest! {
    #[test]
    fn test_allowed_count_is_min_of_requests_and_limit(
        limit in 0u64..40,
        requests in 0usize..80,
        window in window_strategy(),
    ) {
        let allowed = runtime().block_on(async {
            let service = service(limit, ManualClock::default());
            let mut allowed = 0u64;
            for _ in 0..requests {
                let status = service
                    .try_consume("org_prop", SubscriptionPlan::Free, window)
                    .await
                    .unwrap();
                if status.allowed {
                    allowed += 1;
                }
            }
            allowed
        });

        prop_assert_eq!(allowed, limit.min(requests as u64));
    }

    #[test]
    fn test_remaining_never_exceeds_limit(
        limit in 1u64..20,
        requests in 1usize..40,
    ) {
        runtime().block_on(async {
            let service = service(limit, ManualClock::default());
            let mut previous = limit;
            for _ in 0..requests {
                let status = service
                    .try_consume("org_prop", SubscriptionPlan::Free, ThrottleWindow::Minute)
                    .await
                    .unwrap();
                assert!(status.remaining <= status.limit);
                assert!(status.remaining <= previous);
                previous = status.remaining;
            }
        });
    }

    #[test]
    fn test_window_reset_restores_full_quota(
        limit in 1u64..20,
        elapsed_secs in 60i64..7200,
    ) {
        let (before, after) = runtime().block_on(async {
            let clock = ManualClock::default();
            let service = service(limit, clock.clone());
            for _ in 0..limit {
                service
                    .try_consume("org_prop", SubscriptionPlan::Free, ThrottleWindow::Minute)
                    .await
                    .unwrap();
            }
            let before = service
                .check_throttle("org_prop", SubscriptionPlan::Free, ThrottleWindow::Minute)
                .await
                .unwrap();

            clock.advance(chrono::Duration::seconds(elapsed_secs));

            let after = service
                .try_consume("org_prop", SubscriptionPlan::Free, ThrottleWindow::Minute)
                .await
                .unwrap();
            (before, after)
        });

        prop_assert!(!before.allowed);
        prop_assert!(after.allowed);
        prop_assert_eq!(after.remaining, limit - 1);
    }
}
