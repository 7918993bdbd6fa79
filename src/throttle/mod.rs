//! Per-Organizer Throttling
//!
//! Fixed-window request counting keyed by organizer and window class, with
//! limits taken from the organizer's subscription plan.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Throttle Service                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐          │
//! │  │ Minute      │  │ Hour        │  │ Day         │          │
//! │  │ Windows     │  │ Windows     │  │ Windows     │          │
//! │  └─────────────┘  └─────────────┘  └─────────────┘          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │        Counter Store (organizer, window) -> count   │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod dashboard;
pub mod plan;
pub mod service;
pub mod store;

#[cfg(test)]
mod proptests;

pub use dashboard::{DashboardBuilder, DashboardData};
pub use plan::{PlanLimits, SubscriptionPlan, ThrottleWindow, WindowLimits};
pub use service::{ThrottleError, ThrottleService, ThrottleStatus};
pub use store::{CounterStore, MemoryCounterStore, RateLimitCounter, RateLimitKey, StoreError};
