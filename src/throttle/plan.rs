//! Subscription Plans and Window Limits
//!
//! Static lookup table mapping a subscription plan and a window class to
//! the number of requests an organizer may make within one window.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Window class a route is throttled under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThrottleWindow {
    /// Single-resource routes
    Minute,
    /// List routes
    Hour,
    /// Reporting routes
    Day,
}

impl ThrottleWindow {
    /// Every window class, shortest first
    pub const ALL: [ThrottleWindow; 3] = [
        ThrottleWindow::Minute,
        ThrottleWindow::Hour,
        ThrottleWindow::Day,
    ];

    /// Length of one window
    pub fn duration(&self) -> Duration {
        match self {
            ThrottleWindow::Minute => Duration::minutes(1),
            ThrottleWindow::Hour => Duration::hours(1),
            ThrottleWindow::Day => Duration::days(1),
        }
    }

    /// Value used in the `X-RateLimit-Window` header
    pub fn as_str(&self) -> &'static str {
        match self {
            ThrottleWindow::Minute => "minute",
            ThrottleWindow::Hour => "hour",
            ThrottleWindow::Day => "day",
        }
    }
}

impl fmt::Display for ThrottleWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Organizer subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionPlan {
    #[default]
    Free,
    Basic,
    Premium,
    Enterprise,
}

impl SubscriptionPlan {
    pub const ALL: [SubscriptionPlan; 4] = [
        SubscriptionPlan::Free,
        SubscriptionPlan::Basic,
        SubscriptionPlan::Premium,
        SubscriptionPlan::Enterprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionPlan::Free => "FREE",
            SubscriptionPlan::Basic => "BASIC",
            SubscriptionPlan::Premium => "PREMIUM",
            SubscriptionPlan::Enterprise => "ENTERPRISE",
        }
    }
}

impl fmt::Display for SubscriptionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requests allowed per window for one plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowLimits {
    pub minute: u64,
    pub hour: u64,
    pub day: u64,
}

impl WindowLimits {
    pub const fn new(minute: u64, hour: u64, day: u64) -> Self {
        Self { minute, hour, day }
    }

    /// Limit for a single window class
    pub fn get(&self, window: ThrottleWindow) -> u64 {
        match window {
            ThrottleWindow::Minute => self.minute,
            ThrottleWindow::Hour => self.hour,
            ThrottleWindow::Day => self.day,
        }
    }
}

/// Default FREE plan limits
pub const FREE_LIMITS: WindowLimits = WindowLimits::new(5, 50, 500);
/// Default BASIC plan limits
pub const BASIC_LIMITS: WindowLimits = WindowLimits::new(20, 200, 2_000);
/// Default PREMIUM plan limits
pub const PREMIUM_LIMITS: WindowLimits = WindowLimits::new(100, 1_000, 10_000);
/// Default ENTERPRISE plan limits
pub const ENTERPRISE_LIMITS: WindowLimits = WindowLimits::new(500, 5_000, 50_000);

/// Plan x window limit table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanLimits {
    pub free: WindowLimits,
    pub basic: WindowLimits,
    pub premium: WindowLimits,
    pub enterprise: WindowLimits,
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self {
            free: FREE_LIMITS,
            basic: BASIC_LIMITS,
            premium: PREMIUM_LIMITS,
            enterprise: ENTERPRISE_LIMITS,
        }
    }
}

impl PlanLimits {
    /// All window limits for a plan
    pub fn for_plan(&self, plan: SubscriptionPlan) -> WindowLimits {
        match plan {
            SubscriptionPlan::Free => self.free,
            SubscriptionPlan::Basic => self.basic,
            SubscriptionPlan::Premium => self.premium,
            SubscriptionPlan::Enterprise => self.enterprise,
        }
    }

    /// Limit for a plan within a window class
    pub fn limit(&self, plan: SubscriptionPlan, window: ThrottleWindow) -> u64 {
        self.for_plan(plan).get(window)
    }
}
