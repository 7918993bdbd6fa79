//! Admin Dashboard Support
//!
//! Point-in-time view of live counters and recent abuse log entries for the
//! admin dashboard route.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use super::plan::{PlanLimits, SubscriptionPlan, ThrottleWindow};
use super::service::{ThrottleError, ThrottleService};
use super::store::RateLimitCounter;
use crate::abuse_log::{AbuseLogEntry, AbuseLogService};
use crate::organizer::OrganizerService;

/// Abuse entries included in the dashboard
pub const RECENT_ABUSE_LIMIT: usize = 50;

/// Dashboard data for admin interface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardData {
    /// Timestamp of data generation
    pub timestamp: DateTime<Utc>,

    /// Summary statistics
    pub summary: ThrottleSummary,

    /// Per-organizer usage, ordered by organizer id
    pub organizers: Vec<OrganizerUsage>,

    /// Newest abuse log entries first
    pub recent_abuse: Vec<AbuseLogEntry>,

    /// Limit table in effect
    pub limits: PlanLimits,
}

/// Totals across all tracked organizers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleSummary {
    /// Organizers with at least one live counter
    pub tracked_organizers: usize,

    /// Live counters across all windows
    pub active_counters: usize,

    /// Live counters that have reached their limit
    pub exhausted_counters: usize,

    /// Entries held by the abuse log
    pub abuse_entries: usize,
}

/// Usage for one organizer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizerUsage {
    pub organizer_id: String,
    pub name: Option<String>,
    pub plan: SubscriptionPlan,
    pub windows: Vec<WindowUsage>,
}

/// Usage within one live window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowUsage {
    pub window: ThrottleWindow,
    pub limit: u64,
    pub used: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

/// Dashboard builder for constructing dashboard data
#[derive(Debug, Clone)]
pub struct DashboardBuilder {
    throttle: ThrottleService,
    organizers: OrganizerService,
    abuse_log: AbuseLogService,
}

impl DashboardBuilder {
    /// Create a new dashboard builder
    pub fn new(
        throttle: ThrottleService,
        organizers: OrganizerService,
        abuse_log: AbuseLogService,
    ) -> Self {
        Self {
            throttle,
            organizers,
            abuse_log,
        }
    }

    /// Build dashboard data
    pub async fn build(&self) -> Result<DashboardData, ThrottleError> {
        let snapshot = self.throttle.snapshot().await?;
        let active_counters = snapshot.len();

        // Group live counters by organizer
        let mut by_organizer: BTreeMap<String, Vec<(ThrottleWindow, RateLimitCounter)>> =
            BTreeMap::new();
        for (key, counter) in snapshot {
            by_organizer
                .entry(key.organizer_id)
                .or_default()
                .push((key.window, counter));
        }

        let mut organizers = Vec::with_capacity(by_organizer.len());
        let mut exhausted_counters = 0;

        for (organizer_id, mut counters) in by_organizer {
            let organizer = self.organizers.find_organizer_by_id(&organizer_id).await;
            let plan = organizer
                .as_ref()
                .map(|organizer| organizer.plan)
                .unwrap_or_default();

            counters.sort_by_key(|(window, _)| window.duration());
            let windows: Vec<WindowUsage> = counters
                .into_iter()
                .map(|(window, counter)| {
                    let limit = self.throttle.limit_for(plan, window);
                    WindowUsage {
                        window,
                        limit,
                        used: counter.count,
                        remaining: limit.saturating_sub(counter.count),
                        reset_at: counter.reset_at,
                    }
                })
                .collect();

            exhausted_counters += windows.iter().filter(|w| w.used >= w.limit).count();

            organizers.push(OrganizerUsage {
                organizer_id,
                name: organizer.map(|organizer| organizer.name),
                plan,
                windows,
            });
        }

        let recent_abuse = self
            .abuse_log
            .recent(RECENT_ABUSE_LIMIT)
            .await
            .unwrap_or_else(|e| {
                warn!("Dashboard could not read abuse log: {}", e);
                Vec::new()
            });
        let abuse_entries = self.abuse_log.count().await.unwrap_or(recent_abuse.len());

        Ok(DashboardData {
            timestamp: self.throttle.clock().now(),
            summary: ThrottleSummary {
                tracked_organizers: organizers.len(),
                active_counters,
                exhausted_counters,
                abuse_entries,
            },
            organizers,
            recent_abuse,
            limits: self.throttle.limits().clone(),
        })
    }
}
