//! Throttle Guard
//!
//! Request interceptor for organizer routes. For each request the guard:
//!
//! 1. Resolves the organizer identity (401 when absent)
//! 2. Looks up the organizer's subscription plan
//! 3. Atomically checks and counts the request against the route's window
//! 4. Rejects with 429 when the window is exhausted, recording an abuse log
//!    entry in the background
//!
//! [`ThrottleGuard::evaluate`] holds the decision logic and is framework
//! independent; [`middleware::throttle_middleware`] adapts it to axum.

pub mod identity;
pub mod middleware;
pub mod rejection;

pub use identity::{IdentityResolver, IdentitySource, OrganizerTokens, ResolvedIdentity};
pub use middleware::{throttle_middleware, throttled};
pub use rejection::{apply_rate_limit_headers, ThrottleRejection};

use axum::http::{HeaderMap, Uri};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::abuse_log::AbuseLogService;
use crate::metrics;
use crate::organizer::OrganizerService;
use crate::throttle::{SubscriptionPlan, ThrottleService, ThrottleStatus, ThrottleWindow};

/// Reason recorded in the abuse log for exhausted windows
pub const RATE_LIMIT_REASON: &str = "Rate limit exceeded";

/// Window a route is throttled under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteThrottle {
    pub window: ThrottleWindow,
}

impl RouteThrottle {
    pub fn new(window: ThrottleWindow) -> Self {
        Self { window }
    }
}

/// Organizer attached to an admitted request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizerContext {
    pub organizer_id: String,
    pub plan: SubscriptionPlan,
    pub source: IdentitySource,
}

/// What the guard needs to know about a request
#[derive(Debug, Clone)]
pub struct RequestContext<'a> {
    pub headers: &'a HeaderMap,
    pub uri: &'a Uri,
    pub client_ip: String,
    pub window: ThrottleWindow,
}

impl RequestContext<'_> {
    /// Path recorded in the abuse log
    pub fn endpoint(&self) -> &str {
        self.uri.path()
    }
}

/// A request the guard let through
#[derive(Debug, Clone)]
pub struct Admission {
    pub organizer: OrganizerContext,

    /// Quota state after counting; `None` when throttling is disabled or the
    /// counter store failed
    pub status: Option<ThrottleStatus>,
}

/// Per-organizer throttle guard
#[derive(Debug, Clone)]
pub struct ThrottleGuard {
    throttle: ThrottleService,
    organizers: OrganizerService,
    abuse_log: AbuseLogService,
    identity: IdentityResolver,
    enabled: bool,
    trust_forwarded_for: bool,
}

impl ThrottleGuard {
    /// Create a new guard, enabled, ignoring X-Forwarded-For
    pub fn new(
        throttle: ThrottleService,
        organizers: OrganizerService,
        abuse_log: AbuseLogService,
        identity: IdentityResolver,
    ) -> Self {
        Self {
            throttle,
            organizers,
            abuse_log,
            identity,
            enabled: true,
            trust_forwarded_for: false,
        }
    }

    /// Turn counting on or off; identity is required either way
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Take the client address from X-Forwarded-For; only safe behind a
    /// proxy that overwrites the header
    pub fn with_trusted_forwarding(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn trusts_forwarded_for(&self) -> bool {
        self.trust_forwarded_for
    }

    pub fn throttle(&self) -> &ThrottleService {
        &self.throttle
    }

    pub fn organizers(&self) -> &OrganizerService {
        &self.organizers
    }

    pub fn abuse_log(&self) -> &AbuseLogService {
        &self.abuse_log
    }

    /// Decide whether a request may proceed
    pub async fn evaluate(
        &self,
        request: &RequestContext<'_>,
    ) -> Result<Admission, ThrottleRejection> {
        let _timer = metrics::GUARD_DURATION_SECONDS.start_timer();

        let Some(identity) = self.identity.resolve(request.headers, request.uri) else {
            metrics::UNAUTHENTICATED_REQUESTS_TOTAL.inc();
            debug!("No organizer identity on {}", request.endpoint());
            return Err(ThrottleRejection::Unauthenticated);
        };

        let plan = self
            .organizers
            .get_organizer_subscription_plan(&identity.organizer_id)
            .await;
        let organizer = OrganizerContext {
            organizer_id: identity.organizer_id,
            plan,
            source: identity.source,
        };

        if !self.enabled {
            return Ok(Admission {
                organizer,
                status: None,
            });
        }

        let status = match self
            .throttle
            .try_consume(&organizer.organizer_id, plan, request.window)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                // Store failures admit the request
                metrics::STORE_ERRORS_TOTAL.inc();
                error!(
                    "Throttle check failed for {}, admitting request: {}",
                    organizer.organizer_id, e
                );
                return Ok(Admission {
                    organizer,
                    status: None,
                });
            }
        };

        let decision = if status.allowed { "allowed" } else { "rejected" };
        metrics::THROTTLE_DECISIONS_TOTAL
            .with_label_values(&[plan.as_str(), request.window.as_str(), decision])
            .inc();

        if status.allowed {
            return Ok(Admission {
                organizer,
                status: Some(status),
            });
        }

        let retry_after_secs = status.retry_after_secs(self.throttle.clock().now());
        warn!(
            organizer_id = %organizer.organizer_id,
            plan = %plan,
            window = %request.window,
            "Rate limit exceeded on {}, retry after {}s",
            request.endpoint(),
            retry_after_secs
        );

        self.abuse_log.log_detached(
            request.endpoint().to_string(),
            request.client_ip.clone(),
            format!(
                "{} for organizer {} ({} window)",
                RATE_LIMIT_REASON, organizer.organizer_id, request.window
            ),
        );

        Err(ThrottleRejection::RateLimited {
            retry_after_secs,
            status,
        })
    }
}
