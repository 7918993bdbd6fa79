//! Route handlers

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use super::error::ApiError;
use super::AppState;
use crate::guard::{IdentitySource, OrganizerContext};
use crate::metrics;
use crate::throttle::{
    DashboardBuilder, DashboardData, SubscriptionPlan, ThrottleStatus, WindowLimits,
};

/// Header carrying the admin token
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
    })
}

/// Metrics endpoint handler
pub async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub organizer_id: String,
    pub name: Option<String>,
    pub plan: SubscriptionPlan,
    pub identity_source: IdentitySource,
}

/// Organizer profile (minute window)
pub async fn organizer_profile(
    State(state): State<AppState>,
    Extension(organizer): Extension<OrganizerContext>,
) -> Json<ProfileResponse> {
    let name = state
        .guard
        .organizers()
        .find_organizer_by_id(&organizer.organizer_id)
        .await
        .map(|found| found.name);

    Json(ProfileResponse {
        organizer_id: organizer.organizer_id,
        name,
        plan: organizer.plan,
        identity_source: organizer.source,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageResponse {
    pub organizer_id: String,
    pub plan: SubscriptionPlan,
    pub windows: Vec<ThrottleStatus>,
}

/// Quota state across all windows (hour window)
pub async fn organizer_usage(
    State(state): State<AppState>,
    Extension(organizer): Extension<OrganizerContext>,
) -> Result<Json<UsageResponse>, ApiError> {
    let windows = state
        .guard
        .throttle()
        .usage_for(&organizer.organizer_id, organizer.plan)
        .await?;

    Ok(Json(UsageResponse {
        organizer_id: organizer.organizer_id,
        plan: organizer.plan,
        windows,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitsResponse {
    pub organizer_id: String,
    pub plan: SubscriptionPlan,
    pub limits: WindowLimits,
}

/// The plan's limit table (day window)
pub async fn organizer_limits(
    State(state): State<AppState>,
    Extension(organizer): Extension<OrganizerContext>,
) -> Json<LimitsResponse> {
    let limits = state.guard.throttle().limits().for_plan(organizer.plan);

    Json(LimitsResponse {
        organizer_id: organizer.organizer_id,
        plan: organizer.plan,
        limits,
    })
}

/// Usage dashboard
pub async fn admin_dashboard(
    State(state): State<AppState>,
) -> Result<Json<DashboardData>, ApiError> {
    let data = DashboardBuilder::new(
        state.guard.throttle().clone(),
        state.guard.organizers().clone(),
        state.guard.abuse_log().clone(),
    )
    .build()
    .await?;

    Ok(Json(data))
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub removed: usize,
}

/// Sweep expired counters now
pub async fn admin_cleanup(State(state): State<AppState>) -> Json<CleanupResponse> {
    let removed = state.guard.throttle().cleanup().await;
    info!("Manual cleanup removed {} counters", removed);
    Json(CleanupResponse { removed })
}

/// Require `x-admin-token` to match the configured token
pub async fn require_admin(
    State(token): State<Arc<str>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());

    match presented {
        Some(value) if value == &*token => Ok(next.run(request).await),
        _ => Err(ApiError::unauthorized("Admin token required")),
    }
}
