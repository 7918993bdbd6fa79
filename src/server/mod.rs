//! HTTP Server
//!
//! Routes:
//! - `GET /health`, `GET /metrics`: public, never throttled
//! - `GET /api/organizer/profile`: minute window
//! - `GET /api/organizer/usage`: hour window
//! - `GET /api/organizer/limits`: day window
//! - `GET /admin/throttle/dashboard`, `POST /admin/throttle/cleanup`: only
//!   mounted when an admin token is configured

pub mod error;
pub mod handlers;

use anyhow::{Context, Result};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::abuse_log::{AbuseLogService, AbuseLogSink, JsonlAbuseLog, MemoryAbuseLog};
use crate::clock::Clock;
use crate::config::Config;
use crate::guard::{throttled, IdentityResolver, OrganizerTokens, ThrottleGuard};
use crate::metrics;
use crate::organizer::{InMemoryOrganizerDirectory, OrganizerService};
use crate::throttle::{MemoryCounterStore, ThrottleService, ThrottleWindow};

pub use error::ApiError;

/// Shared handler state
#[derive(Debug, Clone)]
pub struct AppState {
    pub guard: ThrottleGuard,
    pub admin_token: Option<Arc<str>>,
    pub metrics_enabled: bool,
}

impl AppState {
    /// Wire services from configuration
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let throttle = ThrottleService::new(
            Arc::new(MemoryCounterStore::new()),
            config.throttle.limits.clone(),
            clock.clone(),
        );

        let directory: InMemoryOrganizerDirectory = config.organizers.iter().cloned().collect();
        info!("Organizer directory seeded with {} entries", directory.len());
        let organizers = OrganizerService::new(Arc::new(directory));

        let sink: Arc<dyn AbuseLogSink> = match &config.abuse_log.path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create abuse log directory {:?}", parent)
                    })?;
                }
                info!("Abuse log appending to {:?}", path);
                Arc::new(JsonlAbuseLog::new(path, config.abuse_log.memory_capacity))
            }
            None => Arc::new(MemoryAbuseLog::new(config.abuse_log.memory_capacity)),
        };
        let abuse_log = AbuseLogService::new(sink, clock)
            .with_queue_capacity(config.abuse_log.queue_capacity);

        let identity = IdentityResolver::new(
            config
                .auth
                .jwt_secret
                .as_deref()
                .map(OrganizerTokens::from_secret),
        );

        let guard = ThrottleGuard::new(throttle, organizers, abuse_log, identity)
            .with_enabled(config.throttle.enabled)
            .with_trusted_forwarding(config.server.trust_forwarded_for);

        Ok(Self {
            guard,
            admin_token: config.admin.token.as_deref().map(Arc::from),
            metrics_enabled: config.metrics.enabled,
        })
    }
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let guard = &state.guard;

    let mut router = Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/organizer/profile",
            throttled(get(handlers::organizer_profile), guard, ThrottleWindow::Minute),
        )
        .route(
            "/api/organizer/usage",
            throttled(get(handlers::organizer_usage), guard, ThrottleWindow::Hour),
        )
        .route(
            "/api/organizer/limits",
            throttled(get(handlers::organizer_limits), guard, ThrottleWindow::Day),
        );

    if state.metrics_enabled {
        router = router.route("/metrics", get(handlers::metrics_handler));
    }

    if let Some(token) = state.admin_token.clone() {
        let admin = Router::new()
            .route("/admin/throttle/dashboard", get(handlers::admin_dashboard))
            .route("/admin/throttle/cleanup", post(handlers::admin_cleanup))
            .route_layer(from_fn_with_state(token, handlers::require_admin));
        router = router.merge(admin);
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Run the server until Ctrl-C
pub async fn serve(config: &Config, clock: Arc<dyn Clock>) -> Result<()> {
    if config.metrics.enabled {
        metrics::init().context("Failed to initialize metrics")?;
    }

    let state = AppState::from_config(config, clock)?;

    let sweeper = if state.guard.is_enabled() {
        Some(
            state
                .guard
                .throttle()
                .spawn_cleanup_task(config.cleanup_interval()),
        )
    } else {
        None
    };

    let app = build_router(state);
    let addr = config.listen_addr()?;

    info!("Starting ticketgate on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
