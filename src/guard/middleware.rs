//! axum adapter for the throttle guard

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::MethodRouter;
use axum::Extension;
use std::convert::Infallible;
use std::net::SocketAddr;

use super::rejection::apply_rate_limit_headers;
use super::{RequestContext, RouteThrottle, ThrottleGuard};
use crate::throttle::ThrottleWindow;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Run the guard in front of a handler
///
/// Admitted requests carry an [`super::OrganizerContext`] extension and get
/// X-RateLimit-* headers on the response.
pub async fn throttle_middleware(
    State(guard): State<ThrottleGuard>,
    mut request: Request,
    next: Next,
) -> Response {
    let window = request
        .extensions()
        .get::<RouteThrottle>()
        .map(|route| route.window)
        .unwrap_or(ThrottleWindow::Minute);

    let outcome = {
        let context = RequestContext {
            headers: request.headers(),
            uri: request.uri(),
            client_ip: client_ip(&request, guard.trusts_forwarded_for()),
            window,
        };
        guard.evaluate(&context).await
    };

    match outcome {
        Ok(admission) => {
            request.extensions_mut().insert(admission.organizer);
            let mut response = next.run(request).await;
            if let Some(status) = &admission.status {
                apply_rate_limit_headers(response.headers_mut(), status);
            }
            response
        }
        Err(rejection) => rejection.into_response(),
    }
}

/// Throttle a route under `window`
pub fn throttled<S>(
    route: MethodRouter<S>,
    guard: &ThrottleGuard,
    window: ThrottleWindow,
) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    // Extension is the outer layer so the middleware can read it
    route
        .layer::<_, Infallible>(from_fn_with_state(guard.clone(), throttle_middleware))
        .layer(Extension(RouteThrottle::new(window)))
}

/// Caller address: the socket peer, or the first X-Forwarded-For hop when
/// the proxy in front is trusted
fn client_ip(request: &Request, trust_forwarded_for: bool) -> String {
    let forwarded = request
        .headers()
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    if let Some(forwarded) = forwarded.filter(|_| trust_forwarded_for) {
        return forwarded.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
