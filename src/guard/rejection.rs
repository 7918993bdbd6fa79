//! Guard responses
//!
//! Rate-limit headers for admitted requests and the 401/429 rejections.

use axum::http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::throttle::ThrottleStatus;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const X_RATELIMIT_WINDOW: HeaderName = HeaderName::from_static("x-ratelimit-window");

/// Write the X-RateLimit-* headers for a decision
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, status: &ThrottleStatus) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(status.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(status.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(status.reset_epoch_secs()));
    headers.insert(
        X_RATELIMIT_WINDOW,
        HeaderValue::from_static(status.window.as_str()),
    );
}

/// JSON body of a rejection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Why the guard refused a request
#[derive(Debug, Clone, thiserror::Error)]
pub enum ThrottleRejection {
    /// No organizer identity on the request
    #[error("Organizer identity required")]
    Unauthenticated,

    /// Window quota exhausted
    #[error("Rate limit exceeded")]
    RateLimited {
        retry_after_secs: u64,
        status: ThrottleStatus,
    },
}

impl ThrottleRejection {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    pub fn body(&self) -> RejectionBody {
        RejectionBody {
            message: self.to_string(),
            retry_after: match self {
                Self::Unauthenticated => None,
                Self::RateLimited {
                    retry_after_secs, ..
                } => Some(*retry_after_secs),
            },
        }
    }
}

impl IntoResponse for ThrottleRejection {
    fn into_response(self) -> Response {
        let mut response = (self.status_code(), Json(self.body())).into_response();

        if let Self::RateLimited {
            retry_after_secs,
            status,
        } = &self
        {
            let headers = response.headers_mut();
            apply_rate_limit_headers(headers, status);
            headers.insert(RETRY_AFTER, HeaderValue::from(*retry_after_secs));
        }

        response
    }
}
