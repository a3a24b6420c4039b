//! Responses produced when the gate terminates a request.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::AuthError;

/// Header carrying the configured request limit.
pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
/// Header carrying the requests left in the window.
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// A terminal decision taken by one of the gate middlewares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    /// Too many requests for this key inside the window
    RateLimited {
        limit: u64,
        retry_after_secs: u64,
    },
    /// Missing, invalid or expired token, or a dead session
    Unauthorized,
    /// The shared store could not be consulted and policy is to deny
    StoreUnavailable,
}

impl From<AuthError> for GateRejection {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Store(_) => GateRejection::StoreUnavailable,
            _ => GateRejection::Unauthorized,
        }
    }
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        match self {
            GateRejection::RateLimited {
                limit,
                retry_after_secs,
            } => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "code": 429, "message": "too many requests" })),
                )
                    .into_response();
                let headers = response.headers_mut();
                headers.insert(LIMIT_HEADER, HeaderValue::from(limit));
                headers.insert(REMAINING_HEADER, HeaderValue::from(0u64));
                headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
                response
            }
            GateRejection::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Bearer")],
                Json(json!({ "code": 401, "message": "unauthorized" })),
            )
                .into_response(),
            GateRejection::StoreUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "code": 503, "message": "service temporarily unavailable" })),
            )
                .into_response(),
        }
    }
}
