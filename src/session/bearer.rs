//! Bearer token extraction.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

/// Read the bearer token from the `Authorization` header.
///
/// Returns an empty string when the header is absent or not of the form
/// `Bearer <token>`. This is parsing only; validity is decided elsewhere.
pub fn extract_token(headers: &HeaderMap) -> &str {
    let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return "";
    };

    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => token,
        _ => "",
    }
}
