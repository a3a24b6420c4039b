//! Router assembly and the session endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::rejection::GateRejection;
use crate::auth::{AuthLayer, CredentialVerifier, Principal};
use crate::clock::Clock;
use crate::config::GatehouseConfig;
use crate::ratelimit::{RateLimitLayer, SlidingWindowLimiter};
use crate::session::{extract_token, TokenHandler};
use crate::store::SharedStore;

/// Response header carrying a freshly minted access token.
pub const ACCESS_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-jwt-token");
/// Response header carrying the refresh token issued at login.
pub const REFRESH_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-refresh-token");

/// Shared state of the session endpoints.
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenHandler>,
    pub credentials: Arc<dyn CredentialVerifier>,
}

/// Login request body.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Build the full application from configuration.
///
/// Requests pass the rate limiter (when enabled), then authentication, then
/// reach a handler.
pub fn build_app(
    config: &GatehouseConfig,
    store: Arc<dyn SharedStore>,
    clock: Arc<dyn Clock>,
    credentials: Arc<dyn CredentialVerifier>,
) -> Router {
    let tokens = Arc::new(TokenHandler::with_clock(
        &config.session,
        store.clone(),
        clock.clone(),
    ));

    let rate_limit = config.rate_limiting.enabled.then(|| {
        let limiter = Arc::new(SlidingWindowLimiter::with_clock(
            store,
            clock,
            config.rate_limiting.window(),
            config.rate_limiting.max_requests,
        ));
        RateLimitLayer::from_config(limiter, &config.rate_limiting)
    });

    let auth = AuthLayer::from_config(tokens.clone(), &config.auth);

    router(
        AppState {
            tokens,
            credentials,
        },
        auth,
        rate_limit,
    )
}

/// Mount the routes behind the given gate layers.
pub fn router(state: AppState, auth: AuthLayer, rate_limit: Option<RateLimitLayer>) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/users/login", post(login))
        .route("/users/refresh_token", get(refresh_token).post(refresh_token))
        .route("/users/logout", get(logout).post(logout))
        .route("/users/profile", get(profile))
        .layer(auth)
        .with_state(state);

    match rate_limit {
        Some(layer) => router.layer(layer),
        None => router,
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

fn user_agent(headers: &HeaderMap) -> Option<&str> {
    headers.get(USER_AGENT).and_then(|v| v.to_str().ok())
}

fn token_header(token: &str) -> Result<HeaderValue, GateRejection> {
    // JWTs are base64url and dots, always a valid header value
    HeaderValue::from_str(token).map_err(|_| GateRejection::Unauthorized)
}

async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<Response, GateRejection> {
    let Some(subject_id) = state
        .credentials
        .verify(&request.email, &request.password)
        .await
    else {
        info!(email = %request.email, "Login rejected");
        return Ok((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "code": 401, "message": "invalid email or password" })),
        )
            .into_response());
    };

    let pair = state
        .tokens
        .issue_login_tokens(&subject_id, user_agent(&headers))
        .await?;

    let mut response = Json(json!({ "message": "login succeeded" })).into_response();
    let out = response.headers_mut();
    out.insert(ACCESS_TOKEN_HEADER, token_header(&pair.access_token)?);
    out.insert(REFRESH_TOKEN_HEADER, token_header(&pair.refresh_token)?);
    Ok(response)
}

/// The bearer credential on this route is the refresh token.
async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, GateRejection> {
    let refreshed = state
        .tokens
        .refresh_access_token(extract_token(&headers))
        .await?;

    let mut response = Json(json!({ "message": "ok" })).into_response();
    let out = response.headers_mut();
    out.insert(ACCESS_TOKEN_HEADER, token_header(&refreshed.access_token)?);
    if let Some(rotated) = &refreshed.refresh_token {
        out.insert(REFRESH_TOKEN_HEADER, token_header(rotated)?);
    }
    Ok(response)
}

async fn logout(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<serde_json::Value>, GateRejection> {
    state.tokens.revoke_session(&principal.session_id).await?;
    Ok(Json(json!({ "message": "logged out" })))
}

async fn profile(principal: Principal) -> Json<Principal> {
    Json(principal)
}
