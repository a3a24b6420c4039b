//! Access token authentication middleware.
//!
//! Every request outside the public path list must carry a bearer access
//! token that verifies against a live session. On success the request gets a
//! [`Principal`] extension; on any failure it is answered with 401 and never
//! reaches the handler.

use std::collections::HashSet;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::http::header::USER_AGENT;
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::principal::Principal;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::http::rejection::GateRejection;
use crate::session::{extract_token, TokenHandler};

/// Layer that applies access token authentication.
#[derive(Clone)]
pub struct AuthLayer {
    tokens: Arc<TokenHandler>,
    public_paths: Arc<HashSet<String>>,
    enforce_fingerprint: bool,
}

impl AuthLayer {
    /// Create a layer with no public paths.
    pub fn new(tokens: Arc<TokenHandler>) -> Self {
        Self {
            tokens,
            public_paths: Arc::new(HashSet::new()),
            enforce_fingerprint: false,
        }
    }

    /// Create a layer from the auth configuration section.
    pub fn from_config(tokens: Arc<TokenHandler>, config: &AuthConfig) -> Self {
        Self::new(tokens)
            .public_paths(config.public_paths.iter().cloned())
            .enforce_fingerprint(config.enforce_fingerprint)
    }

    /// Add paths served without authentication (exact match).
    #[must_use]
    pub fn public_paths(mut self, paths: impl IntoIterator<Item = String>) -> Self {
        let mut all = (*self.public_paths).clone();
        all.extend(paths);
        self.public_paths = Arc::new(all);
        self
    }

    #[must_use]
    pub fn enforce_fingerprint(mut self, enforce: bool) -> Self {
        self.enforce_fingerprint = enforce;
        self
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = Authenticate<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Authenticate {
            inner,
            layer: self.clone(),
        }
    }
}

/// Middleware service for access token authentication.
#[derive(Clone)]
pub struct Authenticate<S> {
    inner: S,
    layer: AuthLayer,
}

impl<S> Service<Request> for Authenticate<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let layer = self.layer.clone();
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            if layer.public_paths.contains(req.uri().path()) {
                return inner.call(req).await;
            }

            let token = extract_token(req.headers()).to_string();
            let claims = match layer.tokens.verify_access_token(&token).await {
                Ok(claims) => claims,
                Err(AuthError::Store(e)) => {
                    warn!(error = %e, path = %req.uri().path(), "Session store unavailable, denying request");
                    return Ok(GateRejection::StoreUnavailable.into_response());
                }
                Err(e) => {
                    debug!(reason = %e, path = %req.uri().path(), "Authentication failed");
                    return Ok(GateRejection::Unauthorized.into_response());
                }
            };

            if layer.enforce_fingerprint {
                if let Some(expected) = claims.fpt.as_deref() {
                    let presented = req
                        .headers()
                        .get(USER_AGENT)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default();
                    if presented != expected {
                        debug!(session_id = %claims.sid, "Client fingerprint mismatch");
                        return Ok(GateRejection::Unauthorized.into_response());
                    }
                }
            }

            req.extensions_mut().insert(Principal::from(claims));
            inner.call(req).await
        })
    }
}
