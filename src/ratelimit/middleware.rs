//! Tower middleware enforcing the sliding window limiter on every request.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::key::{KeyStrategy, RateLimitKey};
use super::limiter::SlidingWindowLimiter;
use crate::config::RateLimitingConfig;
use crate::error::LimiterError;
use crate::http::rejection::{GateRejection, LIMIT_HEADER, REMAINING_HEADER};

/// What the middleware does when the limiter cannot reach the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Reject the request with 503
    #[default]
    Deny,
    /// Let the request through unthrottled and log a warning
    Allow,
}

/// Layer that applies the sliding window limiter.
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<SlidingWindowLimiter>,
    key_prefix: Arc<str>,
    key_strategy: KeyStrategy,
    trust_forwarded_for: bool,
    on_store_error: FailurePolicy,
}

impl RateLimitLayer {
    /// Create a layer keyed per client address that denies on store failure.
    pub fn new(limiter: Arc<SlidingWindowLimiter>, key_prefix: &str) -> Self {
        Self {
            limiter,
            key_prefix: Arc::from(key_prefix),
            key_strategy: KeyStrategy::default(),
            trust_forwarded_for: false,
            on_store_error: FailurePolicy::default(),
        }
    }

    /// Create a layer from the rate limiting configuration section.
    pub fn from_config(limiter: Arc<SlidingWindowLimiter>, config: &RateLimitingConfig) -> Self {
        Self::new(limiter, &config.key_prefix)
            .key_strategy(config.key_strategy)
            .trust_forwarded_for(config.trust_forwarded_for)
            .on_store_error(config.on_store_error)
    }

    #[must_use]
    pub fn key_strategy(mut self, strategy: KeyStrategy) -> Self {
        self.key_strategy = strategy;
        self
    }

    #[must_use]
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    #[must_use]
    pub fn on_store_error(mut self, policy: FailurePolicy) -> Self {
        self.on_store_error = policy;
        self
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimit<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimit {
            inner,
            layer: self.clone(),
        }
    }
}

/// Middleware service for rate limiting.
#[derive(Clone)]
pub struct RateLimit<S> {
    inner: S,
    layer: RateLimitLayer,
}

impl<S> Service<Request> for RateLimit<S>
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

    fn call(&mut self, req: Request) -> Self::Future {
        let layer = self.layer.clone();
        // Take the service that was polled ready and leave a fresh clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let key = RateLimitKey::from_request(
                &req,
                &layer.key_prefix,
                layer.key_strategy,
                layer.trust_forwarded_for,
            );

            let decision = match layer.limiter.allow(&key.to_string_key()).await {
                Ok(decision) => decision,
                Err(LimiterError::Store(e)) => {
                    return match layer.on_store_error {
                        FailurePolicy::Allow => {
                            warn!(key = %key, error = %e, "Rate limiter unavailable, admitting request");
                            inner.call(req).await
                        }
                        FailurePolicy::Deny => {
                            warn!(key = %key, error = %e, "Rate limiter unavailable, denying request");
                            Ok(GateRejection::StoreUnavailable.into_response())
                        }
                    };
                }
                Err(e @ LimiterError::EmptyKey) => {
                    warn!(error = %e, "Rate limiter rejected key, denying request");
                    return Ok(GateRejection::StoreUnavailable.into_response());
                }
            };

            if !decision.admitted {
                debug!(
                    key = %key,
                    path = %req.uri().path(),
                    "Request throttled"
                );
                let retry_after_secs = layer.limiter.window().as_secs_f64().ceil() as u64;
                return Ok(GateRejection::RateLimited {
                    limit: decision.limit,
                    retry_after_secs: retry_after_secs.max(1),
                }
                .into_response());
            }

            let mut response = inner.call(req).await?;
            let headers = response.headers_mut();
            headers.insert(LIMIT_HEADER, HeaderValue::from(decision.limit));
            headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining()));
            Ok(response)
        })
    }
}
