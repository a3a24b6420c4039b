//! Rate limit key derivation.

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use serde::{Deserialize, Serialize};

/// Header consulted when the service sits behind a trusted proxy.
const FORWARDED_FOR: &str = "x-forwarded-for";

/// Bucket used when the client address cannot be determined.
const UNKNOWN_CLIENT: &str = "unknown";

/// Which request attributes make up the limiter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// One window per client address
    #[default]
    ClientIp,
    /// One window per client address and request path
    ClientIpAndPath,
}

/// A key that identifies one sliding window in the shared store.
///
/// The key is a deterministic function of the request: the same client (and
/// path, depending on the strategy) always maps to the same window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// Namespace of limiter keys in the store
    pub prefix: String,
    /// Client address, or `unknown`
    pub client: String,
    /// Request path when the strategy includes it
    pub path: Option<String>,
}

impl RateLimitKey {
    /// Derive the key for a request.
    pub fn from_request<B>(
        request: &Request<B>,
        prefix: &str,
        strategy: KeyStrategy,
        trust_forwarded_for: bool,
    ) -> Self {
        let client = client_address(request, trust_forwarded_for)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

        let path = match strategy {
            KeyStrategy::ClientIp => None,
            KeyStrategy::ClientIpAndPath => Some(request.uri().path().to_string()),
        };

        Self {
            prefix: prefix.to_string(),
            client,
            path,
        }
    }

    /// Convert the key to the string stored in the shared store.
    pub fn to_string_key(&self) -> String {
        match &self.path {
            Some(path) => format!("{}:{}:{}", self.prefix, self.client, path),
            None => format!("{}:{}", self.prefix, self.client),
        }
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

/// Best-effort client address of a request.
///
/// With `trust_forwarded_for`, the first hop of `X-Forwarded-For` wins; the
/// socket peer address is the fallback.
pub fn client_address<B>(request: &Request<B>, trust_forwarded_for: bool) -> Option<IpAddr> {
    if trust_forwarded_for {
        let forwarded = request
            .headers()
            .get(FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|hop| hop.trim().parse::<IpAddr>().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}
