//! Configuration management for Gatehouse.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{GatehouseError, Result};
use crate::ratelimit::{FailurePolicy, KeyStrategy};
use crate::session::SessionTtlPolicy;

/// Environment variable prefix, e.g. `GATEHOUSE__SESSION__ACCESS_TTL_SECS`.
const ENV_PREFIX: &str = "GATEHOUSE";

/// Main configuration for the Gatehouse service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatehouseConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Shared store connection
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Session token configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Authentication middleware configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Which shared store implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Redis, shared by every instance
    #[default]
    Redis,
    /// Process memory; only correct for a single instance
    Memory,
}

/// Shared store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Deadline for a single store command in milliseconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
            command_timeout_ms: default_command_timeout(),
        }
    }
}

impl StoreConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_command_timeout() -> u64 {
    250
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Whether the rate limit layer is installed at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sliding window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Maximum requests admitted per key inside one window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    /// Prefix for window keys in the shared store
    #[serde(default = "default_limiter_prefix")]
    pub key_prefix: String,

    /// How the per-request key is derived
    #[serde(default)]
    pub key_strategy: KeyStrategy,

    /// Use the first `X-Forwarded-For` hop as the client address
    #[serde(default)]
    pub trust_forwarded_for: bool,

    /// What to do when the shared store cannot be reached
    #[serde(default)]
    pub on_store_error: FailurePolicy,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: default_window_ms(),
            max_requests: default_max_requests(),
            key_prefix: default_limiter_prefix(),
            key_strategy: KeyStrategy::default(),
            trust_forwarded_for: false,
            on_store_error: FailurePolicy::default(),
        }
    }
}

impl RateLimitingConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_window_ms() -> u64 {
    1000
}

fn default_max_requests() -> u64 {
    1000
}

fn default_limiter_prefix() -> String {
    "ip-limiter".to_string()
}

/// Session token configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Access token lifetime in seconds
    #[serde(default = "default_access_ttl")]
    pub access_ttl_secs: u64,

    /// Refresh token and session record lifetime in seconds
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_secs: u64,

    /// HMAC secret for access tokens
    #[serde(default)]
    pub access_signing_key: String,

    /// HMAC secret for refresh tokens; must differ from the access key
    #[serde(default)]
    pub refresh_signing_key: String,

    /// Prefix for session records in the shared store
    #[serde(default = "default_session_prefix")]
    pub key_prefix: String,

    /// Whether refreshing re-arms the session record's TTL
    #[serde(default)]
    pub refresh_ttl_policy: SessionTtlPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_ttl_secs: default_access_ttl(),
            refresh_ttl_secs: default_refresh_ttl(),
            access_signing_key: String::new(),
            refresh_signing_key: String::new(),
            key_prefix: default_session_prefix(),
            refresh_ttl_policy: SessionTtlPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_ttl_secs)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_ttl_secs)
    }
}

fn default_access_ttl() -> u64 {
    30 * 60
}

fn default_refresh_ttl() -> u64 {
    7 * 24 * 60 * 60
}

fn default_session_prefix() -> String {
    "users:ssid".to_string()
}

/// Authentication middleware configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Paths served without an access token (exact match)
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,

    /// Reject access tokens whose fingerprint differs from the request `User-Agent`
    #[serde(default)]
    pub enforce_fingerprint: bool,

    /// Accounts accepted by the login route
    #[serde(default)]
    pub users: Vec<UserEntry>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            public_paths: default_public_paths(),
            enforce_fingerprint: false,
            users: Vec::new(),
        }
    }
}

fn default_public_paths() -> Vec<String> {
    [
        "/health",
        "/users/signup",
        "/users/login",
        "/users/refresh_token",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

/// A login account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub email: String,
    /// Argon2id PHC string (see `gatehouse hash-password`)
    pub password_hash: String,
    /// Subject placed in issued tokens
    pub subject_id: String,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GatehouseConfig {
    /// Load configuration from an optional YAML file overlaid with
    /// `GATEHOUSE__*` environment variables, then validate it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: GatehouseConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| GatehouseError::Config(e.to_string()))
    }

    /// Reject configurations the gate cannot run safely with.
    pub fn validate(&self) -> Result<()> {
        let limits = &self.rate_limiting;
        if limits.enabled && (limits.window_ms == 0 || limits.max_requests == 0) {
            return Err(GatehouseError::Config(
                "rate_limiting.window_ms and rate_limiting.max_requests must be positive".into(),
            ));
        }

        let session = &self.session;
        if session.access_ttl_secs == 0 || session.refresh_ttl_secs == 0 {
            return Err(GatehouseError::Config(
                "session token lifetimes must be positive".into(),
            ));
        }
        if session.access_ttl_secs >= session.refresh_ttl_secs {
            return Err(GatehouseError::Config(
                "session.access_ttl_secs must be shorter than session.refresh_ttl_secs".into(),
            ));
        }
        if session.access_signing_key.is_empty() || session.refresh_signing_key.is_empty() {
            return Err(GatehouseError::Config(
                "session.access_signing_key and session.refresh_signing_key are required".into(),
            ));
        }
        if session.access_signing_key == session.refresh_signing_key {
            return Err(GatehouseError::Config(
                "access and refresh tokens must use different signing keys".into(),
            ));
        }

        if self.store.command_timeout_ms == 0 {
            return Err(GatehouseError::Config(
                "store.command_timeout_ms must be positive".into(),
            ));
        }

        Ok(())
    }
}
