//! Shared store trait for abstracting Redis and in-process implementations.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// Sliding window evaluation.
///
/// KEYS[1] = window key, ARGV = window ms, now ms, unique member.
/// Records the request, drops entries older than `now - window` and returns
/// how many requests remain inside the window, this one included.
const SLIDING_WINDOW_LUA: &str = r#"
local key = KEYS[1]
local window = tonumber(ARGV[1])
local now = tonumber(ARGV[2])
local member = ARGV[3]

redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. (now - window))
redis.call('ZADD', key, now, member)
local count = redis.call('ZCARD', key)
redis.call('PEXPIRE', key, window + 1)
return count
"#;

/// Server-side scripts the gate runs against the store.
///
/// Backends execute a script as one indivisible step: no other caller can
/// observe or modify the keys it touches half-way through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreScript {
    /// Prune, record and count one sliding window key.
    SlidingWindow,
}

impl StoreScript {
    /// Lua source of the script.
    pub fn source(&self) -> &'static str {
        match self {
            StoreScript::SlidingWindow => SLIDING_WINDOW_LUA,
        }
    }

    /// Number of keys the script expects.
    pub fn key_count(&self) -> usize {
        match self {
            StoreScript::SlidingWindow => 1,
        }
    }

    /// Number of arguments the script expects.
    pub fn arg_count(&self) -> usize {
        match self {
            StoreScript::SlidingWindow => 3,
        }
    }
}

/// Operations the gate needs from the shared key-value store.
///
/// Implementations must be safe to share across every concurrent request;
/// none of them may cache results between calls.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Run a script atomically and return its integer reply.
    async fn eval(
        &self,
        script: StoreScript,
        keys: &[&str],
        args: &[String],
    ) -> Result<i64, StoreError>;

    /// Set a string value that expires after `ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Get a string value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Delete a key. Returns whether it existed.
    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    /// Whether a key currently exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Reset the time-to-live of an existing key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;
}
