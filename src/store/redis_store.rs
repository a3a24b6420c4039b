//! Redis-backed shared store.
//!
//! All instances of the service point at the same Redis deployment, which makes
//! it the single source of truth for window records and session liveness.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, info, warn};

use super::backend::{SharedStore, StoreScript};
use crate::error::StoreError;

/// A [`SharedStore`] talking to Redis through a multiplexed connection manager.
///
/// The connection manager is cheap to clone and reconnects on its own, so one
/// instance is shared by every request.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    scripts: HashMap<StoreScript, Script>,
    command_timeout: Duration,
}

impl RedisStore {
    /// Connect to Redis and verify the server answers.
    pub async fn connect(url: &str, command_timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| {
            warn!(error = %e, "Failed to create Redis client");
            StoreError::Unavailable(format!("invalid Redis URL: {}", e))
        })?;

        let connection = with_deadline(command_timeout, ConnectionManager::new(client))
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to connect to Redis");
                e
            })?;

        let store = Self {
            connection,
            scripts: HashMap::from([(
                StoreScript::SlidingWindow,
                Script::new(StoreScript::SlidingWindow.source()),
            )]),
            command_timeout,
        };

        let pong: String = store
            .bounded(|mut conn| async move { redis::cmd("PING").query_async(&mut conn).await })
            .await?;
        debug!(reply = %pong, "Redis answered PING");
        info!("Connected to shared store");

        Ok(store)
    }

    /// Run one Redis call under the configured deadline.
    async fn bounded<T, F, Fut>(&self, call: F) -> Result<T, StoreError>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        with_deadline(self.command_timeout, call(self.connection.clone())).await
    }
}

async fn with_deadline<T>(
    deadline: Duration,
    call: impl Future<Output = redis::RedisResult<T>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(deadline, call).await {
        Ok(reply) => reply.map_err(StoreError::from),
        Err(_) => Err(StoreError::Timeout(deadline)),
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn eval(
        &self,
        script: StoreScript,
        keys: &[&str],
        args: &[String],
    ) -> Result<i64, StoreError> {
        let compiled = self
            .scripts
            .get(&script)
            .ok_or_else(|| StoreError::UnexpectedReply(format!("{:?} is not loaded", script)))?;

        let mut invocation = compiled.prepare_invoke();
        for key in keys {
            invocation.key(*key);
        }
        for arg in args {
            invocation.arg(arg.as_str());
        }

        // EVALSHA, falling back to SCRIPT LOAD when the server lost the script
        self.bounded(|mut conn| async move {
            let reply: i64 = invocation.invoke_async(&mut conn).await?;
            Ok(reply)
        })
        .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.bounded(|mut conn| async move {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(ttl_millis(ttl))
                .query_async::<()>(&mut conn)
                .await
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.bounded(|mut conn| async move {
            redis::cmd("GET").arg(key).query_async(&mut conn).await
        })
        .await
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let removed: i64 = self
            .bounded(|mut conn| async move {
                redis::cmd("DEL").arg(key).query_async(&mut conn).await
            })
            .await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let found: i64 = self
            .bounded(|mut conn| async move {
                redis::cmd("EXISTS").arg(key).query_async(&mut conn).await
            })
            .await?;
        Ok(found > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let updated: i64 = self
            .bounded(|mut conn| async move {
                redis::cmd("PEXPIRE")
                    .arg(key)
                    .arg(ttl_millis(ttl))
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(updated == 1)
    }
}
