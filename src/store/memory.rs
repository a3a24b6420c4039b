//! In-process shared store for single-instance deployments and tests.
//!
//! Per-key atomicity comes from holding the `DashMap` shard lock for the whole
//! evaluation of a script, which mirrors what a Redis script gives across
//! instances. Expired keys are dropped lazily on access and by
//! [`MemoryStore::purge_expired`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

use super::backend::{SharedStore, StoreScript};
use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    /// (timestamp ms, member) pairs of a sliding window
    Window(Vec<(i64, String)>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<i64>,
}

impl Slot {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A [`SharedStore`] living in process memory.
pub struct MemoryStore {
    slots: DashMap<String, Slot>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create an empty store driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store driven by the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: DashMap::new(),
            clock,
        }
    }

    /// Drop every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_expired(now));
        let removed = before.saturating_sub(self.slots.len());
        if removed > 0 {
            trace!(removed, "Purged expired keys");
        }
        removed
    }

    /// Number of keys currently held, expired or not.
    pub fn key_count(&self) -> usize {
        self.slots.len()
    }

    fn sliding_window(&self, key: &str, args: &[String]) -> Result<i64, StoreError> {
        let window = parse_int(args, 0)?;
        let now = parse_int(args, 1)?;
        let member = args[2].clone();

        let mut slot = self.slots.entry(key.to_string()).or_insert_with(|| Slot {
            value: Value::Window(Vec::new()),
            expires_at: None,
        });

        if slot.is_expired(self.clock.now_millis()) {
            slot.value = Value::Window(Vec::new());
        }

        let Value::Window(events) = &mut slot.value else {
            return Err(StoreError::UnexpectedReply(format!(
                "key {} holds a string, not a window",
                key
            )));
        };

        let min = now - window;
        events.retain(|(ts, _)| *ts >= min);
        events.push((now, member));
        let count = events.len() as i64;
        slot.expires_at = Some(now + window + 1);

        Ok(count)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_int(args: &[String], index: usize) -> Result<i64, StoreError> {
    args[index].parse().map_err(|_| {
        StoreError::UnexpectedReply(format!("argument {} is not an integer", index + 1))
    })
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn eval(
        &self,
        script: StoreScript,
        keys: &[&str],
        args: &[String],
    ) -> Result<i64, StoreError> {
        if keys.len() != script.key_count() || args.len() != script.arg_count() {
            return Err(StoreError::UnexpectedReply(format!(
                "{:?} expects {} keys and {} args",
                script,
                script.key_count(),
                script.arg_count()
            )));
        }

        match script {
            StoreScript::SlidingWindow => self.sliding_window(keys[0], args),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = self.clock.now_millis().saturating_add(ttl_millis(ttl));
        self.slots.insert(
            key.to_string(),
            Slot {
                value: Value::Text(value.to_string()),
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now_millis();
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(entry) if entry.get().is_expired(now) => {
                entry.remove();
                Ok(None)
            }
            Entry::Occupied(entry) => match &entry.get().value {
                Value::Text(text) => Ok(Some(text.clone())),
                Value::Window(_) => Err(StoreError::UnexpectedReply(format!(
                    "key {} holds a window, not a string",
                    key
                ))),
            },
            Entry::Vacant(_) => Ok(None),
        }
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        Ok(self
            .slots
            .remove(key)
            .is_some_and(|(_, slot)| !slot.is_expired(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(entry) if entry.get().is_expired(now) => {
                entry.remove();
                Ok(false)
            }
            Entry::Occupied(_) => Ok(true),
            Entry::Vacant(_) => Ok(false),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(entry) if entry.get().is_expired(now) => {
                entry.remove();
                Ok(false)
            }
            Entry::Occupied(mut entry) => {
                entry.get_mut().expires_at = Some(now.saturating_add(ttl_millis(ttl)));
                Ok(true)
            }
            Entry::Vacant(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn window_args(window: i64, now: i64, member: &str) -> Vec<String> {
        vec![window.to_string(), now.to_string(), member.to_string()]
    }

    #[tokio::test]
    async fn test_set_get_with_expiry() {
        let clock = Arc::new(ManualClock::new(0));
        let store = MemoryStore::with_clock(clock.clone());

        store
            .set_ex("k", "v", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert!(store.exists("k").await.unwrap());

        clock.advance(Duration::from_secs(10));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_del_reports_presence() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", Duration::from_secs(60)).await.unwrap();

        assert!(store.del("k").await.unwrap());
        assert!(!store.del("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_expire_only_touches_live_keys() {
        let clock = Arc::new(ManualClock::new(0));
        let store = MemoryStore::with_clock(clock.clone());
        store.set_ex("k", "v", Duration::from_secs(5)).await.unwrap();

        clock.advance(Duration::from_secs(4));
        assert!(store.expire("k", Duration::from_secs(5)).await.unwrap());

        clock.advance(Duration::from_secs(4));
        assert!(store.exists("k").await.unwrap());

        clock.advance(Duration::from_secs(2));
        assert!(!store.expire("k", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_sliding_window_counts_and_prunes() {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = MemoryStore::with_clock(clock.clone());

        for i in 0..3 {
            let count = store
                .eval(
                    StoreScript::SlidingWindow,
                    &["w"],
                    &window_args(1_000, 10_000, &format!("m{}", i)),
                )
                .await
                .unwrap();
            assert_eq!(count, i + 1);
        }

        // Entries at exactly now - window still count
        clock.set_millis(11_000);
        let count = store
            .eval(
                StoreScript::SlidingWindow,
                &["w"],
                &window_args(1_000, 11_000, "m3"),
            )
            .await
            .unwrap();
        assert_eq!(count, 4);

        clock.set_millis(11_001);
        let count = store
            .eval(
                StoreScript::SlidingWindow,
                &["w"],
                &window_args(1_000, 11_001, "m4"),
            )
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_eval_rejects_wrong_arity() {
        let store = MemoryStore::new();
        let result = store
            .eval(StoreScript::SlidingWindow, &["w"], &["1".to_string()])
            .await;
        assert!(matches!(result, Err(StoreError::UnexpectedReply(_))));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let clock = Arc::new(ManualClock::new(0));
        let store = MemoryStore::with_clock(clock.clone());
        store.set_ex("a", "1", Duration::from_secs(1)).await.unwrap();
        store.set_ex("b", "1", Duration::from_secs(5)).await.unwrap();

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.key_count(), 1);
    }
}
