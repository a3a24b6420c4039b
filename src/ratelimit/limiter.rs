//! Distributed sliding window rate limiter.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{LimiterError, StoreError};
use crate::store::{SharedStore, StoreScript};

/// Outcome of one limiter evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub admitted: bool,
    /// Requests inside the window, including this one
    pub count: u64,
    /// Maximum requests per window
    pub limit: u64,
}

impl Decision {
    /// Requests left in the current window.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.count)
    }
}

/// A sliding window limiter whose state lives in the shared store.
///
/// Each call is one round trip running the sliding window script, so
/// concurrent callers on any instance are totally ordered per key. Nothing is
/// cached locally between calls.
pub struct SlidingWindowLimiter {
    store: Arc<dyn SharedStore>,
    clock: Arc<dyn Clock>,
    window: Duration,
    max_requests: u64,
}

impl SlidingWindowLimiter {
    /// Create a limiter admitting `max_requests` per trailing `window`.
    pub fn new(store: Arc<dyn SharedStore>, window: Duration, max_requests: u64) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), window, max_requests)
    }

    /// Create a limiter reading time from the given clock.
    pub fn with_clock(
        store: Arc<dyn SharedStore>,
        clock: Arc<dyn Clock>,
        window: Duration,
        max_requests: u64,
    ) -> Self {
        Self {
            store,
            clock,
            window,
            max_requests,
        }
    }

    /// Record a request for `key` and decide whether it is admitted.
    ///
    /// The request counts against the window whether or not it is admitted.
    pub async fn allow(&self, key: &str) -> Result<Decision, LimiterError> {
        if key.is_empty() {
            return Err(LimiterError::EmptyKey);
        }

        let now = self.clock.now_millis();
        let window_ms = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);
        let member = format!("{}-{}", now, Uuid::new_v4().simple());

        trace!(key = %key, now, window_ms, "Evaluating sliding window");

        let count = self
            .store
            .eval(
                StoreScript::SlidingWindow,
                &[key],
                &[window_ms.to_string(), now.to_string(), member],
            )
            .await?;

        let count = u64::try_from(count).map_err(|_| {
            StoreError::UnexpectedReply(format!("negative window count {}", count))
        })?;
        let decision = Decision {
            admitted: count <= self.max_requests,
            count,
            limit: self.max_requests,
        };

        if !decision.admitted {
            debug!(
                key = %key,
                count,
                limit = self.max_requests,
                "Rate limit exceeded"
            );
        }

        Ok(decision)
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Maximum requests per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    /// Answers every window evaluation with a fixed reply.
    struct FixedReplyStore(i64);

    #[async_trait]
    impl SharedStore for FixedReplyStore {
        async fn eval(&self, _: StoreScript, _: &[&str], _: &[String]) -> Result<i64, StoreError> {
            Ok(self.0)
        }
        async fn set_ex(&self, _: &str, _: &str, _: Duration) -> Result<(), StoreError> {
            Ok(())
        }
        async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }
        async fn del(&self, _: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn exists(&self, _: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn expire(&self, _: &str, _: Duration) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    fn limiter_with_clock(window: Duration, max: u64) -> (Arc<SlidingWindowLimiter>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let limiter = SlidingWindowLimiter::with_clock(store, clock.clone(), window, max);
        (Arc::new(limiter), clock)
    }

    #[tokio::test]
    async fn test_fresh_key_is_admitted() {
        let (limiter, _) = limiter_with_clock(Duration::from_secs(1), 1);

        let decision = limiter.allow("fresh").await.unwrap();
        assert!(decision.admitted);
        assert_eq!(decision.count, 1);
        assert_eq!(decision.remaining(), 0);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let (limiter, _) = limiter_with_clock(Duration::from_secs(1), 1);
        assert_eq!(limiter.allow("").await, Err(LimiterError::EmptyKey));
    }

    #[tokio::test]
    async fn test_thousand_per_second_window() {
        let (limiter, clock) = limiter_with_clock(Duration::from_secs(1), 1000);

        for i in 1..=1000 {
            let decision = limiter.allow("a").await.unwrap();
            assert!(decision.admitted, "Request {} should be admitted", i);
            if i % 100 == 0 {
                clock.advance(Duration::from_millis(1));
            }
        }

        let decision = limiter.allow("a").await.unwrap();
        assert!(!decision.admitted);

        clock.advance(Duration::from_millis(1100));
        let decision = limiter.allow("a").await.unwrap();
        assert!(decision.admitted);
        assert_eq!(decision.count, 1);
    }

    #[tokio::test]
    async fn test_denied_requests_still_count() {
        let (limiter, clock) = limiter_with_clock(Duration::from_secs(1), 2);

        assert!(limiter.allow("k").await.unwrap().admitted);
        assert!(limiter.allow("k").await.unwrap().admitted);
        assert!(!limiter.allow("k").await.unwrap().admitted);

        // Half a window later the denied attempt is still inside the window
        clock.advance(Duration::from_millis(500));
        let decision = limiter.allow("k").await.unwrap();
        assert!(!decision.admitted);
        assert_eq!(decision.count, 4);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let (limiter, clock) = limiter_with_clock(Duration::from_secs(1), 2);

        assert!(limiter.allow("k").await.unwrap().admitted);
        clock.advance(Duration::from_millis(600));
        assert!(limiter.allow("k").await.unwrap().admitted);
        clock.advance(Duration::from_millis(300));
        assert!(!limiter.allow("k").await.unwrap().admitted);

        // The first request falls out of the window, the other two remain
        clock.advance(Duration::from_millis(200));
        let decision = limiter.allow("k").await.unwrap();
        assert_eq!(decision.count, 3);
        assert!(!decision.admitted);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (limiter, _) = limiter_with_clock(Duration::from_secs(1), 1);

        assert!(limiter.allow("a").await.unwrap().admitted);
        assert!(!limiter.allow("a").await.unwrap().admitted);
        assert!(limiter.allow("b").await.unwrap().admitted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_never_exceed_limit() {
        let (limiter, _) = limiter_with_clock(Duration::from_secs(1), 50);

        let calls = (0..100).map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.allow("race").await })
        });

        let admitted = futures::future::join_all(calls)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .filter(|decision| decision.admitted)
            .count();

        assert_eq!(admitted, 50);
    }

    #[tokio::test]
    async fn test_negative_count_is_an_error_not_an_admit() {
        let limiter = SlidingWindowLimiter::new(
            Arc::new(FixedReplyStore(-1)),
            Duration::from_secs(1),
            1,
        );

        assert!(matches!(
            limiter.allow("k").await,
            Err(LimiterError::Store(StoreError::UnexpectedReply(_)))
        ));
    }

    #[tokio::test]
    async fn test_store_count_drives_decision() {
        let limiter = SlidingWindowLimiter::new(
            Arc::new(FixedReplyStore(3)),
            Duration::from_secs(1),
            2,
        );

        let decision = limiter.allow("k").await.unwrap();
        assert!(!decision.admitted);
        assert_eq!(decision.count, 3);
        assert_eq!(decision.remaining(), 0);
    }
}
