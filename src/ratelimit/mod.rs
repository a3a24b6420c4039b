//! Distributed sliding window rate limiting.

mod key;
mod limiter;
mod middleware;

pub use key::{client_address, KeyStrategy, RateLimitKey};
pub use limiter::{Decision, SlidingWindowLimiter};
pub use middleware::{FailurePolicy, RateLimit, RateLimitLayer};
