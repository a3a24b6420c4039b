//! Gatehouse - Access Gate for HTTP Services
//!
//! This crate puts two checks in front of an HTTP application: a sliding
//! window rate limiter keyed by client, and bearer token authentication
//! backed by revocable server-side sessions. Both keep their state in a
//! shared store (Redis, or an in-process map for single nodes and tests) so
//! every gate instance enforces the same limits and sees the same sessions.

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod session;
pub mod store;
