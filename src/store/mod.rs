//! Shared store client: the single source of truth across service instances.

mod backend;
mod memory;
mod redis_store;

pub use backend::{SharedStore, StoreScript};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
