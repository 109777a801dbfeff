//! Counter store abstraction.
//!
//! The rate limiter keeps no state of its own: every counter lives in a
//! store that offers atomic get/set/increment/expire primitives with
//! Redis semantics. Two backends are provided, an in-process map for
//! single instances and Redis for shared deployments.

mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// Errors surfaced by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Counter store unavailable: {0}")]
    Unavailable(#[from] redis::RedisError),
    #[error("Counter store operation failed: {0}")]
    Operation(String),
}

/// Atomic counter primitives the rate limiter is built on.
///
/// Implementations must make each call atomic with respect to concurrent
/// callers on the same key. Expired records behave exactly like absent ones.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current value of `key`, or `None` when no live record exists.
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Write `value` under `key`, replacing any record, expiring after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError>;

    /// Increment `key` by one and return the new value.
    ///
    /// A missing key is created at 1 without an expiry; an existing key keeps its ttl.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Set the ttl of an existing key. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Remaining time to live; `None` when the key is absent or never expires.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Remove `key`. Returns `true` if a record was deleted.
    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;
}
