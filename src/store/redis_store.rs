//! Redis counter store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use super::{CounterStore, StoreError};

/// Counter store backed by a Redis server.
///
/// Every call maps onto a single Redis command, so atomicity per key comes
/// from Redis itself. The connection manager reconnects on its own; a
/// failed command is reported, never retried here.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis and verify the connection with a `PING`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        info!(url = %url, "Connecting to Redis counter store");

        let client = redis::Client::open(url).map_err(|e| {
            warn!(error = %e, "Invalid Redis connection URL");
            StoreError::Unavailable(e)
        })?;
        let connection = ConnectionManager::new(client).await.map_err(|e| {
            warn!(error = %e, "Failed to connect to Redis");
            StoreError::Unavailable(e)
        })?;

        let store = Self { connection };
        store.ping().await?;

        info!("Connected to Redis counter store");
        Ok(store)
    }
}

/// Redis takes millisecond ttls; anything shorter than 1ms rounds up.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<i64> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.connection.clone();
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let updated: bool = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(updated)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.connection.clone();
        // -2: no such key, -1: no expiry
        let millis: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok(u64::try_from(millis).ok().map(Duration::from_millis))
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!(reply = %reply, "Redis ping");
        Ok(())
    }
}
