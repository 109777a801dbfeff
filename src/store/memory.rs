//! In-process counter store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use super::{CounterStore, StoreError};

/// A counter value with an optional expiry deadline.
#[derive(Debug, Clone, Copy)]
struct Record {
    value: i64,
    expires_at: Option<Instant>,
}

impl Record {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| deadline > now)
    }
}

fn deadline(now: Instant, ttl: Duration) -> Result<Instant, StoreError> {
    now.checked_add(ttl)
        .ok_or_else(|| StoreError::Operation(format!("ttl of {:?} is out of range", ttl)))
}

/// Counter store backed by a concurrent map.
///
/// Each operation holds the shard lock of its key for its whole duration,
/// which gives the same per-key atomicity as a Redis command. Expired
/// records are treated as absent on access and purged by [`purge_expired`].
///
/// [`purge_expired`]: MemoryStore::purge_expired
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, Record>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired record and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, record| record.is_live(now));
        let purged = before.saturating_sub(self.records.len());
        if purged > 0 {
            debug!(purged, "Purged expired counter records");
        }
        purged
    }

    /// Purge expired records every `period` until the task is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                store.purge_expired();
            }
        })
    }

    /// Number of records held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let now = Instant::now();
        Ok(self
            .records
            .get(key)
            .filter(|record| record.is_live(now))
            .map(|record| record.value))
    }

    async fn set_with_ttl(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = deadline(Instant::now(), ttl)?;
        self.records.insert(
            key.to_string(),
            Record {
                value,
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let now = Instant::now();
        match self.records.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                if record.is_live(now) {
                    record.value = record.value.checked_add(1).ok_or_else(|| {
                        StoreError::Operation(format!("increment would overflow for {}", key))
                    })?;
                } else {
                    *record = Record {
                        value: 1,
                        expires_at: None,
                    };
                }
                Ok(record.value)
            }
            Entry::Vacant(entry) => {
                entry.insert(Record {
                    value: 1,
                    expires_at: None,
                });
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        match self.records.get_mut(key) {
            Some(mut record) if record.is_live(now) => {
                record.expires_at = Some(deadline(now, ttl)?);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = Instant::now();
        Ok(self
            .records
            .get(key)
            .filter(|record| record.is_live(now))
            .and_then(|record| record.expires_at)
            .map(|deadline| deadline.saturating_duration_since(now)))
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        Ok(self
            .records
            .remove(key)
            .is_some_and(|(_, record)| record.is_live(now)))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
