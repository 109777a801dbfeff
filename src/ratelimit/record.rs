//! Logical state of a counter record.
//!
//! The store only ever holds `(count, ttl)` for a key. Whether that record
//! is counting requests in a window or marking a blocked client is decided
//! by comparing the count to the quota at read time.

use std::time::Duration;

use serde::Serialize;

/// The width of a counting window.
pub const WINDOW: Duration = Duration::from_secs(1);

/// Outcome of a rate limit decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed
    Allowed,
    /// The key is over its quota or blocked
    Limited,
}

impl Decision {
    pub fn is_limited(&self) -> bool {
        matches!(self, Decision::Limited)
    }
}

/// The `(count, ttl)` pair stored for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRecord {
    pub count: i64,
    /// `None` when the store reports no expiry
    pub ttl: Option<Duration>,
}

/// What a key's record means for a given quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum KeyState {
    /// No record: the next request opens a new window
    Fresh,
    /// Counting requests within the current window
    Counting {
        count: i64,
        #[serde(rename = "ttl_ms", serialize_with = "serialize_ttl")]
        ttl: Option<Duration>,
    },
    /// Blocked until the ttl runs out
    Blocked {
        count: i64,
        #[serde(rename = "ttl_ms", serialize_with = "serialize_ttl")]
        ttl: Option<Duration>,
    },
}

impl KeyState {
    /// Derive the state of an optional record against `quota`.
    pub fn derive(record: Option<CounterRecord>, quota: i64) -> Self {
        match record {
            None => KeyState::Fresh,
            Some(CounterRecord { count, ttl }) if count >= quota => KeyState::Blocked { count, ttl },
            Some(CounterRecord { count, ttl }) => KeyState::Counting { count, ttl },
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, KeyState::Blocked { .. })
    }
}

fn serialize_ttl<S>(ttl: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match ttl {
        Some(ttl) => serializer.serialize_some(&(ttl.as_millis() as u64)),
        None => serializer.serialize_none(),
    }
}
