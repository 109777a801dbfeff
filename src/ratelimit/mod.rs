//! Rate limiting logic and key classification.

mod classifier;
mod engine;
mod key;
mod record;

pub use classifier::{Classification, Classifier};
pub use engine::RateLimiter;
pub use key::{ParseKeyError, RateLimitKey, Scope};
pub use record::{CounterRecord, Decision, KeyState, WINDOW};
