//! Mapping from request identity to rate limit key and quota.

use crate::config::LimitSettings;

use super::key::{RateLimitKey, Scope};

/// The key and quota that apply to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub key: RateLimitKey,
    pub quota: i64,
}

/// Picks the rate limit key and quota for a request.
///
/// A non-empty API key always wins over the source address.
#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    ip_quota: i64,
    token_quota: i64,
}

impl Classifier {
    pub fn new(settings: &LimitSettings) -> Self {
        Self {
            ip_quota: settings.ip_quota,
            token_quota: settings.token_quota,
        }
    }

    /// Classify a request by its source address and optional API key.
    pub fn classify(&self, source_address: &str, token: Option<&str>) -> Classification {
        match token.filter(|token| !token.is_empty()) {
            Some(token) => Classification {
                key: RateLimitKey::token(token),
                quota: self.token_quota,
            },
            None => Classification {
                key: RateLimitKey::ip(source_address),
                quota: self.ip_quota,
            },
        }
    }

    /// The configured quota for a scope.
    pub fn quota_for(&self, scope: Scope) -> i64 {
        match scope {
            Scope::Ip => self.ip_quota,
            Scope::Token => self.token_quota,
        }
    }
}
