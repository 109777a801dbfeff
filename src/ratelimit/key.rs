//! Rate limit key generation and parsing.

use std::fmt;
use std::str::FromStr;

/// Which identity a key was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Anonymous traffic, keyed by source address
    Ip,
    /// Traffic presenting an API key
    Token,
}

impl Scope {
    /// The tag used as the key prefix.
    pub fn tag(&self) -> &'static str {
        match self {
            Scope::Ip => "ip",
            Scope::Token => "token",
        }
    }
}

/// A key that uniquely identifies a rate limit counter.
///
/// Rendered as `<scope>:<identity>`. The identity is kept verbatim: no case
/// folding, ports included.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// The scope the identity belongs to
    pub scope: Scope,
    /// Source address or API key, exactly as received
    pub identity: String,
}

impl RateLimitKey {
    pub fn ip(address: impl Into<String>) -> Self {
        Self {
            scope: Scope::Ip,
            identity: address.into(),
        }
    }

    pub fn token(token: impl Into<String>) -> Self {
        Self {
            scope: Scope::Token,
            identity: token.into(),
        }
    }

    /// The string under which the counter is stored.
    pub fn to_store_key(&self) -> String {
        format!("{}:{}", self.scope.tag(), self.identity)
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_store_key())
    }
}

/// Error returned when a string is not a valid rendered key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid rate limit key: {0}")]
pub struct ParseKeyError(String);

impl FromStr for RateLimitKey {
    type Err = ParseKeyError;

    /// Parse `<scope>:<identity>`, splitting at the first `:` since
    /// addresses carry their port after another one.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tag, identity) = s.split_once(':').ok_or_else(|| ParseKeyError(s.to_string()))?;
        if identity.is_empty() {
            return Err(ParseKeyError(s.to_string()));
        }
        match tag {
            "ip" => Ok(Self::ip(identity)),
            "token" => Ok(Self::token(identity)),
            _ => Err(ParseKeyError(s.to_string())),
        }
    }
}
