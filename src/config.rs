//! Configuration management for Tollgate.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TollgateError};

/// Environment variables read at startup. Anything else in the process
/// environment is ignored.
const ENV_VARS: &[&str] = &[
    "LISTEN_ADDR",
    "ADMIN_ADDR",
    "IP_RATE_LIMIT",
    "TOKEN_RATE_LIMIT",
    "BLOCK_DURATION",
    "STORE",
    "REDIS_HOST",
    "REDIS_PORT",
    "SWEEP_INTERVAL_SECS",
];

/// Longest accepted block duration (one year). Keeps deadlines representable
/// as a tokio `Instant` and within the millisecond range of `PEXPIRE`.
pub const MAX_BLOCK_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Main configuration for the Tollgate service.
///
/// Field names double as the lowercase form of the environment variables
/// that override them (`IP_RATE_LIMIT` -> `ip_rate_limit`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address the rate limited HTTP listener binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Address of the admin listener (health, key inspection); disabled when unset
    #[serde(default)]
    pub admin_addr: Option<SocketAddr>,

    /// Requests per second allowed for anonymous clients
    #[serde(default = "default_ip_rate_limit")]
    pub ip_rate_limit: i64,

    /// Requests per second allowed for clients presenting an API key
    #[serde(default = "default_token_rate_limit")]
    pub token_rate_limit: i64,

    /// Block duration in seconds once a quota is exceeded
    #[serde(default = "default_block_duration")]
    pub block_duration: u64,

    /// Counter store backend
    #[serde(default)]
    pub store: StoreKind,

    /// Redis host, required for the redis backend
    #[serde(default)]
    pub redis_host: Option<String>,

    /// Redis port
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,

    /// How often the memory store purges expired records
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Counter store backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Process-local store, only meaningful for a single instance
    #[default]
    Memory,
    /// Shared Redis instance
    Redis,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            admin_addr: None,
            ip_rate_limit: default_ip_rate_limit(),
            token_rate_limit: default_token_rate_limit(),
            block_duration: default_block_duration(),
            store: StoreKind::default(),
            redis_host: None,
            redis_port: default_redis_port(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_ip_rate_limit() -> i64 {
    5
}

fn default_token_rate_limit() -> i64 {
    100
}

fn default_block_duration() -> u64 {
    300
}

fn default_redis_port() -> u16 {
    6379
}

fn default_sweep_interval() -> u64 {
    30
}

/// Quotas and block duration shared by the classifier and the engine.
///
/// Built once at startup from [`GatewayConfig`]; never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitSettings {
    /// Quota for `ip:` keys
    pub ip_quota: i64,
    /// Quota for `token:` keys
    pub token_quota: i64,
    /// How long a key stays blocked after its last over-quota request
    pub block_duration: Duration,
}

impl GatewayConfig {
    /// Load configuration from an optional YAML file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, std::env::vars())
    }

    /// Load configuration from an optional file and an explicit set of
    /// environment variables. Environment values win over the file.
    pub fn load_with_env<I>(path: Option<&Path>, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let env: config::Map<String, String> = vars
            .into_iter()
            .filter(|(key, _)| ENV_VARS.contains(&key.as_str()))
            .collect();

        let mut builder = Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: GatewayConfig = builder
            .add_source(Environment::default().try_parsing(true).source(Some(env)))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the rate limiter cannot operate with.
    ///
    /// Quotas are not checked: zero or negative quotas mean "deny all".
    pub fn validate(&self) -> Result<()> {
        if self.block_duration == 0 {
            return Err(TollgateError::Config(
                "BLOCK_DURATION must be at least 1 second".to_string(),
            ));
        }
        if self.block_duration > MAX_BLOCK_DURATION_SECS {
            return Err(TollgateError::Config(format!(
                "BLOCK_DURATION must be at most {} seconds",
                MAX_BLOCK_DURATION_SECS
            )));
        }
        if self.sweep_interval_secs == 0 {
            return Err(TollgateError::Config(
                "SWEEP_INTERVAL_SECS must be at least 1 second".to_string(),
            ));
        }
        if self.store == StoreKind::Redis && self.redis_host.as_deref().unwrap_or("").is_empty() {
            return Err(TollgateError::Config(
                "REDIS_HOST is required for the redis store".to_string(),
            ));
        }
        Ok(())
    }

    /// The immutable limit settings derived from this configuration.
    pub fn limit_settings(&self) -> LimitSettings {
        LimitSettings {
            ip_quota: self.ip_rate_limit,
            token_quota: self.token_rate_limit,
            block_duration: Duration::from_secs(self.block_duration),
        }
    }

    /// Connection URL for the redis backend, if a host is configured.
    pub fn redis_url(&self) -> Option<String> {
        self.redis_host
            .as_deref()
            .filter(|host| !host.is_empty())
            .map(|host| format!("redis://{}:{}/", host, self.redis_port))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
