//! Configuration management for Gatekeep.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{GatekeepError, Result};
use crate::ratelimit::{LimiterConfig, RateConfig, TokenRateConfig, DEFAULT_TOKEN_HEADER};
use crate::store::{MemoryStore, RedisStore, RedisStoreOptions, Store};

/// Prefix for environment overrides, e.g. `GATEKEEP__LIMITS__IP__REQUESTS_PER_WINDOW`.
pub const ENV_PREFIX: &str = "GATEKEEP";

/// Main configuration for the Gatekeep service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeepConfig {
    /// Rate limit policies
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Sweep configuration
    #[serde(default)]
    pub sweep: SweepConfig,

    /// State store selection
    #[serde(default)]
    pub store: StoreConfig,
}

/// Policies for IP and token identities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Limits keyed by client IP
    #[serde(default)]
    pub ip: RateLimitSettings,

    /// Limits keyed by request token; disabled when absent
    #[serde(default)]
    pub token: Option<TokenLimitSettings>,
}

/// Limits applied to IP identities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Requests allowed per window
    #[serde(default = "default_ip_requests")]
    pub requests_per_window: u64,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Block duration in seconds
    #[serde(default = "default_block_secs")]
    pub block_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_window: default_ip_requests(),
            window_secs: default_window_secs(),
            block_secs: default_block_secs(),
        }
    }
}

impl RateLimitSettings {
    fn to_rate_config(&self) -> Result<RateConfig> {
        RateConfig::new(
            self.requests_per_window,
            Duration::from_secs(self.window_secs),
            Duration::from_secs(self.block_secs),
        )
    }
}

/// Limits applied to token identities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenLimitSettings {
    /// Header carrying the token
    #[serde(default = "default_token_header")]
    pub header: String,

    /// Requests allowed per window
    #[serde(default = "default_token_requests")]
    pub requests_per_window: u64,

    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Block duration in seconds
    #[serde(default = "default_block_secs")]
    pub block_secs: u64,
}

impl Default for TokenLimitSettings {
    fn default() -> Self {
        Self {
            header: default_token_header(),
            requests_per_window: default_token_requests(),
            window_secs: default_window_secs(),
            block_secs: default_block_secs(),
        }
    }
}

/// Sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Interval between sweeps in milliseconds
    #[serde(default = "default_sweep_interval_ms")]
    pub interval_ms: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_sweep_interval_ms(),
        }
    }
}

/// Which store holds client state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// In-process map
    #[default]
    Memory,
    /// Shared Redis instance
    Redis(RedisSettings),
}

/// Redis store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    /// Connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Key namespace
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,

    /// Entry retention in seconds
    #[serde(default = "default_redis_ttl_secs")]
    pub ttl_secs: u64,

    /// Per-command timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            prefix: default_redis_prefix(),
            ttl_secs: default_redis_ttl_secs(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

impl RedisSettings {
    /// Options for [`RedisStore`].
    pub fn store_options(&self) -> RedisStoreOptions {
        RedisStoreOptions {
            prefix: self.prefix.clone(),
            ttl: Duration::from_secs(self.ttl_secs),
            operation_timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

fn default_ip_requests() -> u64 {
    10
}

fn default_token_requests() -> u64 {
    100
}

fn default_window_secs() -> u64 {
    1
}

fn default_block_secs() -> u64 {
    60
}

fn default_token_header() -> String {
    DEFAULT_TOKEN_HEADER.to_string()
}

fn default_sweep_interval_ms() -> u64 {
    1000
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_redis_prefix() -> String {
    crate::store::DEFAULT_KEY_PREFIX.to_string()
}

fn default_redis_ttl_secs() -> u64 {
    crate::store::DEFAULT_TTL.as_secs()
}

fn default_redis_timeout_ms() -> u64 {
    crate::store::DEFAULT_OPERATION_TIMEOUT.as_millis() as u64
}

impl GatekeepConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatekeepError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load an optional YAML file, then apply `GATEKEEP__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::layered(path, Self::environment())
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    fn layered(path: Option<&Path>, environment: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Yaml));
        }

        builder
            .add_source(environment)
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GatekeepError::Config(e.to_string()))
    }

    /// Validated limiter policies.
    pub fn limiter_config(&self) -> Result<LimiterConfig> {
        let ip = self.limits.ip.to_rate_config()?;

        let token = match &self.limits.token {
            Some(token) => {
                if token.header.trim().is_empty() {
                    return Err(GatekeepError::Config("token header must not be empty".to_string()));
                }
                let rate = RateConfig::new(
                    token.requests_per_window,
                    Duration::from_secs(token.window_secs),
                    Duration::from_secs(token.block_secs),
                )?;
                Some(TokenRateConfig::new(token.header.clone(), rate))
            }
            None => None,
        };

        Ok(LimiterConfig { ip, token })
    }

    /// Validated sweep cadence.
    pub fn sweep_interval(&self) -> Result<Duration> {
        if self.sweep.interval_ms == 0 {
            return Err(GatekeepError::Config("sweep interval must be non-zero".to_string()));
        }
        Ok(Duration::from_millis(self.sweep.interval_ms))
    }
}

impl StoreConfig {
    /// Construct the configured store.
    pub async fn open(&self) -> Result<Arc<dyn Store>> {
        match self {
            StoreConfig::Memory => {
                info!("Using in-memory state store");
                Ok(Arc::new(MemoryStore::new()))
            }
            StoreConfig::Redis(settings) => {
                let store = RedisStore::connect(&settings.url, settings.store_options()).await?;
                Ok(Arc::new(store))
            }
        }
    }
}
