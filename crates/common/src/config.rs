//! Application configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Redis configuration.
    #[serde(default)]
    pub redis: RedisConfig,
    /// Signature verification settings.
    #[serde(default)]
    pub signature: SignatureConfig,
    /// Remote actor resolution settings.
    #[serde(default)]
    pub resolver: ResolverConfig,
    /// Outbound delivery settings.
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public URL of this instance.
    pub url: String,
}

/// Redis configuration.
///
/// When `url` is absent the engine runs with in-process caches and
/// direct delivery.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Key prefix for all Redis keys.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

/// HTTP signature settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SignatureConfig {
    /// Maximum accepted age of the `Date` header.
    #[serde(default = "default_date_tolerance_secs")]
    pub date_tolerance_secs: u64,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            date_tolerance_secs: default_date_tolerance_secs(),
        }
    }
}

/// Actor resolver and key cache settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_key_ttl_secs")]
    pub key_ttl_secs: u64,
    #[serde(default = "default_timeout_ttl_secs")]
    pub timeout_ttl_secs: u64,
    #[serde(default = "default_server_error_ttl_secs")]
    pub server_error_ttl_secs: u64,
    #[serde(default = "default_permanent_error_ttl_secs")]
    pub permanent_error_ttl_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// How often expired keys and failures are swept from the resolver caches.
    #[serde(default = "default_cache_prune_interval_secs")]
    pub cache_prune_interval_secs: u64,
    /// Key id of the instance actor used for authorized-fetch retries.
    #[serde(default)]
    pub system_key_id: Option<String>,
    /// PKCS#8 PEM private key of the instance actor.
    #[serde(default)]
    pub system_private_key_pem: Option<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            key_ttl_secs: default_key_ttl_secs(),
            timeout_ttl_secs: default_timeout_ttl_secs(),
            server_error_ttl_secs: default_server_error_ttl_secs(),
            permanent_error_ttl_secs: default_permanent_error_ttl_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            cache_prune_interval_secs: default_cache_prune_interval_secs(),
            system_key_id: None,
            system_private_key_pem: None,
        }
    }
}

/// Outbound delivery settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_max_per_window")]
    pub max_per_window: usize,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
    #[serde(default = "default_health_warn_ratio")]
    pub health_warn_ratio: f64,
    #[serde(default = "default_broker_connect_attempts")]
    pub broker_connect_attempts: u32,
    #[serde(default = "default_broker_backoff_cap_ms")]
    pub broker_backoff_cap_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_per_window: default_max_per_window(),
            max_delay_secs: default_max_delay_secs(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_secs: default_max_backoff_secs(),
            workers: default_workers(),
            request_timeout_secs: default_request_timeout_secs(),
            dedup_window_secs: default_dedup_window_secs(),
            health_interval_secs: default_health_interval_secs(),
            health_warn_ratio: default_health_warn_ratio(),
            broker_connect_attempts: default_broker_connect_attempts(),
            broker_backoff_cap_ms: default_broker_backoff_cap_ms(),
        }
    }
}

impl DeliveryConfig {
    /// Rate-limit window length.
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Longest delay the rate limiter may impose before shedding a job.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }

    /// Per-request timeout for outbound POSTs.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of the human-readable format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

fn default_redis_prefix() -> String {
    "fedi".to_string()
}

const fn default_date_tolerance_secs() -> u64 {
    30
}

const fn default_key_ttl_secs() -> u64 {
    60 * 60
}

const fn default_timeout_ttl_secs() -> u64 {
    30
}

const fn default_server_error_ttl_secs() -> u64 {
    2 * 60
}

const fn default_permanent_error_ttl_secs() -> u64 {
    10 * 60
}

const fn default_fetch_timeout_secs() -> u64 {
    10
}

const fn default_cache_prune_interval_secs() -> u64 {
    300
}

const fn default_window_ms() -> u64 {
    1000
}

const fn default_max_per_window() -> usize {
    10
}

const fn default_max_delay_secs() -> u64 {
    60
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_initial_backoff_ms() -> u64 {
    1000
}

const fn default_max_backoff_secs() -> u64 {
    60 * 60
}

const fn default_workers() -> usize {
    10
}

const fn default_request_timeout_secs() -> u64 {
    10
}

const fn default_dedup_window_secs() -> u64 {
    10 * 60
}

const fn default_health_interval_secs() -> u64 {
    60 * 60
}

const fn default_health_warn_ratio() -> f64 {
    0.95
}

const fn default_broker_connect_attempts() -> u32 {
    3
}

const fn default_broker_backoff_cap_ms() -> u64 {
    5000
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `FEDI_ENV`)
    /// 3. Environment variables with `FEDI__` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let env = std::env::var("FEDI_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("FEDI")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("FEDI")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                "[server]\nurl = \"https://local.example\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.server.port, 3000);
        assert!(config.redis.url.is_none());
        assert_eq!(config.signature.date_tolerance_secs, 30);
        assert_eq!(config.delivery.max_per_window, 10);
        assert_eq!(config.delivery.max_attempts, 5);
        assert_eq!(config.delivery.workers, 10);
        assert_eq!(config.delivery.max_delay(), Duration::from_secs(60));
    }

    #[test]
    fn test_failure_ttls_are_ordered() {
        let resolver = ResolverConfig::default();
        assert!(resolver.permanent_error_ttl_secs > resolver.server_error_ttl_secs);
        assert!(resolver.server_error_ttl_secs > resolver.timeout_ttl_secs);
    }
}
