//! Configuration for the BlackBox webhook service.

use std::time::Duration;

use anyhow::{Context, Result};
use blackbox_delivery::{
    retry::{BackoffStrategy, RetryPolicy},
    ClientConfig, DeliveryConfig,
};
use blackbox_enrichment::{EnrichmentConfig, LimiterConfig};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.toml";

/// Longest accepted dead-letter retention: one hundred years.
const MAX_RETENTION_HOURS: u64 = 100 * 365 * 24;

/// Service configuration with defaults, file and environment overrides.
///
/// Sources in priority order:
/// 1. Environment variables (highest)
/// 2. `config.toml`
/// 3. Built-in defaults
///
/// # Example
///
/// ```no_run
/// use blackbox::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
///
/// println!("draining every {}s", config.drain_interval_seconds);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Database
    /// PostgreSQL connection URL.
    ///
    /// Environment variable: `DATABASE_URL`
    #[serde(default = "default_database_url", alias = "DATABASE_URL")]
    pub database_url: String,
    /// Maximum number of pooled connections.
    ///
    /// Environment variable: `DATABASE_MAX_CONNECTIONS`
    #[serde(default = "default_max_connections", alias = "DATABASE_MAX_CONNECTIONS")]
    pub database_max_connections: u32,
    /// Connections kept open while idle.
    ///
    /// Environment variable: `DATABASE_MIN_CONNECTIONS`
    #[serde(default = "default_min_connections", alias = "DATABASE_MIN_CONNECTIONS")]
    pub database_min_connections: u32,
    /// Connection acquire timeout in seconds.
    ///
    /// Environment variable: `DATABASE_CONNECTION_TIMEOUT`
    #[serde(default = "default_acquire_timeout", alias = "DATABASE_CONNECTION_TIMEOUT")]
    pub database_connection_timeout: u64,
    /// Idle connection timeout in seconds.
    ///
    /// Environment variable: `DATABASE_IDLE_TIMEOUT`
    #[serde(default = "default_idle_timeout", alias = "DATABASE_IDLE_TIMEOUT")]
    pub database_idle_timeout: u64,
    /// Maximum connection lifetime in seconds.
    ///
    /// Environment variable: `DATABASE_MAX_LIFETIME`
    #[serde(default = "default_max_lifetime", alias = "DATABASE_MAX_LIFETIME")]
    pub database_max_lifetime: u64,

    // Drain
    /// Seconds between drain cycles.
    ///
    /// Environment variable: `DRAIN_INTERVAL_SECONDS`
    #[serde(default = "default_drain_interval", alias = "DRAIN_INTERVAL_SECONDS")]
    pub drain_interval_seconds: u64,
    /// Failed cycles before a webhook is dead-lettered.
    ///
    /// Environment variable: `MAX_DELIVERY_ATTEMPTS`
    #[serde(default = "default_max_attempts", alias = "MAX_DELIVERY_ATTEMPTS")]
    pub max_delivery_attempts: u32,
    /// Base of the exponential backoff between cycles, in seconds.
    ///
    /// Environment variable: `DRAIN_BACKOFF_BASE_SECONDS`
    #[serde(default = "default_backoff_base", alias = "DRAIN_BACKOFF_BASE_SECONDS")]
    pub drain_backoff_base_seconds: u64,
    /// Upper bound of the backoff between cycles, in seconds.
    ///
    /// Environment variable: `DRAIN_MAX_BACKOFF_SECONDS`
    #[serde(default = "default_max_backoff", alias = "DRAIN_MAX_BACKOFF_SECONDS")]
    pub drain_max_backoff_seconds: u64,
    /// Jitter applied to the backoff between cycles (0.0 to 1.0).
    ///
    /// Environment variable: `DRAIN_JITTER_FACTOR`
    #[serde(default = "default_jitter_factor", alias = "DRAIN_JITTER_FACTOR")]
    pub drain_jitter_factor: f64,
    /// Fixed backoff after an unexpected processing failure, in seconds.
    ///
    /// Environment variable: `DRAIN_FAULT_BACKOFF_SECONDS`
    #[serde(default = "default_fault_backoff", alias = "DRAIN_FAULT_BACKOFF_SECONDS")]
    pub drain_fault_backoff_seconds: u64,
    /// Linear backoff base of in-process dispatch retries, in milliseconds.
    ///
    /// Environment variable: `DISPATCH_BACKOFF_BASE_MS`
    #[serde(default = "default_dispatch_backoff", alias = "DISPATCH_BACKOFF_BASE_MS")]
    pub dispatch_backoff_base_ms: u64,
    /// Grace period for the in-flight cycle at shutdown, in seconds.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECONDS`
    #[serde(default = "default_shutdown_timeout", alias = "SHUTDOWN_TIMEOUT_SECONDS")]
    pub shutdown_timeout_seconds: u64,
    /// Hours a dead letter is kept; 0 keeps them until an operator acts.
    ///
    /// Environment variable: `DEAD_LETTER_RETENTION_HOURS`
    #[serde(default, alias = "DEAD_LETTER_RETENTION_HOURS")]
    pub dead_letter_retention_hours: u64,

    // Client
    /// Timeout of a single webhook POST in seconds.
    ///
    /// Environment variable: `DELIVERY_TIMEOUT_SECONDS`
    #[serde(default = "default_delivery_timeout", alias = "DELIVERY_TIMEOUT_SECONDS")]
    pub delivery_timeout_seconds: u64,

    // Enrichment
    /// Seconds an enrichment result stays fresh.
    ///
    /// Environment variable: `ENRICHMENT_CACHE_TTL_SECONDS`
    #[serde(default = "default_cache_ttl", alias = "ENRICHMENT_CACHE_TTL_SECONDS")]
    pub enrichment_cache_ttl_seconds: u64,
    /// Token bucket capacity per partition.
    ///
    /// Environment variable: `ENRICHMENT_RATE_CAPACITY`
    #[serde(default = "default_rate_capacity", alias = "ENRICHMENT_RATE_CAPACITY")]
    pub enrichment_rate_capacity: u32,
    /// Tokens regained per second.
    ///
    /// Environment variable: `ENRICHMENT_RATE_REFILL_PER_SECOND`
    #[serde(default = "default_refill_rate", alias = "ENRICHMENT_RATE_REFILL_PER_SECOND")]
    pub enrichment_rate_refill_per_second: f64,
    /// Number of limiter partitions.
    ///
    /// Environment variable: `ENRICHMENT_PARTITIONS`
    #[serde(default = "default_partitions", alias = "ENRICHMENT_PARTITIONS")]
    pub enrichment_partitions: u64,

    // Logging
    /// Log filter.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl Config {
    /// Loads defaults, then `config.toml`, then environment overrides.
    ///
    /// # Errors
    ///
    /// Returns error if a source cannot be parsed or the result is invalid.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Delivery engine settings.
    pub fn to_delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            drain_interval: Duration::from_secs(self.drain_interval_seconds),
            max_attempts: self.max_delivery_attempts,
            retry_policy: self.to_retry_policy(),
            fault_backoff: Duration::from_secs(self.drain_fault_backoff_seconds),
            dispatch_backoff_base: Duration::from_millis(self.dispatch_backoff_base_ms),
            client_config: self.to_client_config(),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_seconds),
            dead_letter_retention: (self.dead_letter_retention_hours > 0).then(|| {
                Duration::from_secs(self.dead_letter_retention_hours.saturating_mul(3600))
            }),
        }
    }

    /// HTTP client settings.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.delivery_timeout_seconds),
            ..ClientConfig::default()
        }
    }

    /// Backoff between drain cycles.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_delivery_attempts,
            base_delay: Duration::from_secs(self.drain_backoff_base_seconds),
            max_delay: Duration::from_secs(self.drain_max_backoff_seconds),
            jitter_factor: self.drain_jitter_factor,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }

    /// Enrichment cache and limiter settings.
    pub fn to_enrichment_config(&self) -> EnrichmentConfig {
        EnrichmentConfig {
            ttl: Duration::from_secs(self.enrichment_cache_ttl_seconds),
            partitions: self.enrichment_partitions,
            limiter: LimiterConfig {
                capacity: self.enrichment_rate_capacity,
                refill_per_second: self.enrichment_rate_refill_per_second,
            },
        }
    }

    /// Database URL with the password masked, for logging.
    pub fn database_url_masked(&self) -> String {
        let url = &self.database_url;
        let userinfo_start = url.find("://").map_or(0, |pos| pos + 3);
        if let Some(at_pos) = url[userinfo_start..].find('@').map(|pos| pos + userinfo_start) {
            if let Some(colon_pos) = url[userinfo_start..at_pos].find(':') {
                let mut masked = url.clone();
                masked.replace_range(userinfo_start + colon_pos + 1..at_pos, "***");
                return masked;
            }
        }
        url.clone()
    }

    /// Checks values the service cannot run with.
    ///
    /// # Errors
    ///
    /// Returns error naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.database_max_connections == 0 {
            anyhow::bail!("database max_connections must be greater than 0");
        }

        if self.database_min_connections > self.database_max_connections {
            anyhow::bail!("database min_connections cannot exceed max_connections");
        }

        if self.drain_interval_seconds == 0 {
            anyhow::bail!("drain_interval_seconds must be greater than 0");
        }

        if self.max_delivery_attempts == 0 {
            anyhow::bail!("max_delivery_attempts must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.drain_jitter_factor) {
            anyhow::bail!("drain_jitter_factor must be between 0.0 and 1.0");
        }

        if self.dead_letter_retention_hours > MAX_RETENTION_HOURS {
            anyhow::bail!("dead_letter_retention_hours must not exceed {MAX_RETENTION_HOURS}");
        }

        if self.delivery_timeout_seconds == 0 {
            anyhow::bail!("delivery_timeout_seconds must be greater than 0");
        }

        if self.enrichment_rate_capacity == 0 {
            anyhow::bail!("enrichment_rate_capacity must be greater than 0");
        }

        let refill = self.enrichment_rate_refill_per_second;
        if refill.is_nan() || refill <= 0.0 {
            anyhow::bail!("enrichment_rate_refill_per_second must be positive");
        }

        if self.enrichment_partitions == 0 {
            anyhow::bail!("enrichment_partitions must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            database_max_connections: default_max_connections(),
            database_min_connections: default_min_connections(),
            database_connection_timeout: default_acquire_timeout(),
            database_idle_timeout: default_idle_timeout(),
            database_max_lifetime: default_max_lifetime(),
            drain_interval_seconds: default_drain_interval(),
            max_delivery_attempts: default_max_attempts(),
            drain_backoff_base_seconds: default_backoff_base(),
            drain_max_backoff_seconds: default_max_backoff(),
            drain_jitter_factor: default_jitter_factor(),
            drain_fault_backoff_seconds: default_fault_backoff(),
            dispatch_backoff_base_ms: default_dispatch_backoff(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            dead_letter_retention_hours: 0,
            delivery_timeout_seconds: default_delivery_timeout(),
            enrichment_cache_ttl_seconds: default_cache_ttl(),
            enrichment_rate_capacity: default_rate_capacity(),
            enrichment_rate_refill_per_second: default_refill_rate(),
            enrichment_partitions: default_partitions(),
            rust_log: default_log_level(),
        }
    }
}

fn default_database_url() -> String {
    "postgresql://localhost/blackbox".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_max_lifetime() -> u64 {
    1800
}

fn default_drain_interval() -> u64 {
    blackbox_delivery::DEFAULT_DRAIN_INTERVAL_SECONDS
}

fn default_max_attempts() -> u32 {
    blackbox_delivery::DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_base() -> u64 {
    1
}

fn default_max_backoff() -> u64 {
    86_400
}

fn default_jitter_factor() -> f64 {
    0.0
}

fn default_fault_backoff() -> u64 {
    blackbox_delivery::DEFAULT_FAULT_BACKOFF_SECONDS
}

fn default_dispatch_backoff() -> u64 {
    100
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_delivery_timeout() -> u64 {
    blackbox_delivery::DEFAULT_TIMEOUT_SECONDS
}

fn default_cache_ttl() -> u64 {
    blackbox_enrichment::DEFAULT_TTL_SECONDS
}

fn default_rate_capacity() -> u32 {
    5
}

fn default_refill_rate() -> f64 {
    1.0
}

fn default_partitions() -> u64 {
    blackbox_enrichment::DEFAULT_PARTITIONS
}

fn default_log_level() -> String {
    "info".to_string()
}
