//! Environment-based configuration for the gateway and the collectors.
//!
//! Every key has a default except `DATABASE_URL` (required by the collector
//! only) and `COLLECTOR_SOURCE` (required by the collector only).
//!
//! | Key | Default |
//! |-----|---------|
//! | `STREAM_BROKERS` | `localhost:9092` |
//! | `STREAM_NAME` | `EVENTS` |
//! | `PUBLISH_MAX_ATTEMPTS` | `3` |
//! | `PUBLISH_BACKOFF_BASE_MS` | `100` |
//! | `PUBLISH_TIMEOUT_MS` | `5000` |
//! | `PUBLISH_BATCH_SIZE` | `10` |
//! | `PUBLISH_BATCH_PAUSE_MS` | `50` |
//! | `COLLECTOR_SOURCE` | none |
//! | `COLLECTOR_CONNECT_RETRIES` | `5` |
//! | `COLLECTOR_CONNECT_DELAY_MS` | `5000` |
//! | `CONSUMER_FETCH_BATCH_SIZE` | `10` |
//! | `CONSUMER_FETCH_EXPIRES_MS` | `5000` |
//! | `CONSUMER_ERROR_BACKOFF_MS` | `1000` |
//! | `DATABASE_URL` | none |
//! | `DATABASE_MAX_CONNECTIONS` | `10` |
//! | `GATEWAY_ADDR` | `0.0.0.0:3000` |
//! | `METRICS_ADDR` | `0.0.0.0:9090` |
//! | `BODY_LIMIT_BYTES` | `52428800` |
//! | `LOG_FORMAT` | `pretty` |
//!
//! # Example
//!
//! ```no_run
//! use engagement_runtime::config::PipelineConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::from_env()?;
//! println!("Brokers: {}", config.stream.brokers);
//! # Ok(())
//! # }
//! ```

use crate::collector::CollectorConfig;
use crate::publisher::PublisherConfig;
use crate::retry::RetryPolicy;
use engagement_core::Source;
use engagement_core::stream::{EVENTS_STREAM, StreamConfig};
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required key is not set.
    #[error("Environment variable not set: {0}")]
    Missing(String),

    /// A key holds an unusable value.
    #[error("Invalid value for {key}: {reason}")]
    Invalid {
        /// The key.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable.
    Pretty,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Comma-separated broker addresses.
    pub brokers: String,
    /// Stream name.
    pub stream_name: String,
}

/// Publisher retry and batching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherSettings {
    /// Attempts per event, the first one included.
    pub max_attempts: usize,
    /// Delay after the first failed attempt; doubles afterwards.
    pub backoff_base_ms: u64,
    /// Deadline for a single attempt.
    pub timeout_ms: u64,
    /// Events published concurrently.
    pub batch_size: usize,
    /// Pause between consecutive batches.
    pub batch_pause_ms: u64,
}

impl PublisherSettings {
    /// Retry policy for one publish.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(self.max_attempts)
            .initial_delay(Duration::from_millis(self.backoff_base_ms))
            .multiplier(2.0)
            .attempt_timeout(Duration::from_millis(self.timeout_ms))
            .build()
    }

    /// Pause between batches.
    #[must_use]
    pub const fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

/// Collector connection and fetch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorSettings {
    /// Source served, when configured.
    pub source: Option<Source>,
    /// Startup connection attempts.
    pub connect_retries: usize,
    /// Fixed delay between startup attempts.
    pub connect_delay_ms: u64,
    /// Messages per fetch.
    pub fetch_batch_size: usize,
    /// Fetch expiry.
    pub fetch_expires_ms: u64,
    /// Pause after a failed fetch.
    pub error_backoff_ms: u64,
}

impl CollectorSettings {
    /// Startup retry policy: fixed delay.
    #[must_use]
    pub const fn connect_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.connect_retries, Duration::from_millis(self.connect_delay_ms))
    }

    /// Fetch expiry.
    #[must_use]
    pub const fn fetch_expires(&self) -> Duration {
        Duration::from_millis(self.fetch_expires_ms)
    }

    /// Pause after a failed fetch.
    #[must_use]
    pub const fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    /// The configured source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] when `COLLECTOR_SOURCE` is unset.
    pub fn require_source(&self) -> Result<Source, ConfigError> {
        self.source
            .ok_or_else(|| ConfigError::Missing("COLLECTOR_SOURCE".to_string()))
    }
}

/// Database connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    /// Connection URL, when configured.
    pub url: Option<String>,
    /// Pool size.
    pub max_connections: u32,
}

impl DatabaseSettings {
    /// The configured URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] when `DATABASE_URL` is unset.
    pub fn require_url(&self) -> Result<&str, ConfigError> {
        self.url
            .as_deref()
            .ok_or_else(|| ConfigError::Missing("DATABASE_URL".to_string()))
    }
}

/// Listen addresses and request limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    /// Gateway HTTP address.
    pub gateway_addr: SocketAddr,
    /// Prometheus scrape address.
    pub metrics_addr: SocketAddr,
    /// Maximum request body size.
    pub body_limit_bytes: usize,
}

/// Full pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Broker connection.
    pub stream: StreamSettings,
    /// Publisher.
    pub publisher: PublisherSettings,
    /// Collector.
    pub collector: CollectorSettings,
    /// Database.
    pub database: DatabaseSettings,
    /// HTTP.
    pub http: HttpSettings,
    /// Log format.
    pub log_format: LogFormat,
}

impl PipelineConfig {
    /// Load from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns error if a value cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve keys.
    ///
    /// # Errors
    ///
    /// Returns error if a value cannot be parsed or fails validation.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let config = Self {
            stream: StreamSettings {
                brokers: env.string_or("STREAM_BROKERS", "localhost:9092"),
                stream_name: env.string_or("STREAM_NAME", EVENTS_STREAM),
            },
            publisher: PublisherSettings {
                max_attempts: env.parse_or("PUBLISH_MAX_ATTEMPTS", 3)?,
                backoff_base_ms: env.parse_or("PUBLISH_BACKOFF_BASE_MS", 100)?,
                timeout_ms: env.parse_or("PUBLISH_TIMEOUT_MS", 5_000)?,
                batch_size: env.parse_or("PUBLISH_BATCH_SIZE", 10)?,
                batch_pause_ms: env.parse_or("PUBLISH_BATCH_PAUSE_MS", 50)?,
            },
            collector: CollectorSettings {
                source: env.parse_optional("COLLECTOR_SOURCE")?,
                connect_retries: env.parse_or("COLLECTOR_CONNECT_RETRIES", 5)?,
                connect_delay_ms: env.parse_or("COLLECTOR_CONNECT_DELAY_MS", 5_000)?,
                fetch_batch_size: env.parse_or("CONSUMER_FETCH_BATCH_SIZE", 10)?,
                fetch_expires_ms: env.parse_or("CONSUMER_FETCH_EXPIRES_MS", 5_000)?,
                error_backoff_ms: env.parse_or("CONSUMER_ERROR_BACKOFF_MS", 1_000)?,
            },
            database: DatabaseSettings {
                url: (env.0)("DATABASE_URL").filter(|url| !url.is_empty()),
                max_connections: env.parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            http: HttpSettings {
                gateway_addr: env.parse_or("GATEWAY_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
                metrics_addr: env.parse_or("METRICS_ADDR", SocketAddr::from(([0, 0, 0, 0], 9090)))?,
                body_limit_bytes: env.parse_or("BODY_LIMIT_BYTES", 50 * 1024 * 1024)?,
            },
            log_format: env.parse_or("LOG_FORMAT", LogFormat::Pretty)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("PUBLISH_MAX_ATTEMPTS", self.publisher.max_attempts),
            ("PUBLISH_BATCH_SIZE", self.publisher.batch_size),
            ("COLLECTOR_CONNECT_RETRIES", self.collector.connect_retries),
            ("CONSUMER_FETCH_BATCH_SIZE", self.collector.fetch_batch_size),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(invalid(key, "must be greater than 0"));
            }
        }
        if self.publisher.timeout_ms == 0 {
            return Err(invalid("PUBLISH_TIMEOUT_MS", "must be greater than 0"));
        }
        if self.collector.fetch_expires_ms == 0 {
            return Err(invalid("CONSUMER_FETCH_EXPIRES_MS", "must be greater than 0"));
        }
        if self.database.max_connections == 0 {
            return Err(invalid("DATABASE_MAX_CONNECTIONS", "must be greater than 0"));
        }
        if self.stream.brokers.trim().is_empty() {
            return Err(invalid("STREAM_BROKERS", "cannot be empty"));
        }
        if self.stream.stream_name.trim().is_empty() {
            return Err(invalid("STREAM_NAME", "cannot be empty"));
        }
        Ok(())
    }

    /// Publisher settings for the gateway.
    #[must_use]
    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            stream: StreamConfig::named(self.stream.stream_name.clone()),
            retry: self.publisher.retry_policy(),
            batch_size: self.publisher.batch_size,
            batch_pause: self.publisher.batch_pause(),
        }
    }

    /// Collector settings for `source`.
    #[must_use]
    pub fn collector_config(&self, source: Source) -> CollectorConfig {
        CollectorConfig::new(source)
            .with_stream_name(self.stream.stream_name.clone())
            .with_fetch(self.collector.fetch_batch_size, self.collector.fetch_expires())
            .with_error_backoff(self.collector.error_backoff())
            .with_connect_policy(self.collector.connect_policy())
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.into(),
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string_or(&self, key: &str, default: &str) -> String {
        (self.0)(key)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    fn parse_optional<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match (self.0)(key).filter(|value| !value.trim().is_empty()) {
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|e: T::Err| invalid(key, e.to_string())),
            None => Ok(None),
        }
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        Ok(self.parse_optional(key)?.unwrap_or(default))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        PipelineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).unwrap();

        assert_eq!(config.stream.brokers, "localhost:9092");
        assert_eq!(config.stream.stream_name, "EVENTS");
        assert_eq!(config.publisher.max_attempts, 3);
        assert_eq!(config.publisher.batch_size, 10);
        assert_eq!(config.collector.connect_retries, 5);
        assert_eq!(config.collector.fetch_expires(), Duration::from_secs(5));
        assert_eq!(config.collector.source, None);
        assert_eq!(config.database.url, None);
        assert_eq!(config.http.gateway_addr.port(), 3000);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn reads_overrides() {
        let config = load(&[
            ("COLLECTOR_SOURCE", "tiktok"),
            ("PUBLISH_MAX_ATTEMPTS", "7"),
            ("DATABASE_URL", "postgres://localhost/engagement"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();

        assert_eq!(config.collector.require_source(), Ok(Source::Tiktok));
        assert_eq!(config.publisher.retry_policy().max_attempts, 7);
        assert_eq!(
            config.database.require_url(),
            Ok("postgres://localhost/engagement")
        );
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn connect_and_publish_knobs_are_independent() {
        let config = load(&[
            ("COLLECTOR_CONNECT_RETRIES", "2"),
            ("COLLECTOR_CONNECT_DELAY_MS", "10"),
        ])
        .unwrap();

        let connect = config.collector.connect_policy();
        assert_eq!(connect.max_attempts, 2);
        assert_eq!(connect.delay_for_attempt(1), Duration::from_millis(10));

        let publish = config.publisher.retry_policy();
        assert_eq!(publish.max_attempts, 3);
        assert_eq!(publish.attempt_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            load(&[("COLLECTOR_SOURCE", "instagram")]),
            Err(ConfigError::Invalid { key, .. }) if key == "COLLECTOR_SOURCE"
        ));
        assert!(matches!(
            load(&[("PUBLISH_BATCH_SIZE", "0")]),
            Err(ConfigError::Invalid { key, .. }) if key == "PUBLISH_BATCH_SIZE"
        ));
        assert!(matches!(
            load(&[("PUBLISH_TIMEOUT_MS", "soon")]),
            Err(ConfigError::Invalid { key, .. }) if key == "PUBLISH_TIMEOUT_MS"
        ));
    }

    #[test]
    fn builds_component_configs() {
        let config = load(&[
            ("STREAM_NAME", "EVENTS_TEST"),
            ("CONSUMER_FETCH_BATCH_SIZE", "25"),
            ("PUBLISH_BATCH_PAUSE_MS", "0"),
        ])
        .unwrap();

        let publisher = config.publisher_config();
        assert_eq!(publisher.stream.name, "EVENTS_TEST");
        assert!(publisher.stream.captures("events.facebook"));
        assert!(publisher.batch_pause.is_zero());

        let collector = config.collector_config(Source::Facebook);
        assert_eq!(collector.stream.name, "EVENTS_TEST");
        assert_eq!(collector.consumer.durable_name, "fb_collector_consumer");
        assert_eq!(collector.fetch_batch_size, 25);
        assert_eq!(collector.connect.max_attempts, 5);
    }

    #[test]
    fn missing_required_values_are_reported() {
        let config = load(&[]).unwrap();
        assert_eq!(
            config.collector.require_source(),
            Err(ConfigError::Missing("COLLECTOR_SOURCE".to_string()))
        );
        assert!(config.database.require_url().is_err());
    }
}
