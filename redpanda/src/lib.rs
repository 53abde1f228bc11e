//! Redpanda-backed durable stream.
//!
//! Implements the stream contract of `engagement-core` on any
//! Kafka-compatible broker through rdkafka.
//!
//! # Mapping
//!
//! | Stream concept | Kafka concept |
//! |----------------|---------------|
//! | subject (`events.facebook`) | topic of the same name |
//! | stream (`EVENTS`) | the set of topics created for its subjects |
//! | durable consumer | consumer group named after it |
//! | sequence | partition offset |
//! | ack | commit of the acknowledged offset prefix |
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits:
//! - offsets are committed only up to the lowest delivered but
//!   unacknowledged message of each partition
//! - a message left unacknowledged for longer than the ack wait makes the
//!   consumer seek back to it, so it is delivered again
//! - messages already acknowledged past that point are skipped on the
//!   second pass, unless the process restarted in between
//!
//! # Example
//!
//! ```no_run
//! use engagement_redpanda::RedpandaConnector;
//! use engagement_core::stream::{StreamConfig, StreamConnector};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = RedpandaConnector::builder()
//!     .brokers("localhost:9092")
//!     .producer_acks("all")
//!     .build()?;
//!
//! let client = connector.connect().await?;
//! client.ensure_stream(&StreamConfig::events()).await?;
//! client.publish("events.facebook", b"{}".to_vec()).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod consumer;

pub use client::RedpandaClient;
pub use consumer::RedpandaPullConsumer;

use engagement_core::stream::{StreamClient, StreamConnector, StreamFuture};
use engagement_core::StreamError;
use std::sync::Arc;
use std::time::Duration;

/// Connection settings shared by every client a connector opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedpandaSettings {
    /// Comma-separated bootstrap servers.
    pub brokers: String,
    /// Producer acknowledgement mode: "0", "1" or "all".
    pub producer_acks: String,
    /// Compression codec.
    pub compression: String,
    /// Partitions per created topic.
    pub partitions: i32,
    /// Replication factor of created topics.
    pub replication_factor: i32,
    /// Timeout of producer sends and admin requests.
    pub request_timeout: Duration,
    /// Time before an unacknowledged message is delivered again.
    pub ack_wait: Duration,
    /// How long a fetch keeps filling its batch once the first message arrived.
    pub fetch_linger: Duration,
}

impl Default for RedpandaSettings {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            producer_acks: "all".to_string(),
            compression: "none".to_string(),
            partitions: 1,
            replication_factor: 1,
            request_timeout: Duration::from_secs(5),
            ack_wait: Duration::from_secs(30),
            fetch_linger: Duration::from_millis(20),
        }
    }
}

/// Opens [`RedpandaClient`]s.
///
/// # Example
///
/// ```no_run
/// use engagement_redpanda::RedpandaConnector;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let connector = RedpandaConnector::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .partitions(3)
///     .ack_wait(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RedpandaConnector {
    settings: RedpandaSettings,
}

impl RedpandaConnector {
    /// Connector with default settings for `brokers`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ConnectionFailed`] if `brokers` is empty.
    pub fn new(brokers: &str) -> Result<Self, StreamError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaConnectorBuilder {
        RedpandaConnectorBuilder::default()
    }

    /// The settings clients are opened with.
    #[must_use]
    pub const fn settings(&self) -> &RedpandaSettings {
        &self.settings
    }
}

impl StreamConnector for RedpandaConnector {
    fn connect(&self) -> StreamFuture<'_, Arc<dyn StreamClient>> {
        Box::pin(async move {
            let client = RedpandaClient::connect(self.settings.clone()).await?;
            Ok(Arc::new(client) as Arc<dyn StreamClient>)
        })
    }
}

/// Builder for a [`RedpandaConnector`].
#[derive(Default)]
pub struct RedpandaConnectorBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    partitions: Option<i32>,
    replication_factor: Option<i32>,
    request_timeout: Option<Duration>,
    ack_wait: Option<Duration>,
    fetch_linger: Option<Duration>,
}

impl RedpandaConnectorBuilder {
    /// Set the broker addresses (e.g., "localhost:9092").
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode. Default: "all".
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec. Default: "none".
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Partitions of topics created by `ensure_stream`. Default: 1.
    #[must_use]
    pub const fn partitions(mut self, partitions: i32) -> Self {
        self.partitions = Some(partitions);
        self
    }

    /// Replication factor of created topics. Default: 1.
    #[must_use]
    pub const fn replication_factor(mut self, factor: i32) -> Self {
        self.replication_factor = Some(factor);
        self
    }

    /// Producer send and admin request timeout. Default: 5 seconds.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Redelivery delay for unacknowledged messages. Default: 30 seconds.
    #[must_use]
    pub const fn ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = Some(ack_wait);
        self
    }

    /// Batch fill time after the first fetched message. Default: 20ms.
    #[must_use]
    pub const fn fetch_linger(mut self, linger: Duration) -> Self {
        self.fetch_linger = Some(linger);
        self
    }

    /// Build the connector.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ConnectionFailed`] if brokers are not set or
    /// the topic layout is invalid.
    pub fn build(self) -> Result<RedpandaConnector, StreamError> {
        let defaults = RedpandaSettings::default();
        let brokers = self
            .brokers
            .filter(|brokers| !brokers.trim().is_empty())
            .ok_or_else(|| StreamError::ConnectionFailed("Brokers not configured".to_string()))?;

        let settings = RedpandaSettings {
            brokers,
            producer_acks: self.producer_acks.unwrap_or(defaults.producer_acks),
            compression: self.compression.unwrap_or(defaults.compression),
            partitions: self.partitions.unwrap_or(defaults.partitions),
            replication_factor: self.replication_factor.unwrap_or(defaults.replication_factor),
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
            ack_wait: self.ack_wait.unwrap_or(defaults.ack_wait),
            fetch_linger: self.fetch_linger.unwrap_or(defaults.fetch_linger),
        };

        if settings.partitions < 1 || settings.replication_factor < 1 {
            return Err(StreamError::ConnectionFailed(format!(
                "Invalid topic layout: {} partition(s), replication factor {}",
                settings.partitions, settings.replication_factor
            )));
        }

        Ok(RedpandaConnector { settings })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn connector_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RedpandaConnector>();
        assert_send_sync::<RedpandaClient>();
    }

    #[test]
    fn builder_applies_defaults() {
        let connector = RedpandaConnector::new("broker:9092").unwrap();
        let settings = connector.settings();
        assert_eq!(settings.brokers, "broker:9092");
        assert_eq!(settings.producer_acks, "all");
        assert_eq!(settings.partitions, 1);
        assert_eq!(settings.ack_wait, Duration::from_secs(30));
    }

    #[test]
    fn builder_requires_brokers() {
        assert!(matches!(
            RedpandaConnector::builder().build(),
            Err(StreamError::ConnectionFailed(_))
        ));
        assert!(RedpandaConnector::new("  ").is_err());
    }

    #[test]
    fn builder_rejects_empty_topic_layout() {
        let result = RedpandaConnector::builder()
            .brokers("localhost:9092")
            .partitions(0)
            .build();
        assert!(result.is_err());
    }
}
