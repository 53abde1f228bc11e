//! Durable stream contract.
//!
//! Events travel from the gateway to the collectors over a persistent,
//! subject-partitioned stream with durable pull consumers and explicit
//! acknowledgement:
//!
//! ```text
//! gateway ──publish──► stream "EVENTS"
//!                        ├── events.facebook ──► fb_collector_consumer  ──► collector(facebook)
//!                        └── events.tiktok   ──► ttk_collector_consumer ──► collector(tiktok)
//! ```
//!
//! # Delivery guarantees
//!
//! - **At-least-once**: a fetched message that is never acknowledged is
//!   delivered again on a later fetch.
//! - **Durable progress**: acknowledgements survive consumer restarts, so a
//!   collector resumes where the consumer group left off.
//! - **Per-subject order**: messages of one subject are delivered in publish
//!   order; redeliveries may interleave.
//!
//! Consumers must therefore be idempotent. In this pipeline idempotency is
//! keyed by `eventId` at the store.
//!
//! # Implementations
//!
//! - `InMemoryEventStream` in `engagement-testing`, for tests
//! - `RedpandaConnector` in `engagement-redpanda`, Kafka-compatible brokers

use crate::event::Source;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Name of the stream holding every event subject.
pub const EVENTS_STREAM: &str = "EVENTS";

/// Error code carried by [`StreamError::FetchTimeout`].
pub const FETCH_TIMEOUT_CODE: u16 = 408;

/// Error code carried by [`StreamError::NotFound`].
pub const NOT_FOUND_CODE: u16 = 404;

/// Boxed future returned by stream operations.
pub type StreamFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StreamError>> + Send + 'a>>;

/// Errors from stream operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Stream or consumer does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A fetch returned no messages before it expired.
    #[error("Fetch expired after {expires:?} without messages")]
    FetchTimeout {
        /// The expiry that elapsed.
        expires: Duration,
    },

    /// Could not connect to the broker.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Broker did not accept a published message.
    #[error("Publish failed for subject '{subject}': {reason}")]
    PublishFailed {
        /// Subject published to.
        subject: String,
        /// Broker-side reason.
        reason: String,
    },

    /// Consumer group could not be created or attached.
    #[error("Consumer error: {0}")]
    Consumer(String),

    /// Any other transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The client was closed.
    #[error("Stream client closed")]
    Closed,
}

impl StreamError {
    /// Numeric code of the error, mirroring the broker's status codes.
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            Self::NotFound(_) => NOT_FOUND_CODE,
            Self::FetchTimeout { .. } => FETCH_TIMEOUT_CODE,
            Self::Closed => 503,
            Self::ConnectionFailed(_)
            | Self::PublishFailed { .. }
            | Self::Consumer(_)
            | Self::Transport(_) => 500,
        }
    }

    /// Whether this is the benign "no messages yet" outcome of a fetch.
    #[must_use]
    pub const fn is_fetch_timeout(&self) -> bool {
        matches!(self, Self::FetchTimeout { .. })
    }

    /// Whether the stream or consumer was missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Definition of a stream and the subjects it captures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Stream name.
    pub name: String,
    /// Subjects bound to the stream.
    pub subjects: Vec<String>,
}

impl StreamConfig {
    /// The `EVENTS` stream with one subject per source.
    #[must_use]
    pub fn events() -> Self {
        Self::named(EVENTS_STREAM)
    }

    /// A stream called `name` with one subject per source.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subjects: Source::ALL
                .iter()
                .map(|source| source.subject().to_string())
                .collect(),
        }
    }

    /// Whether `subject` is captured by this stream.
    #[must_use]
    pub fn captures(&self, subject: &str) -> bool {
        self.subjects.iter().any(|s| s == subject)
    }
}

/// Durable consumer definition. Acknowledgement is always explicit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Durable name; progress is stored under it.
    pub durable_name: String,
    /// Only messages on this subject are delivered.
    pub filter_subject: String,
}

impl ConsumerConfig {
    /// The durable consumer used by `source`'s collector.
    #[must_use]
    pub fn for_source(source: Source) -> Self {
        Self {
            durable_name: source.consumer_name().to_string(),
            filter_subject: source.subject().to_string(),
        }
    }
}

/// What the broker reports about a durable consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerInfo {
    /// Stream the consumer reads.
    pub stream: String,
    /// Durable name.
    pub durable_name: String,
    /// Subject filter, when the broker reports one.
    pub filter_subject: Option<String>,
}

/// Broker acknowledgement of a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    /// Subject the message was stored under.
    pub subject: String,
    /// Partition within the subject, zero where the broker has none.
    pub partition: i32,
    /// Position of the message.
    pub sequence: u64,
}

/// A message delivered by a pull consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    /// Subject the message was published to.
    pub subject: String,
    /// Partition within the subject.
    pub partition: i32,
    /// Position of the message; the acknowledgement key.
    pub sequence: u64,
    /// How many times this message has been delivered, starting at 1.
    pub delivery_count: u32,
    /// Raw payload.
    pub payload: Vec<u8>,
}

/// Connected client to a durable stream.
///
/// Dyn-compatible so the gateway and collectors hold an
/// `Arc<dyn StreamClient>` and tests substitute an in-memory stream.
pub trait StreamClient: Send + Sync {
    /// Create the stream if it does not exist. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError`] if the broker rejects the definition.
    fn ensure_stream<'a>(&'a self, config: &'a StreamConfig) -> StreamFuture<'a, ()>;

    /// Publish `payload` to `subject`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError`] if the broker does not store the message.
    fn publish<'a>(&'a self, subject: &'a str, payload: Vec<u8>) -> StreamFuture<'a, PublishAck>;

    /// Look up a durable consumer.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::NotFound`] when the consumer does not exist,
    /// and other variants when the lookup itself failed.
    fn consumer_info<'a>(
        &'a self,
        stream: &'a str,
        durable_name: &'a str,
    ) -> StreamFuture<'a, ConsumerInfo>;

    /// Create a durable consumer with explicit acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError`] if the consumer cannot be created.
    fn add_consumer<'a>(
        &'a self,
        stream: &'a str,
        config: &'a ConsumerConfig,
    ) -> StreamFuture<'a, ConsumerInfo>;

    /// Attach a pull consumer to an existing durable consumer.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError`] if the consumer cannot be attached.
    fn pull_consumer<'a>(
        &'a self,
        stream: &'a str,
        config: &'a ConsumerConfig,
    ) -> StreamFuture<'a, Box<dyn PullConsumer>>;

    /// Flush and close the connection.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError`] if pending work could not be flushed.
    fn close(&self) -> StreamFuture<'_, ()>;
}

/// Pull side of a durable consumer.
pub trait PullConsumer: Send {
    /// Fetch up to `max_messages`, waiting at most `expires`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::FetchTimeout`] when nothing arrived in time,
    /// other variants on transport failure.
    fn fetch(&mut self, max_messages: usize, expires: Duration) -> StreamFuture<'_, Vec<StreamMessage>>;

    /// Acknowledge a delivered message; it will not be delivered again.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError`] if the acknowledgement was not recorded.
    fn ack<'a>(&'a mut self, message: &'a StreamMessage) -> StreamFuture<'a, ()>;
}

/// Opens connections to a stream broker.
pub trait StreamConnector: Send + Sync {
    /// Connect.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ConnectionFailed`] when the broker is unreachable.
    fn connect(&self) -> StreamFuture<'_, Arc<dyn StreamClient>>;
}

/// Look up a durable consumer and create it when it is missing.
///
/// Only a not-found lookup leads to creation; any other lookup failure is
/// returned unchanged.
///
/// # Errors
///
/// Returns the lookup error, or the creation error.
pub async fn ensure_consumer(
    client: &dyn StreamClient,
    stream: &str,
    config: &ConsumerConfig,
) -> Result<ConsumerInfo, StreamError> {
    match client.consumer_info(stream, &config.durable_name).await {
        Ok(info) => {
            tracing::debug!(consumer = %config.durable_name, stream, "Consumer already exists");
            Ok(info)
        }
        Err(error) if error.is_not_found() => {
            tracing::info!(
                consumer = %config.durable_name,
                stream,
                filter_subject = %config.filter_subject,
                "Creating durable consumer"
            );
            client.add_consumer(stream, config).await
        }
        Err(error) => Err(error),
    }
}
