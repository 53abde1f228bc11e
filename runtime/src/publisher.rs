//! Publishes validated events to the durable stream.
//!
//! Each publish:
//!
//! 1. assigns a fresh correlation id (UUID v4),
//! 2. makes sure the stream exists (once per publisher, lazily),
//! 3. sends the envelope to the event's source subject,
//! 4. retries failed or timed-out attempts with exponential backoff.
//!
//! Batches are sent in chunks of concurrent publishes with a short pause
//! between chunks. A failed event never aborts its chunk or the batch.

use crate::metrics::GatewayMetrics;
use crate::retry::{AttemptError, RetryPolicy, retry_with_backoff};
use engagement_core::envelope;
use engagement_core::stream::{PublishAck, StreamClient, StreamConfig};
use engagement_core::{Event, StreamError};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Why an event was not published.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The event could not be serialized.
    #[error("failed to encode event {event_id}: {reason}")]
    Encode {
        /// Event.
        event_id: String,
        /// Why.
        reason: String,
    },

    /// Every attempt failed.
    #[error("publishing event {event_id} to {subject} failed after {attempts} attempt(s): {reason}")]
    Exhausted {
        /// Event.
        event_id: String,
        /// Target subject.
        subject: String,
        /// Attempts made.
        attempts: usize,
        /// Whether the last attempt timed out rather than failed.
        timed_out: bool,
        /// Last failure.
        reason: String,
    },
}

/// A published event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Event.
    pub event_id: String,
    /// Correlation id sent with it.
    pub correlation_id: String,
    /// Broker acknowledgement.
    pub ack: PublishAck,
}

/// Result of a batch publish.
#[derive(Debug, Default)]
pub struct BatchPublishReport {
    /// Per-event results, in input order.
    pub results: Vec<Result<PublishReceipt, PublishError>>,
}

impl BatchPublishReport {
    /// Events published.
    #[must_use]
    pub fn published(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    /// Events that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.len() - self.published()
    }
}

/// Publisher settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PublisherConfig {
    /// Stream to provision and publish into.
    pub stream: StreamConfig,
    /// Retry policy for one event.
    pub retry: RetryPolicy,
    /// Events published concurrently.
    pub batch_size: usize,
    /// Pause between consecutive chunks.
    pub batch_pause: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::events(),
            retry: RetryPolicy::builder()
                .max_attempts(3)
                .initial_delay(Duration::from_millis(100))
                .attempt_timeout(Duration::from_secs(5))
                .build(),
            batch_size: 10,
            batch_pause: Duration::from_millis(50),
        }
    }
}

/// Stream publisher with lazy provisioning and retry.
pub struct EventPublisher {
    client: Arc<dyn StreamClient>,
    config: PublisherConfig,
    provisioned: OnceCell<()>,
}

impl EventPublisher {
    /// Create a publisher over `client`.
    #[must_use]
    pub fn new(client: Arc<dyn StreamClient>, config: PublisherConfig) -> Self {
        Self {
            client,
            config,
            provisioned: OnceCell::new(),
        }
    }

    /// The underlying client.
    #[must_use]
    pub fn client(&self) -> &Arc<dyn StreamClient> {
        &self.client
    }

    /// Create the stream if needed. Runs once successfully per publisher;
    /// a failure is retried on the next call.
    ///
    /// # Errors
    ///
    /// Returns the broker error when the stream cannot be ensured.
    pub async fn ensure_stream(&self) -> Result<(), StreamError> {
        self.provisioned
            .get_or_try_init(|| async {
                tracing::info!(
                    stream = %self.config.stream.name,
                    subjects = ?self.config.stream.subjects,
                    "Ensuring stream exists"
                );
                self.client.ensure_stream(&self.config.stream).await
            })
            .await
            .map(|_| ())
    }

    /// Publish one event under a fresh correlation id.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] when the event cannot be encoded or every
    /// attempt failed.
    pub async fn publish(&self, event: &Event) -> Result<PublishReceipt, PublishError> {
        self.publish_with_correlation(event, &Uuid::new_v4().to_string())
            .await
    }

    /// Publish one event under `correlation_id`.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] when the event cannot be encoded or every
    /// attempt failed.
    pub async fn publish_with_correlation(
        &self,
        event: &Event,
        correlation_id: &str,
    ) -> Result<PublishReceipt, PublishError> {
        let subject = event.subject();
        let payload = envelope::encode(event, correlation_id).map_err(|e| PublishError::Encode {
            event_id: event.event_id().to_string(),
            reason: e.to_string(),
        })?;

        let started = Instant::now();
        let outcome = retry_with_backoff(&self.config.retry, || {
            let payload = payload.clone();
            async move {
                self.ensure_stream().await?;
                self.client.publish(subject, payload).await
            }
        })
        .await;

        match outcome {
            Ok(ack) => {
                GatewayMetrics::record_published(event.source(), started.elapsed());
                tracing::debug!(
                    event_id = event.event_id(),
                    correlation_id,
                    subject,
                    sequence = ack.sequence,
                    "Published event"
                );
                Ok(PublishReceipt {
                    event_id: event.event_id().to_string(),
                    correlation_id: correlation_id.to_string(),
                    ack,
                })
            }
            Err(error) => {
                GatewayMetrics::record_publish_failed(event.source());
                tracing::error!(
                    event_id = event.event_id(),
                    correlation_id,
                    subject,
                    attempts = error.attempts,
                    error = %error.last,
                    "Failed to publish event"
                );
                Err(PublishError::Exhausted {
                    event_id: event.event_id().to_string(),
                    subject: subject.to_string(),
                    attempts: error.attempts,
                    timed_out: matches!(error.last, AttemptError::TimedOut(_)),
                    reason: error.last.to_string(),
                })
            }
        }
    }

    /// Publish `events` in concurrent chunks.
    ///
    /// Never fails as a whole; per-event outcomes are in the report.
    pub async fn publish_batch(&self, events: &[Event]) -> BatchPublishReport {
        let chunk_size = self.config.batch_size.max(1);
        let mut results = Vec::with_capacity(events.len());

        for (index, chunk) in events.chunks(chunk_size).enumerate() {
            if index > 0 && !self.config.batch_pause.is_zero() {
                tokio::time::sleep(self.config.batch_pause).await;
            }
            results.extend(join_all(chunk.iter().map(|event| self.publish(event))).await);
        }

        let report = BatchPublishReport { results };
        tracing::info!(
            published = report.published(),
            failed = report.failed(),
            "Published event batch"
        );
        report
    }
}
