//! Per-source collector: durable pull consumer feeding the event processor.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped ──run()──► Connecting ──attached──► Running ──shutdown──► Draining ──► Stopped
//!                        │
//!                        └── attempts exhausted ──► Stopped + CollectorError::StartupFailed
//! ```
//!
//! While `Connecting`, each attempt connects, ensures the stream and the
//! durable consumer (creating it only when the lookup says it is missing),
//! and attaches a pull consumer. Attempts are separated by a fixed delay.
//!
//! While `Running`, the collector fetches batches and processes every
//! message of a batch in order before the next fetch. A message is
//! acknowledged only after the processor succeeded, so failures are
//! redelivered later. Messages that can never succeed (undecodable, failing
//! validation, or carrying another source) are logged and acknowledged to
//! keep them from blocking the consumer.
//!
//! Shutdown is observed between fetches: an in-flight fetch and the batch it
//! returns are completed before the collector drains and closes the
//! connection.

use crate::metrics::CollectorMetrics;
use crate::retry::RetryPolicy;
use engagement_core::stream::{
    ConsumerConfig, EVENTS_STREAM, PullConsumer, StreamClient, StreamConfig, StreamConnector,
    StreamMessage, ensure_consumer,
};
use engagement_core::{EventEnvelope, EventProcessor, Source, StreamError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::Instrument;

/// Lifecycle state of a collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    /// Not running.
    Stopped,
    /// Attaching to the stream.
    Connecting,
    /// Fetching and processing.
    Running,
    /// Finishing the current batch and closing the connection.
    Draining,
}

/// Errors that stop a collector.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectorError {
    /// The stream could not be attached within the allowed attempts.
    #[error("{platform} collector failed to attach after {attempts} attempt(s): {last_error}")]
    StartupFailed {
        /// Source served.
        platform: Source,
        /// Attempts made.
        attempts: usize,
        /// Failure of the final attempt.
        #[source]
        last_error: StreamError,
    },
}

/// Collector settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    /// Source served; messages of any other source are discarded.
    pub source: Source,
    /// Stream to read.
    pub stream: StreamConfig,
    /// Durable consumer to attach.
    pub consumer: ConsumerConfig,
    /// Messages per fetch.
    pub fetch_batch_size: usize,
    /// Fetch expiry.
    pub fetch_expires: Duration,
    /// Pause after a failed fetch.
    pub error_backoff: Duration,
    /// Startup attempts and the delay between them.
    pub connect: RetryPolicy,
}

impl CollectorConfig {
    /// Defaults for `source`: 10 messages per fetch, 5s expiry,
    /// 5 startup attempts 5s apart.
    #[must_use]
    pub fn new(source: Source) -> Self {
        Self {
            source,
            stream: StreamConfig::named(EVENTS_STREAM),
            consumer: ConsumerConfig::for_source(source),
            fetch_batch_size: 10,
            fetch_expires: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
            connect: RetryPolicy::fixed(5, Duration::from_secs(5)),
        }
    }

    /// Read from the stream called `name`.
    #[must_use]
    pub fn with_stream_name(mut self, name: impl Into<String>) -> Self {
        self.stream = StreamConfig::named(name);
        self
    }

    /// Set fetch size and expiry.
    #[must_use]
    pub const fn with_fetch(mut self, batch_size: usize, expires: Duration) -> Self {
        self.fetch_batch_size = batch_size;
        self.fetch_expires = expires;
        self
    }

    /// Set the pause after a failed fetch.
    #[must_use]
    pub const fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Set the startup retry policy.
    #[must_use]
    pub fn with_connect_policy(mut self, policy: RetryPolicy) -> Self {
        self.connect = policy;
        self
    }
}

/// Running totals of a collector.
#[derive(Debug, Default)]
pub struct CollectorStats {
    consumed: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    fetch_errors: AtomicU64,
}

/// Point-in-time copy of [`CollectorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Messages fetched.
    pub consumed: u64,
    /// Messages processed and acknowledged.
    pub processed: u64,
    /// Messages that failed.
    pub failed: u64,
    /// Failed fetches.
    pub fetch_errors: u64,
}

impl CollectorStats {
    /// Current totals.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            consumed: self.consumed.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
        }
    }
}

/// Per-batch counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Messages in the batch.
    pub consumed: usize,
    /// Messages processed and acknowledged.
    pub processed: usize,
    /// Messages that failed, acknowledged or not.
    pub failed: usize,
}

/// Controls a running [`Collector`].
pub struct CollectorHandle {
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<CollectorState>,
    stats: Arc<CollectorStats>,
}

impl CollectorHandle {
    /// Ask the collector to stop after its current fetch and batch.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CollectorState {
        *self.state.borrow()
    }

    /// Wait until the collector reaches `target`.
    ///
    /// Returns `false` if the collector was dropped first.
    pub async fn wait_for_state(&mut self, target: CollectorState) -> bool {
        self.state.wait_for(|state| *state == target).await.is_ok()
    }

    /// Current totals.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

enum Disposition {
    Processed,
    Discard,
    Redeliver,
}

/// Consumes one source's subject and hands each event to a processor.
pub struct Collector {
    config: CollectorConfig,
    connector: Arc<dyn StreamConnector>,
    processor: Arc<dyn EventProcessor>,
    state: watch::Sender<CollectorState>,
    shutdown: watch::Receiver<bool>,
    stats: Arc<CollectorStats>,
}

impl Collector {
    /// Create a collector and the handle controlling it.
    #[must_use]
    pub fn new(
        config: CollectorConfig,
        connector: Arc<dyn StreamConnector>,
        processor: Arc<dyn EventProcessor>,
    ) -> (Self, CollectorHandle) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(CollectorState::Stopped);
        let stats = Arc::new(CollectorStats::default());

        let collector = Self {
            config,
            connector,
            processor,
            state: state_tx,
            shutdown: shutdown_rx,
            stats: Arc::clone(&stats),
        };
        let handle = CollectorHandle {
            shutdown: shutdown_tx,
            state: state_rx,
            stats,
        };
        (collector, handle)
    }

    /// Run until shutdown is requested.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::StartupFailed`] when the stream could not
    /// be attached within the configured attempts.
    pub async fn run(mut self) -> Result<(), CollectorError> {
        let span = tracing::info_span!(
            "collector",
            source = %self.config.source,
            consumer = %self.config.consumer.durable_name,
        );
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&mut self) -> Result<(), CollectorError> {
        self.set_state(CollectorState::Connecting);
        let attached = match self.attach().await {
            Ok(attached) => attached,
            Err(error) => {
                self.set_state(CollectorState::Stopped);
                return Err(error);
            }
        };

        let Some((client, mut consumer)) = attached else {
            tracing::info!("Shutdown requested while connecting");
            self.set_state(CollectorState::Stopped);
            return Ok(());
        };

        self.set_state(CollectorState::Running);
        tracing::info!("Collector running");
        self.consume(consumer.as_mut()).await;

        self.set_state(CollectorState::Draining);
        drop(consumer);
        if let Err(error) = client.close().await {
            tracing::warn!(error = %error, "Failed to close stream connection cleanly");
        }

        self.set_state(CollectorState::Stopped);
        let stats = self.stats.snapshot();
        tracing::info!(
            consumed = stats.consumed,
            processed = stats.processed,
            failed = stats.failed,
            "Collector stopped"
        );
        Ok(())
    }

    fn set_state(&self, state: CollectorState) {
        self.state.send_replace(state);
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep for `delay`; returns `true` if shutdown was requested first.
    async fn sleep_or_shutdown(&mut self, delay: Duration) -> bool {
        if self.shutdown_requested() {
            return true;
        }
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return false,
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        // Handle dropped: nobody can stop us early any more.
                        (&mut sleep).await;
                        return false;
                    }
                    if self.shutdown_requested() {
                        return true;
                    }
                }
            }
        }
    }

    /// Connect with fixed-delay retry. `Ok(None)` means shutdown won.
    async fn attach(
        &mut self,
    ) -> Result<Option<(Arc<dyn StreamClient>, Box<dyn PullConsumer>)>, CollectorError> {
        let max_attempts = self.config.connect.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.try_attach().await {
                Ok(attached) => {
                    tracing::info!(attempt, "Attached to stream");
                    return Ok(Some(attached));
                }
                Err(error) if attempt >= max_attempts => {
                    tracing::error!(
                        attempt,
                        error = %error,
                        "Giving up attaching to stream"
                    );
                    return Err(CollectorError::StartupFailed {
                        platform: self.config.source,
                        attempts: attempt,
                        last_error: error,
                    });
                }
                Err(error) => {
                    let delay = self.config.connect.delay_for_attempt(attempt - 1);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Failed to attach to stream, retrying"
                    );
                    if self.sleep_or_shutdown(delay).await {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn try_attach(&self) -> Result<(Arc<dyn StreamClient>, Box<dyn PullConsumer>), StreamError> {
        let client = self.connector.connect().await?;
        client.ensure_stream(&self.config.stream).await?;
        ensure_consumer(client.as_ref(), &self.config.stream.name, &self.config.consumer).await?;
        let consumer = client
            .pull_consumer(&self.config.stream.name, &self.config.consumer)
            .await?;
        Ok((client, consumer))
    }

    async fn consume(&mut self, consumer: &mut dyn PullConsumer) {
        while !self.shutdown_requested() {
            let fetched = consumer
                .fetch(self.config.fetch_batch_size, self.config.fetch_expires)
                .await;

            match fetched {
                Ok(messages) => {
                    let outcome = self.process_batch(consumer, messages).await;
                    tracing::debug!(
                        consumed = outcome.consumed,
                        processed = outcome.processed,
                        failed = outcome.failed,
                        "Processed batch"
                    );
                }
                Err(error) if error.is_fetch_timeout() => {
                    tracing::trace!("Fetch expired without messages");
                }
                Err(error) => {
                    self.stats.fetch_errors.fetch_add(1, Ordering::Relaxed);
                    CollectorMetrics::record_fetch_error(self.config.source);
                    tracing::error!(error = %error, "Fetch failed");
                    if self.sleep_or_shutdown(self.config.error_backoff).await {
                        break;
                    }
                }
            }
        }
    }

    /// Process `messages` in order, acknowledging each one that succeeded.
    ///
    /// One message failing does not affect the others.
    pub async fn process_batch(
        &self,
        consumer: &mut dyn PullConsumer,
        messages: Vec<StreamMessage>,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for message in &messages {
            outcome.consumed += 1;
            self.stats.consumed.fetch_add(1, Ordering::Relaxed);
            CollectorMetrics::record_consumed(self.config.source);

            let succeeded = match self.handle_message(message).await {
                Disposition::Processed => self.acknowledge(consumer, message).await,
                Disposition::Discard => {
                    self.acknowledge(consumer, message).await;
                    false
                }
                Disposition::Redeliver => false,
            };

            if succeeded {
                outcome.processed += 1;
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
                CollectorMetrics::record_processed(self.config.source);
            } else {
                outcome.failed += 1;
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                CollectorMetrics::record_failed(self.config.source);
            }
        }

        outcome
    }

    async fn acknowledge(&self, consumer: &mut dyn PullConsumer, message: &StreamMessage) -> bool {
        match consumer.ack(message).await {
            Ok(()) => true,
            Err(error) => {
                tracing::error!(
                    subject = %message.subject,
                    sequence = message.sequence,
                    error = %error,
                    "Failed to acknowledge message"
                );
                false
            }
        }
    }

    async fn handle_message(&self, message: &StreamMessage) -> Disposition {
        let envelope = match EventEnvelope::decode(&message.payload) {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::error!(
                    subject = %message.subject,
                    sequence = message.sequence,
                    error = %error,
                    "Discarding message that is not a valid event"
                );
                return Disposition::Discard;
            }
        };

        let event = &envelope.event;
        if event.source() != self.config.source {
            tracing::error!(
                subject = %message.subject,
                sequence = message.sequence,
                event_id = event.event_id(),
                correlation_id = %envelope.correlation_id,
                event_source = %event.source(),
                "Discarding event of another source"
            );
            return Disposition::Discard;
        }

        match self.processor.process(event, &envelope.correlation_id).await {
            Ok(_) => Disposition::Processed,
            Err(error) => {
                tracing::warn!(
                    event_id = event.event_id(),
                    correlation_id = %envelope.correlation_id,
                    delivery_count = message.delivery_count,
                    error = %error,
                    "Leaving message unacknowledged for redelivery"
                );
                Disposition::Redeliver
            }
        }
    }
}
