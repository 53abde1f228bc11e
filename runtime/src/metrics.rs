//! Prometheus metrics for the gateway and the collectors.
//!
//! Counters are labelled by `source` where it applies:
//!
//! - Gateway: events received, accepted, rejected, published, publish failures,
//!   publish latency
//! - Collector: events consumed, processed, failed, fetch errors
//!
//! # Example
//!
//! ```rust,no_run
//! use engagement_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use engagement_core::Source;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Items received by the gateway, valid or not.
pub const GATEWAY_EVENTS_RECEIVED: &str = "gateway_events_received_total";
/// Events validated and published.
pub const GATEWAY_EVENTS_ACCEPTED: &str = "gateway_events_accepted_total";
/// Items rejected, by validation or by publish failure.
pub const GATEWAY_EVENTS_REJECTED: &str = "gateway_events_rejected_total";
/// Successful stream publishes.
pub const GATEWAY_EVENTS_PUBLISHED: &str = "gateway_events_published_total";
/// Publishes that exhausted their retries.
pub const GATEWAY_PUBLISH_FAILED: &str = "gateway_events_publish_failed_total";
/// Latency of a publish, retries included.
pub const GATEWAY_PUBLISH_DURATION: &str = "gateway_publish_duration_seconds";
/// Messages fetched by a collector.
pub const COLLECTOR_EVENTS_CONSUMED: &str = "collector_events_consumed_total";
/// Messages processed and acknowledged.
pub const COLLECTOR_EVENTS_PROCESSED: &str = "collector_events_processed_total";
/// Messages that failed decoding or processing.
pub const COLLECTOR_EVENTS_FAILED: &str = "collector_events_failed_total";
/// Fetches that failed for a reason other than expiry.
pub const COLLECTOR_FETCH_ERRORS: &str = "collector_fetch_errors_total";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and spawn the HTTP listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests), this logs a
    /// warning and leaves [`handle`](Self::handle) empty.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                tokio::spawn(async move {
                    // `ExporterError` (metrics-exporter-prometheus 0.15) implements neither Debug nor Display.
                    if let Err(_error) = exporter.await {
                        tracing::error!("Metrics exporter stopped");
                    }
                });
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(_) => {
                tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                Ok(())
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        GATEWAY_EVENTS_RECEIVED,
        "Total number of items received by the gateway"
    );
    describe_counter!(
        GATEWAY_EVENTS_ACCEPTED,
        "Total number of events validated and published"
    );
    describe_counter!(
        GATEWAY_EVENTS_REJECTED,
        "Total number of items rejected by validation or publishing"
    );
    describe_counter!(
        GATEWAY_EVENTS_PUBLISHED,
        "Total number of events published to the stream"
    );
    describe_counter!(
        GATEWAY_PUBLISH_FAILED,
        "Total number of events whose publish exhausted its retries"
    );
    describe_histogram!(
        GATEWAY_PUBLISH_DURATION,
        "Time taken to publish an event, retries included"
    );
    describe_counter!(
        COLLECTOR_EVENTS_CONSUMED,
        "Total number of messages fetched by collectors"
    );
    describe_counter!(
        COLLECTOR_EVENTS_PROCESSED,
        "Total number of messages processed and acknowledged"
    );
    describe_counter!(
        COLLECTOR_EVENTS_FAILED,
        "Total number of messages that failed decoding or processing"
    );
    describe_counter!(
        COLLECTOR_FETCH_ERRORS,
        "Total number of failed fetches, expiries excluded"
    );
}

/// Gateway metrics.
pub struct GatewayMetrics;

impl GatewayMetrics {
    /// Record a received batch.
    pub fn record_received(count: usize) {
        counter!(GATEWAY_EVENTS_RECEIVED).increment(count as u64);
    }

    /// Record the outcome of an ingest request.
    pub fn record_outcome(accepted: usize, rejected: usize) {
        counter!(GATEWAY_EVENTS_ACCEPTED).increment(accepted as u64);
        counter!(GATEWAY_EVENTS_REJECTED).increment(rejected as u64);
    }

    /// Record a successful publish.
    pub fn record_published(source: Source, duration: Duration) {
        counter!(GATEWAY_EVENTS_PUBLISHED, "source" => source.as_str()).increment(1);
        histogram!(GATEWAY_PUBLISH_DURATION, "source" => source.as_str())
            .record(duration.as_secs_f64());
    }

    /// Record a publish that exhausted its retries.
    pub fn record_publish_failed(source: Source) {
        counter!(GATEWAY_PUBLISH_FAILED, "source" => source.as_str()).increment(1);
    }
}

/// Collector metrics.
pub struct CollectorMetrics;

impl CollectorMetrics {
    /// Record a fetched message.
    pub fn record_consumed(source: Source) {
        counter!(COLLECTOR_EVENTS_CONSUMED, "source" => source.as_str()).increment(1);
    }

    /// Record a processed and acknowledged message.
    pub fn record_processed(source: Source) {
        counter!(COLLECTOR_EVENTS_PROCESSED, "source" => source.as_str()).increment(1);
    }

    /// Record a failed message.
    pub fn record_failed(source: Source) {
        counter!(COLLECTOR_EVENTS_FAILED, "source" => source.as_str()).increment(1);
    }

    /// Record a failed fetch.
    pub fn record_fetch_error(source: Source) {
        counter!(COLLECTOR_FETCH_ERRORS, "source" => source.as_str()).increment(1);
    }
}
