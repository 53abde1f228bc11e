//! Gateway ingestion: validate a batch, publish the valid part, summarize.

use crate::metrics::GatewayMetrics;
use crate::publisher::EventPublisher;
use engagement_core::EventValidator;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Message returned for an accepted request.
pub const ACCEPTED_MESSAGE: &str = "Events are being processed.";

/// Message returned when the body is not an array.
pub const NOT_AN_ARRAY_MESSAGE: &str = "Rejected. Events must be an array.";

/// Response body of an ingest request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Human-readable status.
    pub message: String,
    /// Events validated and published.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<usize>,
    /// Items rejected by validation or publishing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected: Option<usize>,
}

impl IngestSummary {
    /// Summary of a processed batch.
    #[must_use]
    pub fn processed(accepted: usize, rejected: usize) -> Self {
        Self {
            message: ACCEPTED_MESSAGE.to_string(),
            accepted: Some(accepted),
            rejected: Some(rejected),
        }
    }

    /// Summary for a body that is not an array.
    #[must_use]
    pub fn not_an_array() -> Self {
        Self {
            message: NOT_AN_ARRAY_MESSAGE.to_string(),
            accepted: None,
            rejected: None,
        }
    }
}

/// Validates and publishes inbound batches.
pub struct IngestService {
    validator: EventValidator,
    publisher: Arc<EventPublisher>,
}

impl IngestService {
    /// Create a service publishing through `publisher`.
    #[must_use]
    pub const fn new(publisher: Arc<EventPublisher>) -> Self {
        Self {
            validator: EventValidator::new(),
            publisher,
        }
    }

    /// Ingest a raw request body.
    ///
    /// Anything other than a JSON array is rejected as a whole. For arrays,
    /// `accepted` counts events that were published and `rejected` counts
    /// invalid items plus events whose publish failed, so the two always sum
    /// to the array length.
    pub async fn ingest(&self, body: &Value) -> IngestSummary {
        let Value::Array(items) = body else {
            tracing::warn!("Rejected request body that is not an array");
            return IngestSummary::not_an_array();
        };
        GatewayMetrics::record_received(items.len());

        let report = self.validator.validate(items);
        let published = self.publisher.publish_batch(&report.valid_events).await;

        let accepted = published.published();
        let rejected = report.invalid_count + published.failed();
        GatewayMetrics::record_outcome(accepted, rejected);
        tracing::info!(
            received = items.len(),
            accepted,
            rejected,
            "Ingested event batch"
        );
        IngestSummary::processed(accepted, rejected)
    }
}
