//! Event ingestion.

use crate::error::AppError;
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use engagement_runtime::{IngestService, IngestSummary};
use serde_json::Value;
use std::sync::Arc;

/// Validate a batch of events and publish the valid ones.
///
/// Always answers 202 Accepted once the body parsed as JSON, including for
/// bodies that are not arrays and for batches whose publishes failed; the
/// summary says how many events were accepted and rejected. Malformed JSON
/// is a 400.
///
/// # Endpoint
///
/// ```text
/// POST /events
/// ```
///
/// # Response
///
/// ```json
/// {
///   "message": "Events are being processed.",
///   "accepted": 2,
///   "rejected": 1
/// }
/// ```
///
/// # Errors
///
/// Returns 400 if the body is not JSON.
pub async fn ingest_events(
    State(service): State<Arc<IngestService>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<IngestSummary>), AppError> {
    let Json(body) = body?;
    let summary = service.ingest(&body).await;
    Ok((StatusCode::ACCEPTED, Json(summary)))
}
