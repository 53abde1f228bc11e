//! Prometheus scrape endpoint on the main listener.

use crate::error::AppError;
use axum::{extract::State, http::header, response::IntoResponse};
use engagement_runtime::metrics::MetricsServer;
use std::sync::Arc;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Render current metrics in the Prometheus text format.
///
/// # Errors
///
/// Returns 503 if no recorder was installed by this process.
#[allow(clippy::unused_async)]
pub async fn render_metrics(
    State(metrics): State<Arc<MetricsServer>>,
) -> Result<impl IntoResponse, AppError> {
    let body = metrics
        .render()
        .ok_or_else(|| AppError::unavailable("Metrics recorder is not installed"))?;
    Ok(([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body))
}
