//! Components shared by the routers.

use engagement_core::report::ReportRepository;
use engagement_runtime::IngestService;
use engagement_runtime::metrics::MetricsServer;
use std::sync::Arc;

/// What the gateway serves.
///
/// Ingestion is always mounted. Reports and metrics routes are mounted only
/// when the matching component is present.
#[derive(Clone)]
pub struct AppState {
    /// Validates and publishes `POST /events` bodies.
    pub ingest: Arc<IngestService>,
    /// Answers `GET /reports/*`.
    pub reports: Option<Arc<dyn ReportRepository>>,
    /// Renders `GET /metrics`.
    pub metrics: Option<Arc<MetricsServer>>,
}

impl AppState {
    /// State with ingestion only.
    #[must_use]
    pub const fn new(ingest: Arc<IngestService>) -> Self {
        Self {
            ingest,
            reports: None,
            metrics: None,
        }
    }

    /// Serve reports from `reports`.
    #[must_use]
    pub fn with_reports(mut self, reports: Arc<dyn ReportRepository>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// Serve metrics rendered by `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsServer>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}
