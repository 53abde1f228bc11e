//! # Engagement Web
//!
//! Axum routes of the gateway.
//!
//! | Route | Handler |
//! |-------|---------|
//! | `POST /events` | [`handlers::events::ingest_events`] |
//! | `GET /health`, `GET /health/live` | [`handlers::health::health_check`] |
//! | `GET /reports/events` | [`handlers::reports::events_report`] |
//! | `GET /reports/revenue` | [`handlers::reports::revenue_report`] |
//! | `GET /reports/demographics` | [`handlers::reports::demographics_report`] |
//! | `GET /metrics` | [`handlers::metrics::render_metrics`] |
//!
//! Every response carries an `x-request-id` header, generated when the
//! client did not send one, and every request is traced in a span holding
//! that id. Request bodies above the configured limit get a 413.
//!
//! # Example
//!
//! ```ignore
//! use engagement_web::{AppState, router};
//!
//! let state = AppState::new(Arc::new(IngestService::new(publisher)))
//!     .with_reports(Arc::new(store));
//! let app = router(state, 1024 * 1024);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod state;

pub use error::AppError;
pub use state::AppState;

use axum::{
    Router,
    body::Body,
    extract::DefaultBodyLimit,
    http::Request,
    routing::{get, post},
};
use engagement_runtime::IngestService;
use engagement_runtime::metrics::MetricsServer;
use handlers::reports::{Reports, demographics_report, events_report, revenue_report};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// `POST /events`.
pub fn ingest_router(service: Arc<IngestService>) -> Router {
    Router::new()
        .route("/events", post(handlers::ingest_events))
        .with_state(service)
}

/// `GET /health` and `GET /health/live`.
pub fn health_router() -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/health/live", get(handlers::health_check))
}

/// `GET /reports/events|revenue|demographics`.
pub fn reports_router(reports: Reports) -> Router {
    Router::new()
        .route("/reports/events", get(events_report))
        .route("/reports/revenue", get(revenue_report))
        .route("/reports/demographics", get(demographics_report))
        .with_state(reports)
}

/// `GET /metrics`.
pub fn metrics_router(metrics: Arc<MetricsServer>) -> Router {
    Router::new()
        .route("/metrics", get(handlers::metrics::render_metrics))
        .with_state(metrics)
}

/// Every route `state` supports, with request ids, tracing and the body
/// limit applied.
pub fn router(state: AppState, body_limit_bytes: usize) -> Router {
    let mut app = health_router().merge(ingest_router(state.ingest));
    if let Some(reports) = state.reports {
        app = app.merge(reports_router(reports));
    }
    if let Some(metrics) = state.metrics {
        app = app.merge(metrics_router(metrics));
    }

    app.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http().make_span_with(request_span))
            .layer(PropagateRequestIdLayer::x_request_id()),
    )
    .layer(DefaultBodyLimit::disable())
    .layer(RequestBodyLimitLayer::new(body_limit_bytes))
}

fn request_span(request: &Request<Body>) -> tracing::Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");
    tracing::info_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
        request_id = %request_id,
    )
}
