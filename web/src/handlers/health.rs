//! Liveness endpoint, used by load balancers and orchestrators.

use axum::http::StatusCode;

/// Liveness check.
///
/// Returns 200 OK while the process serves requests. Dependencies are not
/// checked.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// GET /health/live
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}
