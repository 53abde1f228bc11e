//! Read-only reports over stored events.
//!
//! Every report takes a required `from`/`to` window, given either as an
//! RFC 3339 timestamp or as a `YYYY-MM-DD` date meaning midnight UTC, and
//! an optional `source`.

use crate::error::AppError;
use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
};
use chrono::{DateTime, NaiveDate, Utc};
use engagement_core::record::SavedUser;
use engagement_core::report::{
    EventCount, EventCountQuery, ReportRepository, ReportWindow, RevenueQuery, RevenueReport,
};
use engagement_core::{FunnelStage, Source};
use serde::Deserialize;
use std::sync::Arc;

/// Shared handle to the report backend.
pub type Reports = Arc<dyn ReportRepository>;

/// Query string accepted by the report endpoints.
///
/// Parameters a report does not use are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportParams {
    /// Window start.
    pub from: Option<String>,
    /// Window end.
    pub to: Option<String>,
    /// `facebook` or `tiktok`.
    pub source: Option<String>,
    /// `top` or `bottom`.
    pub funnel_stage: Option<String>,
    /// Exact event type.
    pub event_type: Option<String>,
    /// Exact campaign id.
    pub campaign_id: Option<String>,
}

impl ReportParams {
    /// The window these parameters describe.
    ///
    /// # Errors
    ///
    /// Returns 400 if a bound is missing or malformed, if the source is
    /// unknown, or if `from` is after `to`.
    pub fn window(&self) -> Result<ReportWindow, AppError> {
        let from = parse_bound("from", self.from.as_deref())?;
        let to = parse_bound("to", self.to.as_deref())?;
        if from > to {
            return Err(AppError::bad_request("'from' must not be after 'to'"));
        }
        let source = self
            .source
            .as_deref()
            .map(str::parse::<Source>)
            .transpose()
            .map_err(|e| AppError::bad_request(format!("Invalid 'source': {e}")))?;
        Ok(ReportWindow { from, to, source })
    }

    /// Filters of the events report.
    ///
    /// # Errors
    ///
    /// Returns 400 on an invalid window or funnel stage.
    pub fn event_count_query(&self) -> Result<EventCountQuery, AppError> {
        let funnel_stage = self
            .funnel_stage
            .as_deref()
            .map(str::parse::<FunnelStage>)
            .transpose()
            .map_err(|e| AppError::bad_request(format!("Invalid 'funnelStage': {e}")))?;
        Ok(EventCountQuery {
            window: self.window()?,
            funnel_stage,
            event_type: non_empty(self.event_type.as_deref()),
        })
    }

    /// Filters of the revenue report.
    ///
    /// # Errors
    ///
    /// Returns 400 on an invalid window.
    pub fn revenue_query(&self) -> Result<RevenueQuery, AppError> {
        Ok(RevenueQuery {
            window: self.window()?,
            campaign_id: non_empty(self.campaign_id.as_deref()),
        })
    }
}

fn parse_bound(name: &str, value: Option<&str>) -> Result<DateTime<Utc>, AppError> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::bad_request(format!("Missing '{name}'")))?;

    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
        .ok_or_else(|| {
            AppError::bad_request(format!(
                "Invalid '{name}': expected an RFC 3339 timestamp or a YYYY-MM-DD date"
            ))
        })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

/// Event counts per source, funnel stage and event type.
///
/// # Endpoint
///
/// ```text
/// GET /reports/events?from=..&to=..[&source=..][&funnelStage=..][&eventType=..]
/// ```
///
/// # Errors
///
/// Returns 400 on invalid parameters and 500 if the query fails.
pub async fn events_report(
    State(reports): State<Reports>,
    params: Result<Query<ReportParams>, QueryRejection>,
) -> Result<Json<Vec<EventCount>>, AppError> {
    let Query(params) = params?;
    let query = params.event_count_query()?;
    Ok(Json(reports.event_counts(&query).await?))
}

/// Purchase revenue, in total and per campaign.
///
/// # Endpoint
///
/// ```text
/// GET /reports/revenue?from=..&to=..[&source=..][&campaignId=..]
/// ```
///
/// # Errors
///
/// Returns 400 on invalid parameters and 500 if the query fails.
pub async fn revenue_report(
    State(reports): State<Reports>,
    params: Result<Query<ReportParams>, QueryRejection>,
) -> Result<Json<RevenueReport>, AppError> {
    let Query(params) = params?;
    let query = params.revenue_query()?;
    Ok(Json(reports.revenue(&query).await?))
}

/// Users active in the window.
///
/// # Endpoint
///
/// ```text
/// GET /reports/demographics?from=..&to=..[&source=..]
/// ```
///
/// # Errors
///
/// Returns 400 on invalid parameters and 500 if the query fails.
pub async fn demographics_report(
    State(reports): State<Reports>,
    params: Result<Query<ReportParams>, QueryRejection>,
) -> Result<Json<Vec<SavedUser>>, AppError> {
    let Query(params) = params?;
    let window = params.window()?;
    Ok(Json(reports.demographics(&window).await?))
}
