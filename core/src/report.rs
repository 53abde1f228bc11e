//! Read-side aggregates over stored events.

use crate::event::{FunnelStage, Source};
use crate::record::SavedUser;
use crate::store::StoreFuture;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Time window and source shared by every report.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReportWindow {
    /// Inclusive start.
    pub from: DateTime<Utc>,
    /// Inclusive end.
    pub to: DateTime<Utc>,
    /// Restrict to one source.
    #[serde(default)]
    pub source: Option<Source>,
}

impl ReportWindow {
    /// Whether `at` falls inside the window.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && at <= self.to
    }

    /// Whether `source` passes the source filter.
    #[must_use]
    pub fn admits(&self, source: Source) -> bool {
        self.source.is_none_or(|wanted| wanted == source)
    }
}

/// Filters for the event count report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCountQuery {
    /// Window and source.
    pub window: ReportWindow,
    /// Restrict to one funnel stage.
    pub funnel_stage: Option<FunnelStage>,
    /// Restrict to one event type.
    pub event_type: Option<String>,
}

/// Events counted per `(source, funnelStage, eventType)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCount {
    /// Source.
    pub source: Source,
    /// Funnel stage.
    pub funnel_stage: FunnelStage,
    /// Event type literal.
    pub event_type: String,
    /// Number of events.
    pub count: i64,
}

/// Filters for the revenue report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevenueQuery {
    /// Window and source.
    pub window: ReportWindow,
    /// Restrict to one campaign.
    pub campaign_id: Option<String>,
}

/// Revenue of one campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignRevenue {
    /// Campaign.
    pub campaign_id: String,
    /// Sum of purchase amounts.
    pub revenue: Decimal,
}

/// Revenue over a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueReport {
    /// Sum over every purchase in the window.
    pub total_revenue: Decimal,
    /// Per-campaign sums, campaigns without id excluded.
    pub by_campaign: Vec<CampaignRevenue>,
}

/// Report queries.
pub trait ReportRepository: Send + Sync {
    /// Event counts grouped by source, stage and type, ordered by those keys.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::store::StoreError) if the query fails.
    fn event_counts<'a>(&'a self, query: &'a EventCountQuery) -> StoreFuture<'a, Vec<EventCount>>;

    /// Revenue total and per campaign, campaigns ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::store::StoreError) if the query fails.
    fn revenue<'a>(&'a self, query: &'a RevenueQuery) -> StoreFuture<'a, RevenueReport>;

    /// Users with at least one event in the window, ordered by platform id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::store::StoreError) if the query fails.
    fn demographics<'a>(&'a self, window: &'a ReportWindow) -> StoreFuture<'a, Vec<SavedUser>>;
}
