//! Report queries.

use crate::PostgresEngagementStore;
use crate::rows::{USER_COLUMNS, parse_column, store_error, user_from_row};
use engagement_core::record::SavedUser;
use engagement_core::report::{
    CampaignRevenue, EventCount, EventCountQuery, ReportRepository, ReportWindow, RevenueQuery,
    RevenueReport,
};
use engagement_core::store::StoreFuture;
use engagement_core::{FunnelStage, Source};
use rust_decimal::Decimal;
use sqlx::Row;

impl ReportRepository for PostgresEngagementStore {
    fn event_counts<'a>(&'a self, query: &'a EventCountQuery) -> StoreFuture<'a, Vec<EventCount>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT source, funnel_stage, event_type, COUNT(*) AS count
                FROM events
                WHERE occurred_at BETWEEN $1 AND $2
                  AND ($3::text IS NULL OR source = $3)
                  AND ($4::text IS NULL OR funnel_stage = $4)
                  AND ($5::text IS NULL OR event_type = $5)
                GROUP BY source, funnel_stage, event_type
                ORDER BY source, funnel_stage, event_type
                ",
            )
            .bind(query.window.from)
            .bind(query.window.to)
            .bind(query.window.source.map(Source::as_str))
            .bind(query.funnel_stage.map(FunnelStage::as_str))
            .bind(query.event_type.as_deref())
            .fetch_all(self.pool())
            .await
            .map_err(store_error)?;

            rows.iter()
                .map(|row| {
                    Ok(EventCount {
                        source: parse_column(row, "source")?,
                        funnel_stage: parse_column(row, "funnel_stage")?,
                        event_type: row.try_get("event_type").map_err(store_error)?,
                        count: row.try_get("count").map_err(store_error)?,
                    })
                })
                .collect()
        })
    }

    fn revenue<'a>(&'a self, query: &'a RevenueQuery) -> StoreFuture<'a, RevenueReport> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT g.campaign_id, SUM(g.purchase_amount) AS revenue
                FROM engagements g
                JOIN events e ON e.id = g.event_id
                WHERE e.occurred_at BETWEEN $1 AND $2
                  AND g.purchase_amount IS NOT NULL
                  AND ($3::text IS NULL OR e.source = $3)
                  AND ($4::text IS NULL OR g.campaign_id = $4)
                GROUP BY g.campaign_id
                ORDER BY g.campaign_id
                ",
            )
            .bind(query.window.from)
            .bind(query.window.to)
            .bind(query.window.source.map(Source::as_str))
            .bind(query.campaign_id.as_deref())
            .fetch_all(self.pool())
            .await
            .map_err(store_error)?;

            let mut report = RevenueReport {
                total_revenue: Decimal::ZERO,
                by_campaign: Vec::new(),
            };
            for row in &rows {
                let revenue: Decimal = row.try_get("revenue").map_err(store_error)?;
                report.total_revenue += revenue;
                let campaign: Option<String> = row.try_get("campaign_id").map_err(store_error)?;
                if let Some(campaign_id) = campaign {
                    report.by_campaign.push(CampaignRevenue {
                        campaign_id,
                        revenue,
                    });
                }
            }
            Ok(report)
        })
    }

    fn demographics<'a>(&'a self, window: &'a ReportWindow) -> StoreFuture<'a, Vec<SavedUser>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                r"
                SELECT {USER_COLUMNS} FROM users u
                WHERE EXISTS (
                    SELECT 1 FROM events e
                    WHERE e.user_id = u.id
                      AND e.occurred_at BETWEEN $1 AND $2
                      AND ($3::text IS NULL OR e.source = $3)
                )
                ORDER BY u.source, u.source_user_id
                "
            ))
            .bind(window.from)
            .bind(window.to)
            .bind(window.source.map(Source::as_str))
            .fetch_all(self.pool())
            .await
            .map_err(store_error)?;

            rows.iter().map(user_from_row).collect()
        })
    }
}
