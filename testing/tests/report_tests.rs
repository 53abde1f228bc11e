//! Report queries over the in-memory store.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use chrono::{DateTime, TimeZone, Utc};
use engagement_core::record::{NewEvent, UserProfile};
use engagement_core::report::{EventCountQuery, ReportRepository, ReportWindow, RevenueQuery};
use engagement_core::{EngagementStore, Event, FunnelStage, Source};
use engagement_testing::{InMemoryEngagementStore, fixtures};
use rust_decimal::Decimal;

async fn store_event(store: &InMemoryEngagementStore, event: &Event) {
    let user = store
        .upsert_user(&UserProfile::from_event(event))
        .await
        .expect("upsert");
    let record = NewEvent::from_event(event).expect("mapping");
    store.save_event(user.id, &record).await.expect("save");
}

async fn seeded() -> InMemoryEngagementStore {
    let store = InMemoryEngagementStore::new();
    for event in [
        fixtures::facebook_top_event("fb_top_1"),
        fixtures::facebook_bottom_event("fb_bottom_1", Some("99.99")),
        fixtures::facebook_bottom_event("fb_bottom_2", Some("10")),
        fixtures::facebook_bottom_event("fb_bottom_3", None),
        fixtures::tiktok_bottom_event("ttk_bottom_1", Some("5.00")),
    ] {
        store_event(&store, &event).await;
    }
    store
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 1, hour, 0, 0).unwrap()
}

fn window(source: Option<Source>) -> ReportWindow {
    ReportWindow {
        from: at(0),
        to: at(23),
        source,
    }
}

#[tokio::test]
async fn event_counts_are_grouped_and_ordered() {
    let store = seeded().await;

    let counts = store
        .event_counts(&EventCountQuery {
            window: window(None),
            funnel_stage: None,
            event_type: None,
        })
        .await
        .unwrap();

    let rows: Vec<(&str, &str, &str, i64)> = counts
        .iter()
        .map(|c| (c.source.as_str(), c.funnel_stage.as_str(), c.event_type.as_str(), c.count))
        .collect();
    assert_eq!(
        rows,
        [
            ("facebook", "bottom", "checkout.complete", 3),
            ("facebook", "top", "ad.view", 1),
            ("tiktok", "bottom", "purchase", 1),
        ]
    );
}

#[tokio::test]
async fn event_counts_honour_filters() {
    let store = seeded().await;

    let counts = store
        .event_counts(&EventCountQuery {
            window: window(Some(Source::Facebook)),
            funnel_stage: Some(FunnelStage::Top),
            event_type: None,
        })
        .await
        .unwrap();
    assert_eq!(counts.len(), 1);
    assert_eq!(counts[0].event_type, "ad.view");

    let outside = store
        .event_counts(&EventCountQuery {
            window: ReportWindow {
                from: at(11),
                to: at(12),
                source: None,
            },
            funnel_stage: None,
            event_type: None,
        })
        .await
        .unwrap();
    assert!(outside.is_empty());
}

#[tokio::test]
async fn revenue_sums_purchase_amounts() {
    let store = seeded().await;

    let report = store
        .revenue(&RevenueQuery {
            window: window(None),
            campaign_id: None,
        })
        .await
        .unwrap();
    assert_eq!(report.total_revenue, Decimal::new(11_499, 2));
    assert_eq!(report.by_campaign.len(), 1);
    assert_eq!(report.by_campaign[0].campaign_id, "cmp-1");
    assert_eq!(report.by_campaign[0].revenue, Decimal::new(10_999, 2));

    let tiktok = store
        .revenue(&RevenueQuery {
            window: window(Some(Source::Tiktok)),
            campaign_id: None,
        })
        .await
        .unwrap();
    assert_eq!(tiktok.total_revenue, Decimal::new(500, 2));
    assert!(tiktok.by_campaign.is_empty());
}

#[tokio::test]
async fn demographics_lists_active_users() {
    let store = seeded().await;

    let users = store.demographics(&window(None)).await.unwrap();
    let ids: Vec<(&str, &str)> = users
        .iter()
        .map(|u| (u.source.as_str(), u.source_user_id.as_str()))
        .collect();
    assert_eq!(ids, [("facebook", "u1"), ("facebook", "u2"), ("tiktok", "t1")]);

    let tiktok = store.demographics(&window(Some(Source::Tiktok))).await.unwrap();
    assert_eq!(tiktok.len(), 1);
    assert_eq!(tiktok[0].followers, Some(1250));
    assert_eq!(tiktok[0].name.as_deref(), Some("dancer42"));
}
