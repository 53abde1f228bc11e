//! Sample events for every `(source, funnelStage)` pair.
//!
//! JSON builders return wire-shaped values that pass validation; the typed
//! helpers run them through [`EventValidator`].

#![allow(clippy::expect_used)] // Fixtures are valid by construction
#![allow(clippy::missing_panics_doc)]

use engagement_core::envelope;
use engagement_core::{Event, EventValidator};
use serde_json::{Value, json};

/// Timestamp used by every fixture.
pub const FIXTURE_TIMESTAMP: &str = "2025-09-01T10:00:00Z";

/// Facebook top-funnel `ad.view` by user `u1`, without video.
#[must_use]
pub fn facebook_top_json(event_id: &str) -> Value {
    json!({
        "eventId": event_id,
        "timestamp": FIXTURE_TIMESTAMP,
        "source": "facebook",
        "funnelStage": "top",
        "eventType": "ad.view",
        "data": {
            "user": {
                "userId": "u1",
                "name": "Ada Lovelace",
                "age": 36,
                "gender": "female",
                "location": { "country": "UK", "city": "London" }
            },
            "engagement": {
                "actionTime": FIXTURE_TIMESTAMP,
                "referrer": "newsfeed",
                "videoId": null
            }
        }
    })
}

/// Facebook bottom-funnel `checkout.complete` by user `u2` in campaign `cmp-1`.
#[must_use]
pub fn facebook_bottom_json(event_id: &str, purchase_amount: Option<&str>) -> Value {
    json!({
        "eventId": event_id,
        "timestamp": FIXTURE_TIMESTAMP,
        "source": "facebook",
        "funnelStage": "bottom",
        "eventType": "checkout.complete",
        "data": {
            "user": {
                "userId": "u2",
                "name": "Grace Hopper",
                "age": 45,
                "gender": "female",
                "location": { "country": "US", "city": "New York" }
            },
            "engagement": {
                "adId": "ad-1",
                "campaignId": "cmp-1",
                "clickPosition": "center",
                "device": "desktop",
                "browser": "Firefox",
                "purchaseAmount": purchase_amount
            }
        }
    })
}

/// TikTok top-funnel `video.view` by user `t1`.
#[must_use]
pub fn tiktok_top_json(event_id: &str) -> Value {
    json!({
        "eventId": event_id,
        "timestamp": FIXTURE_TIMESTAMP,
        "source": "tiktok",
        "funnelStage": "top",
        "eventType": "video.view",
        "data": {
            "user": {
                "userId": "t1",
                "username": "dancer42",
                "followers": 1200
            },
            "engagement": {
                "watchTime": 12.5,
                "percentageWatched": 80,
                "device": "iOS",
                "country": "DE",
                "videoId": "vid-9"
            }
        }
    })
}

/// TikTok bottom-funnel `purchase` by user `t1`.
#[must_use]
pub fn tiktok_bottom_json(event_id: &str, purchase_amount: Option<&str>) -> Value {
    json!({
        "eventId": event_id,
        "timestamp": FIXTURE_TIMESTAMP,
        "source": "tiktok",
        "funnelStage": "bottom",
        "eventType": "purchase",
        "data": {
            "user": {
                "userId": "t1",
                "username": "dancer42",
                "followers": 1250
            },
            "engagement": {
                "actionTime": FIXTURE_TIMESTAMP,
                "profileId": "profile-7",
                "purchasedItem": "sneakers",
                "purchaseAmount": purchase_amount
            }
        }
    })
}

/// Validate `value` into an [`Event`].
#[must_use]
pub fn event_from(value: &Value) -> Event {
    EventValidator::new()
        .validate_one(value)
        .expect("fixture must be a valid event")
}

/// Typed [`facebook_top_json`].
#[must_use]
pub fn facebook_top_event(event_id: &str) -> Event {
    event_from(&facebook_top_json(event_id))
}

/// Typed [`facebook_bottom_json`].
#[must_use]
pub fn facebook_bottom_event(event_id: &str, purchase_amount: Option<&str>) -> Event {
    event_from(&facebook_bottom_json(event_id, purchase_amount))
}

/// Typed [`tiktok_top_json`].
#[must_use]
pub fn tiktok_top_event(event_id: &str) -> Event {
    event_from(&tiktok_top_json(event_id))
}

/// Typed [`tiktok_bottom_json`].
#[must_use]
pub fn tiktok_bottom_event(event_id: &str, purchase_amount: Option<&str>) -> Event {
    event_from(&tiktok_bottom_json(event_id, purchase_amount))
}

/// Stream payload for `event` under `correlation_id`.
#[must_use]
pub fn envelope_bytes(event: &Event, correlation_id: &str) -> Vec<u8> {
    envelope::encode(event, correlation_id).expect("fixture must encode")
}
