//! Typed marketing engagement events.
//!
//! An [`Event`] is only ever produced by the validator (or by [`Event::new`]
//! from already-typed parts), so every value of this type satisfies the
//! schema of its `(source, funnelStage)` pair. The payload is a closed enum
//! with one variant per leaf schema; downstream code matches exhaustively on
//! it instead of re-inspecting raw JSON.
//!
//! Serialization reproduces the wire shape accepted by the validator:
//!
//! ```json
//! {
//!   "eventId": "fb_top_123",
//!   "timestamp": "2025-09-01T10:00:00Z",
//!   "source": "facebook",
//!   "funnelStage": "top",
//!   "eventType": "ad.view",
//!   "data": { "user": { ... }, "engagement": { ... } }
//! }
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A closed set of string literals used on the wire.
///
/// Implemented by every enum declared through `wire_enum!`; the validator
/// uses it to check enum-typed fields generically.
pub trait WireEnum: Sized + Copy + 'static {
    /// Every accepted literal, in declaration order.
    const VARIANTS: &'static [&'static str];

    /// Parse a wire literal. Matching is exact and case-sensitive.
    fn from_wire(value: &str) -> Option<Self>;

    /// The wire literal for this value.
    fn as_wire(self) -> &'static str;
}

/// Error returned when a string is not one of an enum's wire literals.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid value '{value}', expected one of: {expected}")]
pub struct UnknownVariant {
    /// The rejected input.
    pub value: String,
    /// Accepted literals, joined for display.
    pub expected: String,
}

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// The wire literal for this value.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire),+
                }
            }
        }

        impl WireEnum for $name {
            const VARIANTS: &'static [&'static str] = &[$($wire),+];

            fn from_wire(value: &str) -> Option<Self> {
                match value {
                    $($wire => Some(Self::$variant),)+
                    _ => None,
                }
            }

            fn as_wire(self) -> &'static str {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                <Self as WireEnum>::from_wire(value).ok_or_else(|| UnknownVariant {
                    value: value.to_string(),
                    expected: <Self as WireEnum>::VARIANTS.join(", "),
                })
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = String::deserialize(deserializer)?;
                <Self as WireEnum>::from_wire(&value).ok_or_else(|| {
                    de::Error::unknown_variant(&value, <Self as WireEnum>::VARIANTS)
                })
            }
        }
    };
}

wire_enum! {
    /// Originating platform of an event.
    Source {
        /// Facebook ads and pages.
        Facebook => "facebook",
        /// TikTok videos and profiles.
        Tiktok => "tiktok",
    }
}

wire_enum! {
    /// Position of an event in the marketing funnel.
    FunnelStage {
        /// Awareness: views, likes, comments.
        Top => "top",
        /// Conversion: clicks, purchases, follows.
        Bottom => "bottom",
    }
}

wire_enum! {
    /// Facebook top-of-funnel event types.
    FacebookTopEventType {
        /// An ad impression.
        AdView => "ad.view",
        /// A page like.
        PageLike => "page.like",
        /// A comment.
        Comment => "comment",
        /// A video view.
        VideoView => "video.view",
    }
}

wire_enum! {
    /// Facebook bottom-of-funnel event types.
    FacebookBottomEventType {
        /// A click on an ad.
        AdClick => "ad.click",
        /// A lead form submission.
        FormSubmission => "form.submission",
        /// A completed checkout.
        CheckoutComplete => "checkout.complete",
    }
}

wire_enum! {
    /// TikTok top-of-funnel event types.
    TiktokTopEventType {
        /// A video view.
        VideoView => "video.view",
        /// A like.
        Like => "like",
        /// A share.
        Share => "share",
        /// A comment.
        Comment => "comment",
    }
}

wire_enum! {
    /// TikTok bottom-of-funnel event types.
    TiktokBottomEventType {
        /// A visit to a profile.
        ProfileVisit => "profile.visit",
        /// An in-app purchase.
        Purchase => "purchase",
        /// A follow.
        Follow => "follow",
    }
}

wire_enum! {
    /// Gender reported for Facebook users.
    Gender {
        /// Male.
        Male => "male",
        /// Female.
        Female => "female",
        /// Non-binary.
        NonBinary => "non-binary",
    }
}

wire_enum! {
    /// Where a Facebook top-funnel interaction started.
    FacebookReferrer {
        /// The news feed.
        Newsfeed => "newsfeed",
        /// Marketplace.
        Marketplace => "marketplace",
        /// Groups.
        Groups => "groups",
    }
}

wire_enum! {
    /// Where on an ad creative the click landed.
    ClickPosition {
        /// Top left corner.
        TopLeft => "top_left",
        /// Bottom right corner.
        BottomRight => "bottom_right",
        /// Center.
        Center => "center",
    }
}

wire_enum! {
    /// Device class for Facebook conversions.
    FacebookDevice {
        /// Phone or tablet.
        Mobile => "mobile",
        /// Desktop browser.
        Desktop => "desktop",
    }
}

wire_enum! {
    /// Browser used for Facebook conversions.
    Browser {
        /// Google Chrome.
        Chrome => "Chrome",
        /// Mozilla Firefox.
        Firefox => "Firefox",
        /// Apple Safari.
        Safari => "Safari",
    }
}

wire_enum! {
    /// Device platform for TikTok views.
    TiktokDevice {
        /// Android app.
        Android => "Android",
        /// iOS app.
        Ios => "iOS",
        /// Desktop web.
        Desktop => "Desktop",
    }
}

impl Source {
    /// Both sources, in a stable order.
    pub const ALL: [Self; 2] = [Self::Facebook, Self::Tiktok];

    /// Stream subject carrying this source's events.
    #[must_use]
    pub const fn subject(self) -> &'static str {
        match self {
            Self::Facebook => "events.facebook",
            Self::Tiktok => "events.tiktok",
        }
    }

    /// Durable consumer name used by this source's collector.
    #[must_use]
    pub const fn consumer_name(self) -> &'static str {
        match self {
            Self::Facebook => "fb_collector_consumer",
            Self::Tiktok => "ttk_collector_consumer",
        }
    }
}

/// Physical location of a Facebook user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FacebookLocation {
    /// Country name.
    pub country: String,
    /// City name.
    pub city: String,
}

/// A Facebook user as reported with each event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FacebookUser {
    /// Platform user id.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Age in years, exactly as received.
    pub age: Number,
    /// Reported gender.
    pub gender: Gender,
    /// Location.
    pub location: FacebookLocation,
}

impl FacebookUser {
    /// Age as a whole number, if it fits the stored column.
    #[must_use]
    pub fn age_years(&self) -> Option<i32> {
        whole_number(&self.age).and_then(|age| i32::try_from(age).ok())
    }
}

/// Facebook top-of-funnel engagement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FacebookTopEngagement {
    /// When the action happened, as sent by the platform.
    pub action_time: String,
    /// Where the interaction started.
    pub referrer: FacebookReferrer,
    /// Video involved, if any.
    pub video_id: Option<String>,
}

/// Facebook bottom-of-funnel engagement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FacebookBottomEngagement {
    /// Ad that was interacted with.
    pub ad_id: String,
    /// Campaign the ad belongs to.
    pub campaign_id: String,
    /// Click location on the creative.
    pub click_position: ClickPosition,
    /// Device class.
    pub device: FacebookDevice,
    /// Browser.
    pub browser: Browser,
    /// Purchase amount as a decimal string, if any.
    pub purchase_amount: Option<String>,
}

/// A TikTok user as reported with each event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TiktokUser {
    /// Platform user id.
    pub user_id: String,
    /// Handle.
    pub username: String,
    /// Follower count, exactly as received.
    pub followers: Number,
}

impl TiktokUser {
    /// Follower count as a whole number, if it fits the stored column.
    #[must_use]
    pub fn follower_count(&self) -> Option<i64> {
        whole_number(&self.followers)
    }
}

/// `28` and `28.0` both read as 28; fractional or out-of-range values do not.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::float_cmp
)]
pub(crate) fn whole_number(number: &Number) -> Option<i64> {
    if let Some(integer) = number.as_i64() {
        return Some(integer);
    }
    let float = number.as_f64()?;
    let in_range = float >= i64::MIN as f64 && float < i64::MAX as f64;
    (float.fract() == 0.0 && in_range).then_some(float as i64)
}

/// TikTok top-of-funnel engagement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TiktokTopEngagement {
    /// Seconds watched.
    pub watch_time: Number,
    /// Share of the video watched, 0 to 100.
    pub percentage_watched: Number,
    /// Device platform.
    pub device: TiktokDevice,
    /// Viewer country.
    pub country: String,
    /// Video watched.
    pub video_id: String,
}

/// TikTok bottom-of-funnel engagement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TiktokBottomEngagement {
    /// When the action happened, as sent by the platform.
    pub action_time: String,
    /// Profile visited, if any.
    pub profile_id: Option<String>,
    /// Item purchased, if any.
    pub purchased_item: Option<String>,
    /// Purchase amount as a decimal string, if any.
    pub purchase_amount: Option<String>,
}

/// Per-leaf payload of an event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// `facebook` / `top`
    FacebookTop {
        /// Event type.
        event_type: FacebookTopEventType,
        /// Acting user.
        user: FacebookUser,
        /// Engagement details.
        engagement: FacebookTopEngagement,
    },
    /// `facebook` / `bottom`
    FacebookBottom {
        /// Event type.
        event_type: FacebookBottomEventType,
        /// Acting user.
        user: FacebookUser,
        /// Engagement details.
        engagement: FacebookBottomEngagement,
    },
    /// `tiktok` / `top`
    TiktokTop {
        /// Event type.
        event_type: TiktokTopEventType,
        /// Acting user.
        user: TiktokUser,
        /// Engagement details.
        engagement: TiktokTopEngagement,
    },
    /// `tiktok` / `bottom`
    TiktokBottom {
        /// Event type.
        event_type: TiktokBottomEventType,
        /// Acting user.
        user: TiktokUser,
        /// Engagement details.
        engagement: TiktokBottomEngagement,
    },
}

impl EventPayload {
    /// Source this payload belongs to.
    #[must_use]
    pub const fn source(&self) -> Source {
        match self {
            Self::FacebookTop { .. } | Self::FacebookBottom { .. } => Source::Facebook,
            Self::TiktokTop { .. } | Self::TiktokBottom { .. } => Source::Tiktok,
        }
    }

    /// Funnel stage this payload belongs to.
    #[must_use]
    pub const fn funnel_stage(&self) -> FunnelStage {
        match self {
            Self::FacebookTop { .. } | Self::TiktokTop { .. } => FunnelStage::Top,
            Self::FacebookBottom { .. } | Self::TiktokBottom { .. } => FunnelStage::Bottom,
        }
    }

    /// Wire literal of the event type.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::FacebookTop { event_type, .. } => event_type.as_str(),
            Self::FacebookBottom { event_type, .. } => event_type.as_str(),
            Self::TiktokTop { event_type, .. } => event_type.as_str(),
            Self::TiktokBottom { event_type, .. } => event_type.as_str(),
        }
    }

    /// Platform id of the acting user.
    #[must_use]
    pub fn user_id(&self) -> &str {
        match self {
            Self::FacebookTop { user, .. } | Self::FacebookBottom { user, .. } => &user.user_id,
            Self::TiktokTop { user, .. } | Self::TiktokBottom { user, .. } => &user.user_id,
        }
    }
}

/// A validated marketing engagement event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    event_id: String,
    timestamp: String,
    occurred_at: DateTime<Utc>,
    payload: EventPayload,
}

impl Event {
    /// Build an event from typed parts.
    ///
    /// The wire timestamp is rendered as RFC 3339 in UTC with a `Z` suffix.
    #[must_use]
    pub fn new(event_id: impl Into<String>, occurred_at: DateTime<Utc>, payload: EventPayload) -> Self {
        Self {
            event_id: event_id.into(),
            timestamp: occurred_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            occurred_at,
            payload,
        }
    }

    /// Used by the validator, which has already parsed `timestamp`.
    pub(crate) const fn from_parts(
        event_id: String,
        timestamp: String,
        occurred_at: DateTime<Utc>,
        payload: EventPayload,
    ) -> Self {
        Self {
            event_id,
            timestamp,
            occurred_at,
            payload,
        }
    }

    /// Producer-assigned identity, the idempotency key.
    #[must_use]
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// Timestamp exactly as received.
    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Parsed timestamp.
    #[must_use]
    pub const fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Typed payload.
    #[must_use]
    pub const fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Source of the event.
    #[must_use]
    pub const fn source(&self) -> Source {
        self.payload.source()
    }

    /// Funnel stage of the event.
    #[must_use]
    pub const fn funnel_stage(&self) -> FunnelStage {
        self.payload.funnel_stage()
    }

    /// Wire literal of the event type.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    /// Stream subject this event is published to.
    #[must_use]
    pub const fn subject(&self) -> &'static str {
        self.source().subject()
    }
}

#[derive(Serialize)]
struct Data<'a, U, E> {
    user: &'a U,
    engagement: &'a E,
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(6))?;
        map.serialize_entry("eventId", &self.event_id)?;
        map.serialize_entry("timestamp", &self.timestamp)?;
        map.serialize_entry("source", &self.source())?;
        map.serialize_entry("funnelStage", &self.funnel_stage())?;
        map.serialize_entry("eventType", self.event_type())?;
        match &self.payload {
            EventPayload::FacebookTop { user, engagement, .. } => {
                map.serialize_entry("data", &Data { user, engagement })?;
            }
            EventPayload::FacebookBottom { user, engagement, .. } => {
                map.serialize_entry("data", &Data { user, engagement })?;
            }
            EventPayload::TiktokTop { user, engagement, .. } => {
                map.serialize_entry("data", &Data { user, engagement })?;
            }
            EventPayload::TiktokBottom { user, engagement, .. } => {
                map.serialize_entry("data", &Data { user, engagement })?;
            }
        }
        map.end()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn wire_enums_round_trip_their_literals() {
        assert_eq!("non-binary".parse::<Gender>(), Ok(Gender::NonBinary));
        assert_eq!(TiktokDevice::Ios.as_str(), "iOS");
        assert!("chrome".parse::<Browser>().is_err());
        assert_eq!(ClickPosition::VARIANTS, &["top_left", "bottom_right", "center"]);
    }

    #[test]
    fn source_routing() {
        assert_eq!(Source::Facebook.subject(), "events.facebook");
        assert_eq!(Source::Tiktok.subject(), "events.tiktok");
        assert_eq!(Source::Facebook.consumer_name(), "fb_collector_consumer");
        assert_eq!(Source::Tiktok.consumer_name(), "ttk_collector_consumer");
    }

    #[test]
    fn serializes_to_wire_shape() {
        let occurred_at = DateTime::parse_from_rfc3339("2025-09-01T10:00:00Z")
            .map(|t| t.with_timezone(&Utc))
            .expect("valid timestamp");
        let event = Event::new(
            "ttk_bottom_1",
            occurred_at,
            EventPayload::TiktokBottom {
                event_type: TiktokBottomEventType::Purchase,
                user: TiktokUser {
                    user_id: "u1".to_string(),
                    username: "dancer".to_string(),
                    followers: Number::from(10),
                },
                engagement: TiktokBottomEngagement {
                    action_time: "2025-09-01T10:00:00Z".to_string(),
                    profile_id: None,
                    purchased_item: Some("hat".to_string()),
                    purchase_amount: Some("12.50".to_string()),
                },
            },
        );

        let json = serde_json::to_value(&event).expect("serializable");
        assert_eq!(json["eventId"], "ttk_bottom_1");
        assert_eq!(json["timestamp"], "2025-09-01T10:00:00Z");
        assert_eq!(json["source"], "tiktok");
        assert_eq!(json["funnelStage"], "bottom");
        assert_eq!(json["eventType"], "purchase");
        assert_eq!(json["data"]["user"]["username"], "dancer");
        assert_eq!(json["data"]["engagement"]["profileId"], serde_json::Value::Null);
        assert_eq!(json["data"]["engagement"]["purchaseAmount"], "12.50");
    }
}
