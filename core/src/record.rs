//! Persistence model: what the processor writes and what stores return.
//!
//! A validated [`Event`] maps to one [`UserProfile`] upsert and one
//! [`NewEvent`] insert carrying its [`EngagementRecord`].

use crate::event::{Event, EventPayload, FunnelStage, Gender, Source};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Decimal places kept for purchase amounts.
pub const PURCHASE_AMOUNT_SCALE: u32 = 2;

/// Largest amount the `NUMERIC(12, 2)` column holds: `9999999999.99`.
pub const MAX_PURCHASE_AMOUNT: Decimal = Decimal::from_parts(0xD4A5_0FFF, 0xE8, 0, false, 2);

/// User attributes as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAttributes {
    /// Facebook profile fields.
    Facebook {
        /// Display name.
        name: String,
        /// Age in years; `None` when the reported value does not fit.
        age: Option<i32>,
        /// Gender.
        gender: Gender,
        /// Country.
        country: String,
        /// City.
        city: String,
    },
    /// TikTok profile fields.
    Tiktok {
        /// Handle, stored as the user's name.
        username: String,
        /// Follower count; `None` when the reported value does not fit.
        followers: Option<i64>,
    },
}

/// A user to upsert, keyed by `(source, source_user_id)`.
///
/// Attributes follow last-write-wins: fields present here overwrite the
/// stored ones, fields this source never reports are left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    /// Platform.
    pub source: Source,
    /// Platform user id.
    pub source_user_id: String,
    /// Reported attributes.
    pub attributes: UserAttributes,
}

impl UserProfile {
    /// The user described by `event`.
    #[must_use]
    pub fn from_event(event: &Event) -> Self {
        match event.payload() {
            EventPayload::FacebookTop { user, .. } | EventPayload::FacebookBottom { user, .. } => {
                Self {
                    source: Source::Facebook,
                    source_user_id: user.user_id.clone(),
                    attributes: UserAttributes::Facebook {
                        name: user.name.clone(),
                        age: user.age_years(),
                        gender: user.gender,
                        country: user.location.country.clone(),
                        city: user.location.city.clone(),
                    },
                }
            }
            EventPayload::TiktokTop { user, .. } | EventPayload::TiktokBottom { user, .. } => Self {
                source: Source::Tiktok,
                source_user_id: user.user_id.clone(),
                attributes: UserAttributes::Tiktok {
                    username: user.username.clone(),
                    followers: user.follower_count(),
                },
            },
        }
    }

    /// Name column value.
    #[must_use]
    pub fn name(&self) -> &str {
        match &self.attributes {
            UserAttributes::Facebook { name, .. } => name,
            UserAttributes::Tiktok { username, .. } => username,
        }
    }
}

/// A stored user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedUser {
    /// Internal id.
    pub id: Uuid,
    /// Platform.
    pub source: Source,
    /// Platform user id.
    pub source_user_id: String,
    /// Name or handle.
    pub name: Option<String>,
    /// Age, Facebook only.
    pub age: Option<i32>,
    /// Gender, Facebook only.
    pub gender: Option<String>,
    /// Country, Facebook only.
    pub country: Option<String>,
    /// City, Facebook only.
    pub city: Option<String>,
    /// Followers, TikTok only.
    pub followers: Option<i64>,
    /// First seen.
    pub created_at: DateTime<Utc>,
    /// Last upsert.
    pub updated_at: DateTime<Utc>,
}

impl SavedUser {
    /// A new stored user built from `profile`.
    #[must_use]
    pub fn from_profile(profile: &UserProfile, now: DateTime<Utc>) -> Self {
        let mut user = Self {
            id: Uuid::new_v4(),
            source: profile.source,
            source_user_id: profile.source_user_id.clone(),
            name: None,
            age: None,
            gender: None,
            country: None,
            city: None,
            followers: None,
            created_at: now,
            updated_at: now,
        };
        user.apply(profile, now);
        user
    }

    /// Overwrite the fields `profile` reports.
    pub fn apply(&mut self, profile: &UserProfile, now: DateTime<Utc>) {
        match &profile.attributes {
            UserAttributes::Facebook {
                name,
                age,
                gender,
                country,
                city,
            } => {
                self.name = Some(name.clone());
                if age.is_some() {
                    self.age = *age;
                }
                self.gender = Some(gender.as_str().to_string());
                self.country = Some(country.clone());
                self.city = Some(city.clone());
            }
            UserAttributes::Tiktok {
                username,
                followers,
            } => {
                self.name = Some(username.clone());
                if followers.is_some() {
                    self.followers = *followers;
                }
            }
        }
        self.updated_at = now;
    }
}

/// Why a purchase amount could not be used.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PurchaseAmountError {
    /// Not a decimal number.
    #[error("'{0}' is not a decimal number")]
    NotDecimal(String),

    /// Zero or negative.
    #[error("'{0}' is not a positive amount")]
    NotPositive(String),

    /// Above [`MAX_PURCHASE_AMOUNT`].
    #[error("'{0}' exceeds the largest storable amount")]
    OutOfRange(String),
}

/// Parse a purchase amount string into a positive decimal with two places.
///
/// Rounds half away from zero.
///
/// # Errors
///
/// Returns [`PurchaseAmountError`] for non-decimal or non-positive input,
/// and for amounts above [`MAX_PURCHASE_AMOUNT`].
pub fn parse_purchase_amount(raw: &str) -> Result<Decimal, PurchaseAmountError> {
    let trimmed = raw.trim();
    let amount = Decimal::from_str(trimmed)
        .map_err(|_| PurchaseAmountError::NotDecimal(raw.to_string()))?
        .round_dp_with_strategy(PURCHASE_AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero);
    if amount <= Decimal::ZERO {
        return Err(PurchaseAmountError::NotPositive(raw.to_string()));
    }
    if amount > MAX_PURCHASE_AMOUNT {
        return Err(PurchaseAmountError::OutOfRange(raw.to_string()));
    }
    Ok(amount)
}

/// Engagement details of an event, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct EngagementRecord {
    /// Funnel stage, stored as the engagement type.
    pub engagement_type: FunnelStage,
    /// Ad, Facebook bottom only.
    pub ad_id: Option<String>,
    /// Campaign, Facebook bottom only.
    pub campaign_id: Option<String>,
    /// Video, when the engagement has one.
    pub video_id: Option<String>,
    /// Parsed purchase amount, bottom funnel only.
    pub purchase_amount: Option<Decimal>,
    /// Full engagement object as received.
    pub details: Value,
}

/// Error mapping an event to its records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot serialize engagement details: {0}")]
pub struct RecordError(pub String);

impl EngagementRecord {
    /// Map the engagement of `event`.
    ///
    /// A purchase amount that is not a positive decimal, or is too large to
    /// store, becomes `None` and is reported with a warning; the event itself
    /// is still kept.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError`] if the details cannot be serialized.
    pub fn from_event(event: &Event) -> Result<Self, RecordError> {
        let details = |value: Result<Value, serde_json::Error>| {
            value.map_err(|e| RecordError(e.to_string()))
        };

        let record = match event.payload() {
            EventPayload::FacebookTop { engagement, .. } => Self {
                engagement_type: FunnelStage::Top,
                ad_id: None,
                campaign_id: None,
                video_id: engagement.video_id.clone(),
                purchase_amount: None,
                details: details(serde_json::to_value(engagement))?,
            },
            EventPayload::FacebookBottom { engagement, .. } => Self {
                engagement_type: FunnelStage::Bottom,
                ad_id: Some(engagement.ad_id.clone()),
                campaign_id: Some(engagement.campaign_id.clone()),
                video_id: None,
                purchase_amount: purchase_amount(event, engagement.purchase_amount.as_deref()),
                details: details(serde_json::to_value(engagement))?,
            },
            EventPayload::TiktokTop { engagement, .. } => Self {
                engagement_type: FunnelStage::Top,
                ad_id: None,
                campaign_id: None,
                video_id: Some(engagement.video_id.clone()),
                purchase_amount: None,
                details: details(serde_json::to_value(engagement))?,
            },
            EventPayload::TiktokBottom { engagement, .. } => Self {
                engagement_type: FunnelStage::Bottom,
                ad_id: None,
                campaign_id: None,
                video_id: None,
                purchase_amount: purchase_amount(event, engagement.purchase_amount.as_deref()),
                details: details(serde_json::to_value(engagement))?,
            },
        };
        Ok(record)
    }
}

fn purchase_amount(event: &Event, raw: Option<&str>) -> Option<Decimal> {
    let raw = raw?;
    match parse_purchase_amount(raw) {
        Ok(amount) => Some(amount),
        Err(error) => {
            tracing::warn!(
                event_id = event.event_id(),
                error = %error,
                "Ignoring unusable purchase amount"
            );
            None
        }
    }
}

/// An event to insert, with its engagement.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    /// Idempotency key.
    pub event_id: String,
    /// Event time.
    pub occurred_at: DateTime<Utc>,
    /// Platform.
    pub source: Source,
    /// Funnel stage.
    pub funnel_stage: FunnelStage,
    /// Event type literal.
    pub event_type: String,
    /// Engagement details.
    pub engagement: EngagementRecord,
}

impl NewEvent {
    /// Map `event` for insertion.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError`] if the engagement cannot be mapped.
    pub fn from_event(event: &Event) -> Result<Self, RecordError> {
        Ok(Self {
            event_id: event.event_id().to_string(),
            occurred_at: event.occurred_at(),
            source: event.source(),
            funnel_stage: event.funnel_stage(),
            event_type: event.event_type().to_string(),
            engagement: EngagementRecord::from_event(event)?,
        })
    }
}

/// A stored event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedEvent {
    /// Internal id.
    pub id: Uuid,
    /// Idempotency key.
    pub event_id: String,
    /// Event time.
    pub occurred_at: DateTime<Utc>,
    /// Platform.
    pub source: Source,
    /// Funnel stage.
    pub funnel_stage: FunnelStage,
    /// Event type literal.
    pub event_type: String,
    /// Owning user.
    pub user_id: Uuid,
    /// Insert time.
    pub created_at: DateTime<Utc>,
}

/// A stored engagement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedEngagement {
    /// Internal id.
    pub id: Uuid,
    /// Owning event's internal id.
    pub event_id: Uuid,
    /// Funnel stage.
    pub engagement_type: FunnelStage,
    /// Ad.
    pub ad_id: Option<String>,
    /// Campaign.
    pub campaign_id: Option<String>,
    /// Video.
    pub video_id: Option<String>,
    /// Purchase amount.
    pub purchase_amount: Option<Decimal>,
    /// Engagement object as received.
    pub details: Value,
}

/// Outcome of an idempotent event insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The event was new and is now stored.
    Created(SavedEvent),
    /// An event with the same `eventId` was already stored; nothing changed.
    Existing(SavedEvent),
}

impl SaveOutcome {
    /// The stored event.
    #[must_use]
    pub const fn event(&self) -> &SavedEvent {
        match self {
            Self::Created(event) | Self::Existing(event) => event,
        }
    }

    /// Consume into the stored event.
    #[must_use]
    pub fn into_event(self) -> SavedEvent {
        match self {
            Self::Created(event) | Self::Existing(event) => event,
        }
    }

    /// Whether this was a redelivery of a known event.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Existing(_))
    }
}
