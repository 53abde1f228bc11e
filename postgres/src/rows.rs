//! Row decoding.

use engagement_core::record::{SavedEngagement, SavedEvent, SavedUser};
use engagement_core::{FunnelStage, Source, StoreError};
use sqlx::Row;
use sqlx::postgres::PgRow;
use std::str::FromStr;

pub(crate) const USER_COLUMNS: &str = "id, source, source_user_id, name, age, gender, country, \
     city, followers, created_at, updated_at";

pub(crate) const EVENT_COLUMNS: &str =
    "id, event_id, occurred_at, source, funnel_stage, event_type, user_id, created_at";

pub(crate) const ENGAGEMENT_COLUMNS: &str =
    "id, event_id, engagement_type, ad_id, campaign_id, video_id, purchase_amount, details";

/// Map a driver error onto the store taxonomy.
pub(crate) fn store_error(error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::RowNotFound => StoreError::NotFound(error.to_string()),
        sqlx::Error::Database(db)
            if db.is_unique_violation() || db.is_foreign_key_violation() =>
        {
            StoreError::Conflict(db.to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(error.to_string())
        }
        other => StoreError::Database(other.to_string()),
    }
}

pub(crate) fn parse_column<T: FromStr>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column).map_err(store_error)?;
    raw.parse()
        .map_err(|e: T::Err| StoreError::Serialization(format!("{column}: {e}")))
}

pub(crate) fn user_from_row(row: &PgRow) -> Result<SavedUser, StoreError> {
    Ok(SavedUser {
        id: row.try_get("id").map_err(store_error)?,
        source: parse_column::<Source>(row, "source")?,
        source_user_id: row.try_get("source_user_id").map_err(store_error)?,
        name: row.try_get("name").map_err(store_error)?,
        age: row.try_get("age").map_err(store_error)?,
        gender: row.try_get("gender").map_err(store_error)?,
        country: row.try_get("country").map_err(store_error)?,
        city: row.try_get("city").map_err(store_error)?,
        followers: row.try_get("followers").map_err(store_error)?,
        created_at: row.try_get("created_at").map_err(store_error)?,
        updated_at: row.try_get("updated_at").map_err(store_error)?,
    })
}

pub(crate) fn event_from_row(row: &PgRow) -> Result<SavedEvent, StoreError> {
    Ok(SavedEvent {
        id: row.try_get("id").map_err(store_error)?,
        event_id: row.try_get("event_id").map_err(store_error)?,
        occurred_at: row.try_get("occurred_at").map_err(store_error)?,
        source: parse_column::<Source>(row, "source")?,
        funnel_stage: parse_column::<FunnelStage>(row, "funnel_stage")?,
        event_type: row.try_get("event_type").map_err(store_error)?,
        user_id: row.try_get("user_id").map_err(store_error)?,
        created_at: row.try_get("created_at").map_err(store_error)?,
    })
}

pub(crate) fn engagement_from_row(row: &PgRow) -> Result<SavedEngagement, StoreError> {
    Ok(SavedEngagement {
        id: row.try_get("id").map_err(store_error)?,
        event_id: row.try_get("event_id").map_err(store_error)?,
        engagement_type: parse_column::<FunnelStage>(row, "engagement_type")?,
        ad_id: row.try_get("ad_id").map_err(store_error)?,
        campaign_id: row.try_get("campaign_id").map_err(store_error)?,
        video_id: row.try_get("video_id").map_err(store_error)?,
        purchase_amount: row.try_get("purchase_amount").map_err(store_error)?,
        details: row.try_get("details").map_err(store_error)?,
    })
}
