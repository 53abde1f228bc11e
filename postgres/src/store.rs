//! Store operations.

use crate::rows::{
    ENGAGEMENT_COLUMNS, EVENT_COLUMNS, USER_COLUMNS, engagement_from_row, event_from_row,
    store_error, user_from_row,
};
use chrono::Utc;
use engagement_core::record::{
    NewEvent, SaveOutcome, SavedEngagement, SavedEvent, SavedUser, UserProfile,
};
use engagement_core::store::StoreFuture;
use engagement_core::{EngagementStore, Source, StoreError};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

/// `PostgreSQL`-backed [`EngagementStore`].
///
/// Cloning is cheap; clones share the pool.
#[derive(Clone, Debug)]
pub struct PostgresEngagementStore {
    pool: PgPool,
}

impl PostgresEngagementStore {
    /// Connect a pool of at most `max_connections` to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the pool cannot connect.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(store_error)?;
        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))?;
        tracing::info!("Database schema is up to date");
        Ok(())
    }

    async fn existing_event(&self, event_id: &str) -> Result<SavedEvent, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE event_id = $1"
        ))
        .bind(event_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;
        event_from_row(&row)
    }
}

impl EngagementStore for PostgresEngagementStore {
    fn upsert_user<'a>(&'a self, profile: &'a UserProfile) -> StoreFuture<'a, SavedUser> {
        Box::pin(async move {
            // Columns a source never reports stay NULL here and are kept by COALESCE.
            let fields = SavedUser::from_profile(profile, Utc::now());
            let row = sqlx::query(&format!(
                r"
                INSERT INTO users (id, source, source_user_id, name, age, gender, country, city, followers)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (source, source_user_id) DO UPDATE SET
                    name = COALESCE(EXCLUDED.name, users.name),
                    age = COALESCE(EXCLUDED.age, users.age),
                    gender = COALESCE(EXCLUDED.gender, users.gender),
                    country = COALESCE(EXCLUDED.country, users.country),
                    city = COALESCE(EXCLUDED.city, users.city),
                    followers = COALESCE(EXCLUDED.followers, users.followers),
                    updated_at = now()
                RETURNING {USER_COLUMNS}
                "
            ))
            .bind(fields.id)
            .bind(profile.source.as_str())
            .bind(&profile.source_user_id)
            .bind(&fields.name)
            .bind(fields.age)
            .bind(&fields.gender)
            .bind(&fields.country)
            .bind(&fields.city)
            .bind(fields.followers)
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)?;

            user_from_row(&row)
        })
    }

    fn save_event<'a>(&'a self, user_id: Uuid, event: &'a NewEvent) -> StoreFuture<'a, SaveOutcome> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(store_error)?;

            let inserted = sqlx::query(&format!(
                r"
                INSERT INTO events (id, event_id, occurred_at, source, funnel_stage, event_type, user_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (event_id) DO NOTHING
                RETURNING {EVENT_COLUMNS}
                "
            ))
            .bind(Uuid::new_v4())
            .bind(&event.event_id)
            .bind(event.occurred_at)
            .bind(event.source.as_str())
            .bind(event.funnel_stage.as_str())
            .bind(&event.event_type)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(store_error)?;

            let Some(row) = inserted else {
                drop(tx);
                metrics::counter!(
                    "store_duplicate_events_total",
                    "source" => event.source.as_str()
                )
                .increment(1);
                tracing::debug!(event_id = %event.event_id, "Event already stored");
                return self.existing_event(&event.event_id).await.map(SaveOutcome::Existing);
            };
            let saved = event_from_row(&row)?;

            let engagement = &event.engagement;
            sqlx::query(
                r"
                INSERT INTO engagements
                    (id, event_id, engagement_type, ad_id, campaign_id, video_id, purchase_amount, details)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ",
            )
            .bind(Uuid::new_v4())
            .bind(saved.id)
            .bind(engagement.engagement_type.as_str())
            .bind(&engagement.ad_id)
            .bind(&engagement.campaign_id)
            .bind(&engagement.video_id)
            .bind(engagement.purchase_amount)
            .bind(&engagement.details)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;

            tx.commit().await.map_err(store_error)?;
            Ok(SaveOutcome::Created(saved))
        })
    }

    fn find_event<'a>(&'a self, event_id: &'a str) -> StoreFuture<'a, Option<SavedEvent>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {EVENT_COLUMNS} FROM events WHERE event_id = $1"
            ))
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;
            row.as_ref().map(event_from_row).transpose()
        })
    }

    fn find_engagement<'a>(&'a self, event_id: &'a str) -> StoreFuture<'a, Option<SavedEngagement>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                r"
                SELECT {ENGAGEMENT_COLUMNS} FROM engagements
                WHERE event_id = (SELECT id FROM events WHERE event_id = $1)
                "
            ))
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;
            row.as_ref().map(engagement_from_row).transpose()
        })
    }

    fn find_user<'a>(
        &'a self,
        source: Source,
        source_user_id: &'a str,
    ) -> StoreFuture<'a, Option<SavedUser>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE source = $1 AND source_user_id = $2"
            ))
            .bind(source.as_str())
            .bind(source_user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;
            row.as_ref().map(user_from_row).transpose()
        })
    }
}
