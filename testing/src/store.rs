//! In-memory engagement store with report queries.
//!
//! Mirrors the relational store's guarantees: users are unique per
//! `(source, source_user_id)`, events are unique per `eventId`, an event and
//! its engagement are written together or not at all, and an event can only
//! reference an existing user.

#![allow(clippy::unwrap_used)] // Mutex poisoning only follows a panicking test
#![allow(clippy::missing_panics_doc)]

use chrono::Utc;
use engagement_core::record::{
    NewEvent, SaveOutcome, SavedEngagement, SavedEvent, SavedUser, UserProfile,
};
use engagement_core::report::{
    CampaignRevenue, EventCount, EventCountQuery, ReportRepository, ReportWindow, RevenueQuery,
    RevenueReport,
};
use engagement_core::store::StoreFuture;
use engagement_core::{EngagementStore, Source, StoreError};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct StoreState {
    users: HashMap<(Source, String), SavedUser>,
    events: HashMap<String, SavedEvent>,
    engagements: HashMap<Uuid, SavedEngagement>,
    failing_user_upserts: usize,
    failing_event_inserts: HashMap<String, usize>,
    save_calls: usize,
}

/// Shared in-memory store. Clones share state.
///
/// # Example
///
/// ```
/// use engagement_testing::InMemoryEngagementStore;
///
/// let store = InMemoryEngagementStore::new();
/// assert_eq!(store.event_count(), 0);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryEngagementStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryEngagementStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap()
    }

    /// Fail the next `count` user upserts.
    pub fn fail_next_user_upserts(&self, count: usize) {
        self.lock().failing_user_upserts = count;
    }

    /// Fail the next `times` inserts of `event_id`.
    pub fn fail_event_inserts(&self, event_id: &str, times: usize) {
        self.lock()
            .failing_event_inserts
            .insert(event_id.to_string(), times);
    }

    /// Stored users.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.lock().users.len()
    }

    /// Stored events.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.lock().events.len()
    }

    /// Stored engagements.
    #[must_use]
    pub fn engagement_count(&self) -> usize {
        self.lock().engagements.len()
    }

    /// `save_event` calls so far, failed ones included.
    #[must_use]
    pub fn save_calls(&self) -> usize {
        self.lock().save_calls
    }

    /// Stored event ids, ascending.
    #[must_use]
    pub fn event_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().events.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Insert `user` as is, e.g. to seed report tests.
    pub fn insert_user(&self, user: SavedUser) {
        self.lock()
            .users
            .insert((user.source, user.source_user_id.clone()), user);
    }

    fn events_in<'s>(
        state: &'s StoreState,
        window: &'s ReportWindow,
    ) -> impl Iterator<Item = &'s SavedEvent> + 's {
        state
            .events
            .values()
            .filter(move |event| window.contains(event.occurred_at) && window.admits(event.source))
    }
}

impl EngagementStore for InMemoryEngagementStore {
    fn upsert_user<'a>(&'a self, profile: &'a UserProfile) -> StoreFuture<'a, SavedUser> {
        Box::pin(async move {
            let mut state = self.lock();
            if state.failing_user_upserts > 0 {
                state.failing_user_upserts -= 1;
                return Err(StoreError::Database("injected user upsert failure".to_string()));
            }

            let now = Utc::now();
            let key = (profile.source, profile.source_user_id.clone());
            let user = state
                .users
                .entry(key)
                .and_modify(|user| user.apply(profile, now))
                .or_insert_with(|| SavedUser::from_profile(profile, now));
            Ok(user.clone())
        })
    }

    fn save_event<'a>(&'a self, user_id: Uuid, event: &'a NewEvent) -> StoreFuture<'a, SaveOutcome> {
        Box::pin(async move {
            let mut state = self.lock();
            state.save_calls += 1;

            if let Some(remaining) = state.failing_event_inserts.get_mut(&event.event_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(StoreError::Database(format!(
                        "injected insert failure for {}",
                        event.event_id
                    )));
                }
            }

            if let Some(existing) = state.events.get(&event.event_id) {
                return Ok(SaveOutcome::Existing(existing.clone()));
            }

            if !state.users.values().any(|user| user.id == user_id) {
                return Err(StoreError::Conflict(format!("user {user_id} does not exist")));
            }

            let saved = SavedEvent {
                id: Uuid::new_v4(),
                event_id: event.event_id.clone(),
                occurred_at: event.occurred_at,
                source: event.source,
                funnel_stage: event.funnel_stage,
                event_type: event.event_type.clone(),
                user_id,
                created_at: Utc::now(),
            };
            let engagement = SavedEngagement {
                id: Uuid::new_v4(),
                event_id: saved.id,
                engagement_type: event.engagement.engagement_type,
                ad_id: event.engagement.ad_id.clone(),
                campaign_id: event.engagement.campaign_id.clone(),
                video_id: event.engagement.video_id.clone(),
                purchase_amount: event.engagement.purchase_amount,
                details: event.engagement.details.clone(),
            };

            state.engagements.insert(saved.id, engagement);
            state.events.insert(saved.event_id.clone(), saved.clone());
            Ok(SaveOutcome::Created(saved))
        })
    }

    fn find_event<'a>(&'a self, event_id: &'a str) -> StoreFuture<'a, Option<SavedEvent>> {
        Box::pin(async move { Ok(self.lock().events.get(event_id).cloned()) })
    }

    fn find_engagement<'a>(&'a self, event_id: &'a str) -> StoreFuture<'a, Option<SavedEngagement>> {
        Box::pin(async move {
            let state = self.lock();
            Ok(state
                .events
                .get(event_id)
                .and_then(|event| state.engagements.get(&event.id))
                .cloned())
        })
    }

    fn find_user<'a>(
        &'a self,
        source: Source,
        source_user_id: &'a str,
    ) -> StoreFuture<'a, Option<SavedUser>> {
        Box::pin(async move {
            Ok(self
                .lock()
                .users
                .get(&(source, source_user_id.to_string()))
                .cloned())
        })
    }
}

impl ReportRepository for InMemoryEngagementStore {
    fn event_counts<'a>(&'a self, query: &'a EventCountQuery) -> StoreFuture<'a, Vec<EventCount>> {
        Box::pin(async move {
            let state = self.lock();
            let mut groups: BTreeMap<(&str, &str, &str), EventCount> = BTreeMap::new();

            let matching = Self::events_in(&state, &query.window).filter(|event| {
                query.funnel_stage.is_none_or(|stage| stage == event.funnel_stage)
                    && query
                        .event_type
                        .as_deref()
                        .is_none_or(|wanted| wanted == event.event_type)
            });
            for event in matching {
                let key = (
                    event.source.as_str(),
                    event.funnel_stage.as_str(),
                    event.event_type.as_str(),
                );
                groups
                    .entry(key)
                    .or_insert_with(|| EventCount {
                        source: event.source,
                        funnel_stage: event.funnel_stage,
                        event_type: event.event_type.clone(),
                        count: 0,
                    })
                    .count += 1;
            }

            Ok(groups.into_values().collect())
        })
    }

    fn revenue<'a>(&'a self, query: &'a RevenueQuery) -> StoreFuture<'a, RevenueReport> {
        Box::pin(async move {
            let state = self.lock();
            let mut total_revenue = Decimal::ZERO;
            let mut by_campaign: BTreeMap<String, Decimal> = BTreeMap::new();

            for event in Self::events_in(&state, &query.window) {
                let Some(engagement) = state.engagements.get(&event.id) else {
                    continue;
                };
                let Some(amount) = engagement.purchase_amount else {
                    continue;
                };
                let campaign = engagement.campaign_id.as_deref();
                if let Some(wanted) = query.campaign_id.as_deref() {
                    if campaign != Some(wanted) {
                        continue;
                    }
                }

                total_revenue += amount;
                if let Some(campaign) = campaign {
                    *by_campaign.entry(campaign.to_string()).or_insert(Decimal::ZERO) += amount;
                }
            }

            Ok(RevenueReport {
                total_revenue,
                by_campaign: by_campaign
                    .into_iter()
                    .map(|(campaign_id, revenue)| CampaignRevenue {
                        campaign_id,
                        revenue,
                    })
                    .collect(),
            })
        })
    }

    fn demographics<'a>(&'a self, window: &'a ReportWindow) -> StoreFuture<'a, Vec<SavedUser>> {
        Box::pin(async move {
            let state = self.lock();
            let active: Vec<Uuid> = Self::events_in(&state, window)
                .map(|event| event.user_id)
                .collect();

            let mut users: Vec<SavedUser> = state
                .users
                .values()
                .filter(|user| active.contains(&user.id))
                .cloned()
                .collect();
            users.sort_by(|a, b| {
                (a.source.as_str(), &a.source_user_id).cmp(&(b.source.as_str(), &b.source_user_id))
            });
            Ok(users)
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::fixtures;

    async fn save(store: &InMemoryEngagementStore, event: &engagement_core::Event) -> SaveOutcome {
        let user = store
            .upsert_user(&UserProfile::from_event(event))
            .await
            .expect("upsert");
        let record = NewEvent::from_event(event).expect("mapping");
        store.save_event(user.id, &record).await.expect("save")
    }

    #[tokio::test]
    async fn duplicate_event_returns_the_first_row() {
        let store = InMemoryEngagementStore::new();
        let event = fixtures::facebook_top_event("fb_top_123");

        let first = save(&store, &event).await;
        let second = save(&store, &event).await;

        assert!(!first.is_duplicate());
        assert!(second.is_duplicate());
        assert_eq!(first.event(), second.event());
        assert_eq!(store.event_count(), 1);
        assert_eq!(store.engagement_count(), 1);
    }

    #[tokio::test]
    async fn event_needs_an_existing_user() {
        let store = InMemoryEngagementStore::new();
        let event = fixtures::facebook_top_event("fb_top_1");
        let record = NewEvent::from_event(&event).expect("mapping");

        let result = store.save_event(Uuid::new_v4(), &record).await;

        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(store.event_count(), 0);
        assert_eq!(store.engagement_count(), 0);
    }

    #[tokio::test]
    async fn injected_insert_failure_writes_nothing() {
        let store = InMemoryEngagementStore::new();
        let event = fixtures::tiktok_bottom_event("ttk_bottom_1", Some("12.50"));
        store.fail_event_inserts("ttk_bottom_1", 1);

        let user = store
            .upsert_user(&UserProfile::from_event(&event))
            .await
            .expect("upsert");
        let record = NewEvent::from_event(&event).expect("mapping");
        assert!(store.save_event(user.id, &record).await.is_err());
        assert_eq!(store.engagement_count(), 0);

        assert!(store.save_event(user.id, &record).await.is_ok());
        assert_eq!(store.engagement_count(), 1);
    }
}
