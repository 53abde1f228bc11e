//! Engagement store contract.

use crate::event::Source;
use crate::record::{NewEvent, SaveOutcome, SavedEngagement, SavedEvent, SavedUser, UserProfile};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors from store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Database or driver failure.
    #[error("Database error: {0}")]
    Database(String),

    /// A uniqueness or foreign-key constraint was violated.
    #[error("Constraint violation: {0}")]
    Conflict(String),

    /// A referenced row does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A stored value could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Persistence for users, events and engagements.
///
/// `save_event` is idempotent by `event_id` and atomic: either the event
/// and its engagement are both stored, or neither is.
pub trait EngagementStore: Send + Sync {
    /// Insert or update the user keyed by `(source, source_user_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the upsert fails.
    fn upsert_user<'a>(&'a self, profile: &'a UserProfile) -> StoreFuture<'a, SavedUser>;

    /// Insert the event and its engagement unless `event_id` is known.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the insert fails; nothing is stored then.
    fn save_event<'a>(&'a self, user_id: Uuid, event: &'a NewEvent) -> StoreFuture<'a, SaveOutcome>;

    /// Look up an event by `event_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup fails.
    fn find_event<'a>(&'a self, event_id: &'a str) -> StoreFuture<'a, Option<SavedEvent>>;

    /// Look up the engagement of the event with `event_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup fails.
    fn find_engagement<'a>(&'a self, event_id: &'a str) -> StoreFuture<'a, Option<SavedEngagement>>;

    /// Look up a user by platform identity.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup fails.
    fn find_user<'a>(
        &'a self,
        source: Source,
        source_user_id: &'a str,
    ) -> StoreFuture<'a, Option<SavedUser>>;
}
