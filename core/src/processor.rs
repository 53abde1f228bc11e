//! Event processor contract.

use crate::event::Event;
use crate::record::SaveOutcome;
use crate::store::StoreError;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by [`EventProcessor::process`].
pub type ProcessFuture<'a> = Pin<Box<dyn Future<Output = Result<SaveOutcome, ProcessingError>> + Send + 'a>>;

/// Why an event could not be processed. The message is left unacknowledged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    /// The user upsert failed.
    #[error("user upsert failed for event {event_id}: {source}")]
    UserUpsert {
        /// Event being processed.
        event_id: String,
        /// Underlying failure.
        source: StoreError,
    },

    /// The event insert failed.
    #[error("event insert failed for event {event_id}: {source}")]
    EventInsert {
        /// Event being processed.
        event_id: String,
        /// Underlying failure.
        source: StoreError,
    },

    /// The event could not be mapped to records.
    #[error("event {event_id} could not be mapped: {reason}")]
    Mapping {
        /// Event being processed.
        event_id: String,
        /// Why.
        reason: String,
    },
}

/// Persists one event; called once per delivery.
///
/// Implementations must be idempotent by `eventId`: the same event may be
/// delivered more than once.
pub trait EventProcessor: Send + Sync {
    /// Process `event`, carrying `correlation_id` into every log line.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError`] when nothing durable was written.
    fn process<'a>(&'a self, event: &'a Event, correlation_id: &'a str) -> ProcessFuture<'a>;
}
