//! Store-backed event processor.

use engagement_core::processor::{ProcessFuture, ProcessingError};
use engagement_core::record::{NewEvent, SaveOutcome, UserProfile};
use engagement_core::{EngagementStore, Event, EventProcessor};
use std::sync::Arc;
use tracing::Instrument;

/// Persists events through an [`EngagementStore`].
///
/// Per event: upsert the user, then insert the event with its engagement.
/// The insert is idempotent by `eventId`, so redeliveries are harmless and
/// leave the first stored copy untouched.
#[derive(Clone)]
pub struct StoreEventProcessor {
    store: Arc<dyn EngagementStore>,
}

impl StoreEventProcessor {
    /// Create a processor writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn EngagementStore>) -> Self {
        Self { store }
    }

    async fn persist(&self, event: &Event) -> Result<SaveOutcome, ProcessingError> {
        let profile = UserProfile::from_event(event);
        let user = self
            .store
            .upsert_user(&profile)
            .await
            .map_err(|source| ProcessingError::UserUpsert {
                event_id: event.event_id().to_string(),
                source,
            })?;

        let record = NewEvent::from_event(event).map_err(|e| ProcessingError::Mapping {
            event_id: event.event_id().to_string(),
            reason: e.to_string(),
        })?;

        self.store
            .save_event(user.id, &record)
            .await
            .map_err(|source| ProcessingError::EventInsert {
                event_id: event.event_id().to_string(),
                source,
            })
    }
}

impl EventProcessor for StoreEventProcessor {
    fn process<'a>(&'a self, event: &'a Event, correlation_id: &'a str) -> ProcessFuture<'a> {
        let span = tracing::info_span!(
            "process_event",
            correlation_id,
            event_id = event.event_id(),
            source = %event.source(),
            event_type = event.event_type(),
        );

        Box::pin(
            async move {
                tracing::debug!("Processing event");
                match self.persist(event).await {
                    Ok(outcome) => {
                        if outcome.is_duplicate() {
                            tracing::info!("Event already stored, skipping duplicate delivery");
                        } else {
                            tracing::info!("Stored event");
                        }
                        Ok(outcome)
                    }
                    Err(error) => {
                        tracing::error!(error = %error, "Failed to process event");
                        Err(error)
                    }
                }
            }
            .instrument(span),
        )
    }
}
