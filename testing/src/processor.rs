//! Event processor double with scripted failures.

#![allow(clippy::unwrap_used)] // Mutex poisoning only follows a panicking test
#![allow(clippy::missing_panics_doc)]

use chrono::Utc;
use engagement_core::processor::{ProcessFuture, ProcessingError};
use engagement_core::record::{SaveOutcome, SavedEvent};
use engagement_core::{Event, EventProcessor, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

/// One `process` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCall {
    /// Event processed.
    pub event_id: String,
    /// Correlation id it arrived with.
    pub correlation_id: String,
}

#[derive(Default)]
struct Script {
    failures: HashMap<String, usize>,
    delay: Option<Duration>,
    calls: Vec<ProcessCall>,
}

/// Records every call and fails the event ids it was told to.
#[derive(Clone, Default)]
pub struct ScriptedProcessor {
    script: Arc<Mutex<Script>>,
}

impl ScriptedProcessor {
    /// A processor that succeeds for every event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    /// Fail the next `times` calls for `event_id`.
    pub fn fail_for(&self, event_id: &str, times: usize) {
        self.script().failures.insert(event_id.to_string(), times);
    }

    /// Fail every call for `event_id`.
    pub fn always_fail_for(&self, event_id: &str) {
        self.fail_for(event_id, usize::MAX);
    }

    /// Sleep for `delay` in every call.
    pub fn set_delay(&self, delay: Duration) {
        self.script().delay = Some(delay);
    }

    /// Calls so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ProcessCall> {
        self.script().calls.clone()
    }

    /// Calls made for `event_id`.
    #[must_use]
    pub fn calls_for(&self, event_id: &str) -> usize {
        self.script()
            .calls
            .iter()
            .filter(|call| call.event_id == event_id)
            .count()
    }
}

impl EventProcessor for ScriptedProcessor {
    fn process<'a>(&'a self, event: &'a Event, correlation_id: &'a str) -> ProcessFuture<'a> {
        Box::pin(async move {
            let (delay, fail) = {
                let mut script = self.script();
                script.calls.push(ProcessCall {
                    event_id: event.event_id().to_string(),
                    correlation_id: correlation_id.to_string(),
                });
                let fail = match script.failures.get_mut(event.event_id()) {
                    Some(remaining) if *remaining > 0 => {
                        *remaining = remaining.saturating_sub(1);
                        true
                    }
                    _ => false,
                };
                (script.delay, fail)
            };

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if fail {
                return Err(ProcessingError::EventInsert {
                    event_id: event.event_id().to_string(),
                    source: StoreError::Database("scripted failure".to_string()),
                });
            }

            Ok(SaveOutcome::Created(SavedEvent {
                id: Uuid::new_v4(),
                event_id: event.event_id().to_string(),
                occurred_at: event.occurred_at(),
                source: event.source(),
                funnel_stage: event.funnel_stage(),
                event_type: event.event_type().to_string(),
                user_id: Uuid::new_v4(),
                created_at: Utc::now(),
            }))
        })
    }
}
