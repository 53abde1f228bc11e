//! # Engagement Core
//!
//! Types and contracts shared by every part of the engagement pipeline.
//!
//! The pipeline accepts marketing engagement events from Facebook and TikTok,
//! validates them against strict per-source, per-funnel-stage schemas,
//! publishes the valid ones to a durable stream, and has one collector per
//! source persist them idempotently:
//!
//! ```text
//! HTTP batch ──► EventValidator ──► publisher ──► stream "EVENTS"
//!                                                   │
//!                      ┌────────────────────────────┴──────────┐
//!                      ▼                                       ▼
//!             collector(facebook)                      collector(tiktok)
//!                      │                                       │
//!                      └──────────► EventProcessor ◄───────────┘
//!                                         │
//!                                         ▼
//!                                  EngagementStore
//! ```
//!
//! ## Modules
//!
//! - [`event`]: the typed event model
//! - [`validation`]: strict schema validation of raw JSON
//! - [`envelope`]: stream wire format with correlation id
//! - [`stream`]: durable stream and pull-consumer contract
//! - [`record`]: persistence model derived from events
//! - [`store`]: idempotent engagement store contract
//! - [`processor`]: per-event processing contract
//! - [`report`]: read-side report contract

pub mod envelope;
pub mod event;
pub mod processor;
pub mod record;
pub mod report;
pub mod store;
pub mod stream;
pub mod validation;

pub use envelope::{EnvelopeError, EventEnvelope};
pub use event::{Event, EventPayload, FunnelStage, Source};
pub use processor::{EventProcessor, ProcessingError};
pub use record::{NewEvent, SaveOutcome, SavedEvent, SavedUser, UserProfile};
pub use store::{EngagementStore, StoreError};
pub use stream::{PullConsumer, StreamClient, StreamConnector, StreamError};
pub use validation::{EventValidator, ValidationError, ValidationReport};
