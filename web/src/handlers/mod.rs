//! HTTP request handlers.

pub mod events;
pub mod health;
pub mod metrics;
pub mod reports;

pub use events::ingest_events;
pub use health::health_check;
