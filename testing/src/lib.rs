//! # Engagement Testing
//!
//! In-memory doubles and fixtures for the engagement pipeline.
//!
//! This crate provides:
//! - [`InMemoryEventStream`]: durable stream with consumer groups, explicit
//!   acknowledgement, redelivery and fault injection
//! - [`InMemoryEngagementStore`]: idempotent store with report queries
//! - [`ScriptedProcessor`]: processor that fails on demand and records calls
//! - [`fixtures`]: one valid event per `(source, funnelStage)` pair
//!
//! ## Example
//!
//! ```ignore
//! use engagement_testing::{InMemoryEventStream, InMemoryEngagementStore, fixtures};
//!
//! #[tokio::test]
//! async fn stores_published_event() {
//!     let stream = InMemoryEventStream::new();
//!     let store = InMemoryEngagementStore::new();
//!     // publish fixtures::facebook_top_event("fb_top_123"), run a collector ...
//!     assert_eq!(store.event_count(), 1);
//! }
//! ```

pub mod fixtures;
pub mod processor;
pub mod store;
pub mod stream;

pub use processor::{ProcessCall, ScriptedProcessor};
pub use store::InMemoryEngagementStore;
pub use stream::{InMemoryEventStream, InMemoryPullConsumer};

/// Install a test-friendly tracing subscriber once per process.
///
/// Output goes through the test harness, so it only shows for failing
/// tests. The filter comes from `RUST_LOG`, defaulting to `warn`.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixtures_cover_every_leaf_schema() {
        init_test_tracing();
        let events = [
            fixtures::facebook_top_event("a"),
            fixtures::facebook_bottom_event("b", Some("10.00")),
            fixtures::tiktok_top_event("c"),
            fixtures::tiktok_bottom_event("d", None),
        ];
        let pairs: Vec<(&str, &str)> = events
            .iter()
            .map(|event| (event.source().as_str(), event.funnel_stage().as_str()))
            .collect();

        assert_eq!(
            pairs,
            [
                ("facebook", "top"),
                ("facebook", "bottom"),
                ("tiktok", "top"),
                ("tiktok", "bottom"),
            ]
        );
    }
}
