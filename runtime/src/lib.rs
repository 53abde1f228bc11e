//! # Engagement Runtime
//!
//! The moving parts of the pipeline, built on the contracts in
//! `engagement-core`:
//!
//! - [`publisher::EventPublisher`]: validated events onto the stream, with
//!   lazy stream provisioning, retry and batching
//! - [`ingest::IngestService`]: validate a request body, publish, summarize
//! - [`collector::Collector`]: per-source fetch/process/ack loop
//! - [`processor::StoreEventProcessor`]: user upsert plus idempotent event insert
//! - [`retry`], [`metrics`], [`config`], [`telemetry`]: shared plumbing
//!
//! ## Example
//!
//! ```ignore
//! use engagement_runtime::collector::{Collector, CollectorConfig};
//! use engagement_runtime::processor::StoreEventProcessor;
//!
//! let processor = Arc::new(StoreEventProcessor::new(store));
//! let (collector, handle) = Collector::new(
//!     CollectorConfig::new(Source::Facebook),
//!     connector,
//!     processor,
//! );
//!
//! let task = tokio::spawn(collector.run());
//! // ...
//! handle.shutdown();
//! task.await??;
//! ```

/// Retry with exponential or fixed backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

pub mod collector;
pub mod config;
pub mod ingest;
pub mod processor;
pub mod publisher;
pub mod telemetry;

pub use collector::{Collector, CollectorConfig, CollectorError, CollectorHandle, CollectorState};
pub use config::PipelineConfig;
pub use ingest::{IngestService, IngestSummary};
pub use processor::StoreEventProcessor;
pub use publisher::{EventPublisher, PublishError, PublisherConfig};
pub use retry::RetryPolicy;
