//! `PostgreSQL` engagement store.
//!
//! Implements [`EngagementStore`](engagement_core::EngagementStore) and
//! [`ReportRepository`](engagement_core::ReportRepository) on top of `sqlx`:
//!
//! - users upserted by `(source, source_user_id)`
//! - events inserted idempotently by `event_id`, together with their
//!   engagement row in one transaction
//! - report queries grouped in SQL
//!
//! # Example
//!
//! ```ignore
//! use engagement_postgres::PostgresEngagementStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresEngagementStore::connect("postgres://localhost/engagement", 10).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod reports;
mod rows;
mod store;

pub use store::PostgresEngagementStore;
