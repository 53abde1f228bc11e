//! Collector for one source.
//!
//! `COLLECTOR_SOURCE` selects the platform (`facebook` or `tiktok`). The
//! collector pulls that platform's subject through its durable consumer,
//! persists every event and acknowledges it only once stored. SIGINT and
//! SIGTERM stop fetching; the batch in flight finishes first.

use anyhow::Context;
use engagement_postgres::PostgresEngagementStore;
use engagement_redpanda::RedpandaConnector;
use engagement_runtime::config::PipelineConfig;
use engagement_runtime::metrics::MetricsServer;
use engagement_runtime::telemetry::{init_tracing, wait_for_signal};
use engagement_runtime::{Collector, StoreEventProcessor};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env().context("Invalid configuration")?;
    init_tracing(config.log_format);

    let source = config.collector.require_source()?;
    let database_url = config.database.require_url()?;
    info!(
        source = %source,
        brokers = %config.stream.brokers,
        stream = %config.stream.stream_name,
        "Starting collector"
    );

    let mut metrics = MetricsServer::new(config.http.metrics_addr);
    metrics.start().context("Failed to start metrics server")?;

    let store = PostgresEngagementStore::connect(database_url, config.database.max_connections)
        .await
        .context("Failed to connect to the database")?;
    store.migrate().await.context("Failed to run migrations")?;
    info!("Database ready");

    let connector = Arc::new(RedpandaConnector::new(&config.stream.brokers)?);
    let processor = Arc::new(StoreEventProcessor::new(Arc::new(store)));
    let (collector, handle) = Collector::new(config.collector_config(source), connector, processor);
    let handle = Arc::new(handle);

    let task = tokio::spawn(collector.run());
    tokio::spawn({
        let handle = Arc::clone(&handle);
        async move {
            wait_for_signal().await;
            handle.shutdown();
        }
    });

    task.await.context("Collector task panicked")??;

    let stats = handle.stats();
    info!(
        source = %source,
        consumed = stats.consumed,
        processed = stats.processed,
        failed = stats.failed,
        "Collector stopped"
    );
    Ok(())
}
