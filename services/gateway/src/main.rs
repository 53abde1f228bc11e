//! Gateway HTTP server.
//!
//! Accepts batches of engagement events on `POST /events`, validates them
//! and publishes the valid ones to the durable stream. Serves reports when
//! `DATABASE_URL` is set.

use anyhow::Context;
use engagement_core::stream::{StreamClient, StreamConnector};
use engagement_postgres::PostgresEngagementStore;
use engagement_redpanda::RedpandaConnector;
use engagement_runtime::config::PipelineConfig;
use engagement_runtime::metrics::MetricsServer;
use engagement_runtime::retry::retry_with_backoff;
use engagement_runtime::telemetry::{init_tracing, wait_for_signal};
use engagement_runtime::{EventPublisher, IngestService};
use engagement_web::{AppState, router};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env().context("Invalid configuration")?;
    init_tracing(config.log_format);

    info!(
        brokers = %config.stream.brokers,
        stream = %config.stream.stream_name,
        addr = %config.http.gateway_addr,
        "Starting gateway"
    );

    let mut metrics = MetricsServer::new(config.http.metrics_addr);
    metrics.start().context("Failed to start metrics server")?;

    let connector = RedpandaConnector::new(&config.stream.brokers)?;
    let client: Arc<dyn StreamClient> =
        retry_with_backoff(&config.collector.connect_policy(), || connector.connect())
            .await
            .context("Failed to connect to the stream")?;
    info!("Connected to the stream");

    let publisher = Arc::new(EventPublisher::new(
        Arc::clone(&client),
        config.publisher_config(),
    ));
    // Provisioning is retried lazily on the first publish.
    if let Err(error) = publisher.ensure_stream().await {
        warn!(error = %error, "Stream not provisioned yet");
    }

    let mut state = AppState::new(Arc::new(IngestService::new(publisher)))
        .with_metrics(Arc::new(metrics));
    if let Some(url) = config.database.url.as_deref() {
        let store = PostgresEngagementStore::connect(url, config.database.max_connections)
            .await
            .context("Failed to connect to the database")?;
        state = state.with_reports(Arc::new(store));
        info!("Reports enabled");
    }

    let app = router(state, config.http.body_limit_bytes);
    let listener = tokio::net::TcpListener::bind(config.http.gateway_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.http.gateway_addr))?;
    info!(addr = %config.http.gateway_addr, "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_signal())
        .await?;

    if let Err(error) = client.close().await {
        warn!(error = %error, "Failed to close stream client");
    }
    info!("Gateway stopped");
    Ok(())
}
