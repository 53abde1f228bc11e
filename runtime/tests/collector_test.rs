//! Collector loop against the in-memory stream.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use engagement_core::stream::{
    ConsumerConfig, PullConsumer, StreamClient, StreamConfig, StreamConnector,
};
use engagement_core::{EngagementStore, Event, EventProcessor, FunnelStage, Source, StreamError};
use engagement_runtime::collector::{
    BatchOutcome, Collector, CollectorConfig, CollectorError, CollectorState,
};
use engagement_runtime::processor::StoreEventProcessor;
use engagement_runtime::publisher::{EventPublisher, PublisherConfig};
use engagement_runtime::retry::RetryPolicy;
use engagement_testing::{
    InMemoryEngagementStore, InMemoryEventStream, ScriptedProcessor, fixtures,
};
use std::sync::Arc;
use std::time::Duration;

const FB_CONSUMER: &str = "fb_collector_consumer";

fn config(source: Source) -> CollectorConfig {
    CollectorConfig::new(source)
        .with_fetch(10, Duration::from_millis(50))
        .with_error_backoff(Duration::from_millis(10))
        .with_connect_policy(RetryPolicy::fixed(3, Duration::from_millis(10)))
}

fn collector(
    stream: &InMemoryEventStream,
    processor: Arc<dyn EventProcessor>,
    config: CollectorConfig,
) -> (Collector, engagement_runtime::CollectorHandle) {
    Collector::new(config, Arc::new(stream.clone()), processor)
}

async fn publish(stream: &InMemoryEventStream, event: &Event) -> u64 {
    stream.ensure_stream(&StreamConfig::events()).await.unwrap();
    stream
        .publish(event.subject(), fixtures::envelope_bytes(event, "corr-test"))
        .await
        .unwrap()
        .sequence
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn published_event_is_persisted_and_acknowledged() {
    engagement_testing::init_test_tracing();
    let stream = InMemoryEventStream::new();
    let store = InMemoryEngagementStore::new();
    let publisher = EventPublisher::new(Arc::new(stream.clone()), PublisherConfig::default());
    let (collector, mut handle) = collector(
        &stream,
        Arc::new(StoreEventProcessor::new(Arc::new(store.clone()))),
        config(Source::Facebook),
    );

    let receipt = publisher
        .publish(&fixtures::facebook_top_event("fb_top_123"))
        .await
        .unwrap();
    let task = tokio::spawn(collector.run());

    assert!(handle.wait_for_state(CollectorState::Running).await);
    eventually(|| stream.ack_count(FB_CONSUMER, receipt.ack.sequence) == 1).await;

    let user = store.find_user(Source::Facebook, "u1").await.unwrap();
    assert!(user.is_some());
    let engagement = store
        .find_engagement("fb_top_123")
        .await
        .unwrap()
        .expect("engagement stored");
    assert_eq!(engagement.engagement_type, FunnelStage::Top);
    assert_eq!(engagement.video_id, None);
    assert_eq!(engagement.purchase_amount, None);

    handle.shutdown();
    task.await.unwrap().unwrap();
    assert_eq!(handle.state(), CollectorState::Stopped);
    assert_eq!(stream.close_calls(), 1);
    assert!(stream.has_consumer(FB_CONSUMER));

    let stats = handle.stats();
    assert_eq!(stats.consumed, 1);
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn failure_in_a_batch_does_not_affect_siblings() {
    let stream = InMemoryEventStream::new();
    let processor = ScriptedProcessor::new();
    processor.always_fail_for("fb_2");
    let (collector, handle) = collector(
        &stream,
        Arc::new(processor.clone()),
        config(Source::Facebook),
    );

    for id in ["fb_1", "fb_2", "fb_3"] {
        publish(&stream, &fixtures::facebook_top_event(id)).await;
    }
    let consumer_config = ConsumerConfig::for_source(Source::Facebook);
    stream.add_consumer("EVENTS", &consumer_config).await.unwrap();
    let mut consumer = stream.pull_consumer("EVENTS", &consumer_config).await.unwrap();
    let batch = consumer.fetch(10, Duration::from_millis(50)).await.unwrap();
    assert_eq!(batch.len(), 3);

    let outcome = collector.process_batch(consumer.as_mut(), batch).await;

    assert_eq!(
        outcome,
        BatchOutcome {
            consumed: 3,
            processed: 2,
            failed: 1,
        }
    );
    assert_eq!(stream.ack_count(FB_CONSUMER, 1), 1);
    assert_eq!(stream.ack_count(FB_CONSUMER, 2), 0);
    assert_eq!(stream.ack_count(FB_CONSUMER, 3), 1);
    assert_eq!(stream.pending_sequences(FB_CONSUMER), [2]);

    let order: Vec<String> = processor.calls().into_iter().map(|c| c.event_id).collect();
    assert_eq!(order, ["fb_1", "fb_2", "fb_3"]);
    assert_eq!(processor.calls()[0].correlation_id, "corr-test");

    let stats = handle.stats();
    assert_eq!((stats.processed, stats.failed), (2, 1));
}

#[tokio::test]
async fn failed_message_is_redelivered_and_acked_once() {
    let stream = InMemoryEventStream::with_ack_wait(Duration::from_millis(30));
    let processor = ScriptedProcessor::new();
    processor.fail_for("fb_1", 1);
    let (collector, handle) = collector(
        &stream,
        Arc::new(processor.clone()),
        config(Source::Facebook),
    );
    let sequence = publish(&stream, &fixtures::facebook_top_event("fb_1")).await;

    let task = tokio::spawn(collector.run());
    eventually(|| stream.ack_count(FB_CONSUMER, sequence) == 1).await;
    handle.shutdown();
    task.await.unwrap().unwrap();

    assert_eq!(processor.calls_for("fb_1"), 2);
    assert_eq!(stream.ack_count(FB_CONSUMER, sequence), 1);
    assert!(stream.pending_sequences(FB_CONSUMER).is_empty());
    let stats = handle.stats();
    assert_eq!((stats.processed, stats.failed), (1, 1));
}

#[tokio::test]
async fn duplicate_deliveries_store_one_event() {
    let stream = InMemoryEventStream::new();
    let store = InMemoryEngagementStore::new();
    let (collector, handle) = collector(
        &stream,
        Arc::new(StoreEventProcessor::new(Arc::new(store.clone()))),
        config(Source::Facebook),
    );
    let event = fixtures::facebook_bottom_event("fb_bottom_1", Some("99.99"));
    let first = publish(&stream, &event).await;
    let second = publish(&stream, &event).await;

    let task = tokio::spawn(collector.run());
    eventually(|| {
        stream.ack_count(FB_CONSUMER, first) == 1 && stream.ack_count(FB_CONSUMER, second) == 1
    })
    .await;
    handle.shutdown();
    task.await.unwrap().unwrap();

    assert_eq!(store.event_count(), 1);
    assert_eq!(store.engagement_count(), 1);
    assert_eq!(store.save_calls(), 2);
    assert_eq!(handle.stats().processed, 2);
}

#[tokio::test]
async fn unusable_messages_are_acknowledged_and_counted_as_failed() {
    let stream = InMemoryEventStream::new();
    let processor = ScriptedProcessor::new();
    let (collector, handle) = collector(
        &stream,
        Arc::new(processor.clone()),
        config(Source::Facebook),
    );
    stream.ensure_stream(&StreamConfig::events()).await.unwrap();
    let garbage = stream
        .publish("events.facebook", b"not json".to_vec())
        .await
        .unwrap()
        .sequence;
    let foreign = stream
        .publish(
            "events.facebook",
            fixtures::envelope_bytes(&fixtures::tiktok_top_event("ttk_1"), "corr-x"),
        )
        .await
        .unwrap()
        .sequence;

    let task = tokio::spawn(collector.run());
    eventually(|| {
        stream.ack_count(FB_CONSUMER, garbage) == 1 && stream.ack_count(FB_CONSUMER, foreign) == 1
    })
    .await;
    handle.shutdown();
    task.await.unwrap().unwrap();

    assert!(processor.calls().is_empty());
    let stats = handle.stats();
    assert_eq!((stats.consumed, stats.processed, stats.failed), (2, 0, 2));
}

#[tokio::test]
async fn startup_fails_after_the_configured_attempts() {
    let stream = InMemoryEventStream::new();
    stream.fail_next_connects(100);
    let (collector, handle) = collector(
        &stream,
        Arc::new(ScriptedProcessor::new()),
        config(Source::Facebook),
    );

    let result = collector.run().await;

    assert!(matches!(
        result,
        Err(CollectorError::StartupFailed {
            platform: Source::Facebook,
            attempts: 3,
            last_error: StreamError::ConnectionFailed(_),
        })
    ));
    assert_eq!(stream.connect_attempts(), 3);
    assert_eq!(handle.state(), CollectorState::Stopped);
}

#[tokio::test]
async fn transient_connect_failures_are_retried() {
    let stream = InMemoryEventStream::new();
    stream.fail_next_connects(2);
    let (collector, mut handle) = collector(
        &stream,
        Arc::new(ScriptedProcessor::new()),
        config(Source::Tiktok),
    );

    let task = tokio::spawn(collector.run());
    assert!(handle.wait_for_state(CollectorState::Running).await);
    handle.shutdown();
    task.await.unwrap().unwrap();

    assert_eq!(stream.connect_attempts(), 3);
    assert!(stream.has_consumer("ttk_collector_consumer"));
}

#[tokio::test]
async fn consumer_lookup_errors_are_not_masked() {
    let stream = InMemoryEventStream::new();
    stream.fail_consumer_lookup(StreamError::Transport("lookup refused".to_string()));
    let (collector, _handle) = collector(
        &stream,
        Arc::new(ScriptedProcessor::new()),
        config(Source::Facebook),
    );

    let result = collector.run().await;

    assert!(matches!(
        result,
        Err(CollectorError::StartupFailed {
            last_error: StreamError::Transport(_),
            ..
        })
    ));
    assert!(!stream.has_consumer(FB_CONSUMER));
}

#[tokio::test]
async fn existing_consumer_is_reused() {
    let stream = InMemoryEventStream::new();
    let sequence = publish(&stream, &fixtures::facebook_top_event("fb_1")).await;
    let consumer_config = ConsumerConfig::for_source(Source::Facebook);
    stream.add_consumer("EVENTS", &consumer_config).await.unwrap();
    let mut early = stream.pull_consumer("EVENTS", &consumer_config).await.unwrap();
    let batch = early.fetch(10, Duration::from_millis(50)).await.unwrap();
    early.ack(&batch[0]).await.unwrap();

    let processor = ScriptedProcessor::new();
    let (collector, handle) = collector(
        &stream,
        Arc::new(processor.clone()),
        config(Source::Facebook),
    );
    let later = publish(&stream, &fixtures::facebook_top_event("fb_2")).await;

    let task = tokio::spawn(collector.run());
    eventually(|| stream.ack_count(FB_CONSUMER, later) == 1).await;
    handle.shutdown();
    task.await.unwrap().unwrap();

    assert_eq!(stream.ack_count(FB_CONSUMER, sequence), 1);
    assert_eq!(processor.calls_for("fb_1"), 0);
    assert_eq!(processor.calls_for("fb_2"), 1);
}

#[tokio::test]
async fn fetch_errors_do_not_stop_the_loop() {
    let stream = InMemoryEventStream::new();
    stream.push_fetch_error(StreamError::Transport("broker hiccup".to_string()));
    stream.push_fetch_error(StreamError::Transport("broker hiccup".to_string()));
    let processor = ScriptedProcessor::new();
    let (collector, handle) = collector(
        &stream,
        Arc::new(processor.clone()),
        config(Source::Facebook),
    );
    let sequence = publish(&stream, &fixtures::facebook_top_event("fb_1")).await;

    let task = tokio::spawn(collector.run());
    eventually(|| stream.ack_count(FB_CONSUMER, sequence) == 1).await;
    handle.shutdown();
    task.await.unwrap().unwrap();

    assert_eq!(handle.stats().fetch_errors, 2);
    assert_eq!(processor.calls_for("fb_1"), 1);
}

#[tokio::test]
async fn idle_fetches_are_not_errors() {
    let stream = InMemoryEventStream::new();
    let (collector, mut handle) = collector(
        &stream,
        Arc::new(ScriptedProcessor::new()),
        config(Source::Facebook),
    );

    let task = tokio::spawn(collector.run());
    assert!(handle.wait_for_state(CollectorState::Running).await);
    // Several 50ms fetch expiries pass without messages.
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.shutdown();
    task.await.unwrap().unwrap();

    assert_eq!(handle.stats().fetch_errors, 0);
}

#[tokio::test]
async fn shutdown_interrupts_startup_backoff() {
    let stream = InMemoryEventStream::new();
    stream.fail_next_connects(100);
    let (collector, handle) = collector(
        &stream,
        Arc::new(ScriptedProcessor::new()),
        config(Source::Facebook)
            .with_connect_policy(RetryPolicy::fixed(5, Duration::from_secs(3600))),
    );

    let task = tokio::spawn(collector.run());
    eventually(|| stream.connect_attempts() == 1).await;
    handle.shutdown();

    let result = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("collector stopped")
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(stream.connect_attempts(), 1);
}

#[tokio::test]
async fn in_flight_message_finishes_before_shutdown() {
    let stream = InMemoryEventStream::new();
    let processor = ScriptedProcessor::new();
    processor.set_delay(Duration::from_millis(100));
    let (collector, handle) = collector(
        &stream,
        Arc::new(processor.clone()),
        config(Source::Facebook),
    );
    let sequence = publish(&stream, &fixtures::facebook_top_event("fb_1")).await;

    let task = tokio::spawn(collector.run());
    eventually(|| processor.calls_for("fb_1") == 1).await;
    handle.shutdown();
    task.await.unwrap().unwrap();

    assert_eq!(stream.ack_count(FB_CONSUMER, sequence), 1);
    assert_eq!(handle.stats().processed, 1);
}

#[tokio::test]
async fn connector_is_used_once_per_run() {
    let stream = InMemoryEventStream::new();
    let client = stream.connect().await.unwrap();
    client.close().await.unwrap();
    let (collector, mut handle) = collector(
        &stream,
        Arc::new(ScriptedProcessor::new()),
        config(Source::Facebook),
    );

    let task = tokio::spawn(collector.run());
    assert!(handle.wait_for_state(CollectorState::Running).await);
    handle.shutdown();
    task.await.unwrap().unwrap();

    assert_eq!(stream.connect_attempts(), 2);
    assert_eq!(stream.close_calls(), 2);
}
