//! Broker client: topic provisioning, publishing and consumer groups.

use crate::RedpandaSettings;
use crate::consumer::RedpandaPullConsumer;
use engagement_core::StreamError;
use engagement_core::stream::{
    ConsumerConfig, ConsumerInfo, PublishAck, PullConsumer, StreamClient, StreamConfig,
    StreamFuture,
};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// Group state the broker reports for a group it does not know.
const DEAD_GROUP_STATE: &str = "Dead";

/// Connected client to a Kafka-compatible broker.
pub struct RedpandaClient {
    settings: RedpandaSettings,
    producer: FutureProducer,
    /// Stream name to the topics provisioned for it.
    streams: Mutex<HashMap<String, Vec<String>>>,
    /// Durable name to subject filter.
    filters: Mutex<HashMap<String, String>>,
    closed: AtomicBool,
}

impl RedpandaClient {
    /// Create a producer and check that the brokers answer.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ConnectionFailed`] if the producer cannot be
    /// created or no broker answers a metadata request in time.
    pub async fn connect(settings: RedpandaSettings) -> Result<Self, StreamError> {
        let producer: FutureProducer = base_config(&settings)
            .set("message.timeout.ms", millis(settings.request_timeout))
            .set("acks", &settings.producer_acks)
            .set("compression.type", &settings.compression)
            .create()
            .map_err(|e| StreamError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let probe = producer.clone();
        let timeout = settings.request_timeout;
        blocking(move || {
            probe
                .client()
                .fetch_metadata(None, Timeout::After(timeout))
                .map(|_| ())
                .map_err(|e| StreamError::ConnectionFailed(format!("Brokers unreachable: {e}")))
        })
        .await?;

        tracing::info!(
            brokers = %settings.brokers,
            acks = %settings.producer_acks,
            compression = %settings.compression,
            "Connected to Redpanda"
        );

        Ok(Self {
            settings,
            producer,
            streams: Mutex::new(HashMap::new()),
            filters: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), StreamError> {
        if self.closed.load(Ordering::Acquire) {
            Err(StreamError::Closed)
        } else {
            Ok(())
        }
    }

    fn require_stream(&self, stream: &str) -> Result<Vec<String>, StreamError> {
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(stream)
            .cloned()
            .ok_or_else(|| StreamError::NotFound(format!("stream {stream}")))
    }

    fn remember_filter(&self, config: &ConsumerConfig) {
        self.filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(config.durable_name.clone(), config.filter_subject.clone());
    }

    fn known_filter(&self, durable_name: &str) -> Option<String> {
        self.filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(durable_name)
            .cloned()
    }
}

impl StreamClient for RedpandaClient {
    fn ensure_stream<'a>(&'a self, config: &'a StreamConfig) -> StreamFuture<'a, ()> {
        Box::pin(async move {
            self.ensure_open()?;
            let admin: AdminClient<DefaultClientContext> = base_config(&self.settings)
                .create()
                .map_err(|e| StreamError::Transport(format!("Failed to create admin client: {e}")))?;

            let topics: Vec<NewTopic<'_>> = config
                .subjects
                .iter()
                .map(|subject| {
                    NewTopic::new(
                        subject,
                        self.settings.partitions,
                        TopicReplication::Fixed(self.settings.replication_factor),
                    )
                })
                .collect();
            let options =
                AdminOptions::new().operation_timeout(Some(Timeout::After(self.settings.request_timeout)));

            let results = admin
                .create_topics(topics.iter(), &options)
                .await
                .map_err(|e| StreamError::Transport(format!("Failed to create topics: {e}")))?;

            for result in results {
                match result {
                    Ok(topic) => tracing::info!(stream = %config.name, topic = %topic, "Created topic"),
                    Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
                    Err((topic, code)) => {
                        return Err(StreamError::Transport(format!(
                            "Failed to create topic {topic}: {code}"
                        )));
                    }
                }
            }

            self.streams
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(config.name.clone(), config.subjects.clone());
            Ok(())
        })
    }

    fn publish<'a>(&'a self, subject: &'a str, payload: Vec<u8>) -> StreamFuture<'a, PublishAck> {
        Box::pin(async move {
            self.ensure_open()?;
            let record = FutureRecord::<(), [u8]>::to(subject).payload(payload.as_slice());

            match self
                .producer
                .send(record, Timeout::After(self.settings.request_timeout))
                .await
            {
                Ok((partition, offset)) => {
                    tracing::trace!(subject, partition, offset, "Message stored");
                    Ok(PublishAck {
                        subject: subject.to_string(),
                        partition,
                        sequence: u64::try_from(offset).unwrap_or_default(),
                    })
                }
                Err((error, _)) => Err(publish_error(subject, &error)),
            }
        })
    }

    fn consumer_info<'a>(
        &'a self,
        stream: &'a str,
        durable_name: &'a str,
    ) -> StreamFuture<'a, ConsumerInfo> {
        Box::pin(async move {
            self.ensure_open()?;
            self.require_stream(stream)?;

            let config = base_config(&self.settings);
            let group = durable_name.to_string();
            let timeout = self.settings.request_timeout;
            let state = blocking(move || {
                let consumer: BaseConsumer = config
                    .create()
                    .map_err(|e| StreamError::Transport(format!("Failed to create consumer: {e}")))?;
                let groups = consumer
                    .fetch_group_list(Some(group.as_str()), Timeout::After(timeout))
                    .map_err(|e| StreamError::Transport(format!("Group lookup failed: {e}")))?;
                Ok(groups
                    .groups()
                    .iter()
                    .find(|info| info.name() == group)
                    .map(|info| info.state().to_string()))
            })
            .await?;

            match state.as_deref() {
                None | Some(DEAD_GROUP_STATE) => {
                    Err(StreamError::NotFound(format!("consumer {durable_name}")))
                }
                Some(_) => Ok(ConsumerInfo {
                    stream: stream.to_string(),
                    durable_name: durable_name.to_string(),
                    filter_subject: self.known_filter(durable_name),
                }),
            }
        })
    }

    fn add_consumer<'a>(
        &'a self,
        stream: &'a str,
        config: &'a ConsumerConfig,
    ) -> StreamFuture<'a, ConsumerInfo> {
        Box::pin(async move {
            self.ensure_open()?;
            let subjects = self.require_stream(stream)?;
            if !subjects.contains(&config.filter_subject) {
                return Err(StreamError::Consumer(format!(
                    "stream {stream} does not capture {}",
                    config.filter_subject
                )));
            }

            // Committing the low watermarks registers the group and makes it
            // start from the oldest retained message.
            let mut client_config = base_config(&self.settings);
            client_config
                .set("group.id", &config.durable_name)
                .set("enable.auto.commit", "false");
            let topic = config.filter_subject.clone();
            let timeout = self.settings.request_timeout;
            blocking(move || {
                let consumer: BaseConsumer = client_config
                    .create()
                    .map_err(|e| StreamError::Consumer(format!("Failed to create consumer: {e}")))?;
                let metadata = consumer
                    .fetch_metadata(Some(topic.as_str()), Timeout::After(timeout))
                    .map_err(|e| StreamError::Consumer(format!("Metadata lookup failed: {e}")))?;

                let mut offsets = TopicPartitionList::new();
                for partition in metadata
                    .topics()
                    .iter()
                    .filter(|t| t.name() == topic)
                    .flat_map(|t| t.partitions())
                {
                    let (low, _high) = consumer
                        .fetch_watermarks(&topic, partition.id(), Timeout::After(timeout))
                        .map_err(|e| StreamError::Consumer(format!("Watermark lookup failed: {e}")))?;
                    offsets
                        .add_partition_offset(&topic, partition.id(), Offset::Offset(low))
                        .map_err(|e| StreamError::Consumer(e.to_string()))?;
                }
                if offsets.count() == 0 {
                    return Err(StreamError::NotFound(format!("topic {topic}")));
                }

                consumer
                    .commit(&offsets, CommitMode::Sync)
                    .map_err(|e| StreamError::Consumer(format!("Failed to register group: {e}")))
            })
            .await?;

            self.remember_filter(config);
            tracing::info!(
                stream,
                consumer = %config.durable_name,
                topic = %config.filter_subject,
                "Registered consumer group"
            );
            Ok(ConsumerInfo {
                stream: stream.to_string(),
                durable_name: config.durable_name.clone(),
                filter_subject: Some(config.filter_subject.clone()),
            })
        })
    }

    fn pull_consumer<'a>(
        &'a self,
        stream: &'a str,
        config: &'a ConsumerConfig,
    ) -> StreamFuture<'a, Box<dyn PullConsumer>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.require_stream(stream)?;

            let consumer: StreamConsumer = base_config(&self.settings)
                .set("group.id", &config.durable_name)
                .set("enable.auto.commit", "false")
                .set("enable.auto.offset.store", "false")
                .set("auto.offset.reset", "earliest")
                .set("enable.partition.eof", "false")
                .set("session.timeout.ms", "6000")
                .create()
                .map_err(|e| StreamError::Consumer(format!("Failed to create consumer: {e}")))?;
            consumer
                .subscribe(&[config.filter_subject.as_str()])
                .map_err(|e| StreamError::Consumer(format!("Failed to subscribe: {e}")))?;
            self.remember_filter(config);

            tracing::info!(
                consumer = %config.durable_name,
                topic = %config.filter_subject,
                manual_commit = true,
                "Subscribed pull consumer"
            );
            Ok(Box::new(RedpandaPullConsumer::new(
                consumer,
                config.filter_subject.clone(),
                &self.settings,
            )) as Box<dyn PullConsumer>)
        })
    }

    fn close(&self) -> StreamFuture<'_, ()> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            let producer = self.producer.clone();
            let timeout = self.settings.request_timeout;
            blocking(move || {
                producer
                    .flush(Timeout::After(timeout))
                    .map_err(|e| StreamError::Transport(format!("Failed to flush producer: {e}")))
            })
            .await?;
            tracing::info!("Closed Redpanda client");
            Ok(())
        })
    }
}

fn base_config(settings: &RedpandaSettings) -> ClientConfig {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", &settings.brokers);
    config
}

fn millis(duration: std::time::Duration) -> String {
    duration.as_millis().to_string()
}

fn publish_error(subject: &str, error: &KafkaError) -> StreamError {
    match error.rdkafka_error_code() {
        Some(RDKafkaErrorCode::UnknownTopicOrPartition | RDKafkaErrorCode::UnknownTopic) => {
            StreamError::NotFound(format!("no topic for subject {subject}"))
        }
        _ => StreamError::PublishFailed {
            subject: subject.to_string(),
            reason: error.to_string(),
        },
    }
}

/// Run a blocking librdkafka call off the async workers.
async fn blocking<T, F>(call: F) -> Result<T, StreamError>
where
    F: FnOnce() -> Result<T, StreamError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| StreamError::Transport(format!("Blocking broker call failed: {e}")))?
}
