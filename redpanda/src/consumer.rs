//! Pull consumer over a Kafka consumer group.
//!
//! Kafka tracks one committed offset per partition while the stream contract
//! acknowledges messages one by one. [`PartitionProgress`] bridges the two:
//! it commits the contiguous acknowledged prefix and remembers which
//! messages are still outstanding so they can be delivered again.

use crate::RedpandaSettings;
use engagement_core::StreamError;
use engagement_core::stream::{PullConsumer, StreamFuture, StreamMessage};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};

/// Delivery bookkeeping for one partition.
#[derive(Debug, Default)]
pub(crate) struct PartitionProgress {
    /// Delivered, unacknowledged offsets with their last delivery time.
    outstanding: BTreeMap<i64, Instant>,
    /// Acknowledged offsets above the commit point.
    acked: BTreeSet<i64>,
    /// Deliveries per outstanding offset.
    deliveries: HashMap<i64, u32>,
    /// One past the highest offset delivered.
    next_offset: Option<i64>,
    /// Offset last committed.
    committed: Option<i64>,
}

impl PartitionProgress {
    /// Record a delivery. Returns the delivery count, or `None` when the
    /// offset was already acknowledged and must be skipped.
    pub(crate) fn deliver(&mut self, offset: i64, now: Instant) -> Option<u32> {
        if self.acked.contains(&offset) || self.committed.is_some_and(|c| offset < c) {
            return None;
        }
        self.outstanding.insert(offset, now);
        self.next_offset = Some(self.next_offset.map_or(offset + 1, |n| n.max(offset + 1)));
        let count = self.deliveries.entry(offset).or_insert(0);
        *count += 1;
        Some(*count)
    }

    /// Record an acknowledgement. Returns the offset to commit when the
    /// acknowledged prefix grew.
    pub(crate) fn ack(&mut self, offset: i64) -> Option<i64> {
        if self.outstanding.remove(&offset).is_none() {
            return None;
        }
        self.deliveries.remove(&offset);
        self.acked.insert(offset);

        let commit_point = self.commit_point()?;
        self.acked = self.acked.split_off(&commit_point);
        if self.committed.is_some_and(|c| c >= commit_point) {
            return None;
        }
        self.committed = Some(commit_point);
        Some(commit_point)
    }

    /// Next offset to read once everything acknowledged so far is durable.
    fn commit_point(&self) -> Option<i64> {
        self.outstanding
            .keys()
            .next()
            .copied()
            .or(self.next_offset)
    }

    /// Offset to seek back to when the oldest outstanding delivery is older
    /// than `ack_wait`.
    pub(crate) fn rewind_target(&self, now: Instant, ack_wait: Duration) -> Option<i64> {
        let (&offset, &delivered_at) = self.outstanding.iter().next()?;
        (now.saturating_duration_since(delivered_at) >= ack_wait).then_some(offset)
    }
}

/// [`PullConsumer`] reading one topic through a consumer group.
pub struct RedpandaPullConsumer {
    consumer: StreamConsumer,
    topic: String,
    partitions: HashMap<i32, PartitionProgress>,
    ack_wait: Duration,
    linger: Duration,
    request_timeout: Duration,
}

impl RedpandaPullConsumer {
    pub(crate) fn new(consumer: StreamConsumer, topic: String, settings: &RedpandaSettings) -> Self {
        Self {
            consumer,
            topic,
            partitions: HashMap::new(),
            ack_wait: settings.ack_wait,
            linger: settings.fetch_linger,
            request_timeout: settings.request_timeout,
        }
    }

    /// Seek partitions whose oldest outstanding message is overdue.
    fn rewind_overdue(&self) -> Result<(), StreamError> {
        let now = Instant::now();
        for (&partition, progress) in &self.partitions {
            if let Some(offset) = progress.rewind_target(now, self.ack_wait) {
                tracing::debug!(
                    topic = %self.topic,
                    partition,
                    offset,
                    "Rewinding to unacknowledged message"
                );
                self.consumer
                    .seek(
                        &self.topic,
                        partition,
                        Offset::Offset(offset),
                        Timeout::After(self.request_timeout),
                    )
                    .map_err(|e| StreamError::Transport(format!("Seek failed: {e}")))?;
            }
        }
        Ok(())
    }

    /// Receive one message, or `None` when `wait` elapsed first.
    async fn receive(&mut self, wait: Duration) -> Result<Option<StreamMessage>, StreamError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let received = match tokio::time::timeout_at(deadline, self.consumer.recv()).await {
                Err(_) => return Ok(None),
                Ok(Err(e)) => return Err(StreamError::Transport(format!("Receive failed: {e}"))),
                Ok(Ok(message)) => (
                    message.topic().to_string(),
                    message.partition(),
                    message.offset(),
                    message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                ),
            };
            let (subject, partition, offset, payload) = received;

            let progress = self.partitions.entry(partition).or_default();
            let Some(delivery_count) = progress.deliver(offset, Instant::now()) else {
                tracing::trace!(partition, offset, "Skipping acknowledged message");
                continue;
            };
            return Ok(Some(StreamMessage {
                subject,
                partition,
                sequence: u64::try_from(offset).unwrap_or_default(),
                delivery_count,
                payload,
            }));
        }
    }
}

impl PullConsumer for RedpandaPullConsumer {
    fn fetch(&mut self, max_messages: usize, expires: Duration) -> StreamFuture<'_, Vec<StreamMessage>> {
        Box::pin(async move {
            self.rewind_overdue()?;

            let Some(first) = self.receive(expires).await? else {
                return Err(StreamError::FetchTimeout { expires });
            };
            let mut batch = vec![first];
            while batch.len() < max_messages {
                match self.receive(self.linger).await? {
                    Some(message) => batch.push(message),
                    None => break,
                }
            }
            Ok(batch)
        })
    }

    fn ack<'a>(&'a mut self, message: &'a StreamMessage) -> StreamFuture<'a, ()> {
        Box::pin(async move {
            let offset = i64::try_from(message.sequence)
                .map_err(|_| StreamError::Transport(format!("Invalid offset {}", message.sequence)))?;
            let Some(progress) = self.partitions.get_mut(&message.partition) else {
                return Err(StreamError::NotFound(format!(
                    "partition {} was never delivered",
                    message.partition
                )));
            };
            let Some(commit) = progress.ack(offset) else {
                return Ok(());
            };

            let mut offsets = TopicPartitionList::new();
            offsets
                .add_partition_offset(&self.topic, message.partition, Offset::Offset(commit))
                .map_err(|e| StreamError::Transport(e.to_string()))?;
            self.consumer
                .commit(&offsets, CommitMode::Async)
                .map_err(|e| StreamError::Transport(format!("Commit failed: {e}")))?;
            tracing::trace!(
                topic = %self.topic,
                partition = message.partition,
                offset = commit,
                "Committed offset"
            );
            Ok(())
        })
    }
}
