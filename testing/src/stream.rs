//! In-memory durable stream.
//!
//! Behaves like a single-node broker with durable pull consumers:
//!
//! - messages get a stream-wide sequence number starting at 1
//! - each durable consumer keeps a cursor plus the set of delivered but
//!   unacknowledged messages
//! - an unacknowledged message is delivered again once its ack wait has
//!   elapsed, with an incremented delivery count
//! - a fetch waits for new messages until it expires, then returns
//!   [`StreamError::FetchTimeout`]
//!
//! Faults can be injected for connects, publishes, consumer lookups,
//! fetches and acks.

#![allow(clippy::unwrap_used)] // Mutex poisoning only follows a panicking test
#![allow(clippy::missing_panics_doc)]

use engagement_core::stream::{
    ConsumerConfig, ConsumerInfo, PublishAck, PullConsumer, StreamClient, StreamConfig,
    StreamConnector, StreamFuture, StreamMessage,
};
use engagement_core::StreamError;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Default time before an unacknowledged message is delivered again.
pub const DEFAULT_ACK_WAIT: Duration = Duration::from_secs(30);

struct StoredMessage {
    subject: String,
    payload: Vec<u8>,
}

struct StreamData {
    subjects: Vec<String>,
    messages: Vec<StoredMessage>,
}

struct Pending {
    deliveries: u32,
    redeliver_at: Instant,
}

struct ConsumerState {
    stream: String,
    filter_subject: String,
    cursor: usize,
    pending: BTreeMap<u64, Pending>,
    acks: HashMap<u64, usize>,
}

#[derive(Default)]
struct Faults {
    failing_connects: usize,
    failing_publishes: usize,
    failing_acks: usize,
    publish_delay: Option<Duration>,
    consumer_lookup: Option<StreamError>,
    fetch_errors: VecDeque<StreamError>,
}

#[derive(Default)]
struct State {
    streams: HashMap<String, StreamData>,
    consumers: HashMap<String, ConsumerState>,
    faults: Faults,
    connect_attempts: usize,
    publish_attempts: usize,
    close_calls: usize,
}

struct Inner {
    state: Mutex<State>,
    published: watch::Sender<u64>,
    ack_wait: Duration,
}

/// Shared in-memory broker. Clones share state.
///
/// # Example
///
/// ```
/// use engagement_testing::InMemoryEventStream;
/// use engagement_core::stream::{StreamClient, StreamConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let stream = InMemoryEventStream::new();
/// stream.ensure_stream(&StreamConfig::events()).await?;
/// let ack = stream.publish("events.facebook", b"{}".to_vec()).await?;
/// assert_eq!(ack.sequence, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryEventStream {
    inner: Arc<Inner>,
}

impl Default for InMemoryEventStream {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStream {
    /// Create an empty broker with the default ack wait.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ack_wait(DEFAULT_ACK_WAIT)
    }

    /// Create an empty broker redelivering unacknowledged messages after
    /// `ack_wait`.
    #[must_use]
    pub fn with_ack_wait(ack_wait: Duration) -> Self {
        let (published, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                published,
                ack_wait,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap()
    }

    // Fault injection

    /// Fail the next `count` connects.
    pub fn fail_next_connects(&self, count: usize) {
        self.state().faults.failing_connects = count;
    }

    /// Fail the next `count` publishes.
    pub fn fail_next_publishes(&self, count: usize) {
        self.state().faults.failing_publishes = count;
    }

    /// Fail the next `count` acknowledgements.
    pub fn fail_next_acks(&self, count: usize) {
        self.state().faults.failing_acks = count;
    }

    /// Delay every publish by `delay`.
    pub fn set_publish_delay(&self, delay: Duration) {
        self.state().faults.publish_delay = Some(delay);
    }

    /// Make every consumer lookup fail with `error` until cleared.
    pub fn fail_consumer_lookup(&self, error: StreamError) {
        self.state().faults.consumer_lookup = Some(error);
    }

    /// Let consumer lookups succeed again.
    pub fn clear_consumer_lookup_failure(&self) {
        self.state().faults.consumer_lookup = None;
    }

    /// Make one upcoming fetch fail with `error`.
    pub fn push_fetch_error(&self, error: StreamError) {
        self.state().faults.fetch_errors.push_back(error);
    }

    // Inspection

    /// Connect calls so far, failed ones included.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.state().connect_attempts
    }

    /// Publish calls so far, failed ones included.
    #[must_use]
    pub fn publish_attempts(&self) -> usize {
        self.state().publish_attempts
    }

    /// Close calls so far.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.state().close_calls
    }

    /// Whether a stream named `name` exists.
    #[must_use]
    pub fn has_stream(&self, name: &str) -> bool {
        self.state().streams.contains_key(name)
    }

    /// Whether a durable consumer named `durable_name` exists.
    #[must_use]
    pub fn has_consumer(&self, durable_name: &str) -> bool {
        self.state().consumers.contains_key(durable_name)
    }

    /// Payloads stored under `subject`, in publish order.
    #[must_use]
    pub fn messages(&self, subject: &str) -> Vec<Vec<u8>> {
        self.state()
            .streams
            .values()
            .flat_map(|stream| stream.messages.iter())
            .filter(|message| message.subject == subject)
            .map(|message| message.payload.clone())
            .collect()
    }

    /// Acknowledgement calls `durable_name` made for `sequence`.
    #[must_use]
    pub fn ack_count(&self, durable_name: &str, sequence: u64) -> usize {
        self.state()
            .consumers
            .get(durable_name)
            .and_then(|consumer| consumer.acks.get(&sequence).copied())
            .unwrap_or(0)
    }

    /// Delivered but unacknowledged sequences of `durable_name`.
    #[must_use]
    pub fn pending_sequences(&self, durable_name: &str) -> Vec<u64> {
        self.state()
            .consumers
            .get(durable_name)
            .map(|consumer| consumer.pending.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Acknowledged sequences of `durable_name`, ascending.
    #[must_use]
    pub fn acked_sequences(&self, durable_name: &str) -> Vec<u64> {
        let state = self.state();
        let mut acked: Vec<u64> = state
            .consumers
            .get(durable_name)
            .map(|consumer| consumer.acks.keys().copied().collect())
            .unwrap_or_default();
        acked.sort_unstable();
        acked
    }

    fn take_batch(
        &self,
        durable_name: &str,
        max_messages: usize,
        now: Instant,
    ) -> Result<(Vec<StreamMessage>, Option<Instant>), StreamError> {
        let ack_wait = self.inner.ack_wait;
        let mut guard = self.state();
        let state = &mut *guard;

        let consumer = state
            .consumers
            .get_mut(durable_name)
            .ok_or_else(|| StreamError::NotFound(format!("consumer {durable_name}")))?;
        let stream = state
            .streams
            .get(&consumer.stream)
            .ok_or_else(|| StreamError::NotFound(format!("stream {}", consumer.stream)))?;

        let mut batch = Vec::new();

        for (&sequence, pending) in &mut consumer.pending {
            if batch.len() >= max_messages {
                break;
            }
            if pending.redeliver_at > now {
                continue;
            }
            pending.deliveries += 1;
            pending.redeliver_at = now + ack_wait;
            let stored = &stream.messages[index_of(sequence)];
            batch.push(StreamMessage {
                subject: stored.subject.clone(),
                partition: 0,
                sequence,
                delivery_count: pending.deliveries,
                payload: stored.payload.clone(),
            });
        }

        while batch.len() < max_messages && consumer.cursor < stream.messages.len() {
            let index = consumer.cursor;
            consumer.cursor += 1;
            let stored = &stream.messages[index];
            if stored.subject != consumer.filter_subject {
                continue;
            }
            let sequence = sequence_of(index);
            consumer.pending.insert(
                sequence,
                Pending {
                    deliveries: 1,
                    redeliver_at: now + ack_wait,
                },
            );
            batch.push(StreamMessage {
                subject: stored.subject.clone(),
                partition: 0,
                sequence,
                delivery_count: 1,
                payload: stored.payload.clone(),
            });
        }

        let next_redelivery = consumer.pending.values().map(|p| p.redeliver_at).min();
        Ok((batch, next_redelivery))
    }

    fn consumer_info_for(state: &State, stream: &str, durable_name: &str) -> Result<ConsumerInfo, StreamError> {
        if !state.streams.contains_key(stream) {
            return Err(StreamError::NotFound(format!("stream {stream}")));
        }
        state
            .consumers
            .get(durable_name)
            .filter(|consumer| consumer.stream == stream)
            .map(|consumer| ConsumerInfo {
                stream: stream.to_string(),
                durable_name: durable_name.to_string(),
                filter_subject: Some(consumer.filter_subject.clone()),
            })
            .ok_or_else(|| StreamError::NotFound(format!("consumer {durable_name}")))
    }
}

fn sequence_of(index: usize) -> u64 {
    u64::try_from(index).unwrap_or(u64::MAX) + 1
}

fn index_of(sequence: u64) -> usize {
    usize::try_from(sequence - 1).unwrap_or(usize::MAX)
}

impl StreamConnector for InMemoryEventStream {
    fn connect(&self) -> StreamFuture<'_, Arc<dyn StreamClient>> {
        Box::pin(async move {
            let mut state = self.state();
            state.connect_attempts += 1;
            if state.faults.failing_connects > 0 {
                state.faults.failing_connects -= 1;
                return Err(StreamError::ConnectionFailed("injected connect failure".to_string()));
            }
            drop(state);
            Ok(Arc::new(self.clone()) as Arc<dyn StreamClient>)
        })
    }
}

impl StreamClient for InMemoryEventStream {
    fn ensure_stream<'a>(&'a self, config: &'a StreamConfig) -> StreamFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state();
            let stream = state
                .streams
                .entry(config.name.clone())
                .or_insert_with(|| StreamData {
                    subjects: Vec::new(),
                    messages: Vec::new(),
                });
            for subject in &config.subjects {
                if !stream.subjects.contains(subject) {
                    stream.subjects.push(subject.clone());
                }
            }
            Ok(())
        })
    }

    fn publish<'a>(&'a self, subject: &'a str, payload: Vec<u8>) -> StreamFuture<'a, PublishAck> {
        Box::pin(async move {
            let delay = {
                let mut state = self.state();
                state.publish_attempts += 1;
                state.faults.publish_delay
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let sequence = {
                let mut state = self.state();
                if state.faults.failing_publishes > 0 {
                    state.faults.failing_publishes -= 1;
                    return Err(StreamError::PublishFailed {
                        subject: subject.to_string(),
                        reason: "injected publish failure".to_string(),
                    });
                }
                let stream = state
                    .streams
                    .values_mut()
                    .find(|stream| stream.subjects.iter().any(|s| s == subject))
                    .ok_or_else(|| {
                        StreamError::NotFound(format!("no stream captures subject {subject}"))
                    })?;
                stream.messages.push(StoredMessage {
                    subject: subject.to_string(),
                    payload,
                });
                sequence_of(stream.messages.len() - 1)
            };

            self.inner.published.send_modify(|count| *count += 1);
            Ok(PublishAck {
                subject: subject.to_string(),
                partition: 0,
                sequence,
            })
        })
    }

    fn consumer_info<'a>(
        &'a self,
        stream: &'a str,
        durable_name: &'a str,
    ) -> StreamFuture<'a, ConsumerInfo> {
        Box::pin(async move {
            let state = self.state();
            if let Some(error) = &state.faults.consumer_lookup {
                return Err(error.clone());
            }
            Self::consumer_info_for(&state, stream, durable_name)
        })
    }

    fn add_consumer<'a>(
        &'a self,
        stream: &'a str,
        config: &'a ConsumerConfig,
    ) -> StreamFuture<'a, ConsumerInfo> {
        Box::pin(async move {
            let mut state = self.state();
            if !state.streams.contains_key(stream) {
                return Err(StreamError::NotFound(format!("stream {stream}")));
            }
            state
                .consumers
                .entry(config.durable_name.clone())
                .or_insert_with(|| ConsumerState {
                    stream: stream.to_string(),
                    filter_subject: config.filter_subject.clone(),
                    cursor: 0,
                    pending: BTreeMap::new(),
                    acks: HashMap::new(),
                });
            Self::consumer_info_for(&state, stream, &config.durable_name)
        })
    }

    fn pull_consumer<'a>(
        &'a self,
        stream: &'a str,
        config: &'a ConsumerConfig,
    ) -> StreamFuture<'a, Box<dyn PullConsumer>> {
        Box::pin(async move {
            Self::consumer_info_for(&self.state(), stream, &config.durable_name)?;
            Ok(Box::new(InMemoryPullConsumer {
                broker: self.clone(),
                durable_name: config.durable_name.clone(),
            }) as Box<dyn PullConsumer>)
        })
    }

    fn close(&self) -> StreamFuture<'_, ()> {
        Box::pin(async move {
            self.state().close_calls += 1;
            Ok(())
        })
    }
}

/// Pull consumer attached to an [`InMemoryEventStream`].
pub struct InMemoryPullConsumer {
    broker: InMemoryEventStream,
    durable_name: String,
}

impl PullConsumer for InMemoryPullConsumer {
    fn fetch(&mut self, max_messages: usize, expires: Duration) -> StreamFuture<'_, Vec<StreamMessage>> {
        Box::pin(async move {
            let deadline = Instant::now() + expires;
            let mut published = self.broker.inner.published.subscribe();

            loop {
                let injected = self.broker.state().faults.fetch_errors.pop_front();
                if let Some(error) = injected {
                    return Err(error);
                }

                let (batch, next_redelivery) =
                    self.broker
                        .take_batch(&self.durable_name, max_messages.max(1), Instant::now())?;
                if !batch.is_empty() {
                    return Ok(batch);
                }

                let wake_at = next_redelivery.map_or(deadline, |at| at.min(deadline));
                if tokio::time::timeout_at(wake_at, published.changed()).await.is_err()
                    && Instant::now() >= deadline
                {
                    return Err(StreamError::FetchTimeout { expires });
                }
            }
        })
    }

    fn ack<'a>(&'a mut self, message: &'a StreamMessage) -> StreamFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.broker.state();
            if state.faults.failing_acks > 0 {
                state.faults.failing_acks -= 1;
                return Err(StreamError::Transport("injected ack failure".to_string()));
            }
            let consumer = state
                .consumers
                .get_mut(&self.durable_name)
                .ok_or_else(|| StreamError::NotFound(format!("consumer {}", self.durable_name)))?;
            consumer.pending.remove(&message.sequence);
            *consumer.acks.entry(message.sequence).or_insert(0) += 1;
            Ok(())
        })
    }
}
