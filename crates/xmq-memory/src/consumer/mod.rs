use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use proven_xmq::{
    Closeable, ConsumeOutcome, ConsumerClient, ConsumerOptions, MessageListener, ReceivedMessage,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::Error;
use crate::broker::{MemoryBroker, TagFilter};

/// A push consumer on a [`MemoryBroker`].
///
/// Deliveries without an ordering key are consumed concurrently, up to the
/// configured thread count. Ordering keys are hashed onto one lane per
/// thread, so deliveries sharing a key are consumed one at a time. Bodies
/// in flight are bounded by the cached-bytes budget. A failed delivery is
/// retried after the broker's backoff and dead-lettered once it reaches the
/// attempt limit.
pub struct MemoryConsumer {
    id: u64,
    group: String,
    broker: MemoryBroker,
    closed: AtomicBool,
    token: CancellationToken,
}

#[derive(Clone)]
struct Worker {
    group: Arc<str>,
    broker: MemoryBroker,
    listener: Arc<dyn MessageListener>,
    permits: Arc<Semaphore>,
    max_attempts: u32,
    backoff: Duration,
    token: CancellationToken,
}

impl Worker {
    async fn process(&self, mut message: ReceivedMessage) {
        loop {
            let outcome = {
                let Ok(_permit) = self.permits.acquire().await else {
                    return;
                };
                if self.token.is_cancelled() {
                    return;
                }
                self.listener.consume(message.clone()).await
            };

            if outcome == ConsumeOutcome::Success {
                return;
            }

            if message.delivery_attempt >= self.max_attempts {
                self.broker.record_dead_letter(&self.group, message);
                return;
            }

            debug!(
                consumer_group = %self.group,
                message_id = ?message.message_id,
                attempt = message.delivery_attempt,
                "redelivering failed message"
            );
            message.delivery_attempt += 1;

            tokio::select! {
                () = self.token.cancelled() => return,
                () = tokio::time::sleep(self.backoff) => {}
            }
        }
    }

    fn spawn_lane(&self) -> mpsc::UnboundedSender<Cached> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Cached>();
        let worker = self.clone();
        tokio::spawn(async move {
            while let Some((message, _cached)) = receiver.recv().await {
                worker.process(message).await;
            }
        });
        sender
    }
}

/// A delivery and its share of the cached-bytes budget.
type Cached = (ReceivedMessage, OwnedSemaphorePermit);

/// Lanes for keyed deliveries, fixed at one per consumer thread.
struct Lanes {
    senders: Vec<mpsc::UnboundedSender<Cached>>,
}

impl Lanes {
    fn new(worker: &Worker, count: usize) -> Self {
        Self {
            senders: (0..count.max(1)).map(|_| worker.spawn_lane()).collect(),
        }
    }

    fn pick(&self, key: &str) -> &mpsc::UnboundedSender<Cached> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = usize::try_from(hasher.finish()).unwrap_or_default() % self.senders.len();
        &self.senders[index]
    }
}

/// Budget on the body bytes held by deliveries not yet consumed.
struct ByteBudget {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl ByteBudget {
    fn new(max_cached_bytes: usize) -> Self {
        let capacity = max_cached_bytes.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Waits for room for `message`; a body above the budget takes all of it.
    async fn reserve(&self, message: &ReceivedMessage) -> Option<OwnedSemaphorePermit> {
        let size = message.body.as_ref().map_or(0, bytes::Bytes::len);
        let wanted = u32::try_from(size.clamp(1, self.capacity)).unwrap_or(u32::MAX);
        self.permits.clone().acquire_many_owned(wanted).await.ok()
    }
}

impl MemoryConsumer {
    pub(crate) fn start(
        broker: MemoryBroker,
        options: ConsumerOptions,
        listener: Arc<dyn MessageListener>,
    ) -> Result<Self, Error> {
        if options.client.endpoints.trim().is_empty() {
            return Err(Error::NoEndpoints);
        }

        let filters = options
            .subscriptions
            .iter()
            .map(|(topic, filter)| Ok((topic.clone(), TagFilter::parse(filter)?)))
            .collect::<Result<Vec<_>, Error>>()?;

        let id = broker.next_handle_id();
        let token = broker.child_token();
        let (sender, receiver) = mpsc::channel(options.max_cached_messages.max(1));

        for (topic, filter) in filters {
            broker.subscribe(id, &topic, &options.consumer_group, filter, sender.clone());
        }

        let worker = Worker {
            group: Arc::from(options.consumer_group.as_str()),
            broker: broker.clone(),
            listener,
            permits: Arc::new(Semaphore::new(options.thread_count.max(1))),
            max_attempts: options.max_attempts.max(1),
            backoff: broker.redelivery_backoff(),
            token: token.clone(),
        };

        tokio::spawn(Self::process_messages(
            ReceiverStream::new(receiver),
            Lanes::new(&worker, options.thread_count),
            worker,
            ByteBudget::new(options.max_cached_bytes),
            token.clone(),
        ));

        info!(consumer_id = id, consumer_group = %options.consumer_group, "consumer started");

        Ok(Self {
            id,
            group: options.consumer_group,
            broker,
            closed: AtomicBool::new(false),
            token,
        })
    }

    async fn process_messages(
        mut receiver_stream: ReceiverStream<ReceivedMessage>,
        lanes: Lanes,
        worker: Worker,
        budget: ByteBudget,
        token: CancellationToken,
    ) {
        loop {
            let message = tokio::select! {
                () = token.cancelled() => break,
                message = receiver_stream.next() => message,
            };
            let Some(message) = message else {
                break;
            };

            let cached = tokio::select! {
                () = token.cancelled() => break,
                cached = budget.reserve(&message) => cached,
            };
            let Some(cached) = cached else {
                break;
            };

            match message.ordering_key.as_deref() {
                Some(key) => {
                    if lanes.pick(key).send((message, cached)).is_err() {
                        debug!(consumer_group = %worker.group, "ordered lane went away");
                    }
                }
                None => {
                    let worker = worker.clone();
                    tokio::spawn(async move {
                        worker.process(message).await;
                        drop(cached);
                    });
                }
            }
        }

        debug!(consumer_group = %worker.group, "consumer loop stopped");
    }

    /// Consumer group this handle belongs to.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }
}

#[async_trait]
impl Closeable for MemoryConsumer {
    type Error = Error;

    async fn close(&self) -> Result<(), Self::Error> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.token.cancel();
            self.broker.unsubscribe(self.id);
            info!(consumer_id = self.id, consumer_group = %self.group, "consumer closed");
        }
        Ok(())
    }
}

impl ConsumerClient for MemoryConsumer {}
