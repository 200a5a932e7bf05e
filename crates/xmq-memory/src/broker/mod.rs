mod filter;

pub use filter::TagFilter;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, RwLock};
use proven_xmq::{Envelope, ReceivedMessage, TransactionRecheck, TransactionResolution};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Pause before a failed delivery is retried.
pub const DEFAULT_REDELIVERY_BACKOFF: Duration = Duration::from_millis(50);

/// Released messages kept for inspection; older ones are forgotten.
pub const PUBLISHED_HISTORY: usize = 1024;

/// A message that exhausted its delivery attempts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadLetter {
    /// Group that failed to consume the message.
    pub consumer_group: String,
    /// The message as last delivered.
    pub message: ReceivedMessage,
}

#[derive(Clone)]
struct Subscription {
    consumer_id: u64,
    group: String,
    filter: TagFilter,
    sender: mpsc::Sender<ReceivedMessage>,
}

struct PendingHalf {
    producer_id: u64,
    envelope: Envelope,
}

struct Inner {
    next_handle: AtomicU64,
    round_robin: AtomicUsize,
    injected_failures: AtomicUsize,
    stripped_receipts: AtomicUsize,
    redelivery_backoff: Duration,
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
    pending: Mutex<HashMap<String, PendingHalf>>,
    rechecks: RwLock<HashMap<u64, Arc<dyn TransactionRecheck>>>,
    published: Mutex<VecDeque<ReceivedMessage>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    shutdown: CancellationToken,
}

/// An in-process broker shared by the producers and consumers built on it.
///
/// Messages sharing an ordering key go to the same consumer of a group and
/// are consumed one at a time, in publish order. Delayed messages are held
/// until their deadline. Half messages stay invisible until committed,
/// either by their transaction or by a recheck.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("pending", &self.pending_count())
            .field("published", &self.inner.published.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::with_redelivery_backoff(DEFAULT_REDELIVERY_BACKOFF)
    }
}

impl MemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty broker that retries failed deliveries after `backoff`.
    #[must_use]
    pub fn with_redelivery_backoff(backoff: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                next_handle: AtomicU64::new(1),
                round_robin: AtomicUsize::new(0),
                injected_failures: AtomicUsize::new(0),
                stripped_receipts: AtomicUsize::new(0),
                redelivery_backoff: backoff,
                subscriptions: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                rechecks: RwLock::new(HashMap::new()),
                published: Mutex::new(VecDeque::new()),
                dead_letters: Mutex::new(Vec::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Makes the next `count` send attempts fail.
    pub fn fail_next_sends(&self, count: usize) {
        self.inner.injected_failures.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` accepted sends return receipts without an
    /// identifier.
    pub fn strip_next_receipts(&self, count: usize) {
        self.inner.stripped_receipts.store(count, Ordering::SeqCst);
    }

    /// The latest [`PUBLISHED_HISTORY`] messages made visible to consumers,
    /// in release order.
    #[must_use]
    pub fn published(&self) -> Vec<ReceivedMessage> {
        self.inner.published.lock().iter().cloned().collect()
    }

    /// Number of half messages awaiting commit or rollback.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Messages that exhausted their delivery attempts.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dead_letters.lock().clone()
    }

    /// Stops every background task started by this broker.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Asks the owning producers about every pending half message.
    ///
    /// Returns how many were resolved.
    pub async fn recheck_pending(&self) -> usize {
        self.recheck(None).await
    }

    pub(crate) fn next_handle_id(&self) -> u64 {
        self.inner.next_handle.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn child_token(&self) -> CancellationToken {
        self.inner.shutdown.child_token()
    }

    pub(crate) fn redelivery_backoff(&self) -> Duration {
        self.inner.redelivery_backoff
    }

    pub(crate) fn take_injected_failure(&self) -> bool {
        self.inner
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    pub(crate) fn take_stripped_receipt(&self) -> bool {
        self.inner
            .stripped_receipts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Stores a message and releases it now or at its delivery deadline.
    pub(crate) async fn publish(&self, envelope: Envelope) -> String {
        let id = Uuid::new_v4().to_string();
        self.release(id.clone(), envelope).await;
        id
    }

    async fn release(&self, id: String, envelope: Envelope) {
        let message = ReceivedMessage::from_envelope(id, &envelope);

        let delay = envelope
            .deliver_at()
            .and_then(|at| at.duration_since(SystemTime::now()).ok())
            .filter(|delay| !delay.is_zero());

        let Some(delay) = delay else {
            self.route(message).await;
            return;
        };

        debug!(message_id = ?message.message_id, delay_ms = delay.as_millis(), "holding delayed message");
        let broker = self.clone();
        let token = self.child_token();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => broker.route(message).await,
            }
        });
    }

    async fn route(&self, message: ReceivedMessage) {
        {
            let mut published = self.inner.published.lock();
            if published.len() == PUBLISHED_HISTORY {
                published.pop_front();
            }
            published.push_back(message.clone());
        }

        let targets = self.targets(&message);
        if targets.is_empty() {
            debug!(topic = %message.topic, "no subscribers for message");
        }

        for target in targets {
            if target.send(message.clone()).await.is_err() {
                debug!(topic = %message.topic, "subscriber went away before delivery");
            }
        }
    }

    /// One subscriber per consumer group whose filter accepts the message.
    fn targets(&self, message: &ReceivedMessage) -> Vec<mpsc::Sender<ReceivedMessage>> {
        let subscriptions = self.inner.subscriptions.read();
        let Some(subscribers) = subscriptions.get(&message.topic) else {
            return Vec::new();
        };

        let mut groups: HashMap<&str, Vec<&Subscription>> = HashMap::new();
        for subscription in subscribers {
            if subscription.filter.matches(message.tag.as_deref()) {
                groups
                    .entry(subscription.group.as_str())
                    .or_default()
                    .push(subscription);
            }
        }

        let pick = message.ordering_key.as_ref().map_or_else(
            || self.inner.round_robin.fetch_add(1, Ordering::Relaxed),
            |key| {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                usize::try_from(hasher.finish()).unwrap_or_default()
            },
        );

        groups
            .into_values()
            .map(|members| members[pick % members.len()].sender.clone())
            .collect()
    }

    pub(crate) fn subscribe(
        &self,
        consumer_id: u64,
        topic: &str,
        group: &str,
        filter: TagFilter,
        sender: mpsc::Sender<ReceivedMessage>,
    ) {
        self.inner
            .subscriptions
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(Subscription {
                consumer_id,
                group: group.to_string(),
                filter,
                sender,
            });
        info!(topic, group, consumer_id, "subscribed");
    }

    pub(crate) fn unsubscribe(&self, consumer_id: u64) {
        let mut subscriptions = self.inner.subscriptions.write();
        for subscribers in subscriptions.values_mut() {
            subscribers.retain(|s| s.consumer_id != consumer_id);
        }
        subscriptions.retain(|_, subscribers| !subscribers.is_empty());
    }

    /// Stores a half message and returns its identifier.
    pub(crate) fn hold(&self, producer_id: u64, envelope: Envelope) -> String {
        let id = Uuid::new_v4().to_string();
        self.inner.pending.lock().insert(
            id.clone(),
            PendingHalf {
                producer_id,
                envelope,
            },
        );
        id
    }

    pub(crate) async fn commit(&self, ids: Vec<String>) {
        for id in ids {
            let pending = self.inner.pending.lock().remove(&id);
            if let Some(pending) = pending {
                self.release(id, pending.envelope).await;
            }
        }
    }

    pub(crate) fn discard(&self, ids: &[String]) {
        let mut pending = self.inner.pending.lock();
        for id in ids {
            pending.remove(id);
        }
    }

    pub(crate) fn register_recheck(&self, producer_id: u64, recheck: Arc<dyn TransactionRecheck>) {
        self.inner.rechecks.write().insert(producer_id, recheck);
    }

    pub(crate) fn unregister_recheck(&self, producer_id: u64) {
        self.inner.rechecks.write().remove(&producer_id);
    }

    pub(crate) async fn recheck_producer(&self, producer_id: u64) -> usize {
        self.recheck(Some(producer_id)).await
    }

    async fn recheck(&self, producer_id: Option<u64>) -> usize {
        let candidates: Vec<(ReceivedMessage, Arc<dyn TransactionRecheck>)> = {
            let pending = self.inner.pending.lock();
            let rechecks = self.inner.rechecks.read();
            pending
                .iter()
                .filter(|(_, half)| producer_id.is_none_or(|id| id == half.producer_id))
                .filter_map(|(id, half)| {
                    rechecks.get(&half.producer_id).map(|recheck| {
                        (
                            ReceivedMessage::from_envelope(id.clone(), &half.envelope),
                            recheck.clone(),
                        )
                    })
                })
                .collect()
        };

        let mut resolved = 0;
        for (message, recheck) in candidates {
            let Some(id) = message.message_id.clone() else {
                continue;
            };

            match recheck.check(message).await {
                TransactionResolution::Commit => {
                    self.commit(vec![id]).await;
                    resolved += 1;
                }
                TransactionResolution::Rollback => {
                    self.discard(&[id]);
                    resolved += 1;
                }
                TransactionResolution::Unknown => {
                    debug!(message_id = %id, "half message still unresolved");
                }
            }
        }

        resolved
    }

    pub(crate) fn record_dead_letter(&self, consumer_group: &str, message: ReceivedMessage) {
        warn!(
            consumer_group,
            message_id = ?message.message_id,
            attempts = message.delivery_attempt,
            "message moved to dead letters"
        );
        self.inner.dead_letters.lock().push(DeadLetter {
            consumer_group: consumer_group.to_string(),
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> Envelope {
        Envelope::new("orders", "{}").unwrap()
    }

    #[tokio::test]
    async fn test_publish_fans_out_once_per_group() {
        let broker = MemoryBroker::new();
        let (billing_a, mut billing_a_rx) = mpsc::channel(8);
        let (billing_b, mut billing_b_rx) = mpsc::channel(8);
        let (audit, mut audit_rx) = mpsc::channel(8);
        broker.subscribe(1, "orders", "billing", TagFilter::All, billing_a);
        broker.subscribe(2, "orders", "billing", TagFilter::All, billing_b);
        broker.subscribe(3, "orders", "audit", TagFilter::All, audit);

        broker.publish(envelope()).await;

        assert!(audit_rx.try_recv().is_ok());
        let billing = usize::from(billing_a_rx.try_recv().is_ok())
            + usize::from(billing_b_rx.try_recv().is_ok());
        assert_eq!(billing, 1);
        assert_eq!(broker.published().len(), 1);
    }

    #[tokio::test]
    async fn test_published_history_is_capped() {
        let broker = MemoryBroker::new();
        for i in 0..PUBLISHED_HISTORY + 5 {
            broker
                .publish(Envelope::new("orders", i.to_string()).unwrap())
                .await;
        }

        let published = broker.published();
        assert_eq!(published.len(), PUBLISHED_HISTORY);
        assert_eq!(published[0].body.as_deref(), Some(b"5".as_slice()));
    }

    #[tokio::test]
    async fn test_half_message_invisible_until_commit() {
        let broker = MemoryBroker::new();
        let (sender, mut receiver) = mpsc::channel(8);
        broker.subscribe(1, "orders", "billing", TagFilter::All, sender);

        let id = broker.hold(7, envelope());
        assert_eq!(broker.pending_count(), 1);
        assert!(receiver.try_recv().is_err());

        broker.commit(vec![id.clone()]).await;
        assert_eq!(broker.pending_count(), 0);
        assert_eq!(receiver.try_recv().unwrap().message_id, Some(id));
    }

    #[tokio::test]
    async fn test_discard_drops_half_message() {
        let broker = MemoryBroker::new();
        let id = broker.hold(7, envelope());
        broker.discard(&[id]);
        assert_eq!(broker.pending_count(), 0);
        assert!(broker.published().is_empty());
    }

    #[test]
    fn test_injected_failures_count_down() {
        let broker = MemoryBroker::new();
        broker.fail_next_sends(2);
        assert!(broker.take_injected_failure());
        assert!(broker.take_injected_failure());
        assert!(!broker.take_injected_failure());
    }

    #[tokio::test]
    async fn test_delayed_message_released_at_deadline() {
        let broker = MemoryBroker::new();
        let (sender, mut receiver) = mpsc::channel(8);
        broker.subscribe(1, "orders", "billing", TagFilter::All, sender);

        let deadline = SystemTime::now() + Duration::from_millis(200);
        broker.publish(envelope().with_deliver_at(deadline)).await;
        assert!(receiver.try_recv().is_err());
        assert!(broker.published().is_empty());

        let message = tokio::time::timeout(Duration::from_secs(2), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(SystemTime::now() >= deadline);
        assert_eq!(message.deliver_at, Some(deadline));
    }
}
