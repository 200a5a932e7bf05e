use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use proven_xmq::{
    Closeable, Envelope, ProducerClient, ProducerOptions, SendReceipt, Transaction,
    TransactionRecheck,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::Error;
use crate::broker::MemoryBroker;

/// A producer handle on a [`MemoryBroker`].
pub struct MemoryProducer {
    id: u64,
    broker: MemoryBroker,
    options: ProducerOptions,
    closed: AtomicBool,
    token: CancellationToken,
}

impl MemoryProducer {
    pub(crate) fn new(
        broker: MemoryBroker,
        options: ProducerOptions,
        recheck: Option<Arc<dyn TransactionRecheck>>,
    ) -> Result<Self, Error> {
        if options.client.endpoints.trim().is_empty() {
            return Err(Error::NoEndpoints);
        }

        let id = broker.next_handle_id();
        let token = broker.child_token();

        if let Some(recheck) = recheck {
            broker.register_recheck(id, recheck);
            Self::spawn_periodic_recheck(&broker, id, &options, token.clone());
        }

        debug!(producer_id = id, topics = ?options.topics, "producer started");

        Ok(Self {
            id,
            broker,
            options,
            closed: AtomicBool::new(false),
            token,
        })
    }

    fn spawn_periodic_recheck(
        broker: &MemoryBroker,
        id: u64,
        options: &ProducerOptions,
        token: CancellationToken,
    ) {
        let interval = options.transaction_check_interval;
        if interval.is_zero() {
            return;
        }

        let broker = broker.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {
                        let resolved = broker.recheck_producer(id).await;
                        if resolved > 0 {
                            debug!(producer_id = id, resolved, "periodic recheck resolved half messages");
                        }
                    }
                }
            }
        });
    }

    fn check_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed("producer"));
        }
        Ok(())
    }

    fn receipt(&self, id: String) -> SendReceipt {
        if self.broker.take_stripped_receipt() {
            warn!(producer_id = self.id, message_id = %id, "receipt stripped of its identifier");
            return SendReceipt::empty();
        }
        SendReceipt::new(id)
    }

    fn check_size(&self, envelope: &Envelope) -> Result<(), Error> {
        let size = envelope.body().len();
        let limit = self.options.max_message_size;
        if size > limit {
            return Err(Error::MessageTooLarge { size, limit });
        }
        Ok(())
    }
}

#[async_trait]
impl Closeable for MemoryProducer {
    type Error = Error;

    async fn close(&self) -> Result<(), Self::Error> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.token.cancel();
            self.broker.unregister_recheck(self.id);
            debug!(producer_id = self.id, "producer closed");
        }
        Ok(())
    }
}

/// A transactional session on a [`MemoryProducer`].
pub struct MemoryTransaction {
    producer_id: u64,
    broker: MemoryBroker,
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    type Error = Error;

    async fn commit(self) -> Result<(), Self::Error> {
        let messages = self.messages.into_inner();
        debug!(producer_id = self.producer_id, count = messages.len(), "committing");
        self.broker.commit(messages).await;
        Ok(())
    }

    async fn rollback(self) -> Result<(), Self::Error> {
        let messages = self.messages.into_inner();
        debug!(producer_id = self.producer_id, count = messages.len(), "rolling back");
        self.broker.discard(&messages);
        Ok(())
    }
}

#[async_trait]
impl ProducerClient for MemoryProducer {
    type Transaction = MemoryTransaction;

    async fn send(&self, message: Envelope) -> Result<SendReceipt, Self::Error> {
        self.check_open()?;
        self.check_size(&message)?;

        for attempt in 1..=self.options.max_attempts.max(1) {
            if self.broker.take_injected_failure() {
                warn!(producer_id = self.id, attempt, "send attempt failed");
                continue;
            }
            let id = self.broker.publish(message).await;
            return Ok(self.receipt(id));
        }

        Err(Error::Injected)
    }

    async fn begin_transaction(&self) -> Result<Self::Transaction, Self::Error> {
        self.check_open()?;
        Ok(MemoryTransaction {
            producer_id: self.id,
            broker: self.broker.clone(),
            messages: Mutex::new(Vec::new()),
        })
    }

    async fn send_half(
        &self,
        message: Envelope,
        transaction: &Self::Transaction,
    ) -> Result<SendReceipt, Self::Error> {
        self.check_open()?;
        self.check_size(&message)?;

        if transaction.producer_id != self.id {
            return Err(Error::UnknownTransaction);
        }
        if self.broker.take_injected_failure() {
            return Err(Error::Injected);
        }

        let id = self.broker.hold(self.id, message);
        transaction.messages.lock().push(id.clone());
        Ok(self.receipt(id))
    }
}
