use std::sync::Arc;

use async_trait::async_trait;
use proven_xmq::{ConsumerOptions, Connector, MessageListener, ProducerOptions, TransactionRecheck};

use crate::Error;
use crate::broker::MemoryBroker;
use crate::consumer::MemoryConsumer;
use crate::producer::MemoryProducer;

/// Builds producer and consumer handles on a shared [`MemoryBroker`].
#[derive(Clone, Debug, Default)]
pub struct MemoryConnector {
    broker: MemoryBroker,
}

impl MemoryConnector {
    /// Creates a connector for the given broker.
    #[must_use]
    pub const fn new(broker: MemoryBroker) -> Self {
        Self { broker }
    }

    /// The broker handles are built on.
    #[must_use]
    pub const fn broker(&self) -> &MemoryBroker {
        &self.broker
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Error = Error;
    type Producer = MemoryProducer;
    type Consumer = MemoryConsumer;

    async fn build_producer(
        &self,
        options: ProducerOptions,
        recheck: Option<Arc<dyn TransactionRecheck>>,
    ) -> Result<Self::Producer, Self::Error> {
        MemoryProducer::new(self.broker.clone(), options, recheck)
    }

    async fn build_consumer(
        &self,
        options: ConsumerOptions,
        listener: Arc<dyn MessageListener>,
    ) -> Result<Self::Consumer, Self::Error> {
        MemoryConsumer::start(self.broker.clone(), options, listener)
    }
}
