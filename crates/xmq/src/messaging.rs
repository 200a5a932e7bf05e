use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::info;

use crate::binding::{ConsumerBinding, ProducerBinding};
use crate::callback::SendCallback;
use crate::client::Connector;
use crate::codec::{Codec, JsonCodec};
use crate::config::Properties;
use crate::consumer::{ConsumerRegistrar, MessageHandler};
use crate::envelope::{Envelope, ReceivedMessage};
use crate::error::Result;
use crate::interceptor::{Interceptor, InterceptorChain};
use crate::param::ProducerParam;
use crate::producer::ProducerDispatcher;

/// Owns the producer dispatcher, the consumer registrar and their handles.
///
/// Wiring happens once at construction; [`Messaging::shutdown`] tears every
/// broker handle down.
pub struct Messaging<C>
where
    C: Connector,
{
    properties: Arc<Properties>,
    producer: ProducerDispatcher<C>,
    consumer: ConsumerRegistrar<C>,
    shut_down: AtomicBool,
}

/// Assembles a [`Messaging`] container.
pub struct MessagingBuilder<C>
where
    C: Connector,
{
    connector: C,
    properties: Properties,
    codec: Arc<dyn Codec>,
    producer_interceptors: Vec<Arc<dyn Interceptor<Envelope>>>,
    consumer_interceptors: Vec<Arc<dyn Interceptor<ReceivedMessage>>>,
}

impl<C> MessagingBuilder<C>
where
    C: Connector,
{
    /// Replaces the default JSON codec.
    #[must_use]
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Adds a producer interceptor.
    #[must_use]
    pub fn producer_interceptor(mut self, interceptor: Arc<dyn Interceptor<Envelope>>) -> Self {
        self.producer_interceptors.push(interceptor);
        self
    }

    /// Adds a consumer interceptor.
    #[must_use]
    pub fn consumer_interceptor(
        mut self,
        interceptor: Arc<dyn Interceptor<ReceivedMessage>>,
    ) -> Self {
        self.consumer_interceptors.push(interceptor);
        self
    }

    /// Validates the properties and wires the container.
    ///
    /// # Errors
    /// Returns a configuration error if the properties are invalid.
    pub fn build(self) -> Result<Messaging<C>> {
        self.properties.validate()?;

        let properties = Arc::new(self.properties);
        let producer = ProducerDispatcher::new(
            self.connector.clone(),
            properties.clone(),
            self.codec.clone(),
            Arc::new(InterceptorChain::new(self.producer_interceptors)),
        );
        let consumer = ConsumerRegistrar::new(
            self.connector,
            properties.clone(),
            self.codec,
            Arc::new(InterceptorChain::new(self.consumer_interceptors)),
        );

        Ok(Messaging {
            properties,
            producer,
            consumer,
            shut_down: AtomicBool::new(false),
        })
    }
}

impl<C> Messaging<C>
where
    C: Connector,
{
    /// Starts assembling a container with the JSON codec and no interceptors.
    pub fn builder(connector: C, properties: Properties) -> MessagingBuilder<C> {
        MessagingBuilder {
            connector,
            properties,
            codec: Arc::new(JsonCodec),
            producer_interceptors: Vec::new(),
            consumer_interceptors: Vec::new(),
        }
    }

    /// Wires a container with the JSON codec and no interceptors.
    ///
    /// # Errors
    /// Returns a configuration error if the properties are invalid.
    pub fn new(connector: C, properties: Properties) -> Result<Self> {
        Self::builder(connector, properties).build()
    }

    /// Active properties.
    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Producer dispatcher.
    #[must_use]
    pub const fn producer(&self) -> &ProducerDispatcher<C> {
        &self.producer
    }

    /// Consumer registrar.
    #[must_use]
    pub const fn consumer(&self) -> &ConsumerRegistrar<C> {
        &self.consumer
    }

    /// Shorthand for [`ProducerDispatcher::send`].
    ///
    /// # Errors
    /// See [`ProducerDispatcher::send`].
    pub async fn send<T>(
        &self,
        binding: &ProducerBinding,
        param: ProducerParam<T>,
        callback: Option<Arc<dyn SendCallback>>,
    ) -> Result<()>
    where
        T: Serialize,
    {
        self.producer.send(binding, param, callback).await
    }

    /// Shorthand for [`ConsumerRegistrar::register`].
    ///
    /// # Errors
    /// See [`ConsumerRegistrar::register`].
    pub async fn register<H>(&self, binding: ConsumerBinding, handler: H) -> Result<Arc<C::Consumer>>
    where
        H: MessageHandler,
    {
        self.consumer.register(binding, handler).await
    }

    /// Whether [`Messaging::shutdown`] already ran.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Closes every producer and consumer handle. Later calls do nothing.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.consumer.registry().close_all().await;
        self.producer.registry().close_all().await;
        info!("messaging shut down");
    }
}
