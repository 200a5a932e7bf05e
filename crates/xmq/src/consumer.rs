use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::binding::ConsumerBinding;
use crate::client::{Connector, MessageListener};
use crate::codec::{Codec, FromMessage};
use crate::config::Properties;
use crate::envelope::ReceivedMessage;
use crate::error::{BoxError, Error, Result};
use crate::interceptor::InterceptorChain;
use crate::outcome::ConsumeOutcome;
use crate::registry::InstanceRegistry;

/// Conversion of a handler's return value into an acknowledgement decision.
pub trait IntoConsumeOutcome
where
    Self: Send + 'static,
{
    /// Maps the value; anything without an explicit verdict is a success.
    fn into_consume_outcome(self) -> ConsumeOutcome;
}

impl IntoConsumeOutcome for ConsumeOutcome {
    fn into_consume_outcome(self) -> ConsumeOutcome {
        self
    }
}

impl IntoConsumeOutcome for bool {
    fn into_consume_outcome(self) -> ConsumeOutcome {
        if self {
            ConsumeOutcome::Success
        } else {
            ConsumeOutcome::Failure
        }
    }
}

impl IntoConsumeOutcome for () {
    fn into_consume_outcome(self) -> ConsumeOutcome {
        ConsumeOutcome::Success
    }
}

impl<T> IntoConsumeOutcome for Option<T>
where
    T: IntoConsumeOutcome,
{
    fn into_consume_outcome(self) -> ConsumeOutcome {
        self.map_or(ConsumeOutcome::Success, IntoConsumeOutcome::into_consume_outcome)
    }
}

/// A bound consumer method.
#[async_trait]
pub trait MessageHandler
where
    Self: Send + Sync + 'static,
{
    /// The parameter type the message body is converted into.
    type Message: FromMessage;

    /// The return type, mapped to an acknowledgement decision.
    type Output: IntoConsumeOutcome;

    /// Handles one delivery.
    ///
    /// # Errors
    /// Any error leads to a failure outcome and broker redelivery.
    async fn handle(&self, message: Self::Message) -> Result<Self::Output, BoxError>;
}

struct FnHandler<M, F> {
    handle: F,
    _message: PhantomData<fn() -> M>,
}

#[async_trait]
impl<M, O, F> MessageHandler for FnHandler<M, F>
where
    M: FromMessage,
    O: IntoConsumeOutcome,
    F: Fn(M) -> Result<O, BoxError> + Send + Sync + 'static,
{
    type Message = M;
    type Output = O;

    async fn handle(&self, message: M) -> Result<O, BoxError> {
        (self.handle)(message)
    }
}

/// Builds a handler from a closure over the converted parameter.
pub fn handler_fn<M, O, F>(handle: F) -> impl MessageHandler<Message = M, Output = O>
where
    M: FromMessage,
    O: IntoConsumeOutcome,
    F: Fn(M) -> Result<O, BoxError> + Send + Sync + 'static,
{
    FnHandler {
        handle,
        _message: PhantomData,
    }
}

/// Broker listener that converts deliveries and invokes a bound handler.
pub struct ConsumeDispatcher<H>
where
    H: MessageHandler,
{
    method: String,
    handler: H,
    codec: Arc<dyn Codec>,
    interceptors: Arc<InterceptorChain<ReceivedMessage>>,
}

impl<H> ConsumeDispatcher<H>
where
    H: MessageHandler,
{
    /// Creates a dispatcher for the method declared by `binding`.
    pub fn new(
        binding: &ConsumerBinding,
        handler: H,
        codec: Arc<dyn Codec>,
        interceptors: Arc<InterceptorChain<ReceivedMessage>>,
    ) -> Self {
        Self {
            method: format!("{}.{}", binding.declaring_type(), binding.method()),
            handler,
            codec,
            interceptors,
        }
    }

    /// Runs the consume pipeline for one delivery.
    pub async fn dispatch(&self, message: ReceivedMessage) -> ConsumeOutcome {
        if message.body.as_ref().is_none_or(bytes::Bytes::is_empty) {
            warn!(method = %self.method, message = %message.summary(), "message body is empty, skipping");
            return ConsumeOutcome::Success;
        }

        let topic = message.topic.clone();
        let message = self.interceptors.run_before(&topic, message);

        let (outcome, failure) = match self.invoke(&message).await {
            Ok(outcome) => (outcome, None),
            Err(e) => {
                error!(
                    method = %self.method,
                    message_id = ?message.message_id,
                    message = ?message,
                    error = ?e,
                    "consume message failed"
                );
                (ConsumeOutcome::Failure, Some(e))
            }
        };

        self.interceptors
            .run_after(&topic, &message, failure.as_ref());

        outcome
    }

    async fn invoke(&self, message: &ReceivedMessage) -> Result<ConsumeOutcome> {
        let param = H::Message::from_message(message, self.codec.as_ref())?;

        let start = Instant::now();
        let output = AssertUnwindSafe(self.handler.handle(param))
            .catch_unwind()
            .await
            .map_err(|_| Error::Handler("handler panicked".into()))?
            .map_err(Error::Handler)?;
        debug!(
            method = %self.method,
            elapsed_ms = start.elapsed().as_millis(),
            "message handled"
        );

        Ok(output.into_consume_outcome())
    }
}

#[async_trait]
impl<H> MessageListener for ConsumeDispatcher<H>
where
    H: MessageHandler,
{
    async fn consume(&self, message: ReceivedMessage) -> ConsumeOutcome {
        self.dispatch(message).await
    }
}

/// Registers bound consumer methods with the broker.
pub struct ConsumerRegistrar<C>
where
    C: Connector,
{
    connector: C,
    properties: Arc<Properties>,
    codec: Arc<dyn Codec>,
    interceptors: Arc<InterceptorChain<ReceivedMessage>>,
    registry: Arc<InstanceRegistry<C::Consumer>>,
}

impl<C> ConsumerRegistrar<C>
where
    C: Connector,
{
    /// Creates a registrar with an empty consumer registry.
    pub fn new(
        connector: C,
        properties: Arc<Properties>,
        codec: Arc<dyn Codec>,
        interceptors: Arc<InterceptorChain<ReceivedMessage>>,
    ) -> Self {
        Self {
            connector,
            properties,
            codec,
            interceptors,
            registry: Arc::new(InstanceRegistry::new()),
        }
    }

    /// Registry of consumer handles.
    #[must_use]
    pub const fn registry(&self) -> &Arc<InstanceRegistry<C::Consumer>> {
        &self.registry
    }

    /// Starts a push consumer delivering to `handler`.
    ///
    /// A binding without a consumer group falls back to the configured one.
    /// Registering the same group, type and method again returns the
    /// existing handle.
    ///
    /// # Errors
    /// Returns a configuration or validation error for missing endpoints,
    /// topic or group, and a construction error if the broker rejects the
    /// consumer.
    pub async fn register<H>(&self, binding: ConsumerBinding, handler: H) -> Result<Arc<C::Consumer>>
    where
        H: MessageHandler,
    {
        let binding = match &self.properties.consumer.consumer_group {
            Some(group) if binding.consumer_group().trim().is_empty() => {
                binding.group(group.clone())
            }
            _ => binding,
        };

        self.properties.validate()?;
        binding.validate()?;

        let key = binding.consumer_key();
        let options = self.properties.consumer_options(&binding);
        let listener: Arc<dyn MessageListener> = Arc::new(ConsumeDispatcher::new(
            &binding,
            handler,
            self.codec.clone(),
            self.interceptors.clone(),
        ));
        let connector = self.connector.clone();

        let consumer = self
            .registry
            .get_or_create(&key, move || async move {
                connector.build_consumer(options, listener).await
            })
            .await?;

        info!(
            key = %key,
            topic = binding.topic(),
            filter = %binding.filter_expression().expression,
            "consumer registered"
        );

        Ok(consumer)
    }
}
