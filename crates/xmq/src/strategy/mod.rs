mod delayed;
mod normal;
mod ordered;
mod transactional;

pub use delayed::DelayedStrategy;
pub use normal::NormalStrategy;
pub use ordered::OrderedStrategy;
pub use transactional::TransactionalStrategy;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::binding::MessageKind;
use crate::callback::{SendCallback, respond};
use crate::client::{BrokerError, ProducerClient, SendReceipt};
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::interceptor::InterceptorChain;
use crate::outcome::SendOutcome;
use crate::param::SendRequest;

/// What a strategy needs to deliver: the producer handle and its interceptors.
pub struct SendContext<P>
where
    P: ProducerClient,
{
    /// Producer handle serving the binding.
    pub producer: Arc<P>,
    /// Producer interceptors.
    pub interceptors: Arc<InterceptorChain<Envelope>>,
}

impl<P> Clone for SendContext<P>
where
    P: ProducerClient,
{
    fn clone(&self) -> Self {
        Self {
            producer: self.producer.clone(),
            interceptors: self.interceptors.clone(),
        }
    }
}

/// Envelope construction and delivery for one message kind.
#[async_trait]
pub trait SendStrategy<P>
where
    Self: Send + Sync + 'static,
    P: ProducerClient,
{
    /// The kind this strategy serves.
    fn kind(&self) -> MessageKind;

    /// Builds the envelope for a request.
    ///
    /// # Errors
    /// Returns a validation error if the request's options are unusable.
    fn build_envelope(&self, request: &SendRequest) -> Result<Envelope>;

    /// Delivers the envelope and reports the outcome to the request callback.
    async fn send(&self, context: &SendContext<P>, envelope: Envelope, request: SendRequest);
}

/// The dispatch table from message kind to strategy.
pub fn default_strategies<P>() -> HashMap<MessageKind, Arc<dyn SendStrategy<P>>>
where
    P: ProducerClient,
{
    let strategies: [Arc<dyn SendStrategy<P>>; 4] = [
        Arc::new(NormalStrategy),
        Arc::new(OrderedStrategy),
        Arc::new(DelayedStrategy),
        Arc::new(TransactionalStrategy),
    ];
    strategies
        .into_iter()
        .map(|strategy| (strategy.kind(), strategy))
        .collect()
}

/// Envelope fields common to every kind: topic, body, tag and business key.
pub(crate) fn base_envelope(request: &SendRequest) -> Result<Envelope> {
    let mut envelope = Envelope::new(request.topic.clone(), request.body.clone())?;
    if let Some(tag) = &request.tag {
        envelope = envelope.with_tag(tag.clone());
    }
    if let Some(business_id) = &request.business_id {
        envelope = envelope.with_key(business_id.clone());
    }
    Ok(envelope)
}

/// Plain delivery shared by the non-transactional strategies.
///
/// After-interceptors and the callback run where the send completes: inline
/// for synchronous sends, on a spawned task otherwise.
pub(crate) async fn deliver<P>(
    context: &SendContext<P>,
    envelope: Envelope,
    is_async: bool,
    callback: Option<Arc<dyn SendCallback>>,
) where
    P: ProducerClient,
{
    let topic = envelope.topic().to_string();
    let envelope = context.interceptors.run_before(&topic, envelope);

    if is_async {
        let pending = context.producer.clone().send_async(envelope.clone());
        let interceptors = context.interceptors.clone();
        tokio::spawn(async move {
            let result = pending.await;
            complete(&interceptors, &envelope, result, callback.as_ref());
        });
        debug!(topic = %topic, "async send dispatched");
    } else {
        let result = context.producer.send(envelope.clone()).await;
        complete(&context.interceptors, &envelope, result, callback.as_ref());
    }
}

fn complete<E>(
    interceptors: &InterceptorChain<Envelope>,
    envelope: &Envelope,
    result: Result<SendReceipt, E>,
    callback: Option<&Arc<dyn SendCallback>>,
) where
    E: BrokerError,
{
    let (receipt, error) = match result {
        Ok(receipt) => (Some(receipt), None),
        Err(e) => (None, Some(Error::Send(Box::new(e)))),
    };

    interceptors.run_after(envelope.topic(), envelope, error.as_ref());

    let outcome = SendOutcome::from_receipt(receipt.as_ref(), envelope);
    debug!(topic = envelope.topic(), outcome = %outcome, "send completed");
    respond(callback, &outcome, error, || Error::EmptyMessageId);
}
