use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::binding::{MessageKind, ProducerBinding};
use crate::callback::SendCallback;
use crate::client::{Connector, TransactionRecheck};
use crate::codec::{Codec, encode_body};
use crate::config::Properties;
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::interceptor::InterceptorChain;
use crate::param::{ProducerParam, SendOptions, SendRequest};
use crate::registry::InstanceRegistry;
use crate::strategy::{SendContext, SendStrategy, default_strategies};
use crate::transaction::RecheckHandler;

/// Call site for producer methods: resolves the strategy for a binding's
/// message kind and drives the send.
pub struct ProducerDispatcher<C>
where
    C: Connector,
{
    connector: C,
    properties: Arc<Properties>,
    codec: Arc<dyn Codec>,
    interceptors: Arc<InterceptorChain<Envelope>>,
    registry: Arc<InstanceRegistry<C::Producer>>,
    rechecks: Mutex<HashMap<String, Arc<RecheckHandler>>>,
    strategies: HashMap<MessageKind, Arc<dyn SendStrategy<C::Producer>>>,
}

impl<C> ProducerDispatcher<C>
where
    C: Connector,
{
    /// Creates a dispatcher with the default strategy for every kind.
    pub fn new(
        connector: C,
        properties: Arc<Properties>,
        codec: Arc<dyn Codec>,
        interceptors: Arc<InterceptorChain<Envelope>>,
    ) -> Self {
        Self {
            connector,
            properties,
            codec,
            interceptors,
            registry: Arc::new(InstanceRegistry::new()),
            rechecks: Mutex::new(HashMap::new()),
            strategies: default_strategies(),
        }
    }

    /// Replaces the strategy serving its kind.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn SendStrategy<C::Producer>>) -> Self {
        self.strategies.insert(strategy.kind(), strategy);
        self
    }

    /// Registry of producer handles.
    #[must_use]
    pub const fn registry(&self) -> &Arc<InstanceRegistry<C::Producer>> {
        &self.registry
    }

    /// Sends `param` as declared by `binding`.
    ///
    /// Delivery failures reach `callback`; only problems detected before any
    /// broker interaction are returned.
    ///
    /// # Errors
    /// Returns a validation error for an unusable binding or parameters, a
    /// codec error if the body cannot be encoded, or a construction error if
    /// the producer handle cannot be built.
    pub async fn send<T>(
        &self,
        binding: &ProducerBinding,
        param: ProducerParam<T>,
        callback: Option<Arc<dyn SendCallback>>,
    ) -> Result<()>
    where
        T: Serialize,
    {
        binding.validate()?;

        let kind = binding.message_kind();
        if param.options().kind() != kind {
            return Err(Error::Validation(format!(
                "'{}.{}()' sends {kind} messages but was called with {} parameters",
                binding.declaring_type(),
                binding.method(),
                param.options().kind()
            )));
        }

        let strategy = self
            .strategies
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::Validation(format!("no send strategy for {kind} messages")))?;

        let (business_id, payload, options) = param.into_parts();
        let body = encode_body(self.codec.as_ref(), &payload)?;
        drop(payload);

        let request = SendRequest {
            topic: binding.topic().to_string(),
            tag: binding.message_tag().map(str::to_string),
            is_async: binding.is_async(),
            business_id,
            body,
            options,
            callback,
        };

        let envelope = strategy.build_envelope(&request)?;
        let recheck = self.install_recheck(binding, &request);

        let key = binding.producer_key();
        let options = self.properties.producer_options(binding);
        let connector = self.connector.clone();
        let producer = self
            .registry
            .get_or_create(&key, move || async move {
                connector.build_producer(options, recheck).await
            })
            .await?;

        debug!(key = %key, topic = %request.topic, kind = %kind, "dispatching send");

        let context = SendContext {
            producer,
            interceptors: self.interceptors.clone(),
        };
        strategy.send(&context, envelope, request).await;

        Ok(())
    }

    fn install_recheck(
        &self,
        binding: &ProducerBinding,
        request: &SendRequest,
    ) -> Option<Arc<dyn TransactionRecheck>> {
        let SendOptions::Transactional { checker, .. } = &request.options else {
            return None;
        };

        let handler = self
            .rechecks
            .lock()
            .entry(binding.producer_key())
            .or_insert_with(|| Arc::new(RecheckHandler::new(self.codec.clone())))
            .clone();
        handler.install(checker.clone(), request.callback.clone());

        Some(handler)
    }
}
