//! Declarative message producers and consumers over a transactional broker.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Producer and consumer declarations.
pub mod binding;

/// Response callbacks for send outcomes.
pub mod callback;

/// Broker client contracts consumed by the engine.
pub mod client;

/// Body encoding and parameter conversion.
pub mod codec;

/// Broker connection properties.
pub mod config;

/// Consume-side dispatch of broker deliveries to bound handlers.
pub mod consumer;

/// Outbound message envelopes and inbound message views.
pub mod envelope;

/// Error types.
pub mod error;

/// Ordered before/after hooks around sends and consumes.
pub mod interceptor;

/// Owner of both registries and the dispatchers built on them.
pub mod messaging;

/// Send and consume outcomes.
pub mod outcome;

/// Per-call producer parameters.
pub mod param;

/// Producer-side dispatch by message kind.
pub mod producer;

/// Lazily populated caches of broker handles.
pub mod registry;

/// One send strategy per message kind.
pub mod strategy;

/// Transactional sends and broker-initiated rechecks.
pub mod transaction;

#[cfg(test)]
mod test_support;

pub use binding::{ConsumerBinding, FilterExpression, FilterKind, MessageKind, ProducerBinding};
pub use callback::{SendCallback, callback_fn};
pub use client::{
    BrokerError, Closeable, ClientOptions, Connector, ConsumerClient, ConsumerOptions,
    MessageListener, ProducerClient, ProducerOptions, SendReceipt, Transaction,
    TransactionRecheck, TransactionResolution,
};
pub use codec::{Codec, FromMessage, Json, JsonCodec};
pub use config::{ConsumerProperties, ProducerProperties, Properties};
pub use consumer::{
    ConsumeDispatcher, ConsumerRegistrar, IntoConsumeOutcome, MessageHandler, handler_fn,
};
pub use envelope::{Envelope, ReceivedMessage};
pub use error::{BoxError, Error, Result};
pub use interceptor::{ConsumerInterceptor, Interceptor, InterceptorChain, ProducerInterceptor};
pub use messaging::{Messaging, MessagingBuilder};
pub use outcome::{ConsumeOutcome, SendOutcome};
pub use param::{ProducerParam, SendOptions, SendRequest};
pub use producer::ProducerDispatcher;
pub use registry::InstanceRegistry;
pub use strategy::{SendContext, SendStrategy};
pub use transaction::{
    BoxedChecker, RecheckHandler, TransactionAction, TransactionChecker, TransactionCoordinator,
    TransactionState, check_fn,
};
