use crate::binding::FilterExpression;
use crate::envelope::{Envelope, ReceivedMessage};
use crate::outcome::ConsumeOutcome;

use std::collections::HashMap;
use std::error::Error;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;

/// Marker trait for broker client errors
pub trait BrokerError: Debug + Error + Send + Sync + 'static {}

/// Acknowledgement returned by the broker for a send.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendReceipt {
    /// Broker-assigned identifier, absent if the broker did not assign one.
    pub message_id: Option<String>,
}

impl SendReceipt {
    /// Creates a receipt carrying the given identifier.
    #[must_use]
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: Some(message_id.into()),
        }
    }

    /// Creates a receipt without an identifier.
    #[must_use]
    pub const fn empty() -> Self {
        Self { message_id: None }
    }
}

/// Final state of a transactional message as seen by the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransactionResolution {
    /// Make the half message visible to consumers.
    Commit,

    /// Discard the half message.
    Rollback,

    /// Leave the half message pending; the broker will ask again.
    Unknown,
}

/// Connection settings shared by producers and consumers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientOptions {
    /// Broker endpoints, `;` separated.
    pub endpoints: String,
    /// Access key, if the broker requires credentials.
    pub access_key: Option<String>,
    /// Secret key, if the broker requires credentials.
    pub secret_key: Option<String>,
    /// Whether to use TLS.
    pub ssl_enabled: bool,
    /// Per-request timeout enforced by the client.
    pub request_timeout: Duration,
}

/// Settings for building a producer handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProducerOptions {
    /// Connection settings.
    pub client: ClientOptions,
    /// Topics the producer is expected to publish to.
    pub topics: Vec<String>,
    /// Maximum send attempts, including the first.
    pub max_attempts: u32,
    /// Largest accepted body, in bytes.
    pub max_message_size: usize,
    /// Interval between broker rechecks of pending transactions.
    pub transaction_check_interval: Duration,
}

/// Settings for building a push consumer handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerOptions {
    /// Connection settings.
    pub client: ClientOptions,
    /// Consumer group.
    pub consumer_group: String,
    /// Subscribed topics and their filters.
    pub subscriptions: HashMap<String, FilterExpression>,
    /// Maximum delivery attempts before a message is dead-lettered.
    pub max_attempts: u32,
    /// Number of concurrent consume workers.
    pub thread_count: usize,
    /// Locally cached message count limit.
    pub max_cached_messages: usize,
    /// Locally cached message size limit, in bytes.
    pub max_cached_bytes: usize,
}

/// A broker handle that owns a session and must be closed at teardown.
#[async_trait]
pub trait Closeable
where
    Self: Send + Sync + 'static,
{
    /// The error type for the handle.
    type Error: BrokerError;

    /// Closes the session.
    async fn close(&self) -> Result<(), Self::Error>;
}

/// An open transactional session.
#[async_trait]
pub trait Transaction
where
    Self: Send + Sync + 'static,
{
    /// The error type for the session.
    type Error: BrokerError;

    /// Makes the half message visible to consumers.
    async fn commit(self) -> Result<(), Self::Error>;

    /// Discards the half message.
    async fn rollback(self) -> Result<(), Self::Error>;
}

/// A producer handle. Safe for concurrent use.
#[async_trait]
pub trait ProducerClient: Closeable {
    /// The transactional session type.
    type Transaction: Transaction<Error = Self::Error>;

    /// Sends a message and waits for the broker acknowledgement.
    async fn send(&self, message: Envelope) -> Result<SendReceipt, Self::Error>;

    /// Starts a send whose completion is awaited on another task.
    fn send_async(
        self: Arc<Self>,
        message: Envelope,
    ) -> BoxFuture<'static, Result<SendReceipt, Self::Error>>
    where
        Self: Sized,
    {
        Box::pin(async move { self.send(message).await })
    }

    /// Opens a transactional session.
    async fn begin_transaction(&self) -> Result<Self::Transaction, Self::Error>;

    /// Sends a half message under the given session.
    async fn send_half(
        &self,
        message: Envelope,
        transaction: &Self::Transaction,
    ) -> Result<SendReceipt, Self::Error>;
}

/// A push consumer handle.
pub trait ConsumerClient: Closeable {}

/// Broker-facing recheck entry point registered with a transactional producer.
#[async_trait]
pub trait TransactionRecheck
where
    Self: Send + Sync + 'static,
{
    /// Resolves the final state of a pending half message.
    async fn check(&self, message: ReceivedMessage) -> TransactionResolution;
}

/// Broker-facing listener registered with a push consumer.
#[async_trait]
pub trait MessageListener
where
    Self: Send + Sync + 'static,
{
    /// Handles a delivery and decides whether it is acknowledged.
    async fn consume(&self, message: ReceivedMessage) -> ConsumeOutcome;
}

/// Builds broker handles.
#[async_trait]
pub trait Connector
where
    Self: Clone + Send + Sync + 'static,
{
    /// The error type for the connector and its handles.
    type Error: BrokerError;

    /// The producer handle type.
    type Producer: ProducerClient<Error = Self::Error>;

    /// The consumer handle type.
    type Consumer: ConsumerClient<Error = Self::Error>;

    /// Builds a producer, registering the recheck entry point if given.
    async fn build_producer(
        &self,
        options: ProducerOptions,
        recheck: Option<Arc<dyn TransactionRecheck>>,
    ) -> Result<Self::Producer, Self::Error>;

    /// Builds a push consumer that delivers to the given listener.
    async fn build_consumer(
        &self,
        options: ConsumerOptions,
        listener: Arc<dyn MessageListener>,
    ) -> Result<Self::Consumer, Self::Error>;
}
