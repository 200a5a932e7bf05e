//! Two-phase transactional sends
//!
//! A transactional send opens a session, publishes a half message, runs the
//! caller's local action and then commits or rolls back. Every failure along
//! the way is reported through the send callback. When the local action
//! cannot decide, the half message stays pending and the broker later asks
//! the registered [`TransactionChecker`] through a [`RecheckHandler`].

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::callback::{SendCallback, respond};
use crate::client::{ProducerClient, Transaction, TransactionRecheck, TransactionResolution};
use crate::codec::{Codec, FromMessage};
use crate::envelope::{Envelope, ReceivedMessage};
use crate::error::{BoxError, Error, Result};
use crate::interceptor::InterceptorChain;
use crate::outcome::SendOutcome;

/// Local work bound to a transactional send.
#[async_trait]
pub trait TransactionAction
where
    Self: Send + Sync + 'static,
{
    /// Runs the local transaction; `true` commits the half message, `false`
    /// rolls it back.
    ///
    /// # Errors
    /// An error leaves the half message pending for a broker recheck.
    async fn execute(&self) -> Result<bool, BoxError>;
}

#[async_trait]
impl<F> TransactionAction for F
where
    F: Fn() -> Result<bool, BoxError> + Send + Sync + 'static,
{
    async fn execute(&self) -> Result<bool, BoxError> {
        self()
    }
}

/// Resolves a pending half message when the broker asks.
#[async_trait]
pub trait TransactionChecker
where
    Self: Send + Sync + 'static,
{
    /// The decoded message type.
    type Message: FromMessage;

    /// Reports whether the local transaction committed; `None` if still unknown.
    ///
    /// # Errors
    /// An error leaves the half message pending.
    async fn check(&self, message: Self::Message) -> Result<Option<bool>, BoxError>;
}

struct FnChecker<M, F> {
    check: F,
    _message: PhantomData<fn() -> M>,
}

#[async_trait]
impl<M, F> TransactionChecker for FnChecker<M, F>
where
    M: FromMessage,
    F: Fn(M) -> Result<Option<bool>, BoxError> + Send + Sync + 'static,
{
    type Message = M;

    async fn check(&self, message: M) -> Result<Option<bool>, BoxError> {
        (self.check)(message)
    }
}

/// Builds a checker from a closure over the decoded message.
pub fn check_fn<M, F>(check: F) -> impl TransactionChecker<Message = M>
where
    M: FromMessage,
    F: Fn(M) -> Result<Option<bool>, BoxError> + Send + Sync + 'static,
{
    FnChecker {
        check,
        _message: PhantomData,
    }
}

#[async_trait]
trait ErasedChecker
where
    Self: Send + Sync + 'static,
{
    async fn check(&self, message: &ReceivedMessage, codec: &dyn Codec) -> Result<Option<bool>>;
}

#[async_trait]
impl<C> ErasedChecker for C
where
    C: TransactionChecker,
{
    async fn check(&self, message: &ReceivedMessage, codec: &dyn Codec) -> Result<Option<bool>> {
        let decoded = C::Message::from_message(message, codec)?;
        TransactionChecker::check(self, decoded)
            .await
            .map_err(Error::Handler)
    }
}

/// A type-erased [`TransactionChecker`] carried by send options.
#[derive(Clone)]
pub struct BoxedChecker(Arc<dyn ErasedChecker>);

impl BoxedChecker {
    /// Erases the checker's message type.
    pub fn new<C>(checker: C) -> Self
    where
        C: TransactionChecker,
    {
        Self(Arc::new(checker))
    }
}

impl fmt::Debug for BoxedChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BoxedChecker")
    }
}

/// Progress of a transactional send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// The session was requested; nothing reached the broker.
    Started,

    /// The half message was accepted.
    HalfSent,

    /// The local action succeeded and a commit was issued.
    LocalCommitted,

    /// The local action failed and a rollback was issued.
    LocalRolledBack,

    /// The local action raised; the half message awaits a recheck.
    LocalUnknown,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Started => "STARTED",
            Self::HalfSent => "HALF_SENT",
            Self::LocalCommitted => "LOCAL_COMMITTED",
            Self::LocalRolledBack => "LOCAL_ROLLED_BACK",
            Self::LocalUnknown => "LOCAL_UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Drives one transactional send against a producer handle.
pub struct TransactionCoordinator<P>
where
    P: ProducerClient,
{
    producer: Arc<P>,
    interceptors: Arc<InterceptorChain<Envelope>>,
}

impl<P> TransactionCoordinator<P>
where
    P: ProducerClient,
{
    /// Creates a coordinator over the given handle and producer interceptors.
    pub const fn new(producer: Arc<P>, interceptors: Arc<InterceptorChain<Envelope>>) -> Self {
        Self {
            producer,
            interceptors,
        }
    }

    /// Runs the two-phase protocol and reports the result to `callback`.
    ///
    /// Returns the last state reached. The callback fires exactly once.
    pub async fn execute(
        &self,
        envelope: Envelope,
        action: &dyn TransactionAction,
        callback: Option<&Arc<dyn SendCallback>>,
    ) -> TransactionState {
        let topic = envelope.topic().to_string();
        let envelope = self.interceptors.run_before(&topic, envelope);
        debug!(topic = %topic, state = %TransactionState::Started, "transaction state");

        let transaction = match self.producer.begin_transaction().await {
            Ok(transaction) => transaction,
            Err(e) => {
                self.abort(&envelope, Error::BeginTransaction(Box::new(e)), callback);
                return TransactionState::Started;
            }
        };

        let receipt = match self.producer.send_half(envelope.clone(), &transaction).await {
            Ok(receipt) if receipt.message_id.is_some() => receipt,
            Ok(_) => {
                warn!(topic = %topic, "half message accepted without an identifier");
                self.abort(&envelope, Error::EmptyMessageId, callback);
                return TransactionState::Started;
            }
            Err(e) => {
                self.abort(&envelope, Error::HalfSend(Box::new(e)), callback);
                return TransactionState::Started;
            }
        };

        self.interceptors.run_after(&topic, &envelope, None);
        let outcome = SendOutcome::from_receipt(Some(&receipt), &envelope);
        debug!(
            topic = %topic,
            message_id = ?outcome.message_id(),
            state = %TransactionState::HalfSent,
            "transaction state"
        );

        let decision = match action.execute().await {
            Ok(decision) => decision,
            Err(e) => {
                error!(topic = %topic, error = %e, "local transaction action raised");
                respond(
                    callback,
                    &outcome.into_failed(),
                    Some(Error::LocalAction(e)),
                    || Error::LocalRollback,
                );
                return TransactionState::LocalUnknown;
            }
        };

        if decision {
            match transaction.commit().await {
                Ok(()) => {
                    info!(topic = %topic, message_id = ?outcome.message_id(), "transaction committed");
                    respond(callback, &outcome, None, || Error::EmptyMessageId);
                }
                Err(e) => respond(
                    callback,
                    &outcome.into_failed(),
                    Some(Error::Commit(Box::new(e))),
                    || Error::EmptyMessageId,
                ),
            }
            TransactionState::LocalCommitted
        } else {
            let error = match transaction.rollback().await {
                Ok(()) => {
                    info!(topic = %topic, message_id = ?outcome.message_id(), "transaction rolled back");
                    Error::LocalRollback
                }
                Err(e) => Error::Rollback(Box::new(e)),
            };
            respond(callback, &outcome.into_failed(), Some(error), || {
                Error::LocalRollback
            });
            TransactionState::LocalRolledBack
        }
    }

    fn abort(&self, envelope: &Envelope, error: Error, callback: Option<&Arc<dyn SendCallback>>) {
        self.interceptors
            .run_after(envelope.topic(), envelope, Some(&error));
        let outcome = SendOutcome::from_receipt(None, envelope);
        respond(callback, &outcome, Some(error), || Error::EmptyMessageId);
    }
}

struct RecheckSlot {
    checker: BoxedChecker,
    callback: Option<Arc<dyn SendCallback>>,
}

/// Recheck entry point registered with a transactional producer.
///
/// Holds the checker and callback of the latest send through its binding.
pub struct RecheckHandler {
    codec: Arc<dyn Codec>,
    slot: RwLock<Option<RecheckSlot>>,
}

impl RecheckHandler {
    /// Creates a handler with no checker installed yet.
    #[must_use]
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self {
            codec,
            slot: RwLock::new(None),
        }
    }

    /// Installs the checker and callback used by later rechecks.
    pub fn install(&self, checker: BoxedChecker, callback: Option<Arc<dyn SendCallback>>) {
        *self.slot.write() = Some(RecheckSlot { checker, callback });
    }

    async fn resolve(&self, message: &ReceivedMessage) -> Option<TransactionResolution> {
        let (checker, callback) = {
            let slot = self.slot.read();
            let slot = slot.as_ref()?;
            (slot.checker.clone(), slot.callback.clone())
        };

        message.body.as_ref()?;

        let committed = match checker.0.check(message, self.codec.as_ref()).await {
            Ok(Some(committed)) => committed,
            Ok(None) => return None,
            Err(e) => {
                error!(message = %message.summary(), error = %e, "check local transaction status failed");
                return None;
            }
        };

        let outcome = SendOutcome::from_recheck(committed, message);
        respond(callback.as_ref(), &outcome, None, || Error::RecheckRollback);

        Some(if committed {
            TransactionResolution::Commit
        } else {
            TransactionResolution::Rollback
        })
    }
}

#[async_trait]
impl TransactionRecheck for RecheckHandler {
    async fn check(&self, message: ReceivedMessage) -> TransactionResolution {
        if let Some(resolution) = self.resolve(&message).await {
            return resolution;
        }
        warn!(message = %message.summary(), "current transaction resolution is unknown");
        TransactionResolution::Unknown
    }
}
