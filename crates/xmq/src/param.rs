use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::binding::MessageKind;
use crate::callback::SendCallback;
use crate::transaction::{BoxedChecker, TransactionAction, TransactionChecker};

/// Kind-specific options of a send.
#[derive(Clone)]
pub enum SendOptions {
    /// No extra options.
    Normal,

    /// Ordering group shared by messages that must be delivered in order.
    Ordered {
        /// The ordering group.
        group: String,
    },

    /// Delay before the message becomes deliverable.
    Delayed {
        /// Delay in seconds; must be positive.
        delay_secs: i64,
    },

    /// Local transaction bound to the half message.
    Transactional {
        /// Local work deciding commit or rollback.
        action: Arc<dyn TransactionAction>,
        /// Resolver for broker rechecks.
        checker: BoxedChecker,
    },
}

impl SendOptions {
    /// The message kind these options belong to.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Normal => MessageKind::Normal,
            Self::Ordered { .. } => MessageKind::Ordered,
            Self::Delayed { .. } => MessageKind::Delayed,
            Self::Transactional { .. } => MessageKind::Transactional,
        }
    }
}

impl fmt::Debug for SendOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("Normal"),
            Self::Ordered { group } => f.debug_struct("Ordered").field("group", group).finish(),
            Self::Delayed { delay_secs } => f
                .debug_struct("Delayed")
                .field("delay_secs", delay_secs)
                .finish(),
            Self::Transactional { .. } => f.write_str("Transactional"),
        }
    }
}

/// Per-call parameters of a producer method.
#[derive(Clone, Debug)]
pub struct ProducerParam<T> {
    business_id: Option<String>,
    body: T,
    options: SendOptions,
}

impl<T> ProducerParam<T> {
    /// Parameters of a normal send.
    pub const fn normal(body: T) -> Self {
        Self {
            business_id: None,
            body,
            options: SendOptions::Normal,
        }
    }

    /// Parameters of an ordered send within `group`.
    pub fn ordered(body: T, group: impl Into<String>) -> Self {
        Self {
            business_id: None,
            body,
            options: SendOptions::Ordered {
                group: group.into(),
            },
        }
    }

    /// Parameters of a send delivered after `delay_secs` seconds.
    pub const fn delayed(body: T, delay_secs: i64) -> Self {
        Self {
            business_id: None,
            body,
            options: SendOptions::Delayed { delay_secs },
        }
    }

    /// Parameters of a transactional send.
    pub fn transactional<A, C>(body: T, action: A, checker: C) -> Self
    where
        A: TransactionAction,
        C: TransactionChecker,
    {
        Self {
            business_id: None,
            body,
            options: SendOptions::Transactional {
                action: Arc::new(action),
                checker: BoxedChecker::new(checker),
            },
        }
    }

    /// Sets the business identifier, sent as the message key.
    #[must_use]
    pub fn with_business_id(mut self, business_id: impl Into<String>) -> Self {
        self.business_id = Some(business_id.into());
        self
    }

    /// Business identifier.
    pub fn business_id(&self) -> Option<&str> {
        self.business_id.as_deref()
    }

    /// Message body.
    pub const fn body(&self) -> &T {
        &self.body
    }

    /// Kind-specific options.
    pub const fn options(&self) -> &SendOptions {
        &self.options
    }

    pub(crate) fn into_parts(self) -> (Option<String>, T, SendOptions) {
        (self.business_id, self.body, self.options)
    }
}

/// A send with its body already encoded, as handed to a strategy.
#[derive(Clone)]
pub struct SendRequest {
    /// Target topic.
    pub topic: String,
    /// Tag, if any.
    pub tag: Option<String>,
    /// Whether the send completes on a background task.
    pub is_async: bool,
    /// Business identifier, sent as the message key.
    pub business_id: Option<String>,
    /// Encoded body.
    pub body: Bytes,
    /// Kind-specific options.
    pub options: SendOptions,
    /// Receiver of the outcome.
    pub callback: Option<Arc<dyn SendCallback>>,
}

impl SendRequest {
    /// Creates a synchronous, untagged request.
    pub fn new(topic: impl Into<String>, body: impl Into<Bytes>, options: SendOptions) -> Self {
        Self {
            topic: topic.into(),
            tag: None,
            is_async: false,
            business_id: None,
            body: body.into(),
            options,
            callback: None,
        }
    }
}

impl fmt::Debug for SendRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendRequest")
            .field("topic", &self.topic)
            .field("tag", &self.tag)
            .field("is_async", &self.is_async)
            .field("business_id", &self.business_id)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
