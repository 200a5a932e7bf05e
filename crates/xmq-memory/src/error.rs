use proven_xmq::BrokerError;
use thiserror::Error;

/// Errors raised by the in-memory broker.
#[derive(Debug, Error)]
pub enum Error {
    /// The handle was closed.
    #[error("{0} is closed")]
    Closed(&'static str),

    /// No endpoints were configured.
    #[error("no broker endpoints configured")]
    NoEndpoints,

    /// The body exceeds the producer's size limit.
    #[error("message body of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge {
        /// Body size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// A send failure injected with [`crate::MemoryBroker::fail_next_sends`].
    #[error("injected send failure")]
    Injected,

    /// The half message is not attached to this transaction's producer.
    #[error("unknown transaction")]
    UnknownTransaction,

    /// The filter expression kind is not supported.
    #[error("unsupported filter expression: {0}")]
    UnsupportedFilter(String),
}

impl BrokerError for Error {}
