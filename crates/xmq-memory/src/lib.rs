//! In-process broker for the `proven-xmq` engine.
//!
//! Useful for tests and single-process deployments. Supports ordered,
//! delayed and transactional messages, tag filters, redelivery and dead
//! letters.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// The shared in-memory broker.
pub mod broker;

/// Connector handing out handles on a broker.
pub mod connector;

/// Push consumers.
pub mod consumer;

/// Producers and transactional sessions.
pub mod producer;

mod error;

pub use broker::{
    DEFAULT_REDELIVERY_BACKOFF, DeadLetter, MemoryBroker, PUBLISHED_HISTORY, TagFilter,
};
pub use connector::MemoryConnector;
pub use consumer::MemoryConsumer;
pub use error::Error;
pub use producer::{MemoryProducer, MemoryTransaction};
