//! Broker connection properties
//!
//! Defaults match the broker client's recommended settings. Properties can be
//! deserialized from any serde source or read from `XMQ_*` environment
//! variables.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::binding::{ConsumerBinding, ProducerBinding};
use crate::client::{ClientOptions, ConsumerOptions, ProducerOptions};
use crate::error::{Error, Result};

/// Connection and per-side settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Properties {
    /// Broker endpoints, `;` separated.
    pub endpoints: String,

    /// Access key.
    pub access_key: Option<String>,

    /// Secret key.
    pub secret_key: Option<String>,

    /// Whether to use TLS.
    pub ssl_enabled: bool,

    /// Producer settings.
    pub producer: ProducerProperties,

    /// Consumer settings.
    pub consumer: ConsumerProperties,
}

/// Producer settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerProperties {
    /// Send request timeout in milliseconds.
    pub send_timeout_ms: u64,

    /// Send attempts, including the first.
    pub retry_attempts: u32,

    /// Largest accepted body, in bytes.
    pub max_message_size: usize,

    /// Interval between transaction rechecks in milliseconds.
    pub transaction_check_interval_ms: u64,
}

impl Default for ProducerProperties {
    fn default() -> Self {
        Self {
            send_timeout_ms: 5_000,
            retry_attempts: 3,
            max_message_size: 4 * 1024 * 1024,
            transaction_check_interval_ms: 60_000,
        }
    }
}

/// Consumer settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerProperties {
    /// Fallback consumer group for bindings that declare none.
    pub consumer_group: Option<String>,

    /// Consume request timeout in milliseconds.
    pub consume_timeout_ms: u64,

    /// Delivery attempts before a message is dead-lettered.
    pub retry_attempts: u32,

    /// Concurrent consume workers.
    pub thread_count: usize,

    /// Locally cached message count limit.
    pub max_cached_messages: usize,

    /// Locally cached message size limit, in bytes.
    pub max_cached_bytes: usize,
}

impl Default for ConsumerProperties {
    fn default() -> Self {
        Self {
            consumer_group: None,
            consume_timeout_ms: 5_000,
            retry_attempts: 16,
            thread_count: 20,
            max_cached_messages: 1024,
            max_cached_bytes: 64 * 1024 * 1024,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Properties {
    /// Creates properties for the given endpoints with default settings.
    pub fn new(endpoints: impl Into<String>) -> Self {
        Self {
            endpoints: endpoints.into(),
            ..Self::default()
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    /// Returns an error if the endpoints are empty or a limit is zero.
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.trim().is_empty() {
            return Err(Error::Config("the 'endpoints' are empty".to_string()));
        }

        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(Error::Config(
                "'access_key' and 'secret_key' must be set together".to_string(),
            ));
        }

        if self.producer.retry_attempts == 0 || self.consumer.retry_attempts == 0 {
            return Err(Error::Config("retry attempts must be at least 1".to_string()));
        }

        if self.consumer.thread_count == 0 {
            return Err(Error::Config(
                "consumer 'thread_count' must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Create configuration from environment variables
    ///
    /// # Environment Variables
    /// - `XMQ_ENDPOINTS`: broker endpoints
    /// - `XMQ_ACCESS_KEY` / `XMQ_SECRET_KEY`: credentials (optional)
    /// - `XMQ_SSL_ENABLED`: `true` to enable TLS
    /// - `XMQ_PRODUCER_SEND_TIMEOUT_MS`, `XMQ_PRODUCER_RETRY_ATTEMPTS`,
    ///   `XMQ_PRODUCER_MAX_MESSAGE_SIZE`, `XMQ_PRODUCER_TX_CHECK_INTERVAL_MS`
    /// - `XMQ_CONSUMER_GROUP`, `XMQ_CONSUMER_TIMEOUT_MS`,
    ///   `XMQ_CONSUMER_RETRY_ATTEMPTS`, `XMQ_CONSUMER_THREADS`,
    ///   `XMQ_CONSUMER_MAX_CACHED_MESSAGES`, `XMQ_CONSUMER_MAX_CACHED_BYTES`
    ///
    /// # Errors
    /// Returns an error if the resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        let producer = ProducerProperties::default();
        let consumer = ConsumerProperties::default();

        let config = Self {
            endpoints: std::env::var("XMQ_ENDPOINTS").unwrap_or_default(),
            access_key: std::env::var("XMQ_ACCESS_KEY").ok(),
            secret_key: std::env::var("XMQ_SECRET_KEY").ok(),
            ssl_enabled: env_or("XMQ_SSL_ENABLED", false),
            producer: ProducerProperties {
                send_timeout_ms: env_or("XMQ_PRODUCER_SEND_TIMEOUT_MS", producer.send_timeout_ms),
                retry_attempts: env_or("XMQ_PRODUCER_RETRY_ATTEMPTS", producer.retry_attempts),
                max_message_size: env_or(
                    "XMQ_PRODUCER_MAX_MESSAGE_SIZE",
                    producer.max_message_size,
                ),
                transaction_check_interval_ms: env_or(
                    "XMQ_PRODUCER_TX_CHECK_INTERVAL_MS",
                    producer.transaction_check_interval_ms,
                ),
            },
            consumer: ConsumerProperties {
                consumer_group: std::env::var("XMQ_CONSUMER_GROUP").ok(),
                consume_timeout_ms: env_or("XMQ_CONSUMER_TIMEOUT_MS", consumer.consume_timeout_ms),
                retry_attempts: env_or("XMQ_CONSUMER_RETRY_ATTEMPTS", consumer.retry_attempts),
                thread_count: env_or("XMQ_CONSUMER_THREADS", consumer.thread_count),
                max_cached_messages: env_or(
                    "XMQ_CONSUMER_MAX_CACHED_MESSAGES",
                    consumer.max_cached_messages,
                ),
                max_cached_bytes: env_or(
                    "XMQ_CONSUMER_MAX_CACHED_BYTES",
                    consumer.max_cached_bytes,
                ),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn client_options(&self, request_timeout_ms: u64) -> ClientOptions {
        ClientOptions {
            endpoints: self.endpoints.clone(),
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            ssl_enabled: self.ssl_enabled,
            request_timeout: Duration::from_millis(request_timeout_ms),
        }
    }

    /// Options for the producer handle serving `binding`.
    #[must_use]
    pub fn producer_options(&self, binding: &ProducerBinding) -> ProducerOptions {
        ProducerOptions {
            client: self.client_options(self.producer.send_timeout_ms),
            topics: vec![binding.topic().to_string()],
            max_attempts: self.producer.retry_attempts,
            max_message_size: self.producer.max_message_size,
            transaction_check_interval: Duration::from_millis(
                self.producer.transaction_check_interval_ms,
            ),
        }
    }

    /// Options for the consumer handle serving `binding`.
    #[must_use]
    pub fn consumer_options(&self, binding: &ConsumerBinding) -> ConsumerOptions {
        let mut subscriptions = HashMap::new();
        subscriptions.insert(
            binding.topic().to_string(),
            binding.filter_expression().clone(),
        );

        ConsumerOptions {
            client: self.client_options(self.consumer.consume_timeout_ms),
            consumer_group: binding.consumer_group().to_string(),
            subscriptions,
            max_attempts: self.consumer.retry_attempts,
            thread_count: self.consumer.thread_count,
            max_cached_messages: self.consumer.max_cached_messages,
            max_cached_bytes: self.consumer.max_cached_bytes,
        }
    }
}
