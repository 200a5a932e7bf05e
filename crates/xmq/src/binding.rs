use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Registry key shared by every non-transactional send.
pub const PUBLIC_PRODUCER_KEY: &str = "producer.public";

/// Tag filter expression matching every message.
pub const DEFAULT_FILTER_EXPRESSION: &str = "*";

/// Kind of message a producer method sends, selecting its send strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain message.
    #[default]
    Normal,

    /// Message delivered in order with others sharing its ordering key.
    Ordered,

    /// Message delivered after a delay.
    Delayed,

    /// Half message committed or rolled back by a local transaction.
    Transactional,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "normal",
            Self::Ordered => "ordered",
            Self::Delayed => "delayed",
            Self::Transactional => "transactional",
        };
        f.write_str(name)
    }
}

/// Declaration of a producer method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProducerBinding {
    declaring_type: String,
    method: String,
    topic: String,
    kind: MessageKind,
    tag: Option<String>,
    async_send: bool,
}

impl ProducerBinding {
    /// Declares a normal, synchronous, untagged send to `topic`.
    pub fn new(
        declaring_type: impl Into<String>,
        method: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            method: method.into(),
            topic: topic.into(),
            kind: MessageKind::Normal,
            tag: None,
            async_send: false,
        }
    }

    /// Sets the message kind.
    #[must_use]
    pub const fn kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the tag expression.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Completes sends on a background task instead of the caller.
    #[must_use]
    pub const fn async_send(mut self, enabled: bool) -> Self {
        self.async_send = enabled;
        self
    }

    /// Declaring type name.
    #[must_use]
    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    /// Method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Target topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Message kind.
    #[must_use]
    pub const fn message_kind(&self) -> MessageKind {
        self.kind
    }

    /// Tag expression.
    #[must_use]
    pub fn message_tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Whether sends complete asynchronously.
    #[must_use]
    pub const fn is_async(&self) -> bool {
        self.async_send
    }

    /// Registry key of the producer handle serving this binding.
    ///
    /// Transactional methods get their own handle since each registers its
    /// own recheck entry point.
    #[must_use]
    pub fn producer_key(&self) -> String {
        match self.kind {
            MessageKind::Transactional => {
                format!("producer.tx.{}.{}", self.declaring_type, self.method)
            }
            _ => PUBLIC_PRODUCER_KEY.to_string(),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(Error::missing("topic", &self.declaring_type, &self.method));
        }
        Ok(())
    }
}

/// How a consumer filter expression is interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    /// `||` separated tags, or `*`.
    #[default]
    Tag,

    /// SQL92 predicate over message properties.
    Sql92,
}

/// A consumer subscription filter.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterExpression {
    /// The expression.
    pub expression: String,
    /// How the expression is interpreted.
    pub kind: FilterKind,
}

impl FilterExpression {
    /// Creates a filter; a blank expression falls back to the match-all tag filter.
    pub fn new(expression: impl Into<String>, kind: FilterKind) -> Self {
        let expression = expression.into();
        if expression.trim().is_empty() {
            return Self::default();
        }
        Self { expression, kind }
    }

    /// Creates a tag filter.
    pub fn tag(expression: impl Into<String>) -> Self {
        Self::new(expression, FilterKind::Tag)
    }

    /// Creates a SQL92 filter.
    pub fn sql92(expression: impl Into<String>) -> Self {
        Self::new(expression, FilterKind::Sql92)
    }

    /// Whether the filter matches every message.
    #[must_use]
    pub fn is_match_all(&self) -> bool {
        self.kind == FilterKind::Tag && self.expression.trim() == DEFAULT_FILTER_EXPRESSION
    }
}

impl Default for FilterExpression {
    fn default() -> Self {
        Self {
            expression: DEFAULT_FILTER_EXPRESSION.to_string(),
            kind: FilterKind::Tag,
        }
    }
}

/// Declaration of a consumer method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerBinding {
    declaring_type: String,
    method: String,
    topic: String,
    consumer_group: String,
    filter: FilterExpression,
}

impl ConsumerBinding {
    /// Declares a consumer of `topic` in `consumer_group` with the match-all filter.
    pub fn new(
        declaring_type: impl Into<String>,
        method: impl Into<String>,
        topic: impl Into<String>,
        consumer_group: impl Into<String>,
    ) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            method: method.into(),
            topic: topic.into(),
            consumer_group: consumer_group.into(),
            filter: FilterExpression::default(),
        }
    }

    /// Sets the subscription filter.
    #[must_use]
    pub fn filter(mut self, filter: FilterExpression) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the consumer group.
    #[must_use]
    pub fn group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = consumer_group.into();
        self
    }

    /// Declaring type name.
    #[must_use]
    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    /// Method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Subscribed topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Consumer group.
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    /// Subscription filter.
    #[must_use]
    pub const fn filter_expression(&self) -> &FilterExpression {
        &self.filter
    }

    /// Registry key of the consumer handle serving this binding.
    #[must_use]
    pub fn consumer_key(&self) -> String {
        [
            self.consumer_group.as_str(),
            self.declaring_type.as_str(),
            self.method.as_str(),
        ]
        .join(".")
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(Error::Validation(
                "the consumer 'topic' is empty".to_string(),
            ));
        }
        if self.consumer_group.trim().is_empty() {
            return Err(Error::Validation(
                "the consumer 'consumer_group' is empty".to_string(),
            ));
        }
        Ok(())
    }
}
