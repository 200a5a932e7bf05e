use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::error::{Error, Result};

/// An outbound message before broker-specific encoding.
///
/// At most one of the ordering key and the delivery deadline is set; the
/// setters for either clear the other.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    topic: String,
    body: Bytes,
    tag: Option<String>,
    keys: Vec<String>,
    ordering_key: Option<String>,
    deliver_at: Option<SystemTime>,
    properties: HashMap<String, String>,
}

impl Envelope {
    /// Creates an envelope for the given topic.
    ///
    /// # Errors
    /// Returns a validation error if the topic is blank.
    pub fn new(topic: impl Into<String>, body: impl Into<Bytes>) -> Result<Self> {
        let topic = topic.into();
        if topic.trim().is_empty() {
            return Err(Error::Validation("envelope topic must not be empty".into()));
        }

        Ok(Self {
            topic,
            body: body.into(),
            tag: None,
            keys: Vec::new(),
            ordering_key: None,
            deliver_at: None,
            properties: HashMap::new(),
        })
    }

    /// Sets the tag. Blank tags are ignored.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        self.tag = (!tag.trim().is_empty()).then_some(tag);
        self
    }

    /// Adds a message key. Blank keys are ignored.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !key.trim().is_empty() {
            self.keys.push(key);
        }
        self
    }

    /// Sets the ordering key and clears any delivery deadline.
    #[must_use]
    pub fn with_ordering_key(mut self, key: impl Into<String>) -> Self {
        self.ordering_key = Some(key.into());
        self.deliver_at = None;
        self
    }

    /// Sets the delivery deadline and clears any ordering key.
    #[must_use]
    pub fn with_deliver_at(mut self, at: SystemTime) -> Self {
        self.deliver_at = Some(at);
        self.ordering_key = None;
        self
    }

    /// Adds a user property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Returns the topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the body.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the tag.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Returns the message keys.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Returns the ordering key.
    #[must_use]
    pub fn ordering_key(&self) -> Option<&str> {
        self.ordering_key.as_deref()
    }

    /// Returns the delivery deadline.
    #[must_use]
    pub const fn deliver_at(&self) -> Option<SystemTime> {
        self.deliver_at
    }

    /// Returns the user properties.
    #[must_use]
    pub const fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    /// Human-readable summary used as outcome extension info.
    #[must_use]
    pub fn summary(&self) -> String {
        summarize(
            &self.topic,
            self.tag(),
            &self.keys,
            self.ordering_key(),
            self.deliver_at,
        )
    }
}

/// A message as delivered by the broker to consumers and rechecks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Broker-assigned identifier.
    pub message_id: Option<String>,
    /// Topic the message was published to.
    pub topic: String,
    /// Body, absent for malformed deliveries.
    pub body: Option<Bytes>,
    /// Tag.
    pub tag: Option<String>,
    /// Message keys.
    pub keys: Vec<String>,
    /// Ordering key.
    pub ordering_key: Option<String>,
    /// Delivery deadline.
    pub deliver_at: Option<SystemTime>,
    /// User properties.
    pub properties: HashMap<String, String>,
    /// Delivery attempt, starting at 1.
    pub delivery_attempt: u32,
}

impl ReceivedMessage {
    /// Builds the view a broker hands out for a stored envelope.
    #[must_use]
    pub fn from_envelope(message_id: impl Into<String>, envelope: &Envelope) -> Self {
        Self {
            message_id: Some(message_id.into()),
            topic: envelope.topic.clone(),
            body: Some(envelope.body.clone()),
            tag: envelope.tag.clone(),
            keys: envelope.keys.clone(),
            ordering_key: envelope.ordering_key.clone(),
            deliver_at: envelope.deliver_at,
            properties: envelope.properties.clone(),
            delivery_attempt: 1,
        }
    }

    /// Human-readable summary used as outcome extension info.
    #[must_use]
    pub fn summary(&self) -> String {
        summarize(
            &self.topic,
            self.tag.as_deref(),
            &self.keys,
            self.ordering_key.as_deref(),
            self.deliver_at,
        )
    }
}

fn summarize(
    topic: &str,
    tag: Option<&str>,
    keys: &[String],
    ordering_key: Option<&str>,
    deliver_at: Option<SystemTime>,
) -> String {
    let mut fields = Vec::new();
    if !topic.is_empty() {
        fields.push(format!("topic={topic}"));
    }
    if let Some(tag) = tag {
        fields.push(format!("tag={tag}"));
    }
    if !keys.is_empty() {
        fields.push(format!("keys={keys:?}"));
    }
    if let Some(group) = ordering_key {
        fields.push(format!("messageGroup={group}"));
    }
    if let Some(at) = deliver_at {
        let millis = at.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis());
        fields.push(format!("deliveryTimestamp={millis}"));
    }

    format!("msgExt{{{}}}", fields.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_blank_topic_rejected() {
        assert!(Envelope::new("", "x").is_err());
        assert!(Envelope::new("   ", "x").is_err());
        assert!(Envelope::new("orders", "x").is_ok());
    }

    #[test]
    fn test_ordering_key_and_deadline_are_exclusive() {
        let at = UNIX_EPOCH + Duration::from_secs(10);

        let envelope = Envelope::new("orders", "x")
            .unwrap()
            .with_deliver_at(at)
            .with_ordering_key("g1");
        assert_eq!(envelope.ordering_key(), Some("g1"));
        assert_eq!(envelope.deliver_at(), None);

        let envelope = envelope.with_deliver_at(at);
        assert_eq!(envelope.ordering_key(), None);
        assert_eq!(envelope.deliver_at(), Some(at));
    }

    #[test]
    fn test_blank_tag_and_key_ignored() {
        let envelope = Envelope::new("orders", "x")
            .unwrap()
            .with_tag(" ")
            .with_key("");
        assert_eq!(envelope.tag(), None);
        assert!(envelope.keys().is_empty());
    }

    #[test]
    fn test_summary() {
        let envelope = Envelope::new("orders", "x")
            .unwrap()
            .with_tag("created")
            .with_key("biz-1")
            .with_ordering_key("g1");
        assert_eq!(
            envelope.summary(),
            "msgExt{topic=orders,tag=created,keys=[\"biz-1\"],messageGroup=g1}"
        );

        let delayed = Envelope::new("orders", "x")
            .unwrap()
            .with_deliver_at(UNIX_EPOCH + Duration::from_millis(1500));
        assert_eq!(
            delayed.summary(),
            "msgExt{topic=orders,deliveryTimestamp=1500}"
        );
    }

    #[test]
    fn test_received_from_envelope() {
        let envelope = Envelope::new("orders", "body")
            .unwrap()
            .with_property("trace", "t-1");
        let received = ReceivedMessage::from_envelope("m-1", &envelope);
        assert_eq!(received.message_id.as_deref(), Some("m-1"));
        assert_eq!(received.body, Some(Bytes::from("body")));
        assert_eq!(received.properties.get("trace").map(String::as_str), Some("t-1"));
        assert_eq!(received.delivery_attempt, 1);
        assert_eq!(received.summary(), envelope.summary());
    }
}
