use std::fmt::Debug;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::envelope::ReceivedMessage;
use crate::error::{Error, Result};

/// Structured body serializer passed into the dispatchers.
pub trait Codec
where
    Self: Debug + Send + Sync + 'static,
{
    /// Encodes a structured value into a message body.
    ///
    /// # Errors
    /// Returns an error if the value cannot be encoded.
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;

    /// Decodes a message body into a structured value.
    ///
    /// # Errors
    /// Returns an error if the body is malformed.
    fn decode(&self, body: &[u8]) -> Result<Value>;
}

/// JSON body codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, body: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Encodes any serializable value through the codec.
pub(crate) fn encode_body<T>(codec: &dyn Codec, value: &T) -> Result<Bytes>
where
    T: Serialize + ?Sized,
{
    let value = serde_json::to_value(value)?;
    Ok(Bytes::from(codec.encode(&value)?))
}

/// Conversion of an inbound message into a handler parameter.
pub trait FromMessage
where
    Self: Sized + Send + 'static,
{
    /// Converts the message.
    ///
    /// # Errors
    /// Returns an error if the body is absent or cannot be decoded.
    fn from_message(message: &ReceivedMessage, codec: &dyn Codec) -> Result<Self>;
}

fn body_of(message: &ReceivedMessage) -> Result<&Bytes> {
    message
        .body
        .as_ref()
        .ok_or_else(|| Error::Validation("message does not contain any body".to_string()))
}

impl FromMessage for ReceivedMessage {
    fn from_message(message: &ReceivedMessage, _codec: &dyn Codec) -> Result<Self> {
        Ok(message.clone())
    }
}

impl FromMessage for Bytes {
    fn from_message(message: &ReceivedMessage, _codec: &dyn Codec) -> Result<Self> {
        body_of(message).cloned()
    }
}

impl FromMessage for String {
    fn from_message(message: &ReceivedMessage, _codec: &dyn Codec) -> Result<Self> {
        Ok(Self::from_utf8(body_of(message)?.to_vec())?)
    }
}

/// A handler parameter decoded from a structured body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    /// Unwraps the decoded value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> FromMessage for Json<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn from_message(message: &ReceivedMessage, codec: &dyn Codec) -> Result<Self> {
        let value = codec.decode(body_of(message)?)?;
        Ok(Self(serde_json::from_value(value)?))
    }
}
