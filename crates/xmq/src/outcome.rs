use std::fmt;

use crate::client::SendReceipt;
use crate::envelope::{Envelope, ReceivedMessage};

/// The result of a send, handed to the response callback.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendOutcome {
    success: bool,
    message_id: Option<String>,
    ext_info: Option<String>,
}

impl SendOutcome {
    /// Creates an outcome.
    #[must_use]
    pub const fn new(success: bool, message_id: Option<String>, ext_info: Option<String>) -> Self {
        Self {
            success,
            message_id,
            ext_info,
        }
    }

    /// Builds the outcome of a delivery; successful only if the broker
    /// returned a message identifier.
    #[must_use]
    pub fn from_receipt(receipt: Option<&SendReceipt>, envelope: &Envelope) -> Self {
        let message_id = receipt.and_then(|r| r.message_id.clone());
        Self {
            success: message_id.is_some(),
            message_id,
            ext_info: Some(envelope.summary()),
        }
    }

    /// Builds the outcome of a broker recheck.
    #[must_use]
    pub fn from_recheck(committed: bool, message: &ReceivedMessage) -> Self {
        Self {
            success: committed,
            message_id: message.message_id.clone(),
            ext_info: Some(message.summary()),
        }
    }

    /// Returns a copy marked as failed, keeping identifier and summary.
    #[must_use]
    pub fn into_failed(self) -> Self {
        Self {
            success: false,
            ..self
        }
    }

    /// Whether the message was accepted and, for transactions, committed.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.success
    }

    /// Broker-assigned message identifier.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// Human-readable summary of the sent message.
    #[must_use]
    pub fn ext_info(&self) -> Option<&str> {
        self.ext_info.as_deref()
    }
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SendOutcome{{success={}, messageId={:?}, extInfo={:?}}}",
            self.success, self.message_id, self.ext_info
        )
    }
}

/// The acknowledgement decision returned to the broker for a delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConsumeOutcome {
    /// The message was handled and must not be redelivered.
    Success,

    /// The message failed and is subject to the broker's redelivery policy.
    Failure,
}
