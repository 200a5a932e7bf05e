use thiserror::Error;

/// Boxed error used for user and broker supplied failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for engine operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A required declaration or parameter field is empty.
    #[error("'{field}' is empty when invoking '{declaring_type}.{method}()'")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
        /// Declaring type of the bound method.
        declaring_type: String,
        /// Bound method name.
        method: String,
    },

    /// A parameter failed validation before any broker interaction.
    #[error("validation error: {0}")]
    Validation(String),

    /// A broker handle or session could not be created.
    #[error("failed to create broker instance '{name}': {source}")]
    Construction {
        /// Registry key of the instance.
        name: String,
        /// Underlying failure.
        #[source]
        source: BoxError,
    },

    /// The broker rejected a send.
    #[error("failed to send message: {0}")]
    Send(#[source] BoxError),

    /// The broker returned neither an error nor a message identifier.
    #[error("empty identifier on send")]
    EmptyMessageId,

    /// A transactional session could not be opened.
    #[error("begin transaction message error: {0}")]
    BeginTransaction(#[source] BoxError),

    /// The half message could not be sent.
    #[error("send transaction message error: {0}")]
    HalfSend(#[source] BoxError),

    /// The local transaction action raised.
    #[error("execute local transaction action error: {0}")]
    LocalAction(#[source] BoxError),

    /// The local transaction action reported failure.
    #[error("local transaction action failed and the transaction message was rolled back")]
    LocalRollback,

    /// Committing the transaction failed.
    #[error("commit transaction message error: {0}")]
    Commit(#[source] BoxError),

    /// Rolling back the transaction failed.
    #[error("rollback transaction message error: {0}")]
    Rollback(#[source] BoxError),

    /// A broker recheck resolved the transaction as not committed.
    #[error("the result of the local transaction check is not committed")]
    RecheckRollback,

    /// Body encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The message body is not valid UTF-8 text.
    #[error("message body is not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// A consume handler raised.
    #[error("handler error: {0}")]
    Handler(#[source] BoxError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn missing(
        field: &'static str,
        declaring_type: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self::MissingField {
            field,
            declaring_type: declaring_type.into(),
            method: method.into(),
        }
    }

    /// Returns true for errors raised before any broker interaction.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::MissingField { .. } | Self::Validation(_))
    }
}
