//! Error types for EngageDb.

use std::io;
use thiserror::Error;

/// The result type used throughout EngageDb.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for EngageDb operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Data corruption was detected.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// The requested entity was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation is not legal in the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The store did not answer within the configured bound.
    ///
    /// The outcome of the operation is unknown to the caller: scripts apply
    /// atomically, so it either fully applied or not at all.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The counter store cannot be reached.
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),

    /// A script failed and all of its writes were discarded.
    #[error("Script error: {0}")]
    Script(String),

    /// A command was applied to a key holding the wrong kind of value.
    #[error("WRONGTYPE operation against key '{0}' holding the wrong kind of value")]
    WrongType(String),

    /// A hash field or argument was expected to hold an integer.
    #[error("value is not an integer: {0}")]
    NotInteger(String),

    /// The system of record rejected or failed an operation.
    #[error("Repository error: {0}")]
    Repository(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Creates a new script error.
    pub fn script(msg: impl Into<String>) -> Self {
        Error::Script(msg.into())
    }

    /// Creates a new repository error.
    pub fn repository(msg: impl Into<String>) -> Self {
        Error::Repository(msg.into())
    }

    /// Creates a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Returns true if the error came from the counter store rather than the
    /// system of record.
    ///
    /// Cache failures are logged and swallowed by the controller; repository
    /// failures abort the business operation.
    pub fn is_cache_failure(&self) -> bool {
        !matches!(
            self,
            Error::Repository(_)
                | Error::NotFound(_)
                | Error::InvalidArgument(_)
                | Error::InvalidState(_)
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<mlua::Error> for Error {
    fn from(err: mlua::Error) -> Self {
        Error::Script(err.to_string())
    }
}
