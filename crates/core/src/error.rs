//! Error types for extscore
//!
//! This module defines the error taxonomy shared by every layer:
//! - `Configuration`: invalid or missing option, fatal at schema load
//! - `Resolution`: the snapshot's term or postings data could not be read,
//!   fatal for the build in progress
//! - `ExternalStore`: connection, auth or protocol failure, contained by the
//!   scanner and never surfaced to the query path
//! - `MalformedEntry`: one unusable store entry, skipped
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//! The type is `Clone` so the outcome of one build can be handed to every
//! caller that joined it.

use thiserror::Error;

/// Result type alias for extscore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for extscore
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Invalid or missing configuration option
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Failure reading the snapshot's term dictionary or postings
    #[error("Resolution error on field '{field}': {message}")]
    Resolution {
        /// Field whose terms were being read
        field: String,
        /// Underlying failure
        message: String,
    },

    /// Connection, authentication or protocol failure against the external store
    #[error("External store error: {0}")]
    ExternalStore(String),

    /// Unparseable value or malformed key in the external store
    #[error("Malformed entry: {0}")]
    MalformedEntry(String),

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    /// Create a resolution error for `field`
    pub fn resolution(field: impl Into<String>, message: impl ToString) -> Self {
        Error::Resolution {
            field: field.into(),
            message: message.to_string(),
        }
    }

    /// Prefix a configuration failure with what was being configured.
    ///
    /// A `Configuration` error keeps a single `Configuration error:` prefix;
    /// any other error is wrapped into one.
    pub fn with_context(self, context: impl std::fmt::Display) -> Self {
        match self {
            Error::Configuration(message) => {
                Error::Configuration(format!("{}: {}", context, message))
            }
            other => Error::Configuration(format!("{}: {}", context, other)),
        }
    }

    /// Create a malformed-entry error
    pub fn malformed(message: impl Into<String>) -> Self {
        Error::MalformedEntry(message.into())
    }

    /// Whether this error must abort the build that observed it.
    ///
    /// Store and entry errors degrade to default values instead.
    pub fn is_fatal_for_build(&self) -> bool {
        matches!(
            self,
            Error::Resolution { .. } | Error::InvalidOperation(_) | Error::Configuration(_)
        )
    }
}
