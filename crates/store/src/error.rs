//! Store-layer errors
//!
//! These never cross the scanner boundary: a scan logs them and truncates.
//! They convert into [`extscore_core::Error::ExternalStore`] for callers that
//! talk to the store directly.

use std::io;
use thiserror::Error;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised while talking to the external store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Socket failure, including timeouts
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Reply did not match the protocol or the expected shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Password rejected or missing
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The server answered with an error reply
    #[error("Server error: {0}")]
    Server(String),

    /// No connection could be established
    #[error("Store unreachable: {0}")]
    Unreachable(String),
}

impl StoreError {
    /// Whether the failure was a per-call timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            StoreError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// Whether the server rejected or demanded credentials
    pub fn is_auth(&self) -> bool {
        matches!(self, StoreError::Auth(_))
    }

    /// Whether the error only concerns the command that raised it.
    ///
    /// A server error reply leaves the connection usable; anything else
    /// means the connection can no longer be trusted.
    pub fn is_command_scoped(&self) -> bool {
        matches!(self, StoreError::Server(_))
    }
}

impl From<StoreError> for extscore_core::Error {
    fn from(e: StoreError) -> Self {
        extscore_core::Error::ExternalStore(e.to_string())
    }
}
