//! Abstract external store protocol
//!
//! The four operations the scanner needs, independent of the wire protocol.
//! [`crate::RedisConnection`] speaks RESP to a server;
//! [`crate::InMemoryStore`] serves the same operations from memory.

use extscore_core::SourceConfig;

use crate::error::StoreResult;

/// One open connection to the external store
pub trait ExternalStore: Send {
    /// Authenticate the connection
    fn auth(&mut self, password: &str) -> StoreResult<()>;

    /// Members of the sorted set `key` ranked `start..=end`, with scores
    fn range_with_scores(&mut self, key: &str, start: i64, end: i64)
        -> StoreResult<Vec<(String, f64)>>;

    /// One step of a cursor scan over the key space.
    ///
    /// Start with cursor `"0"`; the scan is complete when the returned cursor
    /// is `"0"` again.
    fn scan(&mut self, cursor: &str, count: usize) -> StoreResult<(String, Vec<String>)>;

    /// String value of `key`, or `None` if absent
    fn get(&mut self, key: &str) -> StoreResult<Option<String>>;
}

/// Opens connections for a configuration
pub trait StoreConnector: Send + Sync {
    /// Connect to the store described by `config`. Authentication is left
    /// to the caller.
    fn connect(&self, config: &SourceConfig) -> StoreResult<Box<dyn ExternalStore>>;
}

/// Cursor value that starts and ends a key-space scan
pub const SCAN_CURSOR_START: &str = "0";
