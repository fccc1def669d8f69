//! External store access for extscore
//!
//! This crate turns an external key/value store into a stream of
//! `(key, value)` pairs:
//! - protocol: the abstract AUTH / ZRANGE / SCAN / GET surface
//! - resp + redis: a blocking RESP2 client for Redis-compatible servers
//! - memory: an in-memory store with fault injection
//! - scanner: layout-aware paged iteration with graceful degradation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod memory;
pub mod protocol;
pub mod redis;
pub mod resp;
pub mod scanner;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use protocol::{ExternalStore, StoreConnector, SCAN_CURSOR_START};
pub use redis::{RedisConnection, RedisConnector};
pub use resp::RespValue;
pub use scanner::{split_prefixed, ExternalStoreScanner, ScanStream, ScanSummary};
