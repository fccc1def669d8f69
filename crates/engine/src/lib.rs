//! Value resolution and caching engine for extscore
//!
//! This crate orchestrates the lower layers:
//! - Schema: field encodings and external field declarations (TOML)
//! - KeyResolver: external key to document ids through a snapshot
//! - DenseValueBuilder: one scan plus resolution into a dense array
//! - SnapshotValueCache: single-flight, snapshot-scoped value cache
//! - RefreshCoordinator: eager re-warming on snapshot change, admin reset
//! - ExternalValueSource: per-segment float readers for scoring and sort
//! - MemoryIndex: in-memory segmented index implementing the snapshot surface
//!
//! The engine is the only component that knows about both the index side
//! (snapshots, term dictionaries) and the store side (scanner, connectors).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod background;
pub mod builder;
pub mod cache;
pub mod coordinator;
pub mod function;
pub mod index;
pub mod resolver;
pub mod schema;
pub mod source;

pub use background::{BackgroundScheduler, RefreshKey, SchedulerStats};
pub use builder::{BuildStats, DenseValueBuilder, ValueLoader};
pub use cache::{CacheStats, SnapshotValueCache};
pub use coordinator::{RefreshCoordinator, RefreshMode, RefreshReport};
pub use function::FunctionTemplate;
pub use index::{Document, MemoryIndex, MemorySnapshot};
pub use resolver::KeyResolver;
pub use schema::{ExternalField, Schema};
pub use source::{ExternalValueSource, FloatValues};
