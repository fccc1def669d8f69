//! extscore - external per-document values for search scoring and sorting
//!
//! Resolves values held in an external key/value store (sorted sets or
//! prefixed string keys) onto the documents of an index snapshot, caches
//! the resulting dense arrays per snapshot, and re-warms them when the
//! index opens a new snapshot.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use extscore::{ExtScore, MemoryIndex, RefreshMode, Schema};
//!
//! let schema = Arc::new(Schema::from_file("schema.toml".as_ref())?);
//! let scores = ExtScore::redis(Arc::clone(&schema), RefreshMode::Inline)?;
//!
//! let index = MemoryIndex::new(Arc::clone(&schema));
//! index.add(&[("id", "sku-1")]);
//! let snapshot = index.commit()?;
//! scores.on_new_snapshot(&(snapshot.clone() as _), None)?;
//!
//! let popularity = scores.source("popularity").unwrap();
//! let values = popularity.top_level(&(snapshot as _))?;
//! println!("{}", values.float_val(0));
//! ```
//!
//! # Architecture
//!
//! - `extscore-core`: configuration, encodings, errors, snapshot traits
//! - `extscore-store`: store protocol, Redis client, in-memory store, scanner
//! - `extscore-engine`: resolver, builder, cache, refresh coordinator, schema
//!
//! [`ExtScore`] wires one shared cache and one coordinator to a schema.

mod context;

pub use crate::context::ExtScore;

pub use extscore_core::{
    CloseListener, DocId, Error, FieldTypes, IndexSnapshot, LayoutKind, LeafContext, Result,
    SnapshotId, SnapshotProvider, SourceConfig, SourceOptions, TermDictionary, TermEncoding,
    ValueArray,
};
pub use extscore_engine::{
    BuildStats, CacheStats, DenseValueBuilder, ExternalField, ExternalValueSource, FloatValues,
    FunctionTemplate, KeyResolver, MemoryIndex, MemorySnapshot, RefreshCoordinator, RefreshMode,
    RefreshReport, Schema, SnapshotValueCache, ValueLoader,
};
pub use extscore_store::{
    ExternalStore, ExternalStoreScanner, InMemoryStore, RedisConnector, ScanSummary,
    StoreConnector, StoreError,
};
