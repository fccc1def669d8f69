//! Core types and traits for extscore
//!
//! This crate defines the foundational types used throughout the system:
//! - SourceConfig: immutable identity of one external value source
//! - LayoutKind: sorted-set, hash or prefixed-key store layouts
//! - TermEncoding: readable-to-indexed key conversion
//! - ValueArray: dense per-document float values
//! - SnapshotId / DocId / LeafContext: index addressing
//! - Error: Error type hierarchy
//! - Traits: index collaborator surface (IndexSnapshot, TermDictionary)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod encoding;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{FieldTypes, LayoutKind, SourceConfig, SourceOptions};
pub use encoding::TermEncoding;
pub use error::{Error, Result};
pub use traits::{CloseListener, IndexSnapshot, SnapshotProvider, TermDictionary};
pub use types::{DocId, LeafContext, SnapshotId, ValueArray};
