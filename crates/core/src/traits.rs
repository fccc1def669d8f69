//! Collaborator traits for the search index
//!
//! The value cache does not own or build index snapshots. It only needs to
//! know a snapshot's identity and size, look up exact terms in one field, and
//! be told when the snapshot is closed. These traits describe that surface so
//! any index implementation can sit underneath.

use std::sync::Arc;

use crate::error::Result;
use crate::types::{DocId, LeafContext, SnapshotId};

/// Callback fired once when a snapshot is closed
pub type CloseListener = Box<dyn FnOnce(SnapshotId) + Send + 'static>;

/// Exact-match term lookup and postings enumeration for one field
pub trait TermDictionary {
    /// Position on `term`. Returns `false` if the term is absent.
    ///
    /// # Errors
    ///
    /// Returns `Resolution` if the dictionary cannot be read.
    fn seek_exact(&mut self, term: &[u8]) -> Result<bool>;

    /// Append the documents containing the current term to `out`
    ///
    /// Only valid after a `seek_exact` that returned `true`.
    ///
    /// # Errors
    ///
    /// Returns `Resolution` if the postings cannot be read.
    fn postings(&mut self, out: &mut Vec<DocId>) -> Result<()>;
}

/// An immutable, point-in-time view of the index
///
/// Thread safety: snapshots are shared between query threads and the refresh
/// path (requires Send + Sync).
pub trait IndexSnapshot: Send + Sync {
    /// Process-unique identity
    fn id(&self) -> SnapshotId;

    /// Number of document slots; valid ids are `0..max_doc()`
    fn max_doc(&self) -> u32;

    /// Segments in document order
    fn leaves(&self) -> Vec<LeafContext>;

    /// Term dictionary of `field`, or `None` if nothing is indexed for it
    ///
    /// # Errors
    ///
    /// Returns `Resolution` if the field's terms cannot be opened.
    fn terms(&self, field: &str) -> Result<Option<Box<dyn TermDictionary + '_>>>;

    /// Register a callback to run when the snapshot is closed.
    ///
    /// Returns `false` if the implementation does not report closes; callers
    /// then fall back to detecting dead snapshots through weak handles.
    fn add_close_listener(&self, _listener: CloseListener) -> bool {
        false
    }
}

/// Source of fresh snapshots for administrative reloads
pub trait SnapshotProvider: Send + Sync {
    /// Commit pending changes and open a new snapshot
    ///
    /// # Errors
    ///
    /// Returns an error if the commit or reopen fails.
    fn commit_and_reopen(&self) -> Result<Arc<dyn IndexSnapshot>>;
}
