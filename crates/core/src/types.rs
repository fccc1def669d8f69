//! Core value types: document ids, snapshot identity, dense value arrays

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Dense, snapshot-local document identifier
pub type DocId = u32;

static NEXT_SNAPSHOT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one index snapshot.
///
/// Ids are never reused within a process, so a cache keyed by `SnapshotId`
/// cannot confuse a closed snapshot with a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotId(u64);

impl SnapshotId {
    /// Allocate the next unused id
    pub fn next() -> Self {
        SnapshotId(NEXT_SNAPSHOT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw id supplied by a snapshot implementation
    pub const fn from_raw(raw: u64) -> Self {
        SnapshotId(raw)
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snapshot#{}", self.0)
    }
}

/// One segment of a snapshot, as seen by per-segment scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafContext {
    /// Position of the segment within the snapshot
    pub ord: usize,
    /// Top-level id of the segment's first document
    pub doc_base: DocId,
    /// Number of documents in the segment
    pub max_doc: u32,
}

/// Dense float values, one slot per document of a snapshot.
///
/// Immutable once built. Cloning shares the underlying allocation, and a
/// refresh publishes a new array instead of writing into this one, so a
/// reader holding a `ValueArray` never observes a partial update.
#[derive(Clone, PartialEq)]
pub struct ValueArray(Arc<[f32]>);

impl ValueArray {
    /// Array of `len` slots, all set to `value`
    pub fn filled(len: usize, value: f32) -> Self {
        ValueArray(vec![value; len].into())
    }

    /// Value for `doc`, or `None` if out of range
    pub fn get(&self, doc: DocId) -> Option<f32> {
        self.0.get(doc as usize).copied()
    }

    /// Whether both handles share the same allocation
    pub fn ptr_eq(a: &ValueArray, b: &ValueArray) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Underlying slice
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

impl From<Vec<f32>> for ValueArray {
    fn from(values: Vec<f32>) -> Self {
        ValueArray(values.into())
    }
}

impl Deref for ValueArray {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.0
    }
}

impl fmt::Debug for ValueArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PREVIEW: usize = 8;
        let shown = &self.0[..self.0.len().min(PREVIEW)];
        f.debug_struct("ValueArray")
            .field("len", &self.0.len())
            .field("head", &shown)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_ids_are_unique() {
        let a = SnapshotId::next();
        let b = SnapshotId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_snapshot_id_display() {
        assert_eq!(SnapshotId::from_raw(7).to_string(), "snapshot#7");
    }

    #[test]
    fn test_filled_array() {
        let arr = ValueArray::filled(3, -1.0);
        assert_eq!(arr.as_slice(), &[-1.0, -1.0, -1.0]);
        assert_eq!(arr.get(2), Some(-1.0));
        assert_eq!(arr.get(3), None);
    }

    #[test]
    fn test_clone_shares_allocation() {
        let arr = ValueArray::from(vec![1.0, 2.0]);
        let copy = arr.clone();
        assert!(ValueArray::ptr_eq(&arr, &copy));

        let other = ValueArray::from(vec![1.0, 2.0]);
        assert_eq!(arr, other);
        assert!(!ValueArray::ptr_eq(&arr, &other));
    }

    #[test]
    fn test_debug_is_bounded() {
        let arr = ValueArray::filled(1000, 0.5);
        let dbg = format!("{:?}", arr);
        assert!(dbg.contains("len: 1000"));
        assert!(dbg.len() < 200);
    }
}
