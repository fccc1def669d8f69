//! In-memory segmented index
//!
//! A small, exact-match index that implements the snapshot surface the value
//! cache consumes. It is the reference implementation used by tests and by
//! embedders that keep their documents in memory.
//!
//! - Documents are added to a pending buffer
//! - `commit()` seals the buffer into an immutable segment and opens a new
//!   snapshot over every sealed segment
//! - Each snapshot has a process-unique id and fires its close listeners
//!   when its last owner drops it
//!
//! Terms are the field values encoded with the schema's term encoding, so a
//! lookup encoded the same way is an exact match.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use extscore_core::{
    CloseListener, DocId, Error, FieldTypes, IndexSnapshot, LeafContext, Result, SnapshotId,
    SnapshotProvider, TermDictionary, TermEncoding,
};
use parking_lot::Mutex;
use tracing::debug;

use crate::schema::Schema;

/// A document: field name to readable value
pub type Document = BTreeMap<String, String>;

/// Sealed, immutable segment. Doc ids are segment-local.
#[derive(Debug, Default)]
struct Segment {
    max_doc: u32,
    /// field -> term bytes -> ascending local doc ids
    terms: HashMap<String, BTreeMap<Vec<u8>, Vec<DocId>>>,
}

impl Segment {
    fn seal(docs: &[Document], schema: &Schema) -> Result<Self> {
        let mut segment = Segment {
            max_doc: docs.len() as u32,
            terms: HashMap::new(),
        };
        let mut scratch = Vec::new();
        for (local, doc) in docs.iter().enumerate() {
            for (field, value) in doc {
                let encoding = schema.term_encoding(field).unwrap_or(TermEncoding::Text);
                encoding.encode(value, &mut scratch)?;
                segment
                    .terms
                    .entry(field.clone())
                    .or_default()
                    .entry(scratch.clone())
                    .or_default()
                    .push(local as DocId);
            }
        }
        Ok(segment)
    }
}

/// Mutable index producing immutable snapshots
pub struct MemoryIndex {
    schema: Arc<Schema>,
    pending: Mutex<Vec<Document>>,
    state: Mutex<IndexState>,
}

#[derive(Default)]
struct IndexState {
    segments: Vec<Arc<Segment>>,
    current: Option<Arc<MemorySnapshot>>,
}

impl MemoryIndex {
    /// Create an empty index for `schema`
    pub fn new(schema: Arc<Schema>) -> Self {
        MemoryIndex {
            schema,
            pending: Mutex::new(Vec::new()),
            state: Mutex::new(IndexState::default()),
        }
    }

    /// Schema used to encode terms
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Buffer a document for the next commit
    pub fn add_document(&self, doc: Document) {
        self.pending.lock().push(doc);
    }

    /// Buffer a document given as `(field, value)` pairs
    pub fn add(&self, fields: &[(&str, &str)]) {
        self.add_document(
            fields
                .iter()
                .map(|(f, v)| (f.to_string(), v.to_string()))
                .collect(),
        );
    }

    /// Seal pending documents and open a new snapshot.
    ///
    /// # Errors
    ///
    /// Returns `MalformedEntry` if a value cannot be encoded for its field;
    /// the pending documents are kept.
    pub fn commit(&self) -> Result<Arc<MemorySnapshot>> {
        let mut pending = self.pending.lock();
        let mut state = self.state.lock();
        if !pending.is_empty() {
            let segment = Segment::seal(&pending, &self.schema)?;
            state.segments.push(Arc::new(segment));
            pending.clear();
        }
        let snapshot = Arc::new(MemorySnapshot::open(state.segments.clone()));
        debug!(
            target: "extscore::index",
            snapshot = %snapshot.id(),
            segments = state.segments.len(),
            max_doc = snapshot.max_doc(),
            "Snapshot opened"
        );
        state.current = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// The most recently opened snapshot, if any
    pub fn current(&self) -> Option<Arc<MemorySnapshot>> {
        self.state.lock().current.clone()
    }

    /// Drop the index's own reference to the current snapshot
    pub fn release_current(&self) {
        self.state.lock().current = None;
    }
}

impl SnapshotProvider for MemoryIndex {
    fn commit_and_reopen(&self) -> Result<Arc<dyn IndexSnapshot>> {
        let snapshot: Arc<dyn IndexSnapshot> = self.commit()?;
        Ok(snapshot)
    }
}

/// Immutable view over a fixed list of segments
pub struct MemorySnapshot {
    id: SnapshotId,
    segments: Vec<(Arc<Segment>, DocId)>,
    max_doc: u32,
    listeners: Mutex<Vec<CloseListener>>,
}

impl MemorySnapshot {
    fn open(segments: Vec<Arc<Segment>>) -> Self {
        let mut base: DocId = 0;
        let segments = segments
            .into_iter()
            .map(|segment| {
                let doc_base = base;
                base += segment.max_doc;
                (segment, doc_base)
            })
            .collect();
        MemorySnapshot {
            id: SnapshotId::next(),
            segments,
            max_doc: base,
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl IndexSnapshot for MemorySnapshot {
    fn id(&self) -> SnapshotId {
        self.id
    }

    fn max_doc(&self) -> u32 {
        self.max_doc
    }

    fn leaves(&self) -> Vec<LeafContext> {
        self.segments
            .iter()
            .enumerate()
            .map(|(ord, (segment, doc_base))| LeafContext {
                ord,
                doc_base: *doc_base,
                max_doc: segment.max_doc,
            })
            .collect()
    }

    fn terms(&self, field: &str) -> Result<Option<Box<dyn TermDictionary + '_>>> {
        let per_segment: Vec<(&BTreeMap<Vec<u8>, Vec<DocId>>, DocId)> = self
            .segments
            .iter()
            .filter_map(|(segment, base)| segment.terms.get(field).map(|t| (t, *base)))
            .collect();
        if per_segment.is_empty() {
            return Ok(None);
        }
        Ok(Some(Box::new(MemoryTerms {
            per_segment,
            current: None,
        })))
    }

    fn add_close_listener(&self, listener: CloseListener) -> bool {
        self.listeners.lock().push(listener);
        true
    }
}

impl Drop for MemorySnapshot {
    fn drop(&mut self) {
        let listeners = std::mem::take(self.listeners.get_mut());
        for listener in listeners {
            listener(self.id);
        }
    }
}

struct MemoryTerms<'a> {
    per_segment: Vec<(&'a BTreeMap<Vec<u8>, Vec<DocId>>, DocId)>,
    current: Option<Vec<u8>>,
}

impl TermDictionary for MemoryTerms<'_> {
    fn seek_exact(&mut self, term: &[u8]) -> Result<bool> {
        let found = self.per_segment.iter().any(|(t, _)| t.contains_key(term));
        self.current = found.then(|| term.to_vec());
        Ok(found)
    }

    fn postings(&mut self, out: &mut Vec<DocId>) -> Result<()> {
        let term = self.current.as_deref().ok_or_else(|| {
            Error::InvalidOperation("postings requested without a positioned term".to_string())
        })?;
        for (terms, base) in &self.per_segment {
            if let Some(docs) = terms.get(term) {
                out.extend(docs.iter().map(|d| base + d));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn schema() -> Arc<Schema> {
        let mut schema = Schema::new(Some("id"));
        schema.add_field("id", TermEncoding::Text).unwrap();
        schema.add_field("num", TermEncoding::Int).unwrap();
        Arc::new(schema)
    }

    fn lookup(snapshot: &MemorySnapshot, field: &str, term: &[u8]) -> Vec<DocId> {
        let mut out = Vec::new();
        if let Some(mut terms) = snapshot.terms(field).unwrap() {
            if terms.seek_exact(term).unwrap() {
                terms.postings(&mut out).unwrap();
            }
        }
        out
    }

    #[test]
    fn test_commit_assigns_doc_bases() {
        let index = MemoryIndex::new(schema());
        index.add(&[("id", "a")]);
        index.add(&[("id", "b")]);
        index.commit().unwrap();
        index.add(&[("id", "c")]);
        let snapshot = index.commit().unwrap();

        assert_eq!(snapshot.max_doc(), 3);
        let leaves = snapshot.leaves();
        assert_eq!(leaves.len(), 2);
        assert_eq!(leaves[1].doc_base, 2);
        assert_eq!(lookup(&snapshot, "id", b"c"), vec![2]);
        assert_eq!(lookup(&snapshot, "id", b"a"), vec![0]);
    }

    #[test]
    fn test_shared_term_across_segments() {
        let index = MemoryIndex::new(schema());
        index.add(&[("id", "x")]);
        index.commit().unwrap();
        index.add(&[("id", "y")]);
        index.add(&[("id", "x")]);
        let snapshot = index.commit().unwrap();
        assert_eq!(lookup(&snapshot, "id", b"x"), vec![0, 2]);
    }

    #[test]
    fn test_numeric_terms_are_encoded() {
        let index = MemoryIndex::new(schema());
        index.add(&[("num", "9")]);
        let snapshot = index.commit().unwrap();
        let encoded = TermEncoding::Int.encode_to_vec("9").unwrap();
        assert_eq!(lookup(&snapshot, "num", &encoded), vec![0]);
        assert!(lookup(&snapshot, "num", b"9").is_empty());
    }

    #[test]
    fn test_bad_numeric_value_keeps_pending() {
        let index = MemoryIndex::new(schema());
        index.add(&[("num", "nine")]);
        assert!(index.commit().is_err());
        assert_eq!(index.pending.lock().len(), 1);
    }

    #[test]
    fn test_missing_field_has_no_terms() {
        let index = MemoryIndex::new(schema());
        index.add(&[("id", "a")]);
        let snapshot = index.commit().unwrap();
        assert!(snapshot.terms("other").unwrap().is_none());
    }

    #[test]
    fn test_snapshots_are_immutable() {
        let index = MemoryIndex::new(schema());
        index.add(&[("id", "a")]);
        let first = index.commit().unwrap();
        index.add(&[("id", "b")]);
        let second = index.commit().unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(first.max_doc(), 1);
        assert!(lookup(&first, "id", b"b").is_empty());
        assert_eq!(lookup(&second, "id", b"b"), vec![1]);
    }

    #[test]
    fn test_close_listeners_fire_on_last_drop() {
        let index = MemoryIndex::new(schema());
        index.add(&[("id", "a")]);
        let snapshot = index.commit().unwrap();
        let id = snapshot.id();

        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        assert!(snapshot.add_close_listener(Box::new(move |closed| {
            assert_eq!(closed, id);
            f.fetch_add(1, Ordering::SeqCst);
        })));

        drop(snapshot);
        assert_eq!(fired.load(Ordering::SeqCst), 0, "index still holds it");

        index.release_current();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_postings_without_seek_is_error() {
        let index = MemoryIndex::new(schema());
        index.add(&[("id", "a")]);
        let snapshot = index.commit().unwrap();
        let mut terms = snapshot.terms("id").unwrap().unwrap();
        assert!(!terms.seek_exact(b"zzz").unwrap());
        let mut out = Vec::new();
        assert!(terms.postings(&mut out).is_err());
    }
}
