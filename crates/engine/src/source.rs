//! Scoring and sort surface
//!
//! An [`ExternalValueSource`] pairs one configuration with the shared cache
//! and hands out per-segment [`FloatValues`] readers. Two sources with equal
//! configurations are equal and read the same cached array.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use extscore_core::{DocId, IndexSnapshot, LeafContext, Result, SourceConfig, ValueArray};

use crate::cache::SnapshotValueCache;

/// Per-document float values backed by the value cache
#[derive(Clone)]
pub struct ExternalValueSource {
    config: SourceConfig,
    cache: Arc<SnapshotValueCache>,
}

impl ExternalValueSource {
    /// Create a source for `config` reading through `cache`
    pub fn new(config: SourceConfig, cache: Arc<SnapshotValueCache>) -> Self {
        ExternalValueSource { config, cache }
    }

    /// The source's configuration
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Human-readable description, used in explain output
    pub fn description(&self) -> String {
        format!("external({})", self.config)
    }

    /// Reader for one segment of `snapshot`.
    ///
    /// Builds the snapshot's array on first use.
    ///
    /// # Errors
    ///
    /// Returns `Resolution` if the build could not read the index.
    pub fn values(&self, snapshot: &Arc<dyn IndexSnapshot>, leaf: &LeafContext) -> Result<FloatValues> {
        let values = self.cache.get(&self.config, snapshot)?;
        Ok(FloatValues {
            values,
            doc_base: leaf.doc_base,
            default: self.config.default_value(),
        })
    }

    /// Reader addressing `snapshot` by top-level doc ids
    ///
    /// # Errors
    ///
    /// Returns `Resolution` if the build could not read the index.
    pub fn top_level(&self, snapshot: &Arc<dyn IndexSnapshot>) -> Result<FloatValues> {
        self.values(
            snapshot,
            &LeafContext {
                ord: 0,
                doc_base: 0,
                max_doc: snapshot.max_doc(),
            },
        )
    }

    /// Sort top-level doc ids by value, ascending unless `reverse`.
    /// Equal values keep doc id order.
    ///
    /// # Errors
    ///
    /// Returns `Resolution` if the build could not read the index.
    pub fn sort_docs(
        &self,
        snapshot: &Arc<dyn IndexSnapshot>,
        docs: &mut [DocId],
        reverse: bool,
    ) -> Result<()> {
        let values = self.top_level(snapshot)?;
        docs.sort_by(|&a, &b| {
            let by_value = values.float_val(a).total_cmp(&values.float_val(b));
            let by_value = if reverse { by_value.reverse() } else { by_value };
            by_value.then(a.cmp(&b))
        });
        Ok(())
    }
}

impl PartialEq for ExternalValueSource {
    fn eq(&self, other: &Self) -> bool {
        self.config == other.config
    }
}

impl Eq for ExternalValueSource {}

impl fmt::Debug for ExternalValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalValueSource")
            .field("config", &self.config)
            .finish()
    }
}

impl fmt::Display for ExternalValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// Segment-relative reader over a cached array
#[derive(Debug, Clone)]
pub struct FloatValues {
    values: ValueArray,
    doc_base: DocId,
    default: f32,
}

impl FloatValues {
    /// Value of segment-local `doc`. Docs beyond the array read the default.
    pub fn float_val(&self, doc: DocId) -> f32 {
        self.doc_base
            .checked_add(doc)
            .and_then(|slot| self.values.get(slot))
            .unwrap_or(self.default)
    }

    /// Value widened to `f64`
    pub fn double_val(&self, doc: DocId) -> f64 {
        f64::from(self.float_val(doc))
    }

    /// Value rendered as text
    pub fn str_val(&self, doc: DocId) -> String {
        self.float_val(doc).to_string()
    }

    /// Compare two segment-local docs by value
    pub fn compare(&self, a: DocId, b: DocId) -> Ordering {
        self.float_val(a).total_cmp(&self.float_val(b))
    }

    /// The shared array this reader views
    pub fn array(&self) -> &ValueArray {
        &self.values
    }
}
