//! Dense value construction
//!
//! Drives one external scan and resolves every scanned key against a
//! snapshot, producing a [`ValueArray`] with one slot per document.
//!
//! - Every slot starts at the configuration's default value
//! - Each resolved document is overwritten with the entry's value; when
//!   several entries reach the same document, the last one scanned wins
//! - Store failures degrade to defaults (the scanner contains them)
//! - Index read failures abort the build
//!
//! The builder touches no shared state. Publication is the cache's job.

use std::sync::Arc;
use std::time::{Duration, Instant};

use extscore_core::{IndexSnapshot, Result, SourceConfig, ValueArray};
use extscore_store::{ExternalStoreScanner, StoreConnector};
use tracing::{debug, info};

use crate::resolver::KeyResolver;

/// Produces the value array for a configuration and snapshot
///
/// The cache is generic over this so tests can count or stall builds.
pub trait ValueLoader: Send + Sync {
    /// Build a complete array for `snapshot`
    ///
    /// # Errors
    ///
    /// Returns `Resolution` if the snapshot's index cannot be read.
    fn load(&self, config: &SourceConfig, snapshot: &dyn IndexSnapshot) -> Result<ValueArray>;
}

/// Counters describing one build
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildStats {
    /// Entries read from the store
    pub entries: usize,
    /// Document slots written (a slot written twice counts twice)
    pub docs_written: usize,
    /// Entries whose key matched no document
    pub unmatched: usize,
    /// Entries skipped by the scanner or the resolver as malformed
    pub skipped: usize,
    /// The scan was cut short by a store failure
    pub truncated: bool,
    /// The store could not be reached
    pub unavailable: bool,
    /// Wall time of the build
    pub elapsed: Duration,
}

/// Builds dense arrays from an external store
#[derive(Clone)]
pub struct DenseValueBuilder {
    scanner: ExternalStoreScanner,
}

impl DenseValueBuilder {
    /// Create a builder connecting through `connector`
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        DenseValueBuilder {
            scanner: ExternalStoreScanner::new(connector),
        }
    }

    /// Build the array for `config` over `snapshot`, with counters
    ///
    /// # Errors
    ///
    /// Returns `Resolution` if the key field's terms or postings cannot be
    /// read. No partial array is returned.
    pub fn build(
        &self,
        config: &SourceConfig,
        snapshot: &dyn IndexSnapshot,
    ) -> Result<(ValueArray, BuildStats)> {
        let started = Instant::now();
        let mut values = vec![config.default_value(); snapshot.max_doc() as usize];
        let mut stats = BuildStats::default();

        let mut resolver = KeyResolver::open(snapshot, config.key_field(), config.key_encoding())?;
        let mut docs = Vec::new();
        let mut stream = self.scanner.scan(config);

        for (key, value) in stream.by_ref() {
            stats.entries += 1;
            match resolver.resolve_into(&key, &mut docs) {
                Ok(()) => {}
                Err(e) if e.is_fatal_for_build() => return Err(e),
                Err(e) => {
                    debug!(target: "extscore::build", key = %key, error = %e, "Skipping key");
                    stats.skipped += 1;
                    continue;
                }
            }
            if docs.is_empty() {
                stats.unmatched += 1;
                continue;
            }
            for &doc in &docs {
                values[doc as usize] = value;
            }
            stats.docs_written += docs.len();
        }

        let summary = stream.summary();
        stats.skipped += summary.skipped;
        stats.truncated = summary.truncated;
        stats.unavailable = summary.unavailable;
        stats.elapsed = started.elapsed();

        info!(
            target: "extscore::build",
            snapshot = %snapshot.id(),
            field = config.key_field(),
            key = config.store_key(),
            layout = %config.layout(),
            max_doc = values.len(),
            entries = stats.entries,
            docs_written = stats.docs_written,
            unmatched = stats.unmatched,
            skipped = stats.skipped,
            truncated = stats.truncated,
            unavailable = stats.unavailable,
            duration_ms = stats.elapsed.as_millis() as u64,
            "External values built"
        );

        Ok((ValueArray::from(values), stats))
    }
}

impl ValueLoader for DenseValueBuilder {
    fn load(&self, config: &SourceConfig, snapshot: &dyn IndexSnapshot) -> Result<ValueArray> {
        self.build(config, snapshot).map(|(values, _)| values)
    }
}
