//! Paged iteration over external values
//!
//! [`ExternalStoreScanner::scan`] returns a lazy, finite stream of
//! `(key, value)` pairs for one configuration. Every call opens a fresh
//! connection and starts from the beginning.
//!
//! # Layouts
//!
//! - **Sorted set**: ranks `[start, start + page]` are requested with scores
//!   and `start` advances by `page`. The inclusive range means consecutive
//!   pages overlap by one member, which is harmless for last-writer-wins
//!   consumers. The scan stops at the first page holding fewer than `page`
//!   entries. This is an approximation of end-of-data: a server that returns
//!   a short page while more members exist ends the scan early.
//! - **Hash**: accepted by configuration but not loaded; the stream is empty.
//! - **Prefixed keys**: a cursor scan over the whole key space, keeping keys
//!   of the form `<store_key>:<suffix>` (split at the last `:`), fetching each
//!   value with `GET` and emitting `(suffix, value)`. This visits every key in
//!   the store and is slow on large key spaces.
//!
//! # Failure handling
//!
//! Store failures never escape a scan. A failed connect or an authentication
//! failure (a rejected `AUTH`, or `NOAUTH` on any command) is logged as an
//! error and marks the scan unavailable; any other failure mid-scan is logged
//! and truncates the stream, keeping the entries already emitted. Unparseable values and
//! per-key error replies skip that single entry.

use std::collections::VecDeque;
use std::sync::Arc;

use extscore_core::{LayoutKind, SourceConfig};
use tracing::{debug, error, warn};

use crate::error::StoreError;
use crate::protocol::{ExternalStore, StoreConnector, SCAN_CURSOR_START};

/// Outcome of a scan, available once the stream is exhausted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Entries yielded
    pub emitted: usize,
    /// Entries skipped as malformed or unreadable
    pub skipped: usize,
    /// The scan stopped early because of a store failure
    pub truncated: bool,
    /// No connection could be established or authenticated
    pub unavailable: bool,
}

/// Produces scan streams for configurations
#[derive(Clone)]
pub struct ExternalStoreScanner {
    connector: Arc<dyn StoreConnector>,
}

impl ExternalStoreScanner {
    /// Create a scanner opening connections through `connector`
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        ExternalStoreScanner { connector }
    }

    /// Start a fresh scan for `config`
    pub fn scan(&self, config: &SourceConfig) -> ScanStream {
        let mut stream = ScanStream {
            conn: None,
            state: match config.layout() {
                LayoutKind::SortedSet => ScanState::SortedSet { start: 0 },
                LayoutKind::PrefixedKeys => ScanState::PrefixedKeys {
                    cursor: SCAN_CURSOR_START.to_string(),
                },
                LayoutKind::Hash => ScanState::Done,
            },
            page: VecDeque::new(),
            store_key: config.store_key().to_string(),
            page_size: config.scan_count().max(1),
            summary: ScanSummary::default(),
        };

        if config.layout() == LayoutKind::Hash {
            debug!(
                target: "extscore::scan",
                key = config.store_key(),
                "Hash layout is not loaded; all documents keep the default value"
            );
            return stream;
        }

        match self.open(config) {
            Ok(conn) => stream.conn = Some(conn),
            Err(e) => {
                error!(
                    target: "extscore::scan",
                    address = %config.address(),
                    key = config.store_key(),
                    error = %e,
                    "Cannot load external values; using defaults"
                );
                stream.summary.unavailable = true;
                stream.state = ScanState::Done;
            }
        }
        stream
    }

    fn open(&self, config: &SourceConfig) -> Result<Box<dyn ExternalStore>, StoreError> {
        let mut conn = self.connector.connect(config)?;
        if !config.password().is_empty() {
            conn.auth(config.password())?;
        }
        Ok(conn)
    }
}

enum ScanState {
    SortedSet { start: i64 },
    PrefixedKeys { cursor: String },
    Done,
}

/// Lazy stream of `(key, value)` pairs from one scan
///
/// The connection is closed when the stream is dropped.
pub struct ScanStream {
    conn: Option<Box<dyn ExternalStore>>,
    state: ScanState,
    page: VecDeque<(String, f32)>,
    store_key: String,
    page_size: usize,
    summary: ScanSummary,
}

impl ScanStream {
    /// Counters for the scan so far
    pub fn summary(&self) -> &ScanSummary {
        &self.summary
    }

    /// Fetch the next page into `self.page`, updating the state
    fn fill_page(&mut self) {
        let Some(conn) = self.conn.as_mut() else {
            self.state = ScanState::Done;
            return;
        };

        let result = match &mut self.state {
            ScanState::Done => return,
            ScanState::SortedSet { start } => fill_sorted_set(
                conn.as_mut(),
                &self.store_key,
                start,
                self.page_size,
                &mut self.page,
            ),
            ScanState::PrefixedKeys { cursor } => fill_prefixed(
                conn.as_mut(),
                &self.store_key,
                cursor,
                self.page_size,
                &mut self.page,
                &mut self.summary,
            ),
        };

        match result {
            Ok(true) => {}
            Ok(false) => self.finish(),
            Err(e) if e.is_auth() => {
                error!(
                    target: "extscore::scan",
                    key = %self.store_key,
                    error = %e,
                    "Cannot load external values; using defaults"
                );
                self.summary.unavailable = true;
                self.finish();
            }
            Err(e) => {
                warn!(
                    target: "extscore::scan",
                    key = %self.store_key,
                    emitted = self.summary.emitted + self.page.len(),
                    timeout = e.is_timeout(),
                    error = %e,
                    "External scan truncated"
                );
                self.summary.truncated = true;
                self.finish();
            }
        }
    }

    fn finish(&mut self) {
        self.state = ScanState::Done;
        self.conn = None;
    }
}

/// Returns `Ok(false)` once the set is exhausted
fn fill_sorted_set(
    conn: &mut dyn ExternalStore,
    key: &str,
    start: &mut i64,
    page_size: usize,
    page: &mut VecDeque<(String, f32)>,
) -> Result<bool, StoreError> {
    let end = *start + page_size as i64;
    let entries = conn.range_with_scores(key, *start, end)?;
    let more = entries.len() >= page_size;
    page.extend(entries.into_iter().map(|(member, score)| (member, score as f32)));
    *start += page_size as i64;
    Ok(more)
}

/// Returns `Ok(false)` once the cursor wraps back to the start
fn fill_prefixed(
    conn: &mut dyn ExternalStore,
    prefix: &str,
    cursor: &mut String,
    page_size: usize,
    page: &mut VecDeque<(String, f32)>,
    summary: &mut ScanSummary,
) -> Result<bool, StoreError> {
    let (next, keys) = conn.scan(cursor, page_size)?;

    for full_key in keys {
        let Some(suffix) = split_prefixed(&full_key, prefix) else {
            continue;
        };
        let raw = match conn.get(&full_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(e) if e.is_command_scoped() => {
                debug!(target: "extscore::scan", key = %full_key, error = %e, "Skipping unreadable key");
                summary.skipped += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        match raw.trim().parse::<f32>() {
            Ok(value) => page.push_back((suffix.to_string(), value)),
            Err(_) => {
                debug!(target: "extscore::scan", key = %full_key, value = %raw, "Skipping non-numeric value");
                summary.skipped += 1;
            }
        }
    }

    let more = next != SCAN_CURSOR_START;
    *cursor = next;
    Ok(more)
}

/// Split `<prefix>:<suffix>` at the last `:`, returning the suffix if the
/// prefix matches
pub fn split_prefixed<'a>(full_key: &'a str, prefix: &str) -> Option<&'a str> {
    let delim = full_key.rfind(':')?;
    if &full_key[..delim] != prefix {
        return None;
    }
    Some(&full_key[delim + 1..])
}

impl Iterator for ScanStream {
    type Item = (String, f32);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.page.pop_front() {
                self.summary.emitted += 1;
                return Some(entry);
            }
            if matches!(self.state, ScanState::Done) {
                return None;
            }
            self.fill_page();
        }
    }
}
