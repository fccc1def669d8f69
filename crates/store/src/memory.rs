//! In-memory external store
//!
//! Serves the [`ExternalStore`] operations from a shared key space with the
//! same semantics a Redis server has for them: inclusive `ZRANGE` ranks
//! ordered by (score, member), cursor-based `SCAN`, `GET` on string keys
//! only, and `NOAUTH` until a password-protected connection authenticates.
//!
//! Fault injection covers the failure modes the scanner must survive:
//! an unreachable server, a connection that dies after N commands, and a
//! sorted-set page cut short.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use extscore_core::SourceConfig;
use parking_lot::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::protocol::{ExternalStore, StoreConnector, SCAN_CURSOR_START};

#[derive(Debug, Clone)]
enum Entry {
    Str(String),
    SortedSet(HashMap<String, f64>),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Default)]
struct MemoryState {
    keys: BTreeMap<String, Entry>,
    password: Option<String>,
    unreachable: bool,
    fail_after: Option<usize>,
    short_page: Option<usize>,
}

/// Thread-safe in-memory store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
    commands: Arc<AtomicUsize>,
    connections: Arc<AtomicUsize>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a string key
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state
            .write()
            .keys
            .insert(key.into(), Entry::Str(value.into()));
    }

    /// Add or update a sorted-set member
    pub fn zadd(&self, key: impl Into<String>, member: impl Into<String>, score: f64) {
        let mut state = self.state.write();
        let entry = state
            .keys
            .entry(key.into())
            .or_insert_with(|| Entry::SortedSet(HashMap::new()));
        if let Entry::SortedSet(set) = entry {
            set.insert(member.into(), score);
        } else {
            *entry = Entry::SortedSet(HashMap::from([(member.into(), score)]));
        }
    }

    /// Set a hash field
    pub fn hset(&self, key: impl Into<String>, field: impl Into<String>, value: impl Into<String>) {
        let mut state = self.state.write();
        let entry = state
            .keys
            .entry(key.into())
            .or_insert_with(|| Entry::Hash(HashMap::new()));
        if let Entry::Hash(hash) = entry {
            hash.insert(field.into(), value.into());
        } else {
            *entry = Entry::Hash(HashMap::from([(field.into(), value.into())]));
        }
    }

    /// Delete a key of any type
    pub fn del(&self, key: &str) -> bool {
        self.state.write().keys.remove(key).is_some()
    }

    /// Remove every key
    pub fn flush(&self) {
        self.state.write().keys.clear();
    }

    /// Require `AUTH password` on new connections; `None` disables auth
    pub fn require_password(&self, password: Option<&str>) {
        self.state.write().password = password.map(str::to_string);
    }

    /// Refuse new connections while `true`
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.write().unreachable = unreachable;
    }

    /// Fail every command after `n` more have been served, as a timed-out
    /// socket would. `None` clears the fault.
    pub fn fail_after(&self, n: Option<usize>) {
        let served = self.commands.load(Ordering::SeqCst);
        self.state.write().fail_after = n.map(|n| served + n);
    }

    /// Cap every sorted-set range reply at `len` entries. `None` clears it.
    pub fn cap_range_replies(&self, len: Option<usize>) {
        self.state.write().short_page = len;
    }

    /// Total commands served across all connections
    pub fn commands_served(&self) -> usize {
        self.commands.load(Ordering::SeqCst)
    }

    /// Total connections opened
    pub fn connections_opened(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl StoreConnector for InMemoryStore {
    fn connect(&self, config: &SourceConfig) -> StoreResult<Box<dyn ExternalStore>> {
        let state = self.state.read();
        if state.unreachable {
            return Err(StoreError::Unreachable(format!(
                "{}: connection refused",
                config.address()
            )));
        }
        self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            store: self.clone(),
            authenticated: state.password.is_none(),
        }))
    }
}

/// One connection to an [`InMemoryStore`]
struct MemoryConnection {
    store: InMemoryStore,
    authenticated: bool,
}

impl MemoryConnection {
    /// Account for one command and apply connection-level faults
    fn begin(&self, needs_auth: bool) -> StoreResult<()> {
        let served = self.store.commands.fetch_add(1, Ordering::SeqCst);
        let state = self.store.state.read();
        if let Some(limit) = state.fail_after {
            if served >= limit {
                return Err(StoreError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "read timed out",
                )));
            }
        }
        if needs_auth && !self.authenticated {
            return Err(StoreError::Auth(
                "NOAUTH Authentication required.".to_string(),
            ));
        }
        Ok(())
    }
}

fn wrong_type() -> StoreError {
    StoreError::Server(
        "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
    )
}

/// Resolve a Redis-style inclusive rank range against `len` items
fn rank_bounds(start: i64, end: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let end = if end < 0 { len + end } else { end.min(len - 1) };
    if len == 0 || start > end || start >= len {
        return None;
    }
    Some((start as usize, end as usize))
}

impl ExternalStore for MemoryConnection {
    fn auth(&mut self, password: &str) -> StoreResult<()> {
        self.begin(false)?;
        let state = self.store.state.read();
        match &state.password {
            None => Err(StoreError::Auth(
                "ERR Client sent AUTH, but no password is set".to_string(),
            )),
            Some(expected) if expected == password => {
                self.authenticated = true;
                Ok(())
            }
            Some(_) => Err(StoreError::Auth("ERR invalid password".to_string())),
        }
    }

    fn range_with_scores(
        &mut self,
        key: &str,
        start: i64,
        end: i64,
    ) -> StoreResult<Vec<(String, f64)>> {
        self.begin(true)?;
        let state = self.store.state.read();
        let set = match state.keys.get(key) {
            None => return Ok(Vec::new()),
            Some(Entry::SortedSet(set)) => set,
            Some(_) => return Err(wrong_type()),
        };

        let mut ranked: Vec<(&String, f64)> = set.iter().map(|(m, s)| (m, *s)).collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));

        let Some((lo, hi)) = rank_bounds(start, end, ranked.len()) else {
            return Ok(Vec::new());
        };
        let mut page: Vec<(String, f64)> = ranked[lo..=hi]
            .iter()
            .map(|(m, s)| ((*m).clone(), *s))
            .collect();
        if let Some(cap) = state.short_page {
            page.truncate(cap);
        }
        Ok(page)
    }

    fn scan(&mut self, cursor: &str, count: usize) -> StoreResult<(String, Vec<String>)> {
        self.begin(true)?;
        let position: usize = cursor
            .parse()
            .map_err(|_| StoreError::Server("ERR invalid cursor".to_string()))?;
        let state = self.store.state.read();
        let keys: Vec<String> = state
            .keys
            .keys()
            .skip(position)
            .take(count.max(1))
            .cloned()
            .collect();
        let next = position + keys.len();
        let next_cursor = if keys.is_empty() || next >= state.keys.len() {
            SCAN_CURSOR_START.to_string()
        } else {
            next.to_string()
        };
        Ok((next_cursor, keys))
    }

    fn get(&mut self, key: &str) -> StoreResult<Option<String>> {
        self.begin(true)?;
        let state = self.store.state.read();
        match state.keys.get(key) {
            None => Ok(None),
            Some(Entry::Str(v)) => Ok(Some(v.clone())),
            Some(_) => Err(wrong_type()),
        }
    }
}
