//! Snapshot-scoped value cache
//!
//! Maps `snapshot -> configuration -> ValueArray` so the expensive external
//! load is paid at most once per snapshot.
//!
//! # Locking
//!
//! - One coarse `parking_lot::Mutex` guards the whole two-level map. It is
//!   held only for map lookups and inserts, never across a build.
//! - A slot being built holds an [`InFlight`] placeholder. The thread that
//!   installed it builds the value outside the coarse lock; other threads
//!   that find the placeholder wait on its condvar instead of building again.
//! - A builder publishes only if its own placeholder still occupies the slot.
//!   A `refresh` or `reset` that happened in the meantime wins.
//!
//! # Snapshot lifetime
//!
//! The cache holds only `Weak` handles to snapshots. Slots are removed when
//! the snapshot reports that it closed, when a structural change finds the
//! snapshot dead, or through [`SnapshotValueCache::evict`].
//!
//! At most one close listener is registered per snapshot. The set of watched
//! ids survives `reset` and `evict`, so a slot recreated afterwards reuses
//! the listener already in place.
//!
//! # Failures
//!
//! A failed build removes its placeholder and reports the error to every
//! waiter. Nothing is cached, so the next `get` retries. A failed `refresh`
//! leaves the previous array in place.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use extscore_core::{Error, IndexSnapshot, Result, SnapshotId, SourceConfig, ValueArray};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::builder::ValueLoader;

/// Cache counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Snapshots with at least one slot
    pub snapshots: usize,
    /// Ready entries across all snapshots
    pub entries: usize,
    /// Builds started by `get` or `refresh`
    pub builds: u64,
    /// `get` calls served from a ready entry
    pub hits: u64,
    /// `get` calls that waited on another thread's build
    pub joins: u64,
    /// Snapshot slots removed by close notification, purge or `evict`
    pub evictions: u64,
}

/// Placeholder for a value under construction
struct InFlight {
    outcome: Mutex<Option<Result<ValueArray>>>,
    done: Condvar,
}

impl InFlight {
    fn new() -> Self {
        InFlight {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    /// Record the outcome and wake waiters. The first outcome sticks.
    fn complete(&self, result: Result<ValueArray>) {
        let mut outcome = self.outcome.lock();
        if outcome.is_none() {
            *outcome = Some(result);
        }
        self.done.notify_all();
    }

    fn wait(&self) -> Result<ValueArray> {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            self.done.wait(&mut outcome);
        }
    }
}

enum EntryState {
    Building(Arc<InFlight>),
    Ready(ValueArray),
}

struct SnapshotSlot {
    snapshot: Weak<dyn IndexSnapshot>,
    entries: HashMap<SourceConfig, EntryState>,
}

struct CacheInner {
    loader: Arc<dyn ValueLoader>,
    slots: Mutex<HashMap<SnapshotId, SnapshotSlot>>,
    /// Snapshots carrying our close listener
    watched: Mutex<HashSet<SnapshotId>>,
    builds: AtomicU64,
    hits: AtomicU64,
    joins: AtomicU64,
    evictions: AtomicU64,
}

impl CacheInner {
    fn evict(&self, id: SnapshotId) -> bool {
        let removed = self.slots.lock().remove(&id).is_some();
        if removed {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(target: "extscore::cache", snapshot = %id, "Evicted snapshot slot");
        }
        removed
    }

    /// The snapshot's close listener fired
    fn closed(&self, id: SnapshotId) {
        self.evict(id);
        self.watched.lock().remove(&id);
    }

    /// Drop slots whose snapshot has no owners left
    fn purge_dead(&self, slots: &mut HashMap<SnapshotId, SnapshotSlot>) {
        let before = slots.len();
        let mut dead = Vec::new();
        slots.retain(|id, slot| {
            let alive = slot.snapshot.strong_count() > 0;
            if !alive {
                dead.push(*id);
            }
            alive
        });
        let purged = before - slots.len();
        if !dead.is_empty() {
            let mut watched = self.watched.lock();
            for id in &dead {
                watched.remove(id);
            }
        }
        if purged > 0 {
            self.evictions.fetch_add(purged as u64, Ordering::Relaxed);
            debug!(target: "extscore::cache", purged, "Purged slots of closed snapshots");
        }
    }

    /// Find or create the slot for `snapshot`. Returns whether it was created.
    fn slot_for<'m>(
        &self,
        slots: &'m mut HashMap<SnapshotId, SnapshotSlot>,
        snapshot: &Arc<dyn IndexSnapshot>,
    ) -> (&'m mut SnapshotSlot, bool) {
        let id = snapshot.id();
        let created = !slots.contains_key(&id);
        if created {
            self.purge_dead(slots);
        }
        let slot = slots.entry(id).or_insert_with(|| SnapshotSlot {
            snapshot: Arc::downgrade(snapshot),
            entries: HashMap::new(),
        });
        (slot, created)
    }
}

/// Outcome of looking up a slot under the coarse lock
enum Role {
    Hit(ValueArray),
    Join(Arc<InFlight>),
    Build(Arc<InFlight>),
}

/// Process-wide cache of value arrays, keyed by snapshot and configuration
///
/// Construct one per process and share it (`Arc`) with every value source
/// and the refresh coordinator. Equal configurations share entries no matter
/// which source created them.
pub struct SnapshotValueCache {
    inner: Arc<CacheInner>,
}

impl SnapshotValueCache {
    /// Create an empty cache building values with `loader`
    pub fn new(loader: Arc<dyn ValueLoader>) -> Self {
        SnapshotValueCache {
            inner: Arc::new(CacheInner {
                loader,
                slots: Mutex::new(HashMap::new()),
                watched: Mutex::new(HashSet::new()),
                builds: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                joins: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            }),
        }
    }

    /// Values for `config` over `snapshot`, building them on first use.
    ///
    /// Concurrent callers for the same pair share a single build. Blocks
    /// until that build completes.
    ///
    /// # Errors
    ///
    /// Returns the build's error (a `Resolution` failure) to the builder and
    /// every waiter. Nothing is cached in that case.
    pub fn get(&self, config: &SourceConfig, snapshot: &Arc<dyn IndexSnapshot>) -> Result<ValueArray> {
        let (role, created) = {
            let mut slots = self.inner.slots.lock();
            let (slot, created) = self.inner.slot_for(&mut slots, snapshot);
            let role = match slot.entries.get(config) {
                Some(EntryState::Ready(values)) => Role::Hit(values.clone()),
                Some(EntryState::Building(flight)) => Role::Join(Arc::clone(flight)),
                None => {
                    let flight = Arc::new(InFlight::new());
                    slot.entries
                        .insert(config.clone(), EntryState::Building(Arc::clone(&flight)));
                    Role::Build(flight)
                }
            };
            (role, created)
        };

        if created {
            self.watch(snapshot);
        }

        match role {
            Role::Hit(values) => {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                Ok(values)
            }
            Role::Join(flight) => {
                self.inner.joins.fetch_add(1, Ordering::Relaxed);
                trace!(target: "extscore::cache", snapshot = %snapshot.id(), "Waiting for in-flight build");
                flight.wait()
            }
            Role::Build(flight) => {
                let mut guard = BuildGuard {
                    inner: &self.inner,
                    id: snapshot.id(),
                    config,
                    flight,
                    finished: false,
                };
                self.inner.builds.fetch_add(1, Ordering::Relaxed);
                let result = self.inner.loader.load(config, snapshot.as_ref());
                guard.finish(result.clone());
                result
            }
        }
    }

    /// Build a fresh array for `config` over `snapshot` and replace any
    /// existing entry.
    ///
    /// Readers keep getting the previous array until the new one is
    /// published; callers waiting on an in-flight `get` build receive the
    /// refreshed array.
    ///
    /// # Errors
    ///
    /// Returns the build's error and leaves the previous entry untouched.
    pub fn refresh(
        &self,
        config: &SourceConfig,
        snapshot: &Arc<dyn IndexSnapshot>,
    ) -> Result<ValueArray> {
        self.inner.builds.fetch_add(1, Ordering::Relaxed);
        let values = self
            .inner
            .loader
            .load(config, snapshot.as_ref())
            .map_err(|e| {
                warn!(
                    target: "extscore::cache",
                    snapshot = %snapshot.id(),
                    field = config.key_field(),
                    error = %e,
                    "Refresh failed; keeping previous values"
                );
                e
            })?;

        let created = {
            let mut slots = self.inner.slots.lock();
            let (slot, created) = self.inner.slot_for(&mut slots, snapshot);
            let previous = slot
                .entries
                .insert(config.clone(), EntryState::Ready(values.clone()));
            if let Some(EntryState::Building(flight)) = previous {
                flight.complete(Ok(values.clone()));
            }
            created
        };

        if created {
            self.watch(snapshot);
        }
        Ok(values)
    }

    /// Drop every entry for every snapshot. In-flight builds still hand
    /// their result to their waiters but are not published.
    pub fn reset(&self) {
        let mut slots = self.inner.slots.lock();
        let dropped = slots.len();
        slots.clear();
        debug!(target: "extscore::cache", snapshots = dropped, "Cache reset");
    }

    /// Remove every entry for one snapshot
    pub fn evict(&self, id: SnapshotId) -> bool {
        self.inner.evict(id)
    }

    /// Whether a ready entry exists for the pair
    pub fn contains(&self, config: &SourceConfig, id: SnapshotId) -> bool {
        let slots = self.inner.slots.lock();
        matches!(
            slots.get(&id).and_then(|s| s.entries.get(config)),
            Some(EntryState::Ready(_))
        )
    }

    /// Number of ready entries
    pub fn len(&self) -> usize {
        let slots = self.inner.slots.lock();
        slots
            .values()
            .flat_map(|s| s.entries.values())
            .filter(|e| matches!(e, EntryState::Ready(_)))
            .count()
    }

    /// Whether no entry is ready
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counters snapshot
    pub fn stats(&self) -> CacheStats {
        let (snapshots, entries) = {
            let slots = self.inner.slots.lock();
            let entries = slots
                .values()
                .flat_map(|s| s.entries.values())
                .filter(|e| matches!(e, EntryState::Ready(_)))
                .count();
            (slots.len(), entries)
        };
        CacheStats {
            snapshots,
            entries,
            builds: self.inner.builds.load(Ordering::Relaxed),
            hits: self.inner.hits.load(Ordering::Relaxed),
            joins: self.inner.joins.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
        }
    }

    /// Ask the snapshot to tell us when it closes, unless it already does
    fn watch(&self, snapshot: &Arc<dyn IndexSnapshot>) {
        let id = snapshot.id();
        // The lock is released before registering: a snapshot that is already
        // closed may run the listener immediately.
        if !self.inner.watched.lock().insert(id) {
            return;
        }
        let inner = Arc::downgrade(&self.inner);
        let registered = snapshot.add_close_listener(Box::new(move |id| {
            if let Some(inner) = inner.upgrade() {
                inner.closed(id);
            }
        }));
        if !registered {
            self.inner.watched.lock().remove(&id);
            trace!(
                target: "extscore::cache",
                snapshot = %snapshot.id(),
                "Snapshot does not report closes; relying on weak handle purge"
            );
        }
    }
}

/// Publishes a build's outcome, including when the loader panics.
///
/// Without this, a panicking build would leave its placeholder in the slot
/// and every waiter blocked forever.
struct BuildGuard<'a> {
    inner: &'a CacheInner,
    id: SnapshotId,
    config: &'a SourceConfig,
    flight: Arc<InFlight>,
    finished: bool,
}

impl BuildGuard<'_> {
    fn finish(&mut self, result: Result<ValueArray>) {
        self.finished = true;
        {
            let mut slots = self.inner.slots.lock();
            if let Some(slot) = slots.get_mut(&self.id) {
                let ours = matches!(
                    slot.entries.get(self.config),
                    Some(EntryState::Building(f)) if Arc::ptr_eq(f, &self.flight)
                );
                if ours {
                    match &result {
                        Ok(values) => {
                            slot.entries
                                .insert(self.config.clone(), EntryState::Ready(values.clone()));
                        }
                        Err(_) => {
                            slot.entries.remove(self.config);
                        }
                    }
                }
            }
        }
        self.flight.complete(result);
    }
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(Err(Error::InvalidOperation(
                "value build panicked".to_string(),
            )));
        }
    }
}
