//! Refresh coordination
//!
//! Keeps the set of configurations a schema declares and re-warms the cache
//! for each of them whenever the index opens a new snapshot, so the external
//! load is paid once, eagerly, instead of by the first query.
//!
//! Refreshes run either on the notifying thread ([`RefreshMode::Inline`]) or
//! on a [`BackgroundScheduler`] pool. Background jobs hold only a weak
//! handle to their snapshot and are skipped if it closed before they ran.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use extscore_core::{IndexSnapshot, Result, SnapshotId, SnapshotProvider, SourceConfig};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::background::{BackgroundScheduler, SchedulerStats};
use crate::cache::SnapshotValueCache;
use crate::schema::Schema;

/// Where refreshes run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshMode {
    /// On the thread that delivers the snapshot notification
    #[default]
    Inline,
    /// On a pool of `workers` threads
    Background {
        /// Worker threads (at least one is started)
        workers: usize,
    },
}

/// Outcome of one refresh pass
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RefreshReport {
    /// Snapshot the pass targeted, if one was refreshed
    pub snapshot: Option<SnapshotId>,
    /// Configurations rebuilt and published
    pub refreshed: usize,
    /// Configurations whose rebuild failed (previous values kept)
    pub failed: usize,
    /// Configurations handed to background workers
    pub queued: usize,
    /// Wall time of the pass (excluding queued work)
    pub elapsed: Duration,
}

/// One registered configuration
#[derive(Debug, Clone)]
struct Registered {
    name: String,
    config: SourceConfig,
}

#[derive(Default)]
struct Registry {
    schema: Option<Arc<Schema>>,
    sources: Vec<Registered>,
}

impl Registry {
    fn add(&mut self, name: &str, config: &SourceConfig) -> bool {
        if self.sources.iter().any(|r| &r.config == config) {
            return false;
        }
        self.sources.push(Registered {
            name: name.to_string(),
            config: config.clone(),
        });
        true
    }
}

/// Drives cache refreshes from snapshot-change notifications
pub struct RefreshCoordinator {
    cache: Arc<SnapshotValueCache>,
    registry: Mutex<Registry>,
    scheduler: Option<BackgroundScheduler>,
}

impl RefreshCoordinator {
    /// Create a coordinator refreshing `cache`
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if background workers cannot be started.
    pub fn new(cache: Arc<SnapshotValueCache>, mode: RefreshMode) -> Result<Self> {
        let scheduler = match mode {
            RefreshMode::Inline => None,
            RefreshMode::Background { workers } => Some(BackgroundScheduler::new(workers)?),
        };
        Ok(RefreshCoordinator {
            cache,
            registry: Mutex::new(Registry::default()),
            scheduler,
        })
    }

    /// The cache this coordinator refreshes
    pub fn cache(&self) -> &Arc<SnapshotValueCache> {
        &self.cache
    }

    /// Replace the registered configurations with every external field of
    /// `schema`. Returns how many distinct configurations are registered.
    pub fn register_schema(&self, schema: &Arc<Schema>) -> usize {
        let mut registry = self.registry.lock();
        registry.schema = Some(Arc::clone(schema));
        registry.sources.clear();
        for field in schema.external_fields() {
            if registry.add(field.name(), field.config()) {
                info!(
                    target: "extscore::refresh",
                    field = field.name(),
                    config = %field.config(),
                    "Registered external field for refresh"
                );
            }
        }
        registry.sources.len()
    }

    /// Register one more configuration, e.g. one bound by a function
    /// template. Returns false if an equal configuration is already known.
    pub fn register(&self, name: &str, config: &SourceConfig) -> bool {
        let added = self.registry.lock().add(name, config);
        if added {
            info!(
                target: "extscore::refresh",
                source = name,
                config = %config,
                "Registered configuration for refresh"
            );
        }
        added
    }

    /// Registered configurations, in registration order
    pub fn registered(&self) -> Vec<SourceConfig> {
        self.registry
            .lock()
            .sources
            .iter()
            .map(|r| r.config.clone())
            .collect()
    }

    /// React to the index opening `new`.
    ///
    /// If `schema` is not the schema last registered, its external fields
    /// are registered first. Every registered configuration is then
    /// refreshed against `new`, unless `previous` is that same snapshot.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if background workers were shut down.
    /// Individual build failures are counted in the report, not returned.
    pub fn on_new_snapshot(
        &self,
        new: &Arc<dyn IndexSnapshot>,
        previous: Option<&Arc<dyn IndexSnapshot>>,
        schema: &Arc<Schema>,
    ) -> Result<RefreshReport> {
        let schema_changed = {
            let registry = self.registry.lock();
            !matches!(&registry.schema, Some(s) if Arc::ptr_eq(s, schema))
        };
        if schema_changed {
            self.register_schema(schema);
        }

        if let Some(previous) = previous {
            if previous.id() == new.id() {
                debug!(target: "extscore::refresh", snapshot = %new.id(), "Snapshot unchanged, nothing to refresh");
                return Ok(RefreshReport::default());
            }
        }

        let sources = self.registry.lock().sources.clone();
        if sources.is_empty() {
            return Ok(RefreshReport::default());
        }

        match &self.scheduler {
            None => Ok(self.refresh_inline(new, &sources)),
            Some(scheduler) => self.refresh_background(scheduler, new, &sources),
        }
    }

    /// Administrative reset: clear the cache, have `provider` commit and
    /// reopen a snapshot, and refresh every registered configuration against
    /// it before returning. Runs on the calling thread in either mode.
    ///
    /// # Errors
    ///
    /// Returns the provider's error if no snapshot could be opened. The cache
    /// stays empty in that case and rebuilds lazily.
    pub fn reset_and_refresh(&self, provider: &dyn SnapshotProvider) -> Result<RefreshReport> {
        info!(target: "extscore::refresh", "Resetting value cache");
        self.cache.reset();
        let snapshot = provider.commit_and_reopen()?;
        let sources = self.registry.lock().sources.clone();
        let report = self.refresh_inline(&snapshot, &sources);
        info!(
            target: "extscore::refresh",
            snapshot = %snapshot.id(),
            refreshed = report.refreshed,
            failed = report.failed,
            "Reset and refresh complete"
        );
        Ok(report)
    }

    /// Wait for queued background refreshes. No-op inline.
    pub fn drain(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.drain();
        }
    }

    /// Stop background workers after they finish queued work. No-op inline.
    pub fn shutdown(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.shutdown();
        }
    }

    /// Background worker counters, if running in background mode
    pub fn scheduler_stats(&self) -> Option<SchedulerStats> {
        self.scheduler.as_ref().map(|s| s.stats())
    }

    fn refresh_inline(&self, snapshot: &Arc<dyn IndexSnapshot>, sources: &[Registered]) -> RefreshReport {
        let started = Instant::now();
        let mut report = RefreshReport {
            snapshot: Some(snapshot.id()),
            ..RefreshReport::default()
        };
        for source in sources {
            match self.cache.refresh(&source.config, snapshot) {
                Ok(_) => report.refreshed += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        target: "extscore::refresh",
                        name = %source.name,
                        snapshot = %snapshot.id(),
                        error = %e,
                        "Refresh failed"
                    );
                }
            }
        }
        report.elapsed = started.elapsed();
        debug!(
            target: "extscore::refresh",
            snapshot = %snapshot.id(),
            refreshed = report.refreshed,
            failed = report.failed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Inline refresh pass complete"
        );
        report
    }

    fn refresh_background(
        &self,
        scheduler: &BackgroundScheduler,
        snapshot: &Arc<dyn IndexSnapshot>,
        sources: &[Registered],
    ) -> Result<RefreshReport> {
        let started = Instant::now();
        let mut report = RefreshReport {
            snapshot: Some(snapshot.id()),
            ..RefreshReport::default()
        };
        for source in sources {
            let cache = Arc::clone(&self.cache);
            let weak: Weak<dyn IndexSnapshot> = Arc::downgrade(snapshot);
            let config = source.config.clone();
            let name = source.name.clone();
            let id = snapshot.id();
            let queued = scheduler.submit((id, source.config.clone()), move || {
                let Some(snapshot) = weak.upgrade() else {
                    debug!(target: "extscore::refresh", snapshot = %id, name = %name, "Snapshot closed before refresh ran");
                    return;
                };
                if let Err(e) = cache.refresh(&config, &snapshot) {
                    warn!(
                        target: "extscore::refresh",
                        name = %name,
                        snapshot = %id,
                        error = %e,
                        "Background refresh failed"
                    );
                }
            })?;
            if queued {
                report.queued += 1;
            }
        }
        report.elapsed = started.elapsed();
        Ok(report)
    }
}

impl Drop for RefreshCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
