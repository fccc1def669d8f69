//! High-level wrapper tying a schema to one shared cache and coordinator.

use std::sync::Arc;

use extscore_core::{Error, IndexSnapshot, Result, SnapshotProvider};
use extscore_engine::{
    DenseValueBuilder, ExternalValueSource, RefreshCoordinator, RefreshMode, RefreshReport,
    Schema, SnapshotValueCache,
};
use extscore_store::{RedisConnector, StoreConnector};

/// Value sources for one schema, sharing a cache and a refresh coordinator
///
/// Construct one per process (or per core, in a multi-index host) and hand
/// out the sources it creates. Sources with equal configurations share cache
/// entries.
pub struct ExtScore {
    schema: Arc<Schema>,
    cache: Arc<SnapshotValueCache>,
    coordinator: RefreshCoordinator,
}

impl ExtScore {
    /// Build values through `connector` and register `schema`'s external
    /// fields for refresh.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if background refresh workers cannot start.
    pub fn new(
        schema: Arc<Schema>,
        connector: Arc<dyn StoreConnector>,
        mode: RefreshMode,
    ) -> Result<Self> {
        let builder = DenseValueBuilder::new(connector);
        let cache = Arc::new(SnapshotValueCache::new(Arc::new(builder)));
        let coordinator = RefreshCoordinator::new(Arc::clone(&cache), mode)?;
        coordinator.register_schema(&schema);
        Ok(ExtScore {
            schema,
            cache,
            coordinator,
        })
    }

    /// Like [`ExtScore::new`], connecting to Redis over TCP
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if background refresh workers cannot start.
    pub fn redis(schema: Arc<Schema>, mode: RefreshMode) -> Result<Self> {
        Self::new(schema, Arc::new(RedisConnector), mode)
    }

    /// The schema sources are built from
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The shared value cache
    pub fn cache(&self) -> &Arc<SnapshotValueCache> {
        &self.cache
    }

    /// The refresh coordinator
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Source for a declared external field
    pub fn source(&self, field: &str) -> Option<ExternalValueSource> {
        self.schema
            .external_field(field)
            .map(|f| ExternalValueSource::new(f.config().clone(), Arc::clone(&self.cache)))
    }

    /// Source for a function call such as `popularity(sku)` against the
    /// template registered as `name`. The bound configuration joins the
    /// refresh set.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if no template is named `name`, and
    /// `InvalidOperation` if the call is not `name(field)`.
    pub fn function(&self, name: &str, call: &str) -> Result<ExternalValueSource> {
        let template = self
            .schema
            .function(name)
            .ok_or_else(|| Error::configuration(format!("unknown function '{}'", name)))?;
        let config = template.parse_call(call, self.schema.as_ref())?;
        self.coordinator.register(call, &config);
        Ok(ExternalValueSource::new(config, Arc::clone(&self.cache)))
    }

    /// Notify that the index opened `new`, replacing `previous`
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if background workers were shut down.
    pub fn on_new_snapshot(
        &self,
        new: &Arc<dyn IndexSnapshot>,
        previous: Option<&Arc<dyn IndexSnapshot>>,
    ) -> Result<RefreshReport> {
        self.coordinator.on_new_snapshot(new, previous, &self.schema)
    }

    /// Clear the cache, reopen a snapshot through `provider`, and refresh
    /// every registered configuration before returning
    ///
    /// # Errors
    ///
    /// Returns the provider's error if no snapshot could be opened.
    pub fn reset_and_refresh(&self, provider: &dyn SnapshotProvider) -> Result<RefreshReport> {
        self.coordinator.reset_and_refresh(provider)
    }

    /// Wait for background refreshes to finish
    pub fn drain(&self) {
        self.coordinator.drain();
    }

    /// Stop background refresh workers
    pub fn shutdown(&self) {
        self.coordinator.shutdown();
    }
}
