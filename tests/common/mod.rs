//! Shared test utilities for all integration test suites.
//!
//! Import via `mod common;` from any test's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

pub use extscore::{
    ExtScore, IndexSnapshot, InMemoryStore, LayoutKind, MemoryIndex, RefreshMode, Schema,
    SnapshotValueCache, SourceConfig, StoreConnector, TermEncoding, ValueArray,
};

// ============================================================================
// Schemas
// ============================================================================

/// Sorted-set popularity by `id`, prefixed-key stock by `sku` (long), and a
/// hash-layout field that never loads anything.
pub const SCHEMA: &str = r#"
unique_key = "id"

[[fields]]
name = "id"

[[fields]]
name = "sku"
encoding = "long"

[[external_fields]]
name = "popularity"
dataType = "z"
redisKey = "popularity"
scanCount = 2

[[external_fields]]
name = "stock"
dataType = "k"
redisKey = "stock"
keyField = "sku"
defVal = -1

[[external_fields]]
name = "legacy"
dataType = "h"
redisKey = "legacy"
defVal = 7

[[functions]]
name = "boost"
dataType = "z"
redisKey = "boost"
defVal = 1
"#;

// ============================================================================
// Fixture
// ============================================================================

/// Store, index and wrapper sharing one schema
pub struct Fixture {
    pub store: InMemoryStore,
    pub schema: Arc<Schema>,
    pub index: MemoryIndex,
    pub scores: ExtScore,
}

impl Fixture {
    pub fn new(mode: RefreshMode) -> Self {
        let schema = Arc::new(Schema::from_toml_str(SCHEMA).unwrap());
        let store = InMemoryStore::new();
        let scores = ExtScore::new(Arc::clone(&schema), Arc::new(store.clone()), mode).unwrap();
        let index = MemoryIndex::new(Arc::clone(&schema));
        Fixture {
            store,
            schema,
            index,
            scores,
        }
    }

    pub fn inline() -> Self {
        Self::new(RefreshMode::Inline)
    }

    /// Add documents `(id, sku)` and open a snapshot
    pub fn commit(&self, docs: &[(&str, &str)]) -> Arc<dyn IndexSnapshot> {
        for (id, sku) in docs {
            self.index.add(&[("id", *id), ("sku", *sku)]);
        }
        self.index.commit().unwrap()
    }

    pub fn config(&self, field: &str) -> SourceConfig {
        self.schema.external_field(field).unwrap().config().clone()
    }

    /// Top-level values of `field` over `snapshot`
    pub fn values(&self, field: &str, snapshot: &Arc<dyn IndexSnapshot>) -> Vec<f32> {
        self.scores
            .cache()
            .get(&self.config(field), snapshot)
            .unwrap()
            .to_vec()
    }
}

// ============================================================================
// Log capture
// ============================================================================

/// One captured event
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub target: String,
    pub level: Level,
    pub message: String,
}

/// Events recorded by [`capture_logs`]
#[derive(Debug, Clone, Default)]
pub struct LogStore(Arc<Mutex<Vec<CapturedEvent>>>);

impl LogStore {
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.0.lock().clone()
    }

    /// Whether an event at `level` on `target` was recorded
    pub fn has(&self, level: Level, target: &str) -> bool {
        self.0
            .lock()
            .iter()
            .any(|e| e.level == level && e.target == target)
    }
}

struct CaptureLayer {
    store: LogStore,
}

struct MessageVisitor<'a>(&'a mut String);

impl Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            *self.0 = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = String::new();
        event.record(&mut MessageVisitor(&mut message));
        self.store.0.lock().push(CapturedEvent {
            target: event.metadata().target().to_string(),
            level: *event.metadata().level(),
            message,
        });
    }
}

/// Record events emitted on the current thread until the guard drops
pub fn capture_logs() -> (LogStore, tracing::subscriber::DefaultGuard) {
    let store = LogStore::default();
    let subscriber = tracing_subscriber::registry().with(CaptureLayer {
        store: store.clone(),
    });
    let guard = tracing::subscriber::set_default(subscriber);
    (store, guard)
}
