//! Snapshot-change refresh and administrative reset.

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use common::*;

#[test]
fn new_snapshot_prewarms_every_declared_field() {
    let fx = Fixture::inline();
    fx.store.zadd("popularity", "a", 3.0);
    fx.store.set("stock:1", "10");
    let snap = fx.commit(&[("a", "1")]);

    let report = fx.scores.on_new_snapshot(&snap, None).unwrap();
    assert_eq!(report.refreshed, 3);
    assert_eq!(report.failed, 0);

    let cache = fx.scores.cache();
    for field in ["popularity", "stock", "legacy"] {
        assert!(cache.contains(&fx.config(field), snap.id()), "{} not warmed", field);
    }

    // Served from the warm entry, no further connections.
    let opened = fx.store.connections_opened();
    assert_eq!(fx.values("popularity", &snap), vec![3.0]);
    assert_eq!(fx.values("stock", &snap), vec![10.0]);
    assert_eq!(fx.store.connections_opened(), opened);
}

#[test]
fn replacing_snapshot_refreshes_new_one() {
    let fx = Fixture::inline();
    fx.store.zadd("popularity", "a", 1.0);
    let first = fx.commit(&[("a", "1")]);
    fx.scores.on_new_snapshot(&first, None).unwrap();

    fx.store.zadd("popularity", "b", 2.0);
    let second = fx.commit(&[("b", "2")]);
    let report = fx.scores.on_new_snapshot(&second, Some(&first)).unwrap();
    assert_eq!(report.snapshot, Some(second.id()));
    assert_eq!(fx.values("popularity", &second), vec![1.0, 2.0]);
    // The old snapshot keeps the array it was built with.
    assert_eq!(fx.values("popularity", &first), vec![1.0]);
}

#[test]
fn unchanged_snapshot_is_not_refreshed() {
    let fx = Fixture::inline();
    let snap = fx.commit(&[("a", "1")]);
    fx.scores.on_new_snapshot(&snap, None).unwrap();
    let opened = fx.store.connections_opened();

    let report = fx.scores.on_new_snapshot(&snap, Some(&snap)).unwrap();
    assert_eq!(report.refreshed, 0);
    assert_eq!(fx.store.connections_opened(), opened);
}

#[test]
fn schema_without_external_fields_is_noop() {
    let schema = Arc::new(Schema::from_toml_str("unique_key = \"id\"\n[[fields]]\nname = \"id\"\n").unwrap());
    let store = InMemoryStore::new();
    let scores = ExtScore::new(Arc::clone(&schema), Arc::new(store.clone()), RefreshMode::Inline).unwrap();
    let index = MemoryIndex::new(schema);
    index.add(&[("id", "a")]);
    let snap: Arc<dyn IndexSnapshot> = index.commit().unwrap();

    let report = scores.on_new_snapshot(&snap, None).unwrap();
    assert_eq!(report.refreshed, 0);
    assert!(scores.cache().is_empty());
    assert_eq!(store.connections_opened(), 0);
}

#[test]
fn background_refresh_warms_after_drain() {
    let fx = Fixture::new(RefreshMode::Background { workers: 2 });
    fx.store.zadd("popularity", "a", 4.0);
    let snap = fx.commit(&[("a", "1"), ("b", "2")]);

    let report = fx.scores.on_new_snapshot(&snap, None).unwrap();
    assert_eq!(report.queued, 3);
    fx.scores.drain();

    assert!(fx.scores.cache().contains(&fx.config("popularity"), snap.id()));
    assert_eq!(fx.values("popularity", &snap), vec![4.0, 0.0]);
    fx.scores.shutdown();
}

#[test]
fn reset_and_refresh_rebuilds_synchronously() {
    let fx = Fixture::new(RefreshMode::Background { workers: 1 });
    fx.store.zadd("popularity", "a", 1.0);
    let old = fx.commit(&[("a", "1")]);
    fx.scores.on_new_snapshot(&old, None).unwrap();
    fx.scores.drain();

    fx.store.zadd("popularity", "a", 8.0);
    fx.index.add(&[("id", "z")]);
    let report = fx.scores.reset_and_refresh(&fx.index).unwrap();
    let fresh: Arc<dyn IndexSnapshot> = fx.index.current().unwrap();

    assert_eq!(report.refreshed, 3);
    assert_eq!(report.snapshot, Some(fresh.id()));
    assert!(!fx.scores.cache().contains(&fx.config("popularity"), old.id()));
    assert!(fx.scores.cache().contains(&fx.config("popularity"), fresh.id()));
    assert_eq!(fx.values("popularity", &fresh), vec![8.0, 0.0]);
}

#[test]
fn function_bindings_join_refresh_set() {
    let fx = Fixture::inline();
    fx.store.zadd("boost", "2", 5.0);
    let snap = fx.commit(&[("a", "1"), ("b", "2")]);

    let source = fx.scores.function("boost", "boost(sku)").unwrap();
    assert_eq!(source.config().key_encoding(), TermEncoding::Long);
    assert_eq!(fx.scores.coordinator().registered().len(), 4);

    fx.scores.on_new_snapshot(&snap, None).unwrap();
    assert!(fx.scores.cache().contains(source.config(), snap.id()));
    let values = source.top_level(&snap).unwrap();
    assert_eq!(values.float_val(0), 1.0);
    assert_eq!(values.float_val(1), 5.0);
}

#[test]
fn unknown_function_rejected() {
    let fx = Fixture::inline();
    let err = fx.scores.function("missing", "missing(id)").unwrap_err();
    assert!(matches!(err, extscore::Error::Configuration(_)));
}
