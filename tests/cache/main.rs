//! Cache behavior against real builds over the in-memory store.

#[path = "../common/mod.rs"]
mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::*;
use extscore::{DenseValueBuilder, StoreConnector};
use proptest::prelude::*;
use tracing::Level;

fn popularity_store(fx: &Fixture) {
    fx.store.zadd("popularity", "a", 1.0);
    fx.store.zadd("popularity", "b", 2.0);
}

#[test]
fn sorted_set_resolves_onto_docs() {
    let fx = Fixture::inline();
    popularity_store(&fx);
    let snap = fx.commit(&[("a", "1"), ("b", "2"), ("c", "3")]);

    assert_eq!(fx.values("popularity", &snap), vec![1.0, 2.0, 0.0]);
}

#[test]
fn prefixed_keys_resolve_through_encoded_field() {
    let fx = Fixture::inline();
    fx.store.set("orders:7", "3.5");
    fx.store.set("stock:9", "4.0");
    fx.store.set("stock:7", "not-a-number");
    fx.store.set("stock", "5");
    let snap = fx.commit(&[("a", "1"), ("b", "2"), ("c", "9")]);

    assert_eq!(fx.values("stock", &snap), vec![-1.0, -1.0, 4.0]);
}

#[test]
fn hash_layout_is_all_default_and_never_connects() {
    let fx = Fixture::inline();
    fx.store.hset("legacy", "a", "3");
    let snap = fx.commit(&[("a", "1"), ("b", "2")]);

    assert_eq!(fx.values("legacy", &snap), vec![7.0, 7.0]);
    assert_eq!(fx.store.connections_opened(), 0);
}

#[test]
fn short_page_ends_sorted_set_scan() {
    let fx = Fixture::inline();
    fx.store.zadd("popularity", "a", 1.0);
    fx.store.zadd("popularity", "b", 2.0);
    fx.store.zadd("popularity", "c", 3.0);
    fx.store.cap_range_replies(Some(1));
    let snap = fx.commit(&[("a", "1"), ("b", "2"), ("c", "3")]);

    // scanCount is 2; a one-entry page looks like the end of the set.
    assert_eq!(fx.values("popularity", &snap), vec![1.0, 0.0, 0.0]);
}

#[test]
fn unreachable_store_degrades_to_defaults_with_error_log() {
    let fx = Fixture::inline();
    popularity_store(&fx);
    fx.store.set_unreachable(true);
    let snap = fx.commit(&[("a", "1"), ("b", "2")]);

    let (logs, _guard) = capture_logs();
    assert_eq!(fx.values("popularity", &snap), vec![0.0, 0.0]);
    assert!(logs.has(Level::ERROR, "extscore::scan"));
}

#[test]
fn failed_auth_degrades_to_defaults() {
    let store = InMemoryStore::new();
    store.require_password(Some("secret"));
    store.zadd("popularity", "a", 1.0);

    let mut schema = Schema::new(Some("id"));
    schema.add_field("id", TermEncoding::Text).unwrap();
    let index = MemoryIndex::new(Arc::new(schema));
    index.add(&[("id", "a")]);
    let snap: Arc<dyn IndexSnapshot> = index.commit().unwrap();

    let builder = DenseValueBuilder::new(Arc::new(store.clone()));
    let wrong = SourceConfig::new(LayoutKind::SortedSet, "popularity", "id").with_password("nope");
    let (values, stats) = builder.build(&wrong, snap.as_ref()).unwrap();
    assert_eq!(values.as_slice(), &[0.0]);
    assert!(stats.unavailable);

    let right = SourceConfig::new(LayoutKind::SortedSet, "popularity", "id").with_password("secret");
    let (values, _) = builder.build(&right, snap.as_ref()).unwrap();
    assert_eq!(values.as_slice(), &[1.0]);
}

#[test]
fn missing_password_is_an_auth_failure() {
    let fx = Fixture::inline();
    popularity_store(&fx);
    fx.store.require_password(Some("secret"));
    let snap = fx.commit(&[("a", "1"), ("b", "2")]);

    let (logs, _guard) = capture_logs();
    assert_eq!(fx.values("popularity", &snap), vec![0.0, 0.0]);
    assert!(logs.has(Level::ERROR, "extscore::scan"));
    assert!(!logs.has(Level::WARN, "extscore::scan"));
}

#[test]
fn concurrent_readers_share_one_build() {
    let fx = Fixture::inline();
    popularity_store(&fx);
    let snap = fx.commit(&[("a", "1"), ("b", "2")]);
    let cache = Arc::clone(fx.scores.cache());
    let config = fx.config("popularity");
    let barrier = Arc::new(Barrier::new(16));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let snap = Arc::clone(&snap);
            let config = config.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.get(&config, &snap).unwrap()
            })
        })
        .collect();

    let arrays: Vec<ValueArray> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(fx.store.connections_opened(), 1);
    assert!(arrays.iter().all(|a| ValueArray::ptr_eq(a, &arrays[0])));
}

#[test]
fn refresh_reflects_latest_scan_only() {
    let fx = Fixture::inline();
    popularity_store(&fx);
    let snap = fx.commit(&[("a", "1"), ("b", "2")]);
    let cache = fx.scores.cache();
    let config = fx.config("popularity");

    let before = cache.get(&config, &snap).unwrap();
    fx.store.del("popularity");
    fx.store.zadd("popularity", "b", 9.0);
    let after = cache.refresh(&config, &snap).unwrap();

    assert_eq!(before.as_slice(), &[1.0, 2.0]);
    assert_eq!(after.as_slice(), &[0.0, 9.0]);
    assert!(ValueArray::ptr_eq(&cache.get(&config, &snap).unwrap(), &after));
}

#[test]
fn reset_rebuilds_on_next_get() {
    let fx = Fixture::inline();
    popularity_store(&fx);
    let snap = fx.commit(&[("a", "1")]);

    fx.values("popularity", &snap);
    fx.scores.cache().reset();
    fx.store.zadd("popularity", "a", 5.0);
    assert_eq!(fx.values("popularity", &snap), vec![5.0]);
    assert_eq!(fx.store.connections_opened(), 2);
}

#[test]
fn scan_timeout_keeps_gathered_entries() {
    let fx = Fixture::inline();
    for (i, id) in ["a", "b", "c", "d", "e", "f"].iter().enumerate() {
        fx.store.zadd("popularity", *id, i as f64 + 1.0);
    }
    let snap = fx.commit(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5"), ("f", "6")]);

    // The first range call succeeds, the second fails like a timed-out socket.
    fx.store.fail_after(Some(1));
    let values = fx.values("popularity", &snap);
    assert_eq!(&values[..3], &[1.0, 2.0, 3.0]);
    assert_eq!(&values[3..], &[0.0, 0.0, 0.0]);
}

#[test]
fn closed_snapshot_entries_are_evicted() {
    let fx = Fixture::inline();
    popularity_store(&fx);
    let snap = fx.commit(&[("a", "1")]);
    let id = snap.id();
    let config = fx.config("popularity");

    fx.values("popularity", &snap);
    assert!(fx.scores.cache().contains(&config, id));

    let next = fx.commit(&[("b", "2")]);
    drop(snap);
    assert!(!fx.scores.cache().contains(&config, id));
    assert_eq!(fx.values("popularity", &next), vec![1.0, 2.0]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn docs_without_store_entry_keep_default(
        present in proptest::collection::btree_map("[a-z]{1,6}", -100.0f32..100.0, 0..8),
        absent in proptest::collection::btree_set("[A-Z]{1,6}", 1..8),
        default in -10.0f32..10.0,
    ) {
        let store = InMemoryStore::new();
        for (member, score) in &present {
            store.zadd("pop", member.clone(), f64::from(*score));
        }

        let mut schema = Schema::new(Some("id"));
        schema.add_field("id", TermEncoding::Text).unwrap();
        let index = MemoryIndex::new(Arc::new(schema));
        for id in present.keys().chain(absent.iter()) {
            index.add(&[("id", id.as_str())]);
        }
        let snap: Arc<dyn IndexSnapshot> = index.commit().unwrap();

        let connector: Arc<dyn StoreConnector> = Arc::new(store);
        let builder = DenseValueBuilder::new(connector);
        let config = SourceConfig::new(LayoutKind::SortedSet, "pop", "id").with_default_value(default);
        let (values, _) = builder.build(&config, snap.as_ref()).unwrap();

        let n_present = present.len();
        for (doc, score) in present.values().enumerate() {
            prop_assert_eq!(values[doc], *score);
        }
        for doc in n_present..values.len() {
            prop_assert_eq!(values[doc].to_bits(), default.to_bits());
        }
    }
}
