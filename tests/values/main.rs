//! Scoring and sort readers over multi-segment snapshots.

#[path = "../common/mod.rs"]
mod common;

use common::*;

#[test]
fn leaf_readers_offset_by_doc_base() {
    let fx = Fixture::inline();
    fx.store.zadd("popularity", "a", 1.0);
    fx.store.zadd("popularity", "c", 3.0);
    fx.commit(&[("a", "1"), ("b", "2")]);
    let snap = fx.commit(&[("c", "3")]);

    let source = fx.scores.source("popularity").unwrap();
    let leaves = snap.leaves();
    assert_eq!(leaves.len(), 2);
    assert_eq!(leaves[1].doc_base, 2);

    let second = source.values(&snap, &leaves[1]).unwrap();
    assert_eq!(second.float_val(0), 3.0);
    assert_eq!(second.double_val(0), 3.0);
    assert_eq!(second.str_val(0), "3");
    // Past the end of the snapshot reads the default.
    assert_eq!(second.float_val(10), 0.0);
}

#[test]
fn sources_for_same_field_share_values() {
    let fx = Fixture::inline();
    fx.store.zadd("popularity", "a", 1.0);
    let snap = fx.commit(&[("a", "1")]);

    let one = fx.scores.source("popularity").unwrap();
    let two = fx.scores.source("popularity").unwrap();
    assert_eq!(one, two);

    let a = one.top_level(&snap).unwrap();
    let b = two.top_level(&snap).unwrap();
    assert!(ValueArray::ptr_eq(a.array(), b.array()));
    assert_eq!(fx.store.connections_opened(), 1);
}

#[test]
fn sort_by_external_value() {
    let fx = Fixture::inline();
    fx.store.set("stock:1", "5");
    fx.store.set("stock:2", "50");
    fx.store.set("stock:3", "0.5");
    let snap = fx.commit(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")]);

    let source = fx.scores.source("stock").unwrap();
    let mut docs = vec![0, 1, 2, 3];
    source.sort_docs(&snap, &mut docs, true).unwrap();
    // d has no entry and keeps -1.
    assert_eq!(docs, vec![1, 0, 2, 3]);

    source.sort_docs(&snap, &mut docs, false).unwrap();
    assert_eq!(docs, vec![3, 2, 0, 1]);
}

#[test]
fn undeclared_field_has_no_source() {
    let fx = Fixture::inline();
    assert!(fx.scores.source("id").is_none());
}

#[test]
fn description_masks_password() {
    let schema = Schema::from_toml_str(
        r#"
unique_key = "id"

[[fields]]
name = "id"

[[external_fields]]
name = "secret"
dataType = "z"
redisKey = "s"
password = "hunter2"
"#,
    )
    .unwrap();
    let config = schema.external_field("secret").unwrap().config().clone();
    let cache = std::sync::Arc::new(SnapshotValueCache::new(std::sync::Arc::new(
        extscore::DenseValueBuilder::new(std::sync::Arc::new(InMemoryStore::new())),
    )));
    let source = extscore::ExternalValueSource::new(config, cache);
    assert!(!source.description().contains("hunter2"));
    assert!(!format!("{:?}", source).contains("hunter2"));
}
