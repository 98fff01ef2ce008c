// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
mod common;

use std::cell::Cell;
use std::rc::Rc;

use serde_json::json;
use strand_core::{Cache, CacheError, MigrationMap, SerializedGraph, Value};

use common::{query, read_json};

const SHAPE: &str = r#"{ viewer { __typename id name friends(first: 2) { id name } } motd }"#;

fn populated() -> Cache {
    let mut cache = Cache::default();
    common::write(
        &mut cache,
        SHAPE,
        json!({
            "viewer": {
                "__typename": "User",
                "id": 1,
                "name": "ada",
                "friends": [{ "id": 2, "name": "bo" }, { "id": 3, "name": "cy" }]
            },
            "motd": "hi"
        }),
    );
    cache
}

#[test]
fn extracted_graphs_restore_through_json_text() {
    let source = populated();
    let text = serde_json::to_string(&source.extract(false)).expect("serialize");

    let graph: SerializedGraph = serde_json::from_str(&text).expect("deserialize");
    let mut target = Cache::default();
    target.restore(graph, None, Some(&query(SHAPE))).expect("restore");

    assert_eq!(read_json(&target, SHAPE), read_json(&source, SHAPE));
    assert_eq!(target.extract(true), source.extract(true));
    common::assert_graph_consistent(&target.snapshot().baseline);
}

#[test]
fn extracted_nodes_use_the_persisted_layout() {
    let mut cache = Cache::default();
    common::write(&mut cache, "{ viewer { id name } }", json!({ "viewer": { "id": 1, "name": "A" } }));
    let extracted = serde_json::to_value(cache.extract(false)).expect("serialize");
    assert_eq!(
        extracted,
        json!({
            "1": {
                "type": 0,
                "data": { "id": 1, "name": "A" },
                "inbound": [{ "id": "ROOT_QUERY", "path": ["viewer"] }]
            },
            "ROOT_QUERY": {
                "type": 0,
                "data": {},
                "outbound": [{ "id": "1", "path": ["viewer"] }]
            }
        })
    );
}

#[test]
fn unsatisfied_verification_leaves_the_cache_unchanged() {
    let mut cache = populated();
    let before = cache.extract(true);

    let mut other = Cache::default();
    common::write(&mut other, "{ viewer { id } }", json!({ "viewer": { "id": 9 } }));
    let outcome = cache.restore(other.extract(false), None, Some(&query("{ viewer { id email } }")));

    assert!(matches!(outcome, Err(CacheError::UnsatisfiedCache { .. })));
    assert_eq!(cache.extract(true), before);
}

#[test]
fn restoring_applies_migrations() {
    let source = populated();
    let map = MigrationMap::new()
        .with_field("User", "name", |name| {
            Value::from(name.and_then(Value::as_str).unwrap_or_default().to_uppercase())
        })
        .with_field("Query", "motd", |_| Value::from("welcome"));

    let mut target = Cache::default();
    target
        .restore(source.extract(false), Some(&map), None)
        .expect("restore");
    assert_eq!(
        read_json(&target, "{ viewer { name } motd }"),
        json!({ "viewer": { "name": "ADA" }, "motd": "welcome" })
    );
}

#[test]
fn restoring_drops_pending_updates_and_notifies_observers() {
    let source = populated();
    let mut cache = Cache::default();
    let shape = query("{ viewer { name } }");
    let data = Value::from(json!({ "viewer": { "name": "draft" } }));
    cache
        .record_optimistic_update("draft", |transaction| transaction.write(&shape, &data))
        .map(drop)
        .expect("optimistic write");

    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    cache
        .watch(&shape, move |_| counter.set(counter.get() + 1))
        .expect("watch");

    cache.restore(source.extract(false), None, None).expect("restore");
    assert!(cache.snapshot().optimistic_queue.is_empty());
    assert_eq!(calls.get(), 2);
    assert_eq!(read_json(&cache, "{ viewer { name } }"), json!({ "viewer": { "name": "ada" } }));
}

#[test]
fn pruned_extracts_keep_only_what_the_query_reaches() {
    let source = populated();
    let pruned = source
        .extract_pruned(false, &query("{ viewer { id name } motd }"))
        .expect("extract");
    let kept: Vec<_> = pruned.keys().map(ToString::to_string).collect();
    assert_eq!(kept, ["1", "ROOT_QUERY"]);

    let mut target = Cache::default();
    target
        .restore(pruned, None, Some(&query("{ viewer { id name } motd }")))
        .expect("restore");
    common::assert_graph_consistent(&target.snapshot().baseline);
    assert_eq!(
        read_json(&target, "{ viewer { name } motd }"),
        json!({ "viewer": { "name": "ada" }, "motd": "hi" })
    );
    assert!(!common::read(&target, "{ viewer { friends(first: 2) { id } } }").complete);
}

#[test]
fn pruned_lists_read_back_as_missing() {
    let mut cache = Cache::default();
    common::write(
        &mut cache,
        "{ viewer { id pals { id } } }",
        json!({ "viewer": { "id": 1, "pals": [{ "id": 2 }, { "id": 3 }] } }),
    );
    let pruned = cache
        .extract_pruned(true, &query("{ viewer { id } }"))
        .expect("extract");
    let viewer = pruned.values().find(|node| !node.inbound.is_empty()).expect("viewer kept");
    assert_eq!(viewer.data.as_ref().map(Value::to_json), Some(json!({ "id": 1 })));
    assert!(viewer.outbound.is_empty());

    let mut target = Cache::default();
    target.restore(pruned, None, None).expect("restore");
    common::assert_graph_consistent(&target.snapshot().baseline);
    assert!(!common::read(&target, "{ viewer { pals { id } } }").complete);
}
