// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
mod common;

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use serde_json::json;
use strand_core::{Cache, CacheContext, ChangeId, NodeId, Value};

use common::{ids, query};

type Deliveries = Rc<RefCell<Vec<serde_json::Value>>>;

fn watch_viewer(cache: &mut Cache) -> (strand_core::ObserverId, Deliveries) {
    let deliveries: Deliveries = Rc::default();
    let sink = Rc::clone(&deliveries);
    let id = cache
        .watch(&query("{ viewer { id name } }"), move |result| {
            let json = result.result.as_ref().map_or(serde_json::Value::Null, Value::to_json);
            sink.borrow_mut().push(json);
        })
        .expect("watch");
    (id, deliveries)
}

#[test]
fn observers_fire_only_for_overlapping_edits() {
    let mut cache = Cache::default();
    let (_, deliveries) = watch_viewer(&mut cache);
    assert_eq!(deliveries.borrow().len(), 1);

    common::write(&mut cache, "{ viewer { id name } }", json!({ "viewer": { "id": 1, "name": "A" } }));
    assert_eq!(deliveries.borrow().len(), 2);
    assert_eq!(
        deliveries.borrow().last(),
        Some(&json!({ "viewer": { "id": 1, "name": "A" } }))
    );

    // Adds a root field, which edits the root the observer read.
    common::write(&mut cache, "{ other { id name } }", json!({ "other": { "id": 2, "name": "x" } }));
    assert_eq!(deliveries.borrow().len(), 3);

    common::write(&mut cache, "{ other { id name } }", json!({ "other": { "id": 2, "name": "y" } }));
    assert_eq!(deliveries.borrow().len(), 3);

    common::write(&mut cache, "{ viewer { id name } }", json!({ "viewer": { "id": 1, "name": "B" } }));
    assert_eq!(deliveries.borrow().len(), 4);
}

#[test]
fn unwatched_observers_stay_quiet() {
    let mut cache = Cache::default();
    let (id, deliveries) = watch_viewer(&mut cache);
    assert!(cache.unwatch(id));
    assert!(!cache.unwatch(id));

    common::write(&mut cache, "{ viewer { id name } }", json!({ "viewer": { "id": 1, "name": "A" } }));
    assert_eq!(deliveries.borrow().len(), 1);
}

#[test]
fn observers_see_optimistic_data_and_its_rollback() {
    let mut cache = Cache::default();
    common::write(&mut cache, "{ viewer { id name } }", json!({ "viewer": { "id": 1, "name": "A" } }));
    let (_, deliveries) = watch_viewer(&mut cache);

    let shape = query("{ viewer { id name } }");
    let data = Value::from(json!({ "viewer": { "id": 1, "name": "B" } }));
    cache
        .record_optimistic_update("rename", |transaction| transaction.write(&shape, &data))
        .map(drop)
        .expect("optimistic write");
    cache.rollback(&ChangeId::from("rename")).expect("rollback");

    let names: Vec<_> = deliveries
        .borrow()
        .iter()
        .map(|delivery| delivery["viewer"]["name"].clone())
        .collect();
    assert_eq!(names, [json!("A"), json!("B"), json!("A")]);
}

#[test]
fn change_callbacks_receive_edited_ids() {
    let edits: Rc<RefCell<Vec<BTreeSet<NodeId>>>> = Rc::default();
    let sink = Rc::clone(&edits);
    let context = CacheContext::default().with_on_change(move |_, edited| {
        sink.borrow_mut().push(edited.clone());
    });
    let mut cache = Cache::new(context);

    common::write(&mut cache, "{ viewer { id name } }", json!({ "viewer": { "id": 1, "name": "A" } }));
    common::write(&mut cache, "{ viewer { id name } }", json!({ "viewer": { "id": 1, "name": "B" } }));
    assert_eq!(*edits.borrow(), [ids(&["1", "ROOT_QUERY"]), ids(&["1"])]);
}

#[test]
fn unaffected_reads_carry_over_to_the_next_snapshot() {
    let mut cache = Cache::default();
    common::write(
        &mut cache,
        "{ viewer { id name } other { id name } }",
        json!({ "viewer": { "id": 1, "name": "A" }, "other": { "id": 2, "name": "x" } }),
    );
    let shape = query("{ viewer { name } }");
    let before = cache.read(&shape, true).expect("read");

    common::write(&mut cache, "{ other { id name } }", json!({ "other": { "id": 2, "name": "y" } }));
    let carried = cache.read(&shape, true).expect("read");
    assert!(Rc::ptr_eq(&before, &carried));

    common::write(&mut cache, "{ viewer { id name } }", json!({ "viewer": { "id": 1, "name": "B" } }));
    let fresh = cache.read(&shape, true).expect("read");
    assert!(!Rc::ptr_eq(&before, &fresh));
    assert_eq!(
        fresh.result.as_ref().map(Value::to_json),
        Some(json!({ "viewer": { "name": "B" } }))
    );
}

#[test]
fn observers_of_redirected_fields_see_the_written_field() {
    let context = CacheContext::default().with_resolver_redirect("Query", "user", |args| {
        args.get("id").and_then(Value::as_str).map(NodeId::new)
    });
    let mut cache = Cache::new(context);
    common::write(&mut cache, "{ viewer { id name } }", json!({ "viewer": { "id": "1", "name": "A" } }));

    let deliveries: Deliveries = Rc::default();
    let sink = Rc::clone(&deliveries);
    cache
        .watch(&query(r#"{ user(id: "1") { name } }"#), move |result| {
            let json = result.result.as_ref().map_or(serde_json::Value::Null, Value::to_json);
            sink.borrow_mut().push(json);
        })
        .expect("watch");

    common::write(
        &mut cache,
        r#"{ user(id: "1") { id name } }"#,
        json!({ "user": { "id": "2", "name": "B" } }),
    );
    assert_eq!(
        *deliveries.borrow(),
        [json!({ "user": { "name": "A" } }), json!({ "user": { "name": "B" } })]
    );
}
