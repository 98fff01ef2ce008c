// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
mod common;

use std::rc::Rc;

use serde_json::json;
use strand_core::{Cache, CacheContext, CacheError, ChangeId, Query, Value};

use common::{payload, query, read, read_json};

const VIEWER: &str = "{ viewer { id name } }";

fn viewer_cache() -> Cache {
    let mut cache = Cache::default();
    common::write(&mut cache, VIEWER, json!({ "viewer": { "id": 1, "name": "A" } }));
    cache
}

fn rename(cache: &mut Cache, change_id: &str, name: &str) {
    let shape = query(VIEWER);
    let data = payload(json!({ "viewer": { "id": 1, "name": name } }));
    cache
        .record_optimistic_update(change_id, |transaction| transaction.write(&shape, &data))
        .map(drop)
        .expect("optimistic write");
}

#[test]
fn transactions_read_their_own_writes() {
    let mut cache = viewer_cache();
    let shape = query(VIEWER);
    let mut seen = None;
    let outcome: Result<_, CacheError> = cache.transaction(|transaction| {
        transaction.write(&shape, &payload(json!({ "viewer": { "id": 1, "name": "B" } })))?;
        let inside = transaction.read(&query("{ viewer { name } }"))?;
        seen = inside.result.as_ref().map(Value::to_json);
        Ok(())
    });
    outcome.expect("transaction commits");
    assert_eq!(seen, Some(json!({ "viewer": { "name": "B" } })));
    assert_eq!(read_json(&cache, "{ viewer { name } }"), json!({ "viewer": { "name": "B" } }));
}

#[test]
fn optimistic_updates_stack_and_roll_back_independently() {
    let mut cache = viewer_cache();
    rename(&mut cache, "a", "B");
    let status = query("{ status }");
    cache
        .record_optimistic_update("b", |transaction| {
            transaction.write(&status, &payload(json!({ "status": "busy" })))
        })
        .map(drop)
        .expect("optimistic write");
    rename(&mut cache, "c", "C");

    assert_eq!(cache.snapshot().optimistic_queue.len(), 3);
    assert_eq!(
        read_json(&cache, "{ viewer { name } status }"),
        json!({ "viewer": { "name": "C" }, "status": "busy" })
    );
    let baseline = cache.read(&query("{ viewer { name } status }"), false).expect("read");
    assert!(!baseline.complete);

    cache.rollback(&ChangeId::from("b")).expect("rollback");
    assert_eq!(cache.snapshot().optimistic_queue.len(), 2);
    assert_eq!(read_json(&cache, "{ viewer { name } }"), json!({ "viewer": { "name": "C" } }));
    assert!(!read(&cache, "{ status }").complete);

    cache.rollback(&ChangeId::from("a")).expect("rollback");
    assert_eq!(read_json(&cache, "{ viewer { name } }"), json!({ "viewer": { "name": "C" } }));

    cache.rollback(&ChangeId::from("c")).expect("rollback");
    assert_eq!(read_json(&cache, "{ viewer { name } }"), json!({ "viewer": { "name": "A" } }));
    let snapshot = cache.snapshot();
    assert!(Rc::ptr_eq(&snapshot.baseline, &snapshot.optimistic));
}

#[test]
fn baseline_writes_replay_pending_updates() {
    let mut cache = viewer_cache();
    rename(&mut cache, "pending", "B");
    common::write(
        &mut cache,
        "{ viewer { id name email } }",
        json!({ "viewer": { "id": 1, "name": "Z", "email": "z@example.com" } }),
    );

    assert_eq!(
        read_json(&cache, "{ viewer { name email } }"),
        json!({ "viewer": { "name": "B", "email": "z@example.com" } })
    );
    let baseline = cache
        .read(&query("{ viewer { name email } }"), false)
        .expect("read");
    assert_eq!(
        baseline.result.as_ref().map(Value::to_json),
        Some(json!({ "viewer": { "name": "Z", "email": "z@example.com" } }))
    );

    cache.rollback(&ChangeId::from("pending")).expect("rollback");
    assert_eq!(read_json(&cache, "{ viewer { name } }"), json!({ "viewer": { "name": "Z" } }));
}

#[test]
fn rolling_back_an_unknown_change_is_harmless() {
    let mut cache = viewer_cache();
    rename(&mut cache, "known", "B");
    cache.rollback(&ChangeId::from("unknown")).expect("rollback");
    assert_eq!(cache.snapshot().optimistic_queue.len(), 1);
    assert_eq!(read_json(&cache, "{ viewer { name } }"), json!({ "viewer": { "name": "B" } }));
}

#[test]
fn entity_updaters_write_derived_data() {
    let context = CacheContext::default().with_entity_updater("User", |transaction, current, _previous| {
        let Some(id) = current.and_then(|data| data.get("id")) else {
            return Ok(());
        };
        let shape = Query::parse("{ lastEditedUser { id } }")?;
        transaction.write(&shape, &Value::from(json!({ "lastEditedUser": { "id": id.to_json() } })))
    });
    let mut cache = Cache::new(context);
    common::write(
        &mut cache,
        "{ viewer { __typename id name } }",
        json!({ "viewer": { "__typename": "User", "id": 1, "name": "A" } }),
    );
    assert_eq!(
        read_json(&cache, "{ lastEditedUser { id name } }"),
        json!({ "lastEditedUser": { "id": 1, "name": "A" } })
    );
}

#[test]
fn updater_failures_abort_the_transaction() {
    let context = CacheContext::default().with_entity_updater("User", |_, _, _| {
        Err(CacheError::Migration {
            message: "refused".into(),
        })
    });
    let mut cache = Cache::new(context);
    let outcome = cache.write(
        &query("{ viewer { __typename id } }"),
        &payload(json!({ "viewer": { "__typename": "User", "id": 1 } })),
    );
    assert!(outcome.is_err());
    assert!(cache.snapshot().baseline.is_empty());
}

