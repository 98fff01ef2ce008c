// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]

use std::collections::BTreeSet;

use strand_core::{Cache, GraphSnapshot, NodeId, NodeKind, Query, QueryResult, Value};

/// Parses a query-shape fixture.
pub fn query(source: &str) -> Query {
    Query::parse(source).expect("fixture query parses")
}

/// Converts a `json!` fixture into a payload value.
pub fn payload(json: serde_json::Value) -> Value {
    Value::from(json)
}

/// Writes `json` shaped like `source` to the baseline.
pub fn write(cache: &mut Cache, source: &str, json: serde_json::Value) {
    cache
        .write(&query(source), &payload(json))
        .expect("write succeeds");
}

/// Reads `source` from the optimistic branch.
pub fn read(cache: &Cache, source: &str) -> std::rc::Rc<QueryResult> {
    cache.read(&query(source), true).expect("read succeeds")
}

/// Reads `source` and returns the result as JSON (`null` when missing).
pub fn read_json(cache: &Cache, source: &str) -> serde_json::Value {
    read(cache, source)
        .result
        .as_ref()
        .map_or(serde_json::Value::Null, Value::to_json)
}

/// Shorthand for a set of node ids.
pub fn ids(ids: &[&str]) -> BTreeSet<NodeId> {
    ids.iter().map(|id| NodeId::new(id)).collect()
}

/// Asserts that every edge is mirrored and that no non-root node is
/// unreferenced.
pub fn assert_graph_consistent(graph: &GraphSnapshot) {
    graph.verify_integrity().expect("edges are mirrored");
    for (id, node) in graph.nodes() {
        if id.is_root_query() {
            continue;
        }
        assert!(
            !node.inbound.is_empty(),
            "{id} ({:?}) has no inbound references",
            node.kind
        );
    }
}

/// Ids of every entity node.
pub fn entity_ids(graph: &GraphSnapshot) -> BTreeSet<NodeId> {
    graph
        .nodes()
        .iter()
        .filter(|(_, node)| node.kind == NodeKind::Entity)
        .map(|(id, _)| id.clone())
        .collect()
}
