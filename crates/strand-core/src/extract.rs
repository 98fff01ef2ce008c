// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persisted form of a graph snapshot.
//!
//! The serialized graph maps every node id to
//! `{ "type": 0 | 1, "data"?, "inbound"?, "outbound"? }`, where type `0` is
//! an entity and `1` a parameterized value. Entity references inside `data`
//! are placeholders (see [`NodeSnapshot`]): a reference at the root is
//! `null` and a nested one is absent. `data` is omitted entirely for nodes
//! that never had a value written.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::instrument;

use crate::context::CacheContext;
use crate::error::CacheError;
use crate::graph::GraphSnapshot;
use crate::ident::NodeId;
use crate::node::{NodeKind, NodeReference, NodeSnapshot};
use crate::value::{PathPart, Value};

/// Numeric tag of a serialized node's kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeSnapshotType {
    /// [`NodeKind::Entity`].
    Entity = 0,
    /// [`NodeKind::ParameterizedValue`].
    ParameterizedValue = 1,
}

impl From<NodeKind> for NodeSnapshotType {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Entity => Self::Entity,
            NodeKind::ParameterizedValue => Self::ParameterizedValue,
        }
    }
}

impl From<NodeSnapshotType> for NodeKind {
    fn from(kind: NodeSnapshotType) -> Self {
        match kind {
            NodeSnapshotType::Entity => Self::Entity,
            NodeSnapshotType::ParameterizedValue => Self::ParameterizedValue,
        }
    }
}

impl Serialize for NodeSnapshotType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for NodeSnapshotType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(Self::Entity),
            1 => Ok(Self::ParameterizedValue),
            other => Err(D::Error::custom(format!("invalid node snapshot type {other}"))),
        }
    }
}

/// One persisted node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedNode {
    /// Node kind.
    #[serde(rename = "type")]
    pub kind: NodeSnapshotType,
    /// Stored value; an explicit `null` is kept distinct from absence.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,
    /// References pointing at the node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inbound: Vec<NodeReference>,
    /// References held by the node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outbound: Vec<NodeReference>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// Persisted graph: node id to node.
pub type SerializedGraph = BTreeMap<NodeId, SerializedNode>;

/// Serializes every node of `snapshot` verbatim.
pub fn extract(snapshot: &GraphSnapshot) -> SerializedGraph {
    snapshot
        .nodes()
        .iter()
        .map(|(id, node)| {
            let serialized = SerializedNode {
                kind: node.kind.into(),
                data: node.data.clone(),
                inbound: node.inbound.clone(),
                outbound: node.outbound.clone(),
            };
            (id.clone(), serialized)
        })
        .collect()
}

/// Serializes only the nodes in `keep`.
///
/// References to dropped nodes are cut from both ends. A list holding such a
/// reference is removed from its node along with every reference under it,
/// so it reads back as missing instead of with holes.
pub fn extract_subgraph(snapshot: &GraphSnapshot, keep: &BTreeSet<NodeId>) -> SerializedGraph {
    let kept = move || snapshot.nodes().iter().filter(move |(id, _)| keep.contains(*id));

    let mut lists: BTreeMap<&NodeId, BTreeSet<&[PathPart]>> = BTreeMap::new();
    for (id, node) in kept() {
        for reference in node.outbound.iter().filter(|r| !keep.contains(&r.id)) {
            if let Some(index) = reference.path.iter().position(|part| part.as_index().is_some()) {
                lists.entry(id).or_default().insert(&reference.path[..index]);
            }
        }
    }
    let severed = |source: &NodeId, path: &[PathPart]| {
        lists
            .get(source)
            .is_some_and(|prefixes| prefixes.iter().any(|prefix| path.starts_with(prefix)))
    };

    kept()
        .map(|(id, node)| {
            let mut data = node.data.clone();
            for prefix in lists.get(id).into_iter().flatten() {
                if prefix.is_empty() {
                    data = None;
                } else if let Some(value) = data.as_mut() {
                    value.remove_path(prefix);
                }
            }
            let serialized = SerializedNode {
                kind: node.kind.into(),
                data,
                inbound: node
                    .inbound
                    .iter()
                    .filter(|r| keep.contains(&r.id) && !severed(&r.id, &r.path[..]))
                    .cloned()
                    .collect(),
                outbound: node
                    .outbound
                    .iter()
                    .filter(|r| keep.contains(&r.id) && !severed(id, &r.path[..]))
                    .cloned()
                    .collect(),
            };
            (id.clone(), serialized)
        })
        .collect()
}

/// Rebuilds a graph snapshot from its persisted form.
///
/// Entity data embedded at reference positions is replaced by placeholders,
/// the entity transformer runs on every entity object except the operation
/// roots, and the edge lists are verified. Every restored id is returned as
/// edited.
///
/// # Errors
/// [`CacheError::Restore`] when an edge is dangling or not mirrored.
#[instrument(level = "debug", skip_all, fields(nodes = graph.len()))]
pub fn restore(
    graph: SerializedGraph,
    context: &CacheContext,
) -> Result<(GraphSnapshot, BTreeSet<NodeId>), CacheError> {
    let kinds: BTreeMap<NodeId, NodeKind> = graph
        .iter()
        .map(|(id, node)| (id.clone(), node.kind.into()))
        .collect();
    let transformer = context.entity_transformer();

    let mut nodes = BTreeMap::new();
    for (id, serialized) in graph {
        let kind = NodeKind::from(serialized.kind);
        let mut data = serialized.data;
        for reference in &serialized.outbound {
            if kinds.get(&reference.id) == Some(&NodeKind::Entity) {
                blank_reference(&mut data, &reference.path);
            }
        }
        if let (Some(transform), NodeKind::Entity, false, Some(Value::Object(object))) =
            (transformer, kind, id.is_operation_root(), data.as_mut())
        {
            transform(Arc::make_mut(object));
        }
        let node = NodeSnapshot {
            kind,
            data,
            inbound: serialized.inbound,
            outbound: serialized.outbound,
        };
        nodes.insert(id, Arc::new(node));
    }

    let snapshot = GraphSnapshot::from_nodes(nodes);
    snapshot
        .verify_integrity()
        .map_err(|error| CacheError::Restore {
            message: error.to_string(),
        })?;
    Ok((snapshot, kinds.into_keys().collect()))
}

/// Puts the placeholder for an entity reference at `path`.
fn blank_reference(data: &mut Option<Value>, path: &[PathPart]) {
    match path.last() {
        None => *data = Some(Value::Null),
        Some(PathPart::Key(_)) => {
            if let Some(value) = data {
                value.remove_path(path);
            }
        }
        Some(PathPart::Index(_)) => {
            if let Some(value) = data.as_mut().filter(|value| value.get_path(path).is_some()) {
                value.set_path(path, Value::Null);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn null_data_survives_and_absent_data_stays_absent() {
        let Ok(graph) = serde_json::from_value::<SerializedGraph>(json!({
            "a": { "type": 1, "data": null },
            "b": { "type": 0 }
        })) else {
            unreachable!("fixture failed to deserialize");
        };
        assert_eq!(graph[&NodeId::new("a")].data, Some(Value::Null));
        assert_eq!(graph[&NodeId::new("b")].data, None);

        let Ok(back) = serde_json::to_value(&graph) else {
            unreachable!("serialize failed");
        };
        assert_eq!(back, json!({ "a": { "type": 1, "data": null }, "b": { "type": 0 } }));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let parsed = serde_json::from_value::<SerializedGraph>(json!({ "a": { "type": 2 } }));
        assert!(parsed.is_err());
    }

    #[test]
    fn embedded_entities_become_placeholders() {
        let Ok(graph) = serde_json::from_value::<SerializedGraph>(json!({
            "ROOT_QUERY": {
                "type": 0,
                "data": { "viewer": { "id": 1 }, "friends": [{ "id": 1 }, 7] },
                "outbound": [
                    { "id": "1", "path": ["viewer"] },
                    { "id": "1", "path": ["friends", 0] }
                ]
            },
            "1": {
                "type": 0,
                "data": { "id": 1 },
                "inbound": [
                    { "id": "ROOT_QUERY", "path": ["viewer"] },
                    { "id": "ROOT_QUERY", "path": ["friends", 0] }
                ]
            }
        })) else {
            unreachable!("fixture failed to deserialize");
        };
        let Ok((snapshot, edited)) = restore(graph, &CacheContext::default()) else {
            unreachable!("restore failed");
        };
        assert_eq!(edited.len(), 2);
        assert_eq!(
            snapshot.node_data(&NodeId::root_query()).map(Value::to_json),
            Some(json!({ "friends": [null, 7] }))
        );
    }

    #[test]
    fn dangling_edges_fail() {
        let Ok(graph) = serde_json::from_value::<SerializedGraph>(json!({
            "ROOT_QUERY": { "type": 0, "outbound": [{ "id": "gone", "path": ["x"] }] }
        })) else {
            unreachable!("fixture failed to deserialize");
        };
        assert!(matches!(
            restore(graph, &CacheContext::default()),
            Err(CacheError::Restore { .. })
        ));
    }
}
