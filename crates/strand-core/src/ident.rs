// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifiers for graph nodes, operations, optimistic changes, and observers.
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::value::{path_to_json, PathPart, ValueMap};

/// Identifier of a node in the graph.
///
/// Entity ids come from the configured id mapper; parameterized-value ids are
/// derived deterministically by [`node_id_for_parameterized_value`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(Arc<str>);

impl NodeId {
    /// Root of query operations.
    pub const QUERY_ROOT: &'static str = "ROOT_QUERY";
    /// Root of mutation operations.
    pub const MUTATION_ROOT: &'static str = "ROOT_MUTATION";
    /// Root of subscription operations.
    pub const SUBSCRIPTION_ROOT: &'static str = "ROOT_SUBSCRIPTION";

    /// Builds an id from any string-like value.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// `ROOT_QUERY`.
    pub fn root_query() -> Self {
        Self::new(Self::QUERY_ROOT)
    }

    /// `ROOT_MUTATION`.
    pub fn root_mutation() -> Self {
        Self::new(Self::MUTATION_ROOT)
    }

    /// `ROOT_SUBSCRIPTION`.
    pub fn root_subscription() -> Self {
        Self::new(Self::SUBSCRIPTION_ROOT)
    }

    /// Returns the id text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the query root.
    pub fn is_root_query(&self) -> bool {
        &*self.0 == Self::QUERY_ROOT
    }

    /// Returns `true` for any of the query, mutation, or subscription roots.
    pub fn is_operation_root(&self) -> bool {
        [Self::QUERY_ROOT, Self::MUTATION_ROOT, Self::SUBSCRIPTION_ROOT].contains(&&*self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:?})", &*self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl std::borrow::Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}

/// Derives the id of the node holding a parameterized field's value.
///
/// The id is a pure function of the containing node, the field path within
/// it, and the concrete arguments; arguments are rendered with sorted keys.
pub fn node_id_for_parameterized_value(
    container_id: &NodeId,
    path: &[PathPart],
    args: &ValueMap,
) -> NodeId {
    let args = serde_json::Value::Object(
        args.iter()
            .map(|(key, value)| (key.clone(), value.to_json()))
            .collect(),
    );
    NodeId::from(format!("{container_id}❖{}❖{args}", path_to_json(path)))
}

/// Caller-chosen identifier of an optimistic change.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeId(pub String);

impl From<&str> for ChangeId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ChangeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a memoized parsed operation; keys the per-snapshot read cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationId(pub u64);

/// Handle returned by `Cache::watch`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(pub u64);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn parameterized_ids_are_deterministic() {
        let mut args = ValueMap::new();
        args.insert("id".into(), Value::from(4));
        args.insert("after".into(), Value::from("c1"));
        let path = vec![PathPart::from("user")];
        let id = node_id_for_parameterized_value(&NodeId::root_query(), &path, &args);
        assert_eq!(id.as_str(), r#"ROOT_QUERY❖["user"]❖{"after":"c1","id":4}"#);
        assert_eq!(
            id,
            node_id_for_parameterized_value(&NodeId::root_query(), &path, &args)
        );
    }

    #[test]
    fn different_args_give_different_ids() {
        let path = vec![PathPart::from("user")];
        let mut one = ValueMap::new();
        one.insert("id".into(), Value::from(1));
        let mut two = ValueMap::new();
        two.insert("id".into(), Value::from(2));
        assert_ne!(
            node_id_for_parameterized_value(&NodeId::root_query(), &path, &one),
            node_id_for_parameterized_value(&NodeId::root_query(), &path, &two)
        );
    }
}
