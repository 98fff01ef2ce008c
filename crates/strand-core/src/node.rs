// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Graph nodes and the references between them.
//!
//! Every edge is stored twice: outbound on the referrer and inbound on the
//! target, each tagged with the path inside the referrer's data.
use serde::{Deserialize, Serialize};

use crate::ident::NodeId;
use crate::value::{PathPart, Value};

/// Kind of a graph node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// An identified object (or an operation root).
    Entity,
    /// The value of one parameterized field for one argument set.
    ParameterizedValue,
}

/// One edge endpoint: the node on the other side and the path within the
/// referring node's data where the reference sits.
///
/// For an outbound reference `id` is the target and `path` is inside the
/// holder. For an inbound reference `id` is the referrer and `path` is inside
/// the referrer.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeReference {
    /// Node on the other side of the edge.
    pub id: NodeId,
    /// Position of the reference within the referring node's data.
    pub path: Vec<PathPart>,
}

impl NodeReference {
    /// Builds a reference.
    pub fn new(id: NodeId, path: Vec<PathPart>) -> Self {
        Self { id, path }
    }
}

/// Which reference list of a node to operate on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceDirection {
    /// References pointing at this node.
    Inbound,
    /// References held by this node.
    Outbound,
}

/// A node in one graph version.
///
/// Reference positions inside `data` hold placeholders rather than copies of
/// the referenced node: an object key is left absent, a list slot holds
/// null, and a reference at the node's own root leaves `data` as null. The
/// outbound list is the source of truth for what sits at those positions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSnapshot {
    /// Entity or parameterized value.
    pub kind: NodeKind,
    /// Stored value; `None` until something is written.
    pub data: Option<Value>,
    /// References pointing at this node.
    pub inbound: Vec<NodeReference>,
    /// References held by this node.
    pub outbound: Vec<NodeReference>,
}

impl NodeSnapshot {
    /// Fresh entity with no references.
    pub fn entity(data: Option<Value>) -> Self {
        Self {
            kind: NodeKind::Entity,
            data,
            inbound: Vec::new(),
            outbound: Vec::new(),
        }
    }

    /// Fresh parameterized-value node with no references.
    pub fn parameterized(data: Option<Value>) -> Self {
        Self {
            kind: NodeKind::ParameterizedValue,
            data,
            inbound: Vec::new(),
            outbound: Vec::new(),
        }
    }

    /// Returns the reference list for `direction`.
    pub fn references(&self, direction: ReferenceDirection) -> &[NodeReference] {
        match direction {
            ReferenceDirection::Inbound => &self.inbound,
            ReferenceDirection::Outbound => &self.outbound,
        }
    }

    fn references_mut(&mut self, direction: ReferenceDirection) -> &mut Vec<NodeReference> {
        match direction {
            ReferenceDirection::Inbound => &mut self.inbound,
            ReferenceDirection::Outbound => &mut self.outbound,
        }
    }

    /// Adds `(id, path)` unless already present. Returns `true` if added.
    pub fn add_reference(
        &mut self,
        direction: ReferenceDirection,
        id: &NodeId,
        path: &[PathPart],
    ) -> bool {
        if self.has_reference(direction, id, path) {
            return false;
        }
        self.references_mut(direction)
            .push(NodeReference::new(id.clone(), path.to_vec()));
        true
    }

    /// Removes `(id, path)`.
    ///
    /// Returns `true` when the list ends up empty (including when it was
    /// already empty) and `false` when the reference was absent from a
    /// non-empty list.
    pub fn remove_reference(
        &mut self,
        direction: ReferenceDirection,
        id: &NodeId,
        path: &[PathPart],
    ) -> bool {
        let references = self.references_mut(direction);
        if references.is_empty() {
            return true;
        }
        let Some(index) = references
            .iter()
            .position(|r| r.id == *id && r.path == path)
        else {
            return false;
        };
        references.remove(index);
        references.is_empty()
    }

    /// Returns `true` if `(id, path)` is present.
    pub fn has_reference(&self, direction: ReferenceDirection, id: &NodeId, path: &[PathPart]) -> bool {
        self.references(direction)
            .iter()
            .any(|r| r.id == *id && r.path == path)
    }

    /// Returns `true` if any outbound reference sits exactly at `path`.
    pub fn is_reference_field(&self, path: &[PathPart]) -> bool {
        self.outbound.iter().any(|r| r.path == path)
    }

    /// Outbound references whose path starts with `prefix`.
    pub fn outbound_under<'a>(
        &'a self,
        prefix: &'a [PathPart],
    ) -> impl Iterator<Item = &'a NodeReference> + 'a {
        self.outbound.iter().filter(move |r| r.path.starts_with(prefix))
    }
}
