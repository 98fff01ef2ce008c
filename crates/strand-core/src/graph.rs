// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Immutable graph versions and their memoized reads.
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::CacheError;
use crate::ident::{NodeId, OperationId};
use crate::node::{NodeSnapshot, ReferenceDirection};
use crate::read::QueryResult;
use crate::value::Value;

/// An immutable version of the node graph.
///
/// Snapshots are never mutated after construction, except for the attached
/// read cache which only memoizes results derived from the nodes. Nodes a
/// commit did not touch are the same `Arc` in parent and child.
pub struct GraphSnapshot {
    nodes: BTreeMap<NodeId, Arc<NodeSnapshot>>,
    read_cache: RefCell<FxHashMap<OperationId, Rc<QueryResult>>>,
}

impl GraphSnapshot {
    /// Snapshot with no nodes.
    pub fn empty() -> Self {
        Self::from_nodes(BTreeMap::new())
    }

    /// Wraps an already-built node map.
    pub fn from_nodes(nodes: BTreeMap<NodeId, Arc<NodeSnapshot>>) -> Self {
        Self {
            nodes,
            read_cache: RefCell::new(FxHashMap::default()),
        }
    }

    /// Node snapshot for `id`, if present.
    pub fn node_snapshot(&self, id: &NodeId) -> Option<&Arc<NodeSnapshot>> {
        self.nodes.get(id)
    }

    /// Stored data of node `id`, if present and written.
    pub fn node_data(&self, id: &NodeId) -> Option<&Value> {
        self.nodes.get(id).and_then(|node| node.data.as_ref())
    }

    /// Returns `true` if `id` is present.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// All node ids in sorted order.
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> + '_ {
        self.nodes.keys()
    }

    /// All nodes in id order.
    pub fn nodes(&self) -> &BTreeMap<NodeId, Arc<NodeSnapshot>> {
        &self.nodes
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the snapshot holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn cached_read(&self, id: OperationId) -> Option<Rc<QueryResult>> {
        self.read_cache.borrow().get(&id).cloned()
    }

    pub(crate) fn cache_read(&self, id: OperationId, result: Rc<QueryResult>) {
        self.read_cache.borrow_mut().insert(id, result);
    }

    pub(crate) fn cached_reads(&self) -> Vec<(OperationId, Rc<QueryResult>)> {
        self.read_cache
            .borrow()
            .iter()
            .map(|(id, result)| (*id, Rc::clone(result)))
            .collect()
    }

    /// Checks that every reference is mirrored on the other side and that
    /// every referenced node exists.
    ///
    /// # Errors
    /// Returns [`CacheError::Operation`] naming the first broken edge.
    pub fn verify_integrity(&self) -> Result<(), CacheError> {
        for (id, node) in &self.nodes {
            for reference in &node.outbound {
                let mirrored = self.nodes.get(&reference.id).is_some_and(|target| {
                    target.has_reference(ReferenceDirection::Inbound, id, &reference.path)
                });
                if !mirrored {
                    return Err(CacheError::operation(
                        format!("outbound reference to {} is not mirrored", reference.id),
                        Some(id.clone()),
                        reference.path.clone(),
                    ));
                }
            }
            for reference in &node.inbound {
                let mirrored = self.nodes.get(&reference.id).is_some_and(|source| {
                    source.has_reference(ReferenceDirection::Outbound, id, &reference.path)
                });
                if !mirrored {
                    return Err(CacheError::operation(
                        format!("inbound reference from {} is not mirrored", reference.id),
                        Some(id.clone()),
                        reference.path.clone(),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl Default for GraphSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Equality compares nodes only; memoized reads are ignored.
impl PartialEq for GraphSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
    }
}

impl fmt::Debug for GraphSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphSnapshot")
            .field("nodes", &self.nodes)
            .finish_non_exhaustive()
    }
}
