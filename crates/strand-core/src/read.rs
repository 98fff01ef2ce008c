// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reading query results out of a graph snapshot.
//!
//! A read walks the parsed query from its root node, projecting the
//! requested fields (renamed to their response keys), following entity
//! references through the outbound edges of each node, and substituting
//! parameterized fields with the value node for their concrete arguments.
//! The same walk decides completeness and collects the ids of every node the
//! result depends on. Results are memoized on the snapshot per operation.
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::Arc;

use crate::context::CacheContext;
use crate::error::CacheError;
use crate::graph::GraphSnapshot;
use crate::ident::{node_id_for_parameterized_value, NodeId};
use crate::node::{NodeKind, NodeSnapshot};
use crate::operation::{ParsedOperation, Query};
use crate::parsed_query::ParsedQuery;
use crate::value::{PathPart, Value, ValueMap};

/// Outcome of reading a query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryResult {
    /// The materialized result; `None` when the root node does not exist.
    pub result: Option<Value>,
    /// Every selected field was present.
    pub complete: bool,
    /// Nodes the result was built from, when requested.
    pub node_ids: Option<BTreeSet<NodeId>>,
}

/// Reads `query` from `snapshot`.
///
/// # Errors
/// Any error from parsing the query.
pub fn read(
    context: &CacheContext,
    query: &Query,
    snapshot: &GraphSnapshot,
    include_node_ids: bool,
) -> Result<Rc<QueryResult>, CacheError> {
    let operation = context.parse_operation(query)?;
    Ok(read_operation(context, &operation, snapshot, include_node_ids))
}

pub(crate) fn read_operation(
    context: &CacheContext,
    operation: &ParsedOperation,
    snapshot: &GraphSnapshot,
    include_node_ids: bool,
) -> Rc<QueryResult> {
    let cached = snapshot
        .cached_read(operation.id)
        .filter(|cached| !include_node_ids || cached.node_ids.is_some());
    let cache_hit = cached.is_some();
    let result = cached.unwrap_or_else(|| {
        let result = Rc::new(materialize(context, operation, snapshot, include_node_ids));
        snapshot.cache_read(operation.id, Rc::clone(&result));
        result
    });
    context.tracer().read_end(operation, &result, cache_hit);
    result
}

fn materialize(
    context: &CacheContext,
    operation: &ParsedOperation,
    snapshot: &GraphSnapshot,
    include_node_ids: bool,
) -> QueryResult {
    let Some(root) = snapshot.node_snapshot(&operation.root_id) else {
        return QueryResult {
            result: None,
            complete: false,
            node_ids: include_node_ids.then(BTreeSet::new),
        };
    };

    let mut walk = ReadWalk {
        context,
        snapshot,
        node_ids: BTreeSet::new(),
        complete: true,
    };
    walk.node_ids.insert(operation.root_id.clone());
    let result = walk.position(&operation.root_id, root, &mut Vec::new(), &operation.parsed_query);
    if result.is_none() {
        walk.complete = false;
    }
    QueryResult {
        result,
        complete: walk.complete,
        node_ids: include_node_ids.then_some(walk.node_ids),
    }
}

struct ReadWalk<'a> {
    context: &'a CacheContext,
    snapshot: &'a GraphSnapshot,
    node_ids: BTreeSet<NodeId>,
    complete: bool,
}

impl<'a> ReadWalk<'a> {
    /// Materializes the value at `path` inside `node`, selecting `fields`.
    fn position(
        &mut self,
        node_id: &NodeId,
        node: &'a NodeSnapshot,
        path: &mut Vec<PathPart>,
        fields: &ParsedQuery,
    ) -> Option<Value> {
        if let Some(target_id) = self.entity_reference(node, path) {
            return self.entity(target_id, fields);
        }

        let value = node.data.as_ref().and_then(|data| data.get_path(path));
        match value {
            None => {
                self.complete = false;
                None
            }
            Some(Value::List(items)) => {
                let references = self.list_references(node, path);
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    let element = match references.get(&index) {
                        Some(&target_id) => self.entity(target_id, fields),
                        None if item.is_null() => Some(Value::Null),
                        None => {
                            path.push(PathPart::Index(index));
                            let element = self.position(node_id, node, path, fields);
                            path.pop();
                            element
                        }
                    };
                    out.push(element.unwrap_or(Value::Null));
                }
                Some(Value::list(out))
            }
            Some(Value::Object(object)) => Some(self.selection(node_id, node, path, object, fields)),
            Some(other) => Some(other.clone()),
        }
    }

    fn entity(&mut self, id: &'a NodeId, fields: &ParsedQuery) -> Option<Value> {
        let snapshot = self.snapshot;
        let Some(target) = snapshot.node_snapshot(id) else {
            self.complete = false;
            return None;
        };
        self.node_ids.insert(id.clone());
        self.position(id, target, &mut Vec::new(), fields)
    }

    fn selection(
        &mut self,
        node_id: &NodeId,
        node: &'a NodeSnapshot,
        path: &mut Vec<PathPart>,
        object: &ValueMap,
        fields: &ParsedQuery,
    ) -> Value {
        let mut out = ValueMap::new();
        for (key, field) in fields {
            if field.excluded {
                continue;
            }
            let name = field.field_name(key);
            path.push(PathPart::from(name));
            let value = if let Some(args) = &field.args {
                self.parameterized(node_id, object, path, name, args, field.children.as_ref())
            } else if let Some(children) = &field.children {
                self.position(node_id, node, path, children)
            } else if let Some(leaf) = object.get(name) {
                Some(leaf.clone())
            } else {
                self.complete = false;
                None
            };
            path.pop();
            if let Some(value) = value {
                out.insert(key.clone(), value);
            }
        }
        Value::object(out)
    }

    fn parameterized(
        &mut self,
        container_id: &NodeId,
        container: &ValueMap,
        path: &[PathPart],
        field_name: &str,
        args: &ValueMap,
        children: Option<&Arc<ParsedQuery>>,
    ) -> Option<Value> {
        let snapshot = self.snapshot;
        let field_id = node_id_for_parameterized_value(container_id, path, args);
        let resolved = match snapshot.node_snapshot(&field_id) {
            Some(node) => Some((field_id, node)),
            None => self.redirect(container_id, container, field_name, args),
        };
        let Some((id, node)) = resolved else {
            self.complete = false;
            return None;
        };
        self.node_ids.insert(id.clone());
        match children {
            Some(children) => self.position(&id, node, &mut Vec::new(), children),
            None => match &node.data {
                Some(value) => Some(value.clone()),
                None => {
                    self.complete = false;
                    None
                }
            },
        }
    }

    fn redirect(
        &self,
        container_id: &NodeId,
        container: &ValueMap,
        field_name: &str,
        args: &ValueMap,
    ) -> Option<(NodeId, &'a Arc<NodeSnapshot>)> {
        let type_name = match container.get("__typename").and_then(Value::as_str) {
            Some(type_name) => type_name,
            None if container_id.is_root_query() => "Query",
            None => return None,
        };
        let redirect = self.context.resolver_redirect(type_name, field_name)?;
        let id = redirect(args)?;
        let snapshot = self.snapshot;
        let node = snapshot.node_snapshot(&id)?;
        Some((id, node))
    }

    /// Entity referenced at exactly `path`, if any.
    fn entity_reference(&self, node: &'a NodeSnapshot, path: &[PathPart]) -> Option<&'a NodeId> {
        node.outbound
            .iter()
            .filter(|reference| reference.path == path)
            .map(|reference| &reference.id)
            .find(|id| self.is_entity(id))
    }

    /// Entities referenced directly by the elements of the list at `path`.
    fn list_references(&self, node: &'a NodeSnapshot, path: &[PathPart]) -> BTreeMap<usize, &'a NodeId> {
        node.outbound
            .iter()
            .filter(|reference| {
                reference.path.len() == path.len() + 1 && reference.path.starts_with(path)
            })
            .filter_map(|reference| Some((reference.path.last()?.as_index()?, &reference.id)))
            .filter(|(_, id)| self.is_entity(id))
            .collect()
    }

    fn is_entity(&self, id: &NodeId) -> bool {
        self.snapshot
            .node_snapshot(id)
            .is_some_and(|node| node.kind == NodeKind::Entity)
    }
}
