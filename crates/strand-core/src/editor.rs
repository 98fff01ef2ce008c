// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Payload normalization.
//!
//! A [`SnapshotEditor`] accumulates edits on top of a parent
//! [`GraphSnapshot`] and commits them into a new snapshot. Writing happens in
//! three passes per payload:
//!
//! 1. walk the payload along the parsed query, writing leaf values and
//!    collecting reference changes;
//! 2. apply the reference changes to both endpoints, noting nodes that lost
//!    their last inbound reference;
//! 3. remove those orphans and, transitively, anything only they kept alive.
//!
//! Only nodes that are touched get cloned; the parent is never mutated.
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::Arc;

use rustc_hash::FxHashSet;
use tracing::instrument;

use crate::context::CacheContext;
use crate::error::{CacheError, PayloadWarning};
use crate::graph::GraphSnapshot;
use crate::ident::{node_id_for_parameterized_value, NodeId, OperationId};
use crate::node::{NodeKind, NodeSnapshot, ReferenceDirection};
use crate::operation::{ParsedOperation, Query};
use crate::parsed_query::ParsedQuery;
use crate::value::{PathPart, Value, ValueMap};

static NULL: Value = Value::Null;

/// Result of [`SnapshotEditor::commit`].
#[derive(Debug)]
pub struct EditorCommit {
    /// The new graph version.
    pub snapshot: Rc<GraphSnapshot>,
    /// Nodes whose values changed (or that were removed).
    pub edited_node_ids: BTreeSet<NodeId>,
    /// Operations whose payloads were merged; reads of them are complete.
    pub written_queries: Vec<Rc<ParsedOperation>>,
    /// Recoverable problems noticed while merging.
    pub warnings: Vec<PayloadWarning>,
}

/// Builds a new graph version from a parent plus merged payloads.
pub struct SnapshotEditor<'c> {
    context: &'c CacheContext,
    parent: Rc<GraphSnapshot>,
    /// Changed nodes; `None` marks a node removed by garbage collection.
    new_nodes: BTreeMap<NodeId, Option<NodeSnapshot>>,
    edited_node_ids: BTreeSet<NodeId>,
    written_queries: BTreeMap<OperationId, Rc<ParsedOperation>>,
    warnings: Vec<PayloadWarning>,
}

#[derive(Debug)]
struct ReferenceEdit {
    container_id: NodeId,
    path: Vec<PathPart>,
    prev: Option<NodeId>,
    next: Option<NodeId>,
    // Only fix up edges; the container's data was already rewritten.
    no_write: bool,
}

#[derive(Default)]
struct MergeState {
    visited: FxHashSet<(NodeId, *const ParsedQuery)>,
    reference_edits: Vec<ReferenceEdit>,
}

/// What currently sits at a position inside a node.
struct Previous {
    value: Option<Value>,
    reference: Option<NodeId>,
}

impl Previous {
    fn is_list(&self) -> bool {
        self.reference.is_none() && matches!(self.value, Some(Value::List(_)))
    }

    fn is_nil(&self) -> bool {
        self.reference.is_none() && matches!(self.value, None | Some(Value::Null))
    }

    fn list_len(&self) -> Option<usize> {
        match (&self.reference, &self.value) {
            (None, Some(Value::List(items))) => Some(items.len()),
            _ => None,
        }
    }
}

impl<'c> SnapshotEditor<'c> {
    /// Starts editing on top of `parent`.
    pub fn new(context: &'c CacheContext, parent: Rc<GraphSnapshot>) -> Self {
        Self {
            context,
            parent,
            new_nodes: BTreeMap::new(),
            edited_node_ids: BTreeSet::new(),
            written_queries: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    /// Merges `payload`, shaped like `query`, into the pending snapshot.
    ///
    /// # Errors
    /// Any error from parsing the query, or [`CacheError::InvalidPayload`]
    /// when the payload holds a scalar where the query selects sub-fields.
    /// The editor must be discarded after an error.
    pub fn merge_payload(&mut self, query: &Query, payload: &Value) -> Result<(), CacheError> {
        let operation = self.context.parse_operation(query)?;
        self.merge_operation(&operation, payload)
    }

    /// Merges `payload` for an already parsed operation.
    ///
    /// # Errors
    /// As [`SnapshotEditor::merge_payload`].
    #[instrument(level = "trace", skip_all, fields(root = %operation.root_id))]
    pub fn merge_operation(
        &mut self,
        operation: &Rc<ParsedOperation>,
        payload: &Value,
    ) -> Result<(), CacheError> {
        let mut state = MergeState::default();
        self.merge_subgraph(
            &mut state,
            &operation.root_id,
            &[],
            &[],
            &operation.parsed_query,
            payload,
        )?;
        let orphans = self.merge_reference_edits(state.reference_edits);
        self.remove_orphaned_nodes(orphans);
        self.written_queries
            .insert(operation.id, Rc::clone(operation));
        Ok(())
    }

    /// Latest version of node `id`: pending edits first, then the parent.
    pub fn node_snapshot(&self, id: &NodeId) -> Option<&NodeSnapshot> {
        match self.new_nodes.get(id) {
            Some(pending) => pending.as_ref(),
            None => self.parent.node_snapshot(id).map(|node| &**node),
        }
    }

    /// Finalizes all edits into a new snapshot.
    ///
    /// The entity transformer runs on every entity whose data this editor
    /// created or replaced; operation roots are never transformed. When
    /// snapshot freezing is configured, reference integrity is verified.
    ///
    /// # Errors
    /// [`CacheError::Operation`] when integrity verification fails.
    pub fn commit(self) -> Result<EditorCommit, CacheError> {
        let transformer = self.context.entity_transformer();
        let mut nodes = self.parent.nodes().clone();
        for (id, pending) in self.new_nodes {
            let Some(mut node) = pending else {
                nodes.remove(&id);
                continue;
            };
            let rewritten = self.parent.node_data(&id) != node.data.as_ref();
            if let (Some(transform), NodeKind::Entity, true, false, Some(Value::Object(data))) = (
                transformer,
                node.kind,
                rewritten,
                id.is_operation_root(),
                node.data.as_mut(),
            ) {
                transform(Arc::make_mut(data));
            }
            nodes.insert(id, Arc::new(node));
        }

        let snapshot = GraphSnapshot::from_nodes(nodes);
        if self.context.config().freeze_snapshots {
            snapshot.verify_integrity()?;
        }
        Ok(EditorCommit {
            snapshot: Rc::new(snapshot),
            edited_node_ids: self.edited_node_ids,
            written_queries: self.written_queries.into_values().collect(),
            warnings: self.warnings,
        })
    }

    #[allow(clippy::too_many_lines)]
    fn merge_subgraph(
        &mut self,
        state: &mut MergeState,
        container_id: &NodeId,
        prefix_path: &[PathPart],
        path: &[PathPart],
        parsed: &Arc<ParsedQuery>,
        payload: &Value,
    ) -> Result<(), CacheError> {
        if payload.is_scalar() {
            return Err(CacheError::InvalidPayload {
                message: format!(
                    "Received a {} value, but expected an object/array/null",
                    payload.kind_name()
                ),
                prefix_path: prefix_path.to_vec(),
                container_id: container_id.clone(),
                path: path.to_vec(),
            });
        }

        let previous = self.previous_at(container_id, path);

        if matches!(payload, Value::List(_)) || previous.is_list() {
            let previous_valid = previous.is_nil() || previous.is_list();
            let payload_valid = payload.is_null() || matches!(payload, Value::List(_));
            if !previous_valid {
                self.warn(
                    "Unsupported transition from a non-list to list value",
                    container_id,
                    path,
                );
                if let Some(reference) = &previous.reference {
                    state.reference_edits.push(ReferenceEdit {
                        container_id: container_id.clone(),
                        path: path.to_vec(),
                        prev: Some(reference.clone()),
                        next: None,
                        no_write: true,
                    });
                }
            }
            if payload_valid {
                return self.merge_array_subgraph(
                    state,
                    container_id,
                    prefix_path,
                    path,
                    parsed,
                    payload,
                    previous.list_len(),
                );
            }
            self.warn(
                "Unsupported transition from a list to a non-list value",
                container_id,
                path,
            );
            self.unlink_list_references(state, container_id, path, 0);
        }

        let payload_id = self.context.entity_id_for_value(payload);
        let previous_id = previous.reference.clone().or_else(|| {
            previous
                .value
                .as_ref()
                .and_then(|value| self.context.entity_id_for_value(value))
        });

        if payload_id != previous_id {
            if !payload.is_null() && payload_id.is_none() {
                self.warn(
                    "Unsupported transition from an entity to a non-entity value",
                    container_id,
                    path,
                );
            }
            if !previous.is_nil() && previous_id.is_none() {
                self.warn(
                    "Unsupported transition from a non-entity value to an entity",
                    container_id,
                    path,
                );
            }
            state.reference_edits.push(ReferenceEdit {
                container_id: container_id.clone(),
                path: path.to_vec(),
                prev: previous_id,
                next: payload_id.clone(),
                no_write: false,
            });
            if payload_id.is_none() {
                return Ok(());
            }
        } else if payload.is_null() {
            if previous.value != Some(Value::Null) {
                self.set_value(container_id, path, Value::Null, true);
            }
            return Ok(());
        }

        let mut prefix_path = prefix_path.to_vec();
        let (container_id, path) = match payload_id {
            Some(entity_id) => {
                if !state
                    .visited
                    .insert((entity_id.clone(), Arc::as_ptr(parsed)))
                {
                    return Ok(());
                }
                prefix_path.extend_from_slice(path);
                let has_object = matches!(
                    self.node_snapshot(&entity_id).and_then(|n| n.data.as_ref()),
                    Some(Value::Object(_))
                );
                if !has_object {
                    self.set_value(&entity_id, &[], Value::object(ValueMap::new()), true);
                }
                (entity_id, Vec::new())
            }
            None => {
                if !matches!(previous.value, Some(Value::Object(_))) {
                    self.set_value(container_id, path, Value::object(ValueMap::new()), true);
                }
                (container_id.clone(), path.to_vec())
            }
        };

        let fields = payload.as_object();
        for (key, node) in parsed.iter() {
            if node.excluded {
                continue;
            }
            let field_value = fields.and_then(|f| f.get(key)).unwrap_or(&NULL);

            let mut field_container = container_id.clone();
            let mut field_prefix = prefix_path.clone();
            let mut field_path = path.clone();
            field_path.push(PathPart::from(node.field_name(key)));
            if let Some(args) = &node.args {
                field_container =
                    self.ensure_parameterized_value_snapshot(&container_id, &field_path, args);
                field_prefix.append(&mut field_path);
            }

            if let Some(children) = &node.children {
                self.merge_subgraph(
                    state,
                    &field_container,
                    &field_prefix,
                    &field_path,
                    children,
                    field_value,
                )?;
                continue;
            }

            // A leaf replacing an entity reference drops the edge.
            if let Some(reference) = self.entity_reference_at(&field_container, &field_path) {
                state.reference_edits.push(ReferenceEdit {
                    container_id: field_container.clone(),
                    path: field_path.clone(),
                    prev: Some(reference),
                    next: None,
                    no_write: true,
                });
            }
            if self.data_at(&field_container, &field_path) != Some(field_value) {
                self.set_value(&field_container, &field_path, field_value.clone(), true);
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn merge_array_subgraph(
        &mut self,
        state: &mut MergeState,
        container_id: &NodeId,
        prefix_path: &[PathPart],
        path: &[PathPart],
        parsed: &Arc<ParsedQuery>,
        payload: &Value,
        previous_len: Option<usize>,
    ) -> Result<(), CacheError> {
        let Value::List(items) = payload else {
            self.set_value(container_id, path, Value::Null, true);
            self.unlink_list_references(state, container_id, path, 0);
            return Ok(());
        };

        if previous_len != Some(items.len()) {
            let mut resized: Vec<Value> = match (previous_len, self.data_at(container_id, path)) {
                (Some(_), Some(Value::List(previous))) => {
                    previous.iter().take(items.len()).cloned().collect()
                }
                _ => Vec::with_capacity(items.len()),
            };
            resized.resize(items.len(), Value::Null);
            self.set_value(container_id, path, Value::list(resized), true);
            if previous_len.is_some_and(|len| items.len() < len) {
                self.unlink_list_references(state, container_id, path, items.len());
            }
        }

        let mut item_path = path.to_vec();
        for (index, item) in items.iter().enumerate() {
            item_path.push(PathPart::Index(index));
            self.merge_subgraph(state, container_id, prefix_path, &item_path, parsed, item)?;
            item_path.pop();
        }
        Ok(())
    }

    /// Queues removal of every reference held at `path[i..]` for `i >= from`.
    fn unlink_list_references(
        &self,
        state: &mut MergeState,
        container_id: &NodeId,
        path: &[PathPart],
        from: usize,
    ) {
        let Some(container) = self.node_snapshot(container_id) else {
            return;
        };
        for reference in container.outbound_under(path) {
            let beyond = reference
                .path
                .get(path.len())
                .and_then(PathPart::as_index)
                .is_some_and(|index| index >= from);
            if beyond {
                state.reference_edits.push(ReferenceEdit {
                    container_id: container_id.clone(),
                    path: reference.path.clone(),
                    prev: Some(reference.id.clone()),
                    next: None,
                    no_write: true,
                });
            }
        }
    }

    fn merge_reference_edits(&mut self, edits: Vec<ReferenceEdit>) -> BTreeSet<NodeId> {
        let mut orphans = BTreeSet::new();
        for edit in edits {
            let ReferenceEdit {
                container_id,
                path,
                prev,
                next,
                no_write,
            } = edit;
            if !no_write {
                self.write_reference_slot(&container_id, &path, next.is_some());
            }
            if let Some(prev) = prev {
                self.ensure_new_snapshot(&container_id).remove_reference(
                    ReferenceDirection::Outbound,
                    &prev,
                    &path,
                );
                if self.node_snapshot(&prev).is_some() {
                    let target = self.ensure_new_snapshot(&prev);
                    target.remove_reference(ReferenceDirection::Inbound, &container_id, &path);
                    if target.inbound.is_empty() {
                        orphans.insert(prev);
                    }
                }
            }
            if let Some(next) = next {
                self.ensure_new_snapshot(&container_id).add_reference(
                    ReferenceDirection::Outbound,
                    &next,
                    &path,
                );
                self.ensure_new_snapshot(&next).add_reference(
                    ReferenceDirection::Inbound,
                    &container_id,
                    &path,
                );
                orphans.remove(&next);
            }
        }
        orphans
    }

    /// Writes the stored form of a reference position: a placeholder when
    /// something is referenced there, null otherwise.
    fn write_reference_slot(&mut self, container_id: &NodeId, path: &[PathPart], linked: bool) {
        if !linked {
            self.set_value(container_id, path, Value::Null, true);
            return;
        }
        self.edited_node_ids.insert(container_id.clone());
        let node = self.ensure_new_snapshot(container_id);
        match path.last() {
            Some(PathPart::Key(_)) => {
                if let Some(data) = node.data.as_mut() {
                    data.remove_path(path);
                }
            }
            _ => node.data.get_or_insert(Value::Null).set_path(path, Value::Null),
        }
    }

    fn remove_orphaned_nodes(&mut self, orphans: BTreeSet<NodeId>) {
        let mut queue: Vec<NodeId> = orphans.into_iter().collect();
        while let Some(id) = queue.pop() {
            let Some(node) = self.node_snapshot(&id) else {
                continue;
            };
            let outbound = node.outbound.clone();
            self.new_nodes.insert(id.clone(), None);
            self.edited_node_ids.insert(id.clone());
            for reference in outbound {
                if self.node_snapshot(&reference.id).is_none() {
                    continue;
                }
                let target = self.ensure_new_snapshot(&reference.id);
                if target.remove_reference(ReferenceDirection::Inbound, &id, &reference.path) {
                    queue.push(reference.id);
                }
            }
        }
    }

    fn previous_at(&self, container_id: &NodeId, path: &[PathPart]) -> Previous {
        Previous {
            reference: self.entity_reference_at(container_id, path),
            value: self.data_at(container_id, path).cloned(),
        }
    }

    fn entity_reference_at(&self, container_id: &NodeId, path: &[PathPart]) -> Option<NodeId> {
        let container = self.node_snapshot(container_id)?;
        container
            .outbound
            .iter()
            .find(|reference| {
                reference.path == path
                    && self
                        .node_snapshot(&reference.id)
                        .is_some_and(|target| target.kind == NodeKind::Entity)
            })
            .map(|reference| reference.id.clone())
    }

    fn data_at(&self, id: &NodeId, path: &[PathPart]) -> Option<&Value> {
        self.node_snapshot(id)?.data.as_ref()?.get_path(path)
    }

    fn set_value(&mut self, id: &NodeId, path: &[PathPart], value: Value, is_edit: bool) {
        if is_edit {
            self.edited_node_ids.insert(id.clone());
        }
        self.ensure_new_snapshot(id)
            .data
            .get_or_insert(Value::Null)
            .set_path(path, value);
    }

    /// Pending copy of node `id`, cloned from the parent on first touch.
    /// Missing (or removed) nodes come back as empty entities.
    fn ensure_new_snapshot(&mut self, id: &NodeId) -> &mut NodeSnapshot {
        let parent = &self.parent;
        self.new_nodes
            .entry(id.clone())
            .or_insert_with(|| parent.node_snapshot(id).map(|node| NodeSnapshot::clone(node)))
            .get_or_insert_with(|| NodeSnapshot::entity(None))
    }

    fn ensure_parameterized_value_snapshot(
        &mut self,
        container_id: &NodeId,
        path: &[PathPart],
        args: &ValueMap,
    ) -> NodeId {
        let field_id = node_id_for_parameterized_value(container_id, path, args);
        let linked = self.node_snapshot(container_id).is_some_and(|container| {
            container.has_reference(ReferenceDirection::Outbound, &field_id, path)
        });
        if !linked {
            // A new parameterized child shadows any redirect read through the container.
            self.edited_node_ids.insert(container_id.clone());
            let mut node = NodeSnapshot::parameterized(None);
            node.add_reference(ReferenceDirection::Inbound, container_id, path);
            self.new_nodes.insert(field_id.clone(), Some(node));
            self.ensure_new_snapshot(container_id).add_reference(
                ReferenceDirection::Outbound,
                &field_id,
                path,
            );
        }
        field_id
    }

    fn warn(&mut self, message: &str, container_id: &NodeId, path: &[PathPart]) {
        self.warnings.push(PayloadWarning {
            message: message.to_owned(),
            container_id: container_id.clone(),
            path: path.to_vec(),
        });
    }
}

/// Merges one payload into `snapshot` and commits, reporting to the tracer.
///
/// # Errors
/// As [`SnapshotEditor::merge_payload`] and [`SnapshotEditor::commit`].
pub fn write(
    context: &CacheContext,
    snapshot: &Rc<GraphSnapshot>,
    query: &Query,
    payload: &Value,
) -> Result<EditorCommit, CacheError> {
    let operation = context.parse_operation(query)?;
    let mut editor = SnapshotEditor::new(context, Rc::clone(snapshot));
    editor.merge_operation(&operation, payload)?;
    let commit = editor.commit()?;
    context
        .tracer()
        .write_end(&operation, payload, &commit.warnings);
    Ok(commit)
}
