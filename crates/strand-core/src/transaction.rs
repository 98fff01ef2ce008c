// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Transactions over a [`CacheSnapshot`].
//!
//! A transaction works on a private copy of the cache state. Nothing it does
//! is visible to the cache until [`CacheTransaction::commit`] hands the new
//! state back; dropping it discards every edit.
//!
//! Baseline transactions write to confirmed data and replay the optimistic
//! queue after every write so the optimistic branch never drifts.
//! Optimistic transactions (created with a [`ChangeId`]) write only to the
//! optimistic branch and record each payload as a delta, enqueued on commit.
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::Arc;

use tracing::instrument;

use crate::context::{CacheContext, EntityUpdater};
use crate::editor::{self, EditorCommit};
use crate::error::{CacheError, PayloadWarning};
use crate::graph::GraphSnapshot;
use crate::ident::{ChangeId, NodeId, OperationId};
use crate::node::{NodeKind, NodeSnapshot};
use crate::operation::{ParsedOperation, Query};
use crate::optimistic::QueryDelta;
use crate::read::{read, QueryResult};
use crate::snapshot::CacheSnapshot;
use crate::value::Value;

/// Outcome of a committed transaction.
#[derive(Debug)]
pub struct TransactionCommit {
    /// New cache state.
    pub snapshot: CacheSnapshot,
    /// Every node edited on either branch.
    pub edited_node_ids: BTreeSet<NodeId>,
    /// Operations written during the transaction.
    pub written_queries: Vec<Rc<ParsedOperation>>,
    /// Warnings from every write.
    pub warnings: Vec<PayloadWarning>,
}

/// Collects edits against a cache state.
pub struct CacheTransaction<'c> {
    context: &'c CacheContext,
    parent: CacheSnapshot,
    snapshot: CacheSnapshot,
    change_id: Option<ChangeId>,
    edited_node_ids: BTreeSet<NodeId>,
    deltas: Vec<QueryDelta>,
    written_queries: BTreeMap<OperationId, Rc<ParsedOperation>>,
    warnings: Vec<PayloadWarning>,
}

impl<'c> CacheTransaction<'c> {
    /// Opens a transaction on `snapshot`; optimistic when `change_id` is set.
    pub fn new(context: &'c CacheContext, snapshot: CacheSnapshot, change_id: Option<ChangeId>) -> Self {
        Self {
            context,
            parent: snapshot.clone(),
            snapshot,
            change_id,
            edited_node_ids: BTreeSet::new(),
            deltas: Vec::new(),
            written_queries: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    /// Returns `true` for optimistic transactions.
    pub fn is_optimistic(&self) -> bool {
        self.change_id.is_some()
    }

    /// Context the transaction runs in.
    pub fn context(&self) -> &'c CacheContext {
        self.context
    }

    /// Working state, including every edit made so far.
    pub fn snapshot(&self) -> &CacheSnapshot {
        &self.snapshot
    }

    /// Warnings collected so far.
    pub fn warnings(&self) -> &[PayloadWarning] {
        &self.warnings
    }

    /// Reads `query` from the working branch (optimistic for optimistic
    /// transactions).
    ///
    /// # Errors
    /// Any error from parsing the query.
    pub fn read(&self, query: &Query) -> Result<Rc<QueryResult>, CacheError> {
        read(self.context, query, self.branch(&self.snapshot), true)
    }

    /// Merges `payload` into the working state.
    ///
    /// # Errors
    /// Any error from the write or from replaying the optimistic queue.
    #[instrument(level = "debug", skip_all, fields(optimistic = self.change_id.is_some()))]
    pub fn write(&mut self, query: &Query, payload: &Value) -> Result<(), CacheError> {
        if self.change_id.is_some() {
            self.write_optimistic(query, payload)
        } else {
            self.write_baseline(query, payload)
        }
    }

    /// Removes the optimistic update `change_id` and rebuilds the optimistic
    /// branch from the baseline and the remaining queue.
    ///
    /// Every node of the previous optimistic branch is reported as edited.
    ///
    /// # Errors
    /// Any error from replaying the remaining queue.
    #[instrument(level = "debug", skip_all, fields(change_id = %change_id))]
    pub fn rollback(&mut self, change_id: &ChangeId) -> Result<(), CacheError> {
        self.snapshot.optimistic_queue = self.snapshot.optimistic_queue.remove(change_id);
        let baseline = Rc::clone(&self.snapshot.baseline);
        let optimistic = self.build_optimistic(&baseline)?;
        self.edited_node_ids
            .extend(self.snapshot.optimistic.node_ids().cloned());
        self.snapshot.optimistic = optimistic;
        Ok(())
    }

    /// Runs entity updaters, enqueues recorded deltas for optimistic
    /// transactions, and returns the final state.
    ///
    /// # Errors
    /// Any error returned by an entity updater.
    pub fn commit(mut self) -> Result<TransactionCommit, CacheError> {
        self.trigger_entity_updaters()?;
        let mut snapshot = self.snapshot;
        if let Some(change_id) = self.change_id {
            snapshot.optimistic_queue = snapshot.optimistic_queue.enqueue(change_id, self.deltas);
        }
        Ok(TransactionCommit {
            snapshot,
            edited_node_ids: self.edited_node_ids,
            written_queries: self.written_queries.into_values().collect(),
            warnings: self.warnings,
        })
    }

    /// Node `id` as it was when the transaction opened.
    pub fn previous_node_snapshot(&self, id: &NodeId) -> Option<&Arc<NodeSnapshot>> {
        self.branch(&self.parent).node_snapshot(id)
    }

    /// Node `id` including the transaction's edits.
    pub fn current_node_snapshot(&self, id: &NodeId) -> Option<&Arc<NodeSnapshot>> {
        self.branch(&self.snapshot).node_snapshot(id)
    }

    fn branch<'s>(&self, snapshot: &'s CacheSnapshot) -> &'s Rc<GraphSnapshot> {
        snapshot.branch(self.is_optimistic())
    }

    fn write_baseline(&mut self, query: &Query, payload: &Value) -> Result<(), CacheError> {
        let commit = editor::write(self.context, &self.snapshot.baseline, query, payload)?;
        let baseline = self.absorb(commit);
        let optimistic = self.build_optimistic(&baseline)?;
        self.snapshot = CacheSnapshot {
            baseline,
            optimistic,
            optimistic_queue: self.snapshot.optimistic_queue.clone(),
        };
        Ok(())
    }

    fn write_optimistic(&mut self, query: &Query, payload: &Value) -> Result<(), CacheError> {
        self.deltas.push(QueryDelta {
            query: query.clone(),
            payload: payload.clone(),
        });
        let commit = editor::write(self.context, &self.snapshot.optimistic, query, payload)?;
        self.snapshot.optimistic = self.absorb(commit);
        Ok(())
    }

    fn absorb(&mut self, commit: EditorCommit) -> Rc<GraphSnapshot> {
        self.edited_node_ids.extend(commit.edited_node_ids);
        self.written_queries.extend(
            commit
                .written_queries
                .into_iter()
                .map(|operation| (operation.id, operation)),
        );
        self.warnings.extend(commit.warnings);
        commit.snapshot
    }

    /// Optimistic branch for `baseline` under the working queue.
    fn build_optimistic(&mut self, baseline: &Rc<GraphSnapshot>) -> Result<Rc<GraphSnapshot>, CacheError> {
        let commit = self.snapshot.optimistic_queue.apply(self.context, baseline)?;
        self.edited_node_ids.extend(commit.edited_node_ids);
        Ok(commit.snapshot)
    }

    fn trigger_entity_updaters(&mut self) -> Result<(), CacheError> {
        let context = self.context;
        if !context.has_entity_updaters() {
            return Ok(());
        }

        // Updaters may edit more nodes; only the ones edited so far are emitted.
        let mut pending: Vec<(&'c EntityUpdater, Option<Value>, Option<Value>)> = Vec::new();
        for id in &self.edited_node_ids {
            let current = self.current_node_snapshot(id);
            let previous = self.previous_node_snapshot(id);
            let Some(either) = current.or(previous) else {
                continue;
            };
            if either.kind != NodeKind::Entity {
                continue;
            }
            let type_name = match either
                .data
                .as_ref()
                .and_then(|data| data.get("__typename"))
                .and_then(Value::as_str)
            {
                Some(type_name) => type_name,
                None if id.is_root_query() => "Query",
                None => continue,
            };
            let Some(updater) = context.entity_updater(type_name) else {
                continue;
            };
            pending.push((
                updater,
                current.and_then(|node| node.data.clone()),
                previous.and_then(|node| node.data.clone()),
            ));
        }

        for (updater, current, previous) in pending {
            updater(self, current.as_ref(), previous.as_ref())?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for CacheTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheTransaction")
            .field("change_id", &self.change_id)
            .field("edited_node_ids", &self.edited_node_ids)
            .field("deltas", &self.deltas.len())
            .finish_non_exhaustive()
    }
}
