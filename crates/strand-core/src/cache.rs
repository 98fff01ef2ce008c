// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The cache façade.
//!
//! [`Cache`] owns the current [`CacheSnapshot`] and the registered
//! observers. Every mutation runs through a [`CacheTransaction`]; only a
//! committed transaction replaces the current snapshot, after which
//! observers whose results touched an edited node are re-run.
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, instrument};

use crate::context::CacheContext;
use crate::error::{CacheError, PayloadWarning};
use crate::extract::{self, SerializedGraph};
use crate::graph::GraphSnapshot;
use crate::ident::{ChangeId, NodeId, ObserverId};
use crate::migrate::{migrate, MigrationMap};
use crate::observer::QueryObserver;
use crate::operation::Query;
use crate::optimistic::OptimisticUpdateQueue;
use crate::read::{read_operation, QueryResult};
use crate::snapshot::CacheSnapshot;
use crate::transaction::CacheTransaction;
use crate::value::Value;

/// A normalized graph cache.
pub struct Cache {
    context: CacheContext,
    snapshot: CacheSnapshot,
    observers: Vec<QueryObserver>,
    next_observer_id: u64,
}

impl Cache {
    /// Empty cache running in `context`.
    pub fn new(context: CacheContext) -> Self {
        Self {
            context,
            snapshot: CacheSnapshot::empty(),
            observers: Vec::new(),
            next_observer_id: 0,
        }
    }

    /// Shared configuration and hooks.
    pub fn context(&self) -> &CacheContext {
        &self.context
    }

    /// Current state.
    pub fn snapshot(&self) -> &CacheSnapshot {
        &self.snapshot
    }

    /// Reads `query` from the optimistic or baseline branch, collecting the
    /// ids of the nodes the result was built from.
    ///
    /// # Errors
    /// Any error from parsing the query.
    pub fn read(&self, query: &Query, optimistic: bool) -> Result<Rc<QueryResult>, CacheError> {
        let operation = self.context.parse_operation(query)?;
        Ok(read_operation(
            &self.context,
            &operation,
            self.snapshot.branch(optimistic),
            true,
        ))
    }

    /// Like [`Cache::read`], but an incomplete result is an error.
    ///
    /// # Errors
    /// [`CacheError::UnsatisfiedCache`] when a selected field is missing.
    pub fn read_complete(&self, query: &Query, optimistic: bool) -> Result<Rc<QueryResult>, CacheError> {
        let operation = self.context.parse_operation(query)?;
        let result = read_operation(&self.context, &operation, self.snapshot.branch(optimistic), true);
        if result.complete {
            Ok(result)
        } else {
            Err(CacheError::UnsatisfiedCache {
                operation: operation.label(),
            })
        }
    }

    /// Stored data of entity `id` on the optimistic branch.
    ///
    /// Entity references inside the data are placeholders.
    pub fn get_entity(&self, id: &NodeId) -> Option<&Value> {
        self.snapshot.optimistic.node_data(id)
    }

    /// Registers `callback` for `query`; it runs once immediately and again
    /// whenever nodes the result depends on are edited.
    ///
    /// # Errors
    /// Any error from parsing the query.
    pub fn watch(
        &mut self,
        query: &Query,
        callback: impl FnMut(&QueryResult) + 'static,
    ) -> Result<ObserverId, CacheError> {
        let id = ObserverId(self.next_observer_id);
        let observer = QueryObserver::new(&self.context, id, query, &self.snapshot.optimistic, callback)?;
        self.next_observer_id += 1;
        self.observers.push(observer);
        Ok(id)
    }

    /// Removes an observer. Returns `false` if it was not registered.
    pub fn unwatch(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|observer| observer.id() != id);
        self.observers.len() != before
    }

    /// Writes one payload to the baseline.
    ///
    /// # Errors
    /// Any error from the write; the cache is left unchanged.
    pub fn write(&mut self, query: &Query, payload: &Value) -> Result<Vec<PayloadWarning>, CacheError> {
        self.transaction(|transaction| transaction.write(query, payload))
    }

    /// Runs `body` in a baseline transaction and commits it when it returns
    /// `Ok`. Returns the warnings collected by its writes.
    ///
    /// # Errors
    /// The error returned by `body` or by committing; the cache is left
    /// unchanged.
    pub fn transaction<F, E>(&mut self, body: F) -> Result<Vec<PayloadWarning>, E>
    where
        F: FnOnce(&mut CacheTransaction<'_>) -> Result<(), E>,
        E: From<CacheError> + fmt::Display,
    {
        self.perform(None, body)
    }

    /// Runs `body` in an optimistic transaction recorded under `change_id`.
    ///
    /// # Errors
    /// As [`Cache::transaction`].
    pub fn record_optimistic_update<F, E>(
        &mut self,
        change_id: impl Into<ChangeId>,
        body: F,
    ) -> Result<Vec<PayloadWarning>, E>
    where
        F: FnOnce(&mut CacheTransaction<'_>) -> Result<(), E>,
        E: From<CacheError> + fmt::Display,
    {
        self.perform(Some(change_id.into()), body)
    }

    /// Rolls back the optimistic update recorded under `change_id`.
    ///
    /// # Errors
    /// Any error from replaying the remaining optimistic updates.
    pub fn rollback(&mut self, change_id: &ChangeId) -> Result<(), CacheError> {
        self.transaction(|transaction| transaction.rollback(change_id))
            .map(drop)
    }

    /// Discards all data and pending optimistic updates.
    ///
    /// Every previously known node is reported as edited.
    #[instrument(level = "debug", skip_all)]
    pub fn reset(&mut self) {
        let edited: BTreeSet<NodeId> = self.snapshot.optimistic.node_ids().cloned().collect();
        self.set_snapshot(CacheSnapshot::empty(), &edited);
    }

    /// Persisted form of the optimistic or baseline branch.
    pub fn extract(&self, optimistic: bool) -> SerializedGraph {
        extract::extract(self.snapshot.branch(optimistic))
    }

    /// Persisted form of just the nodes a read of `prune` reaches on the
    /// optimistic or baseline branch.
    ///
    /// # Errors
    /// Any error from parsing the query.
    #[instrument(level = "debug", skip_all)]
    pub fn extract_pruned(&self, optimistic: bool, prune: &Query) -> Result<SerializedGraph, CacheError> {
        let operation = self.context.parse_operation(prune)?;
        let graph = self.snapshot.branch(optimistic);
        let result = read_operation(&self.context, &operation, graph, true);
        let mut keep = result.node_ids.clone().unwrap_or_default();
        keep.insert(operation.root_id.clone());
        let pruned = extract::extract_subgraph(graph, &keep);
        debug!(target: "strand", kept = pruned.len(), nodes = graph.len(), "pruned extract");
        Ok(pruned)
    }

    /// Replaces all data with a persisted graph.
    ///
    /// `migrations` are applied after restoring. When `verify` is given the
    /// restored data must satisfy it completely. Pending optimistic updates
    /// are dropped.
    ///
    /// # Errors
    /// [`CacheError::Restore`], [`CacheError::Migration`], or
    /// [`CacheError::UnsatisfiedCache`]; the cache is left unchanged.
    #[instrument(level = "debug", skip_all, fields(nodes = data.len()))]
    pub fn restore(
        &mut self,
        data: SerializedGraph,
        migrations: Option<&MigrationMap>,
        verify: Option<&Query>,
    ) -> Result<(), CacheError> {
        let (graph, mut edited) = extract::restore(data, &self.context)?;
        let graph = match migrations {
            Some(map) => migrate(&graph, map)?,
            None => graph,
        };
        let graph = Rc::new(graph);

        if let Some(query) = verify {
            let operation = self.context.parse_operation(query)?;
            if !read_operation(&self.context, &operation, &graph, false).complete {
                return Err(CacheError::UnsatisfiedCache {
                    operation: operation.label(),
                });
            }
        }

        // Nodes that vanished must reach their observers too.
        edited.extend(self.snapshot.optimistic.node_ids().cloned());
        let snapshot = CacheSnapshot {
            optimistic: Rc::clone(&graph),
            baseline: graph,
            optimistic_queue: OptimisticUpdateQueue::default(),
        };
        self.set_snapshot(snapshot, &edited);
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(optimistic = change_id.is_some()))]
    fn perform<F, E>(&mut self, change_id: Option<ChangeId>, body: F) -> Result<Vec<PayloadWarning>, E>
    where
        F: FnOnce(&mut CacheTransaction<'_>) -> Result<(), E>,
        E: From<CacheError> + fmt::Display,
    {
        self.context.tracer().transaction_start();
        let mut transaction = CacheTransaction::new(&self.context, self.snapshot.clone(), change_id);
        let outcome = body(&mut transaction).and_then(|()| transaction.commit().map_err(E::from));
        match outcome {
            Ok(commit) => {
                self.set_snapshot(commit.snapshot, &commit.edited_node_ids);
                self.context.tracer().transaction_end(None);
                Ok(commit.warnings)
            }
            Err(error) => {
                self.context.tracer().transaction_end(Some(&error));
                Err(error)
            }
        }
    }

    /// Swaps in `snapshot` and notifies observers of `edited`.
    fn set_snapshot(&mut self, snapshot: CacheSnapshot, edited: &BTreeSet<NodeId>) {
        let last = std::mem::replace(&mut self.snapshot, snapshot);
        copy_unaffected_reads(&last.baseline, &self.snapshot.baseline, edited);
        if !Rc::ptr_eq(&self.snapshot.optimistic, &self.snapshot.baseline) {
            copy_unaffected_reads(&last.optimistic, &self.snapshot.optimistic, edited);
        }

        let tracer = self.context.tracer();
        tracer.broadcast_start(edited);
        for observer in &mut self.observers {
            observer.consume_changes(&self.context, &self.snapshot.optimistic, edited);
        }
        if let Some(on_change) = self.context.on_change() {
            on_change(&self.snapshot, edited);
        }
        tracer.broadcast_end(edited);
    }
}

/// Carries complete memoized reads that touch none of `edited` from `last`
/// over to `next`.
fn copy_unaffected_reads(last: &Rc<GraphSnapshot>, next: &Rc<GraphSnapshot>, edited: &BTreeSet<NodeId>) {
    if Rc::ptr_eq(last, next) {
        return;
    }
    let mut copied = 0_usize;
    for (operation, result) in last.cached_reads() {
        if !result.complete {
            continue;
        }
        let Some(node_ids) = &result.node_ids else {
            continue;
        };
        if !node_ids.is_disjoint(edited) {
            continue;
        }
        next.cache_read(operation, result);
        copied += 1;
    }
    if copied > 0 {
        debug!(target: "strand", copied, "carried memoized reads over");
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(CacheContext::default())
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("nodes", &self.snapshot.optimistic.len())
            .field("optimistic_updates", &self.snapshot.optimistic_queue.len())
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}
