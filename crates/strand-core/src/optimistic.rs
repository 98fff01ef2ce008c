// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pending optimistic updates.
//!
//! The queue is a persistent value: `enqueue` and `remove` return a new
//! queue and leave the receiver untouched, so a [`CacheSnapshot`] can hold
//! one without worrying about later edits.
//!
//! [`CacheSnapshot`]: crate::CacheSnapshot
use std::collections::BTreeSet;
use std::rc::Rc;

use tracing::instrument;

use crate::context::CacheContext;
use crate::editor::{EditorCommit, SnapshotEditor};
use crate::error::CacheError;
use crate::graph::GraphSnapshot;
use crate::ident::ChangeId;
use crate::operation::Query;
use crate::value::Value;

/// One payload written during an optimistic transaction.
#[derive(Clone, Debug)]
pub struct QueryDelta {
    /// Shape of the payload.
    pub query: Query,
    /// The written payload.
    pub payload: Value,
}

/// All deltas recorded under one change id.
#[derive(Clone, Debug)]
pub struct OptimisticUpdate {
    /// Identifier used to roll the update back.
    pub change_id: ChangeId,
    /// Payloads in write order.
    pub deltas: Vec<QueryDelta>,
}

/// Ordered updates, oldest (lowest precedence) first.
#[derive(Clone, Debug, Default)]
pub struct OptimisticUpdateQueue {
    updates: Rc<Vec<OptimisticUpdate>>,
}

impl OptimisticUpdateQueue {
    /// Queue with `deltas` appended under `change_id`.
    ///
    /// Change ids are not checked for uniqueness; a duplicate id is rolled
    /// back together with its namesakes.
    pub fn enqueue(&self, change_id: ChangeId, deltas: Vec<QueryDelta>) -> Self {
        let mut updates = Vec::with_capacity(self.updates.len() + 1);
        updates.extend(self.updates.iter().cloned());
        updates.push(OptimisticUpdate { change_id, deltas });
        Self {
            updates: Rc::new(updates),
        }
    }

    /// Queue without any update recorded under `change_id`.
    pub fn remove(&self, change_id: &ChangeId) -> Self {
        let updates = self
            .updates
            .iter()
            .filter(|update| &update.change_id != change_id)
            .cloned()
            .collect();
        Self {
            updates: Rc::new(updates),
        }
    }

    /// Returns `true` if any update is pending.
    pub fn has_updates(&self) -> bool {
        !self.updates.is_empty()
    }

    /// Number of pending updates.
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// Returns `true` if no update is pending.
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Pending updates, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &OptimisticUpdate> + '_ {
        self.updates.iter()
    }

    /// Replays every queued delta on top of `baseline` in one editor session.
    ///
    /// An empty queue returns `baseline` itself with nothing edited.
    ///
    /// # Errors
    /// Any error from merging a delta or committing.
    #[instrument(level = "debug", skip_all, fields(updates = self.updates.len()))]
    pub fn apply(
        &self,
        context: &CacheContext,
        baseline: &Rc<GraphSnapshot>,
    ) -> Result<EditorCommit, CacheError> {
        if self.updates.is_empty() {
            return Ok(EditorCommit {
                snapshot: Rc::clone(baseline),
                edited_node_ids: BTreeSet::new(),
                written_queries: Vec::new(),
                warnings: Vec::new(),
            });
        }
        let mut editor = SnapshotEditor::new(context, Rc::clone(baseline));
        for delta in self.updates.iter().flat_map(|update| &update.deltas) {
            editor.merge_payload(&delta.query, &delta.payload)?;
        }
        editor.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(name: &str) -> Vec<QueryDelta> {
        let Ok(query) = Query::parse("{ viewer { id name } }") else {
            unreachable!("fixture failed to parse");
        };
        let payload = Value::from(serde_json::json!({ "viewer": { "id": 1, "name": name } }));
        vec![QueryDelta { query, payload }]
    }

    #[test]
    fn enqueue_and_remove_leave_receiver_untouched() {
        let empty = OptimisticUpdateQueue::default();
        let one = empty.enqueue(ChangeId::from("a"), delta("A"));
        let two = one.enqueue(ChangeId::from("b"), delta("B"));
        assert!(!empty.has_updates());
        assert_eq!(one.len(), 1);
        assert_eq!(two.len(), 2);

        let removed = two.remove(&ChangeId::from("a"));
        assert_eq!(two.len(), 2);
        let ids: Vec<_> = removed.iter().map(|u| u.change_id.0.as_str()).collect();
        assert_eq!(ids, ["b"]);
    }

    #[test]
    fn empty_queue_returns_baseline() {
        let context = CacheContext::default();
        let baseline = Rc::new(GraphSnapshot::empty());
        let Ok(commit) = OptimisticUpdateQueue::default().apply(&context, &baseline) else {
            unreachable!("empty apply failed");
        };
        assert!(Rc::ptr_eq(&commit.snapshot, &baseline));
        assert!(commit.edited_node_ids.is_empty());
    }

    #[test]
    fn later_updates_win() {
        let context = CacheContext::default();
        let baseline = Rc::new(GraphSnapshot::empty());
        let queue = OptimisticUpdateQueue::default()
            .enqueue(ChangeId::from("a"), delta("A"))
            .enqueue(ChangeId::from("b"), delta("B"));
        let Ok(commit) = queue.apply(&context, &baseline) else {
            unreachable!("apply failed");
        };
        let name = commit
            .snapshot
            .node_data(&crate::NodeId::new("1"))
            .and_then(|data| data.get("name"))
            .cloned();
        assert_eq!(name, Some(Value::from("B")));
        assert!(baseline.is_empty());
    }
}
