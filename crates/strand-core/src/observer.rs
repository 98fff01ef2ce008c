// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Query observers that re-run when the nodes behind their last result change.
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use crate::context::CacheContext;
use crate::error::CacheError;
use crate::graph::GraphSnapshot;
use crate::ident::{NodeId, ObserverId};
use crate::operation::{ParsedOperation, Query};
use crate::read::{read_operation, QueryResult};

/// Watches one query and re-delivers its result when nodes it was built
/// from change.
pub struct QueryObserver {
    id: ObserverId,
    operation: Rc<ParsedOperation>,
    last: Rc<QueryResult>,
    callback: Box<dyn FnMut(&QueryResult)>,
}

impl QueryObserver {
    /// Reads `query` from `snapshot` and delivers the first result
    /// immediately.
    ///
    /// # Errors
    /// Any error from parsing the query; the callback is not invoked.
    pub fn new(
        context: &CacheContext,
        id: ObserverId,
        query: &Query,
        snapshot: &GraphSnapshot,
        callback: impl FnMut(&QueryResult) + 'static,
    ) -> Result<Self, CacheError> {
        let operation = context.parse_operation(query)?;
        let last = read_operation(context, &operation, snapshot, true);
        let mut observer = Self {
            id,
            operation,
            last,
            callback: Box::new(callback),
        };
        (observer.callback)(&observer.last);
        Ok(observer)
    }

    /// Handle identifying this observer.
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Most recently delivered result.
    pub fn last_result(&self) -> &QueryResult {
        &self.last
    }

    /// Re-reads and re-delivers when the last result was incomplete or
    /// touched any of `edited`. Returns `true` if the callback ran.
    pub fn consume_changes(
        &mut self,
        context: &CacheContext,
        snapshot: &GraphSnapshot,
        edited: &BTreeSet<NodeId>,
    ) -> bool {
        if !self.has_update(edited) {
            return false;
        }
        self.last = read_operation(context, &self.operation, snapshot, true);
        (self.callback)(&self.last);
        true
    }

    fn has_update(&self, edited: &BTreeSet<NodeId>) -> bool {
        if !self.last.complete {
            return true;
        }
        self.last
            .node_ids
            .as_ref()
            .is_none_or(|ids| !ids.is_disjoint(edited))
    }
}

impl fmt::Debug for QueryObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryObserver")
            .field("id", &self.id)
            .field("operation", &self.operation.label())
            .field("complete", &self.last.complete)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use serde_json::json;

    use super::*;
    use crate::editor::write;
    use crate::value::Value;

    #[test]
    fn only_overlapping_edits_redeliver() {
        let context = CacheContext::default();
        let Ok(query) = Query::parse("{ viewer { id name } }") else {
            unreachable!("fixture failed to parse");
        };
        let payload = Value::from(json!({ "viewer": { "id": 1, "name": "A" } }));
        let Ok(commit) = write(&context, &Rc::new(GraphSnapshot::empty()), &query, &payload) else {
            unreachable!("write failed");
        };

        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let Ok(mut observer) = QueryObserver::new(&context, ObserverId(0), &query, &commit.snapshot, move |_| {
            counter.set(counter.get() + 1);
        }) else {
            unreachable!("observer failed");
        };
        assert_eq!(calls.get(), 1);
        assert!(observer.last_result().complete);

        let unrelated = BTreeSet::from([NodeId::new("2")]);
        assert!(!observer.consume_changes(&context, &commit.snapshot, &unrelated));
        let related = BTreeSet::from([NodeId::new("1")]);
        assert!(observer.consume_changes(&context, &commit.snapshot, &related));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn incomplete_results_always_redeliver() {
        let context = CacheContext::default();
        let Ok(query) = Query::parse("{ viewer { id } }") else {
            unreachable!("fixture failed to parse");
        };
        let empty = GraphSnapshot::empty();
        let Ok(mut observer) = QueryObserver::new(&context, ObserverId(7), &query, &empty, |_| {}) else {
            unreachable!("observer failed");
        };
        assert!(!observer.last_result().complete);
        assert!(observer.consume_changes(&context, &empty, &BTreeSet::new()));
    }
}
