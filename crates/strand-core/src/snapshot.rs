// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Baseline and optimistic graph versions held together.
use std::rc::Rc;

use crate::graph::GraphSnapshot;
use crate::optimistic::OptimisticUpdateQueue;

/// The full state of a cache at one point in time.
///
/// `optimistic` is `baseline` with every queued optimistic update replayed
/// on top. With an empty queue both fields are the same `Rc`.
#[derive(Clone, Debug)]
pub struct CacheSnapshot {
    /// Confirmed data.
    pub baseline: Rc<GraphSnapshot>,
    /// Confirmed data plus pending optimistic updates.
    pub optimistic: Rc<GraphSnapshot>,
    /// Pending optimistic updates, oldest first.
    pub optimistic_queue: OptimisticUpdateQueue,
}

impl CacheSnapshot {
    /// Empty cache state.
    pub fn empty() -> Self {
        let graph = Rc::new(GraphSnapshot::empty());
        Self {
            optimistic: Rc::clone(&graph),
            baseline: graph,
            optimistic_queue: OptimisticUpdateQueue::default(),
        }
    }

    /// Baseline or optimistic branch.
    pub fn branch(&self, optimistic: bool) -> &Rc<GraphSnapshot> {
        if optimistic {
            &self.optimistic
        } else {
            &self.baseline
        }
    }
}

impl Default for CacheSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}
