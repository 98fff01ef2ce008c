// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Observability hooks.
//!
//! The cache reports reads, writes, transactions, and broadcasts through a
//! [`Tracer`]. Every hook has a no-op default so implementations pick only
//! what they need. [`LogTracer`] forwards to `tracing`.
use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, info, trace, warn};

use crate::error::PayloadWarning;
use crate::ident::NodeId;
use crate::operation::ParsedOperation;
use crate::read::QueryResult;
use crate::value::Value;

/// Receives notifications about cache activity.
pub trait Tracer {
    /// A recoverable problem (unsupported feature, suspicious payload).
    fn warning(&self, _message: &str) {}

    /// A read finished; `cache_hit` is set when the memoized result was reused.
    fn read_end(&self, _operation: &ParsedOperation, _result: &QueryResult, _cache_hit: bool) {}

    /// A write finished.
    fn write_end(
        &self,
        _operation: &ParsedOperation,
        _payload: &Value,
        _warnings: &[PayloadWarning],
    ) {
    }

    /// A transaction is starting.
    fn transaction_start(&self) {}

    /// A transaction ended; `error` is set when it was rolled back.
    fn transaction_end(&self, _error: Option<&dyn fmt::Display>) {}

    /// Observers are about to be notified of `edited` nodes.
    fn broadcast_start(&self, _edited: &BTreeSet<NodeId>) {}

    /// Observer notification finished.
    fn broadcast_end(&self, _edited: &BTreeSet<NodeId>) {}
}

/// Default tracer: warnings always, per-operation detail when verbose.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogTracer {
    verbose: bool,
}

impl LogTracer {
    /// Creates a tracer; `verbose` enables read/write logging.
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl Tracer for LogTracer {
    fn warning(&self, message: &str) {
        warn!(target: "strand", "{message}");
    }

    fn read_end(&self, operation: &ParsedOperation, result: &QueryResult, cache_hit: bool) {
        if !self.verbose {
            return;
        }
        let label = operation.label();
        if cache_hit {
            debug!(target: "strand", operation = %label, complete = result.complete, "read (cached)");
        } else {
            info!(target: "strand", operation = %label, complete = result.complete, "read");
        }
    }

    fn write_end(&self, operation: &ParsedOperation, payload: &Value, warnings: &[PayloadWarning]) {
        if !self.verbose {
            return;
        }
        let label = operation.label();
        if warnings.is_empty() {
            debug!(target: "strand", operation = %label, %payload, "write");
            return;
        }
        warn!(target: "strand", operation = %label, %payload, "write produced {} warning(s)", warnings.len());
        for warning in warnings {
            warn!(target: "strand", operation = %label, "{warning}");
        }
    }

    fn transaction_end(&self, error: Option<&dyn fmt::Display>) {
        if let Some(error) = error {
            warn!(target: "strand", %error, "rolling transaction back due to error");
        }
    }

    fn broadcast_start(&self, edited: &BTreeSet<NodeId>) {
        if self.verbose {
            trace!(target: "strand", edited = edited.len(), "broadcast start");
        }
    }
}
