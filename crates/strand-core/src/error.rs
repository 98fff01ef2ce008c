// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use std::fmt;

use thiserror::Error;

use crate::ident::NodeId;
use crate::value::{format_path, PathPart};

/// Errors produced by cache operations.
///
/// Every variant is fatal to the operation that raised it: a failed write or
/// transaction leaves the previous snapshots untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The payload cannot be merged into the graph (for example, a scalar
    /// was supplied where the query selects sub-fields).
    #[error("{message} at {prefix}{path} (container {container_id})", prefix = format_prefix(.prefix_path), path = format_path(.path))]
    InvalidPayload {
        /// Human-readable reason.
        message: String,
        /// Path from the query root to the container node.
        prefix_path: Vec<PathPart>,
        /// Node being written when the payload was rejected.
        container_id: NodeId,
        /// Path within the container node.
        path: Vec<PathPart>,
    },
    /// Two selections of the same response key disagree on arguments or alias.
    #[error("conflicting field definitions for {path}: {message}", path = format_path(.path))]
    ConflictingFields {
        /// Which part of the selection disagrees.
        message: String,
        /// Response-key path of the conflicting field.
        path: Vec<PathPart>,
    },
    /// An internal invariant was violated while editing or verifying a graph.
    #[error("{message}{location}", location = format_location(.container_id.as_ref(), .path))]
    Operation {
        /// Human-readable reason.
        message: String,
        /// Node involved, when known.
        container_id: Option<NodeId>,
        /// Path within that node.
        path: Vec<PathPart>,
    },
    /// A read that required a complete result found missing fields.
    #[error("query {operation} cannot be satisfied from the cache")]
    UnsatisfiedCache {
        /// Canonical text (or name) of the operation.
        operation: String,
    },
    /// A variable referenced by an argument or directive has no value.
    #[error("expected variable ${name} to exist for query")]
    MissingVariable {
        /// Variable name without the `$` sigil.
        name: String,
    },
    /// The query-shape text could not be parsed.
    #[error("syntax error at offset {offset}: {message}")]
    QuerySyntax {
        /// Human-readable reason.
        message: String,
        /// Byte offset into the source text.
        offset: usize,
    },
    /// The query document is well formed but unusable.
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Human-readable reason.
        message: String,
    },
    /// A serialized graph failed validation during restore.
    #[error("restore failed: {message}")]
    Restore {
        /// Human-readable reason.
        message: String,
    },
    /// A migration tried to rewrite data it must not touch.
    #[error("migration failed: {message}")]
    Migration {
        /// Human-readable reason.
        message: String,
    },
}

impl CacheError {
    pub(crate) fn operation(
        message: impl Into<String>,
        container_id: Option<NodeId>,
        path: Vec<PathPart>,
    ) -> Self {
        Self::Operation {
            message: message.into(),
            container_id,
            path,
        }
    }
}

fn format_prefix(prefix: &[PathPart]) -> String {
    if prefix.is_empty() {
        String::new()
    } else {
        format!("{}/", format_path(prefix))
    }
}

fn format_location(container_id: Option<&NodeId>, path: &[PathPart]) -> String {
    match container_id {
        Some(id) if path.is_empty() => format!(" (node {id})"),
        Some(id) => format!(" (node {id} at {})", format_path(path)),
        None => String::new(),
    }
}

/// A recoverable shape mismatch noticed while merging a payload.
///
/// Warnings never abort a write; they are collected on the commit and
/// forwarded to the tracer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadWarning {
    /// Human-readable description.
    pub message: String,
    /// Node being written.
    pub container_id: NodeId,
    /// Path within that node.
    pub path: Vec<PathPart>,
}

impl fmt::Display for PayloadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (node {} at {})",
            self.message,
            self.container_id,
            format_path(&self.path)
        )
    }
}
