// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! strand-core: a normalized client-side graph cache.
//!
//! Payloads written against a query shape are decomposed into a graph of
//! entity nodes and parameterized-value nodes linked by bidirectional
//! references. Every committed edit yields a new immutable [`GraphSnapshot`]
//! that structurally shares untouched nodes with its parent. Reads
//! re-derive any query shape from the graph, speculative (optimistic) edits
//! live on a separate branch that can be rolled back, and observers are
//! notified only when nodes they touched were edited.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod cache;
mod config;
mod context;
mod editor;
mod error;
mod extract;
mod graph;
mod ident;
mod migrate;
mod node;
mod observer;
mod operation;
mod optimistic;
mod parsed_query;
mod read;
mod selection;
mod snapshot;
mod tracer;
mod transaction;
mod value;

/// Cache façade: the single entry point most callers need.
pub use cache::Cache;
/// Serializable configuration and its loading errors.
pub use config::{CacheConfig, ConfigError};
/// Shared configuration, pluggable hooks, and operation memoization.
pub use context::{
    CacheContext, ChangeCallback, EntityIdMapper, EntityTransformer, EntityUpdater,
    ResolverRedirect,
};
/// Snapshot editing (payload normalization) and the one-shot write helper.
pub use editor::{write, EditorCommit, SnapshotEditor};
/// Error taxonomy and recoverable payload warnings.
pub use error::{CacheError, PayloadWarning};
/// Persisted form of a graph snapshot.
pub use extract::{extract, extract_subgraph, restore, NodeSnapshotType, SerializedGraph, SerializedNode};
/// Immutable node maps.
pub use graph::GraphSnapshot;
/// Node, operation, change, and observer identifiers.
pub use ident::{node_id_for_parameterized_value, ChangeId, NodeId, ObserverId, OperationId};
/// Field-level migration of persisted entities.
pub use migrate::{migrate, FieldMigration, MigrationMap, ParameterizedMigration};
/// Node snapshots and their reference lists.
pub use node::{NodeKind, NodeReference, NodeSnapshot, ReferenceDirection};
/// Query observers.
pub use observer::QueryObserver;
/// Raw and parsed operations.
pub use operation::{ParsedOperation, Query, QueryInfo};
/// Optimistic update queue.
pub use optimistic::{OptimisticUpdate, OptimisticUpdateQueue, QueryDelta};
/// Parsed query model.
pub use parsed_query::{
    are_children_dynamic, expand_variables, parse_query, ParsedQuery, ParsedQueryNode,
    ParsedSelection,
};
/// Read/overlay engine.
pub use read::{read, QueryResult};
/// Query-shape documents and their text parser.
pub use selection::{
    ArgumentValue, Directive, FieldSelection, OperationKind, QueryDocument, SelectionSet,
    VariableDefinition,
};
/// Combined baseline/optimistic snapshot.
pub use snapshot::CacheSnapshot;
/// Tracer hooks and the default `tracing`-backed tracer.
pub use tracer::{LogTracer, Tracer};
/// Cache transactions.
pub use transaction::{CacheTransaction, TransactionCommit};
/// JSON-like payload values and field paths.
pub use value::{format_path, PathPart, Value, ValueMap};
