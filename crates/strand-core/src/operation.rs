// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Query shapes and the operations parsed from them.
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;

use crate::error::CacheError;
use crate::ident::{NodeId, OperationId};
use crate::parsed_query::{parse_query, ParsedQuery};
use crate::selection::{ArgumentValue, QueryDocument};
use crate::value::{Value, ValueMap};

/// A raw query: a document plus where it is rooted and which variables it
/// runs with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    /// Node the operation is read from or written to.
    pub root_id: NodeId,
    /// Query-shape document.
    pub document: Arc<QueryDocument>,
    /// Variable values, if any.
    pub variables: Option<ValueMap>,
}

impl Query {
    /// Query rooted at the document's default root with no variables.
    pub fn new(document: QueryDocument) -> Self {
        Self {
            root_id: document.kind.root_id(),
            document: Arc::new(document),
            variables: None,
        }
    }

    /// Parses `source` into a query rooted at its default root.
    ///
    /// # Errors
    /// Returns [`CacheError::QuerySyntax`] for malformed text.
    pub fn parse(source: &str) -> Result<Self, CacheError> {
        QueryDocument::parse(source).map(Self::new)
    }

    /// Re-roots the query (e.g. at an entity id for fragment-style access).
    pub fn with_root(mut self, root_id: impl Into<NodeId>) -> Self {
        self.root_id = root_id.into();
        self
    }

    /// Sets the variable values.
    pub fn with_variables(mut self, variables: ValueMap) -> Self {
        self.variables = Some(variables);
        self
    }

    /// Sets one variable value.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables
            .get_or_insert_with(ValueMap::new)
            .insert(name.into(), value.into());
        self
    }
}

/// Per-document metadata shared by every operation instance of that document.
#[derive(Debug)]
pub struct QueryInfo {
    /// The document, after any configured transformation.
    pub document: Arc<QueryDocument>,
    /// Parsed tree with variable references still in place.
    pub parsed: Arc<ParsedQuery<ArgumentValue>>,
    /// Names of all variables the document references.
    pub variables: BTreeSet<String>,
    /// Values used for variables the caller does not supply.
    pub variable_defaults: ValueMap,
}

impl QueryInfo {
    /// Parses and validates `document`.
    ///
    /// Shorthand documents cannot declare variables, so only named
    /// operations are checked for undeclared and unused variables.
    ///
    /// # Errors
    /// [`CacheError::InvalidQuery`] listing every validation failure, or any
    /// error from [`parse_query`].
    pub fn new(document: Arc<QueryDocument>) -> Result<Self, CacheError> {
        let (parsed, variables) = parse_query(&document.selection_set)?;

        let mut variable_defaults = ValueMap::new();
        for definition in &document.variable_definitions {
            if let Some(default) = definition.default.as_ref().and_then(ArgumentValue::to_constant) {
                variable_defaults.insert(definition.name.clone(), default);
            } else if !definition.required() {
                variable_defaults.insert(definition.name.clone(), Value::Null);
            }
        }

        let info = Self {
            document,
            parsed,
            variables,
            variable_defaults,
        };
        if !info.document.shorthand {
            info.validate()?;
        }
        Ok(info)
    }

    fn validate(&self) -> Result<(), CacheError> {
        let declared: BTreeSet<&str> = self
            .document
            .variable_definitions
            .iter()
            .map(|definition| definition.name.as_str())
            .collect();
        let mut messages = Vec::new();
        for name in &self.variables {
            if !declared.contains(name.as_str()) {
                messages.push(format!("Variable ${name} is used, but not declared"));
            }
        }
        for name in &declared {
            if !self.variables.contains(*name) {
                messages.push(format!("Variable ${name} is unused"));
            }
        }
        if messages.is_empty() {
            return Ok(());
        }
        let mut message = format!(
            "Validation errors in {} {}:",
            self.document.kind.keyword(),
            self.document.name.as_deref().unwrap_or("<unknown>")
        );
        for line in messages {
            message.push_str("\n * ");
            message.push_str(&line);
        }
        Err(CacheError::InvalidQuery { message })
    }
}

/// A query bound to concrete variables; memoized so that equal queries
/// share one instance (and one read-cache slot).
#[derive(Debug)]
pub struct ParsedOperation {
    /// Identity used to key memoized reads.
    pub id: OperationId,
    /// Metadata of the underlying document.
    pub info: Rc<QueryInfo>,
    /// Node the operation is rooted at.
    pub root_id: NodeId,
    /// Parsed tree with variables substituted.
    pub parsed_query: Arc<ParsedQuery>,
    /// Variables as supplied by the caller.
    pub variables: Option<ValueMap>,
}

impl ParsedOperation {
    /// Label for diagnostics.
    pub fn label(&self) -> String {
        self.info.document.label()
    }
}
