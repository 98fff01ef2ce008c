// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Configuration and hooks shared by every snapshot a cache produces.
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::instrument;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::ident::{NodeId, OperationId};
use crate::operation::{ParsedOperation, Query, QueryInfo};
use crate::parsed_query::expand_variables;
use crate::selection::QueryDocument;
use crate::snapshot::CacheSnapshot;
use crate::tracer::{LogTracer, Tracer};
use crate::transaction::CacheTransaction;
use crate::value::{Value, ValueMap};

/// Maps an object payload to its entity id; strings and numbers are accepted.
pub type EntityIdMapper = Box<dyn Fn(&ValueMap) -> Option<Value>>;

/// Rewrites entity data in place whenever a new version of the entity is built.
/// Must be idempotent.
pub type EntityTransformer = Box<dyn Fn(&mut ValueMap)>;

/// Maps a parameterized field's arguments to an entity id to read from when
/// the field itself has never been written.
pub type ResolverRedirect = Box<dyn Fn(&ValueMap) -> Option<NodeId>>;

/// Runs inside a committing transaction for every edited entity of one type,
/// receiving the entity's current and previous data.
pub type EntityUpdater =
    Box<dyn Fn(&mut CacheTransaction<'_>, Option<&Value>, Option<&Value>) -> Result<(), CacheError>>;

/// Called after every snapshot change with the new snapshot and edited ids.
pub type ChangeCallback = Box<dyn Fn(&CacheSnapshot, &BTreeSet<NodeId>)>;

/// Configuration, pluggable behavior, and memoized operations shared by
/// every cache component.
pub struct CacheContext {
    config: CacheConfig,
    entity_id_mapper: EntityIdMapper,
    entity_transformer: Option<EntityTransformer>,
    resolver_redirects: BTreeMap<String, BTreeMap<String, ResolverRedirect>>,
    entity_updaters: BTreeMap<String, EntityUpdater>,
    on_change: Option<ChangeCallback>,
    tracer: Box<dyn Tracer>,
    query_infos: RefCell<FxHashMap<String, Rc<QueryInfo>>>,
    operations: RefCell<FxHashMap<String, Vec<Rc<ParsedOperation>>>>,
    next_operation_id: Cell<u64>,
}

impl CacheContext {
    /// Context with the default id mapper (reads `config.id_field`) and a
    /// [`LogTracer`].
    pub fn new(config: CacheConfig) -> Self {
        let id_field = config.id_field.clone();
        Self {
            entity_id_mapper: Box::new(move |object| object.get(&id_field).cloned()),
            entity_transformer: None,
            resolver_redirects: BTreeMap::new(),
            entity_updaters: BTreeMap::new(),
            on_change: None,
            tracer: Box::new(LogTracer::new(config.verbose)),
            config,
            query_infos: RefCell::new(FxHashMap::default()),
            operations: RefCell::new(FxHashMap::default()),
            next_operation_id: Cell::new(0),
        }
    }

    /// Replaces the entity id mapper.
    pub fn with_entity_id_mapper(
        mut self,
        mapper: impl Fn(&ValueMap) -> Option<Value> + 'static,
    ) -> Self {
        self.entity_id_mapper = Box::new(mapper);
        self
    }

    /// Installs an entity transformer.
    pub fn with_entity_transformer(mut self, transformer: impl Fn(&mut ValueMap) + 'static) -> Self {
        self.entity_transformer = Some(Box::new(transformer));
        self
    }

    /// Registers a redirect for `type_name.field_name`.
    pub fn with_resolver_redirect(
        mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        redirect: impl Fn(&ValueMap) -> Option<NodeId> + 'static,
    ) -> Self {
        self.resolver_redirects
            .entry(type_name.into())
            .or_default()
            .insert(field_name.into(), Box::new(redirect));
        self
    }

    /// Registers an updater for entities of `type_name`.
    pub fn with_entity_updater(
        mut self,
        type_name: impl Into<String>,
        updater: impl Fn(&mut CacheTransaction<'_>, Option<&Value>, Option<&Value>) -> Result<(), CacheError>
            + 'static,
    ) -> Self {
        self.entity_updaters
            .insert(type_name.into(), Box::new(updater));
        self
    }

    /// Installs the change callback.
    pub fn with_on_change(
        mut self,
        callback: impl Fn(&CacheSnapshot, &BTreeSet<NodeId>) + 'static,
    ) -> Self {
        self.on_change = Some(Box::new(callback));
        self
    }

    /// Replaces the tracer.
    pub fn with_tracer(mut self, tracer: impl Tracer + 'static) -> Self {
        self.tracer = Box::new(tracer);
        self
    }

    /// Data-only settings.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Active tracer.
    pub fn tracer(&self) -> &dyn Tracer {
        &*self.tracer
    }

    /// Entity id of `value`, if it is an object the mapper identifies.
    ///
    /// String ids are used as-is and numeric ids are stringified; any other
    /// mapper output means "not an entity".
    pub fn entity_id_for_value(&self, value: &Value) -> Option<NodeId> {
        let object = value.as_object()?;
        match (self.entity_id_mapper)(object)? {
            Value::String(id) => Some(NodeId::from(id)),
            Value::Number(n) => Some(NodeId::from(n.to_string())),
            _ => None,
        }
    }

    pub(crate) fn entity_transformer(&self) -> Option<&EntityTransformer> {
        self.entity_transformer.as_ref()
    }

    pub(crate) fn resolver_redirect(&self, type_name: &str, field_name: &str) -> Option<&ResolverRedirect> {
        self.resolver_redirects.get(type_name)?.get(field_name)
    }

    pub(crate) fn entity_updater(&self, type_name: &str) -> Option<&EntityUpdater> {
        self.entity_updaters.get(type_name)
    }

    pub(crate) fn has_entity_updaters(&self) -> bool {
        !self.entity_updaters.is_empty()
    }

    pub(crate) fn on_change(&self) -> Option<&ChangeCallback> {
        self.on_change.as_ref()
    }

    /// Applies configured document transformations (`__typename` injection).
    pub fn transform_document(&self, document: &Arc<QueryDocument>) -> Arc<QueryDocument> {
        if self.config.add_typename {
            Arc::new(document.with_typename())
        } else {
            Arc::clone(document)
        }
    }

    /// Returns the memoized operation for `query`, parsing it on first use.
    ///
    /// Queries with the same document text, root, and variables resolve to
    /// the same instance.
    ///
    /// # Errors
    /// Any parse, validation, or variable-expansion error.
    #[instrument(level = "trace", skip_all, fields(root = %query.root_id))]
    pub fn parse_operation(&self, query: &Query) -> Result<Rc<ParsedOperation>, CacheError> {
        let key = query.document.to_string();
        let memoized = self.operations.borrow().get(&key).and_then(|instances| {
            instances
                .iter()
                .find(|op| op.root_id == query.root_id && op.variables == query.variables)
                .cloned()
        });
        if let Some(operation) = memoized {
            return Ok(operation);
        }

        let info = self.query_info(&key, &query.document)?;
        let mut variables = info.variable_defaults.clone();
        if let Some(supplied) = &query.variables {
            variables.extend(supplied.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let parsed_query = expand_variables(&info.parsed, Some(&variables))?;

        let id = OperationId(self.next_operation_id.get());
        self.next_operation_id.set(id.0 + 1);
        let operation = Rc::new(ParsedOperation {
            id,
            info,
            root_id: query.root_id.clone(),
            parsed_query,
            variables: query.variables.clone(),
        });
        self.operations
            .borrow_mut()
            .entry(key)
            .or_default()
            .push(Rc::clone(&operation));
        Ok(operation)
    }

    fn query_info(&self, key: &str, document: &Arc<QueryDocument>) -> Result<Rc<QueryInfo>, CacheError> {
        let memoized = self.query_infos.borrow().get(key).cloned();
        if let Some(info) = memoized {
            return Ok(info);
        }
        let info = Rc::new(QueryInfo::new(self.transform_document(document))?);
        self.query_infos
            .borrow_mut()
            .insert(key.to_owned(), Rc::clone(&info));
        Ok(info)
    }
}

impl Default for CacheContext {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl fmt::Debug for CacheContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheContext")
            .field("config", &self.config)
            .field("entity_transformer", &self.entity_transformer.is_some())
            .field("entity_updaters", &self.entity_updaters.keys().collect::<Vec<_>>())
            .field("memoized_documents", &self.query_infos.borrow().len())
            .finish_non_exhaustive()
    }
}
