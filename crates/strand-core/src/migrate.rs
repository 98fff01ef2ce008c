// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Field-level migration of restored entities.
//!
//! A [`MigrationMap`] rewrites plain fields of entities by typename and adds
//! parameterized-value nodes for fields a newer schema expects to exist.
//! Entities without a `__typename` are migrated under `Query`.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::CacheError;
use crate::graph::GraphSnapshot;
use crate::ident::{node_id_for_parameterized_value, NodeId};
use crate::node::{NodeKind, NodeSnapshot, ReferenceDirection};
use crate::value::{PathPart, Value, ValueMap};

/// Computes a field's new value from its current one.
pub type FieldMigration = Box<dyn Fn(Option<&Value>) -> Value>;

/// A parameterized field every entity of a type should carry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParameterizedMigration {
    /// Field path inside the entity.
    pub path: Vec<PathPart>,
    /// Arguments identifying the value node.
    pub args: ValueMap,
    /// Data of the created node.
    pub default_return: Option<Value>,
}

/// Migrations keyed by typename.
#[derive(Default)]
pub struct MigrationMap {
    entities: BTreeMap<String, BTreeMap<String, FieldMigration>>,
    parameterized: BTreeMap<String, Vec<ParameterizedMigration>>,
}

impl MigrationMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrites `field` of every `type_name` entity with `migration`.
    pub fn with_field(
        mut self,
        type_name: impl Into<String>,
        field: impl Into<String>,
        migration: impl Fn(Option<&Value>) -> Value + 'static,
    ) -> Self {
        self.entities
            .entry(type_name.into())
            .or_default()
            .insert(field.into(), Box::new(migration));
        self
    }

    /// Ensures every `type_name` entity has the parameterized field.
    pub fn with_parameterized(mut self, type_name: impl Into<String>, migration: ParameterizedMigration) -> Self {
        self.parameterized
            .entry(type_name.into())
            .or_default()
            .push(migration);
        self
    }

    /// Returns `true` if no migration is registered.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.parameterized.is_empty()
    }
}

impl fmt::Debug for MigrationMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: BTreeMap<_, Vec<_>> = self
            .entities
            .iter()
            .map(|(type_name, fields)| (type_name, fields.keys().collect()))
            .collect();
        f.debug_struct("MigrationMap")
            .field("entities", &fields)
            .field("parameterized", &self.parameterized)
            .finish()
    }
}

/// Applies `map` to every entity of `snapshot`, returning the migrated graph.
///
/// # Errors
/// [`CacheError::Migration`] when a field migration targets a reference
/// field.
pub fn migrate(snapshot: &GraphSnapshot, map: &MigrationMap) -> Result<GraphSnapshot, CacheError> {
    let mut nodes = snapshot.nodes().clone();
    for (id, node) in snapshot.nodes() {
        if node.kind != NodeKind::Entity {
            continue;
        }
        let Some(object) = node.data.as_ref().and_then(Value::as_object) else {
            continue;
        };
        let type_name = object
            .get("__typename")
            .and_then(Value::as_str)
            .unwrap_or("Query");

        if let Some(fields) = map.entities.get(type_name) {
            let mut migrated = (**node).clone();
            for (field, migration) in fields {
                let path = [PathPart::from(field.as_str())];
                if node.is_reference_field(&path) {
                    return Err(CacheError::Migration {
                        message: format!(
                            "{type_name}.{field} is a reference field. Migration is not allowed"
                        ),
                    });
                }
                let value = migration(object.get(field));
                if let Some(data) = migrated.data.as_mut() {
                    data.set_path(&path, value);
                }
            }
            debug!(target: "strand", %id, type_name, "migrated entity fields");
            nodes.insert(id.clone(), Arc::new(migrated));
        }

        for parameterized in map.parameterized.get(type_name).into_iter().flatten() {
            add_parameterized(&mut nodes, id, parameterized);
        }
    }
    Ok(GraphSnapshot::from_nodes(nodes))
}

fn add_parameterized(
    nodes: &mut BTreeMap<NodeId, Arc<NodeSnapshot>>,
    container_id: &NodeId,
    migration: &ParameterizedMigration,
) {
    let field_id = node_id_for_parameterized_value(container_id, &migration.path, &migration.args);
    let Some(container) = nodes.get_mut(container_id) else {
        return;
    };
    if container.outbound.iter().any(|reference| reference.id == field_id) {
        return;
    }
    Arc::make_mut(container).add_reference(ReferenceDirection::Outbound, &field_id, &migration.path);
    let mut node = NodeSnapshot::parameterized(migration.default_return.clone());
    node.add_reference(ReferenceDirection::Inbound, container_id, &migration.path);
    nodes.insert(field_id, Arc::new(node));
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn user_graph() -> GraphSnapshot {
        let mut root = NodeSnapshot::entity(Some(Value::object(ValueMap::new())));
        root.add_reference(ReferenceDirection::Outbound, &NodeId::new("1"), &["viewer".into()]);
        let mut user = NodeSnapshot::entity(Some(Value::from(json!({
            "__typename": "User",
            "id": 1,
            "name": "ada"
        }))));
        user.add_reference(ReferenceDirection::Inbound, &NodeId::root_query(), &["viewer".into()]);
        GraphSnapshot::from_nodes(BTreeMap::from([
            (NodeId::root_query(), Arc::new(root)),
            (NodeId::new("1"), Arc::new(user)),
        ]))
    }

    #[test]
    fn fields_are_rewritten_by_typename() {
        let map = MigrationMap::new()
            .with_field("User", "name", |name| {
                Value::from(name.and_then(Value::as_str).unwrap_or_default().to_uppercase())
            })
            .with_field("User", "age", |_| Value::from(0));
        let Ok(migrated) = migrate(&user_graph(), &map) else {
            unreachable!("migration failed");
        };
        assert_eq!(
            migrated.node_data(&NodeId::new("1")).map(Value::to_json),
            Some(json!({ "__typename": "User", "id": 1, "name": "ADA", "age": 0 }))
        );
    }

    #[test]
    fn reference_fields_cannot_be_migrated() {
        let map = MigrationMap::new().with_field("Query", "viewer", |_| Value::Null);
        let Err(CacheError::Migration { message }) = migrate(&user_graph(), &map) else {
            unreachable!("migration should fail");
        };
        assert_eq!(message, "Query.viewer is a reference field. Migration is not allowed");
    }

    #[test]
    fn missing_parameterized_nodes_are_added_with_edges() {
        let mut args = ValueMap::new();
        args.insert("first".into(), Value::from(10));
        let map = MigrationMap::new().with_parameterized(
            "User",
            ParameterizedMigration {
                path: vec!["friends".into()],
                args: args.clone(),
                default_return: Some(Value::list(Vec::new())),
            },
        );
        let Ok(migrated) = migrate(&user_graph(), &map) else {
            unreachable!("migration failed");
        };
        let field_id = node_id_for_parameterized_value(&NodeId::new("1"), &["friends".into()], &args);
        assert_eq!(migrated.node_data(&field_id), Some(&Value::list(Vec::new())));
        assert!(migrated.verify_integrity().is_ok());

        let Ok(again) = migrate(&migrated, &map) else {
            unreachable!("second migration failed");
        };
        assert_eq!(again, migrated);
    }
}
