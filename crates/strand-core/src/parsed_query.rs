// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The parsed query model: a selection set flattened into a tree keyed by
//! response key, with arguments, aliases, and inclusion directives resolved
//! into per-field metadata.
//!
//! Parsing produces a tree whose arguments may still reference variables
//! ([`ArgumentValue`]). [`expand_variables`] substitutes concrete values and
//! evaluates `@skip`/`@include`, yielding the `ParsedQuery<Value>` that the
//! editor and the read engine walk.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::CacheError;
use crate::selection::{ArgumentValue, Directive, FieldSelection, SelectionSet};
use crate::value::{PathPart, Value, ValueMap};

/// Response key → field node.
pub type ParsedQuery<A = Value> = BTreeMap<String, ParsedQueryNode<A>>;

/// Everything the cache needs to know about one selected field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedQueryNode<A = Value> {
    /// Sub-fields, when the field selects into an object.
    pub children: Option<Arc<ParsedQuery<A>>>,
    /// Schema name, present only when it differs from the response key.
    pub schema_name: Option<String>,
    /// Arguments, present only when the field is parameterized.
    pub args: Option<BTreeMap<String, A>>,
    /// Some transitive child has arguments or an alias.
    pub has_parameterized_children: bool,
    /// `@skip`/`@include` directives, when present.
    pub selection: Option<ParsedSelection>,
    /// The field's inclusion directives evaluated to "skip".
    pub excluded: bool,
}

impl<A> ParsedQueryNode<A> {
    /// Schema name of the field stored under `key`.
    pub fn field_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.schema_name.as_deref().unwrap_or(key)
    }
}

/// Inclusion directives attached to a field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedSelection {
    /// `@skip` and `@include` directives in source order.
    pub directives: Vec<Directive>,
}

/// Returns `true` if any child carries arguments, an alias, or parameterized
/// descendants.
pub fn are_children_dynamic<A>(children: Option<&ParsedQuery<A>>) -> bool {
    children.is_some_and(|children| {
        children.values().any(|child| {
            child.has_parameterized_children || child.args.is_some() || child.schema_name.is_some()
        })
    })
}

/// Flattens `selection_set` into a parsed query and collects the names of
/// every variable it references.
///
/// # Errors
/// [`CacheError::ConflictingFields`] when two selections of one response key
/// disagree on arguments or alias, and [`CacheError::InvalidQuery`] when no
/// fields remain.
pub fn parse_query(
    selection_set: &SelectionSet,
) -> Result<(Arc<ParsedQuery<ArgumentValue>>, BTreeSet<String>), CacheError> {
    let mut builder = QueryBuilder::default();
    let parsed = builder
        .node_map(selection_set, &[])?
        .ok_or_else(|| CacheError::InvalidQuery {
            message: "parsed a query, but found no fields present".into(),
        })?;
    Ok((parsed, builder.variables))
}

#[derive(Default)]
struct QueryBuilder {
    variables: BTreeSet<String>,
    // Equivalent selection sets (by canonical text) resolve to one tree.
    visited: FxHashMap<String, Option<Arc<ParsedQuery<ArgumentValue>>>>,
}

impl QueryBuilder {
    fn node_map(
        &mut self,
        selection_set: &SelectionSet,
        path: &[PathPart],
    ) -> Result<Option<Arc<ParsedQuery<ArgumentValue>>>, CacheError> {
        let key = selection_set.to_string();
        if let Some(cached) = self.visited.get(&key) {
            return Ok(cached.clone());
        }

        let mut map = ParsedQuery::new();
        for field in &selection_set.fields {
            let name = field.response_key();
            let mut field_path = path.to_vec();
            field_path.push(PathPart::from(name));

            let node = self.field_node(field, &field_path)?;
            let merged = merge_nodes(&field_path, node, map.remove(name))?;
            map.insert(name.to_owned(), merged);

            for directive in &field.directives {
                for value in directive.arguments.values() {
                    value.for_each_variable(&mut |variable| {
                        self.variables.insert(variable.to_owned());
                    });
                }
            }
        }

        let parsed = (!map.is_empty()).then(|| Arc::new(map));
        self.visited.insert(key, parsed.clone());
        Ok(parsed)
    }

    fn field_node(
        &mut self,
        field: &FieldSelection,
        path: &[PathPart],
    ) -> Result<ParsedQueryNode<ArgumentValue>, CacheError> {
        let children = match &field.selection_set {
            Some(selection_set) => self.node_map(selection_set, path)?,
            None => None,
        };

        // `@static` fields ignore their arguments and treat the alias as the
        // field's real name.
        let is_static = field.directives.iter().any(|d| d.name == "static");
        let (args, schema_name) = if is_static {
            (None, None)
        } else {
            for value in field.arguments.values() {
                value.for_each_variable(&mut |variable| {
                    self.variables.insert(variable.to_owned());
                });
            }
            (
                (!field.arguments.is_empty()).then(|| field.arguments.clone()),
                field.alias.as_ref().map(|_| field.name.clone()),
            )
        };

        let directives: Vec<Directive> = field
            .directives
            .iter()
            .filter(|d| d.name == "skip" || d.name == "include")
            .cloned()
            .collect();

        Ok(ParsedQueryNode {
            has_parameterized_children: are_children_dynamic(children.as_deref()),
            children,
            schema_name,
            args,
            selection: (!directives.is_empty()).then_some(ParsedSelection { directives }),
            excluded: false,
        })
    }
}

fn merge_nodes(
    path: &[PathPart],
    mut target: ParsedQueryNode<ArgumentValue>,
    source: Option<ParsedQueryNode<ArgumentValue>>,
) -> Result<ParsedQueryNode<ArgumentValue>, CacheError> {
    let Some(source) = source else {
        return Ok(target);
    };
    if target.args != source.args {
        return Err(CacheError::ConflictingFields {
            message: "parameterization mismatch".into(),
            path: path.to_vec(),
        });
    }
    if target.schema_name != source.schema_name {
        return Err(CacheError::ConflictingFields {
            message: "alias mismatch".into(),
            path: path.to_vec(),
        });
    }
    let Some(source_children) = source.children else {
        return Ok(target);
    };

    match &mut target.children {
        None => target.children = Some(source_children),
        Some(target_children) => {
            let target_children = Arc::make_mut(target_children);
            for (name, child) in source_children.iter() {
                let mut child_path = path.to_vec();
                child_path.push(PathPart::from(name.as_str()));
                let existing = target_children.remove(name);
                let merged = merge_nodes(&child_path, child.clone(), existing)?;
                target_children.insert(name.clone(), merged);
            }
        }
    }
    if source.has_parameterized_children {
        target.has_parameterized_children = true;
    }
    Ok(target)
}

/// Substitutes variable values into every argument and evaluates inclusion
/// directives.
///
/// Sub-trees shared by the input stay shared in the output.
///
/// # Errors
/// [`CacheError::MissingVariable`] when a referenced variable has no value,
/// and [`CacheError::InvalidQuery`] for a malformed `@skip`/`@include`.
pub fn expand_variables(
    parsed: &Arc<ParsedQuery<ArgumentValue>>,
    variables: Option<&ValueMap>,
) -> Result<Arc<ParsedQuery<Value>>, CacheError> {
    Expander {
        variables,
        memo: FxHashMap::default(),
    }
    .expand(parsed)
}

struct Expander<'v> {
    variables: Option<&'v ValueMap>,
    memo: FxHashMap<*const ParsedQuery<ArgumentValue>, Arc<ParsedQuery<Value>>>,
}

impl Expander<'_> {
    fn expand(
        &mut self,
        parsed: &Arc<ParsedQuery<ArgumentValue>>,
    ) -> Result<Arc<ParsedQuery<Value>>, CacheError> {
        if let Some(expanded) = self.memo.get(&Arc::as_ptr(parsed)) {
            return Ok(Arc::clone(expanded));
        }

        let mut expanded = ParsedQuery::new();
        for (key, node) in parsed.iter() {
            let excluded = match &node.selection {
                Some(selection) => !should_include(selection, self.variables)?,
                None => false,
            };
            let children = node
                .children
                .as_ref()
                .map(|children| self.expand(children))
                .transpose()?;
            let args = node
                .args
                .as_ref()
                .map(|args| {
                    args.iter()
                        .map(|(name, value)| Ok((name.clone(), self.argument(value)?)))
                        .collect::<Result<BTreeMap<_, _>, CacheError>>()
                })
                .transpose()?;
            expanded.insert(
                key.clone(),
                ParsedQueryNode {
                    children,
                    schema_name: node.schema_name.clone(),
                    args,
                    has_parameterized_children: node.has_parameterized_children,
                    selection: node.selection.clone(),
                    excluded,
                },
            );
        }

        let expanded = Arc::new(expanded);
        self.memo.insert(Arc::as_ptr(parsed), Arc::clone(&expanded));
        Ok(expanded)
    }

    fn argument(&self, value: &ArgumentValue) -> Result<Value, CacheError> {
        Ok(match value {
            ArgumentValue::Variable(name) => variable(self.variables, name)?.clone(),
            ArgumentValue::Null => Value::Null,
            ArgumentValue::Bool(b) => Value::Bool(*b),
            ArgumentValue::Number(n) => Value::Number(n.clone()),
            ArgumentValue::String(s) | ArgumentValue::Enum(s) => Value::String(s.clone()),
            ArgumentValue::List(items) => Value::list(
                items
                    .iter()
                    .map(|item| self.argument(item))
                    .collect::<Result<_, _>>()?,
            ),
            ArgumentValue::Object(fields) => Value::object(
                fields
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), self.argument(value)?)))
                    .collect::<Result<_, CacheError>>()?,
            ),
        })
    }
}

fn variable<'v>(variables: Option<&'v ValueMap>, name: &str) -> Result<&'v Value, CacheError> {
    variables
        .and_then(|variables| variables.get(name))
        .ok_or_else(|| CacheError::MissingVariable { name: name.into() })
}

fn should_include(
    selection: &ParsedSelection,
    variables: Option<&ValueMap>,
) -> Result<bool, CacheError> {
    for directive in &selection.directives {
        let condition = match directive.arguments.get("if") {
            Some(ArgumentValue::Bool(b)) => *b,
            Some(ArgumentValue::Variable(name)) => {
                variable(variables, name)?
                    .as_bool()
                    .ok_or_else(|| CacheError::InvalidQuery {
                        message: format!("variable ${name} used by @{} must be a boolean", directive.name),
                    })?
            }
            _ => {
                return Err(CacheError::InvalidQuery {
                    message: format!("@{} requires a boolean `if` argument", directive.name),
                })
            }
        };
        let include = if directive.name == "skip" { !condition } else { condition };
        if !include {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::QueryDocument;

    fn parse(source: &str) -> Result<(Arc<ParsedQuery<ArgumentValue>>, BTreeSet<String>), CacheError> {
        parse_query(&QueryDocument::parse(source)?.selection_set)
    }

    #[test]
    fn records_aliases_arguments_and_variables() {
        let Ok((parsed, variables)) =
            parse("{ me: user(id: $id) { name @include(if: $withName) } stats { count } }")
        else {
            unreachable!("fixture failed to parse");
        };
        let me = &parsed["me"];
        assert_eq!(me.schema_name.as_deref(), Some("user"));
        assert!(me.args.is_some());
        assert!(!me.has_parameterized_children);
        assert!(me.children.as_ref().is_some_and(|c| c["name"].selection.is_some()));
        assert!(!are_children_dynamic(parsed["stats"].children.as_deref()));
        assert!(are_children_dynamic(Some(&*parsed)));
        assert_eq!(
            variables.into_iter().collect::<Vec<_>>(),
            vec!["id".to_owned(), "withName".to_owned()]
        );
    }

    #[test]
    fn merges_repeated_fields() {
        let Ok((parsed, _)) = parse("{ viewer { id } viewer { name friends(first: 2) { id } } }")
        else {
            unreachable!("fixture failed to parse");
        };
        let viewer = &parsed["viewer"];
        let Some(children) = viewer.children.as_ref() else {
            unreachable!("viewer has children");
        };
        assert_eq!(children.keys().collect::<Vec<_>>(), ["friends", "id", "name"]);
        assert!(viewer.has_parameterized_children);
    }

    #[test]
    fn rejects_conflicting_fields() {
        assert!(matches!(
            parse("{ user(id: 1) { id } user(id: 2) { id } }"),
            Err(CacheError::ConflictingFields { message, .. }) if message == "parameterization mismatch"
        ));
        assert!(matches!(
            parse("{ a: foo a: bar }"),
            Err(CacheError::ConflictingFields { message, .. }) if message == "alias mismatch"
        ));
    }

    #[test]
    fn static_fields_drop_arguments_and_alias() {
        let Ok((parsed, variables)) = parse("{ thing: other(x: $x) @static }") else {
            unreachable!("fixture failed to parse");
        };
        assert!(parsed["thing"].args.is_none());
        assert!(parsed["thing"].schema_name.is_none());
        assert!(variables.is_empty());
    }

    #[test]
    fn expansion_substitutes_and_evaluates_directives() {
        let Ok((parsed, _)) =
            parse("{ user(id: $id, tags: [$tag, \"x\"]) { secret @skip(if: $hide) name } }")
        else {
            unreachable!("fixture failed to parse");
        };
        let mut variables = ValueMap::new();
        variables.insert("id".into(), Value::from(7));
        variables.insert("tag".into(), Value::from("t"));
        variables.insert("hide".into(), Value::Bool(true));

        let Ok(expanded) = expand_variables(&parsed, Some(&variables)) else {
            unreachable!("expansion failed");
        };
        let user = &expanded["user"];
        let Some(args) = user.args.as_ref() else {
            unreachable!("user is parameterized");
        };
        assert_eq!(args["id"], Value::from(7));
        assert_eq!(args["tags"], Value::list(vec![Value::from("t"), Value::from("x")]));
        let Some(children) = user.children.as_ref() else {
            unreachable!("user has children");
        };
        assert!(children["secret"].excluded);
        assert!(!children["name"].excluded);

        variables.remove("id");
        assert_eq!(
            expand_variables(&parsed, Some(&variables)),
            Err(CacheError::MissingVariable { name: "id".into() })
        );
    }

    #[test]
    fn expansion_keeps_shared_subtrees_shared() {
        let Ok((parsed, _)) = parse("{ a { x y } b { x y } }") else {
            unreachable!("fixture failed to parse");
        };
        let Ok(expanded) = expand_variables(&parsed, None) else {
            unreachable!("expansion failed");
        };
        let (Some(a), Some(b)) = (&expanded["a"].children, &expanded["b"].children) else {
            unreachable!("both fields have children");
        };
        assert!(Arc::ptr_eq(a, b));
    }
}
