// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! JSON-like payload values and field paths.
//!
//! Containers are reference counted so snapshots can share untouched
//! sub-trees. Mutation goes through [`Arc::make_mut`], which clones a
//! container only when another snapshot still holds it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::Deserializer;
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

/// String-keyed object map used inside [`Value::Object`].
pub type ValueMap = BTreeMap<String, Value>;

/// A payload value: null, scalar, ordered list, or string-keyed map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Value {
    /// JSON `null`.
    #[default]
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Numeric scalar (integer or float, as decoded from JSON).
    Number(serde_json::Number),
    /// String scalar.
    String(String),
    /// Ordered list.
    List(Arc<Vec<Value>>),
    /// String-keyed map.
    Object(Arc<ValueMap>),
}

impl Value {
    /// Wraps a map as an object value.
    pub fn object(map: ValueMap) -> Self {
        Self::Object(Arc::new(map))
    }

    /// Wraps items as a list value.
    pub fn list(items: Vec<Value>) -> Self {
        Self::List(Arc::new(items))
    }

    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns `true` for booleans, numbers, and strings.
    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Bool(_) | Self::Number(_) | Self::String(_))
    }

    /// Returns the map when this is an object.
    pub fn as_object(&self) -> Option<&ValueMap> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Returns the items when this is a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the string when this is a string scalar.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean when this is a boolean scalar.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Looks up `key` when this is an object.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Human-readable shape name used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Object(_) => "object",
        }
    }

    /// Follows `path` through nested objects and lists.
    pub fn get_path(&self, path: &[PathPart]) -> Option<&Value> {
        let mut cursor = self;
        for part in path {
            cursor = match (cursor, part) {
                (Self::Object(map), PathPart::Key(key)) => map.get(key)?,
                (Self::List(items), PathPart::Index(index)) => items.get(*index)?,
                _ => return None,
            };
        }
        Some(cursor)
    }

    /// Writes `value` at `path`, creating (or replacing) intermediate
    /// containers whose shape does not match the next path part.
    ///
    /// Lists are padded with nulls when an index lies past their end.
    pub fn set_path(&mut self, path: &[PathPart], value: Value) {
        let Some((head, rest)) = path.split_first() else {
            *self = value;
            return;
        };
        match head {
            PathPart::Key(key) => {
                if !matches!(self, Self::Object(_)) {
                    *self = Self::Object(Arc::default());
                }
                if let Self::Object(map) = self {
                    Arc::make_mut(map)
                        .entry(key.clone())
                        .or_insert(Self::Null)
                        .set_path(rest, value);
                }
            }
            PathPart::Index(index) => {
                if !matches!(self, Self::List(_)) {
                    *self = Self::List(Arc::default());
                }
                if let Self::List(items) = self {
                    let items = Arc::make_mut(items);
                    if items.len() <= *index {
                        items.resize(index + 1, Self::Null);
                    }
                    items[*index].set_path(rest, value);
                }
            }
        }
    }

    /// Removes the object key at the end of `path`. Returns the removed value.
    ///
    /// Containers along the path are only cloned when the key exists.
    pub fn remove_path(&mut self, path: &[PathPart]) -> Option<Value> {
        let (PathPart::Key(last), parents) = path.split_last()? else {
            return None;
        };
        self.get_path(path)?;
        let mut cursor = self;
        for part in parents {
            cursor = match (cursor, part) {
                (Self::Object(map), PathPart::Key(key)) => Arc::make_mut(map).get_mut(key)?,
                (Self::List(items), PathPart::Index(index)) => {
                    Arc::make_mut(items).get_mut(*index)?
                }
                _ => return None,
            };
        }
        match cursor {
            Self::Object(map) => Arc::make_mut(map).remove(last),
            _ => None,
        }
    }

    /// Converts into a `serde_json::Value`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Value::Number(n.clone()),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::list(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => Self::object(
                map.into_iter()
                    .map(|(key, value)| (key, Self::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        value.to_json()
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<ValueMap> for Value {
    fn from(map: ValueMap) -> Self {
        Self::object(map)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::list(items)
    }
}

/// Compact JSON rendering.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_json(), f)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => n.serialize(serializer),
            Self::String(s) => serializer.serialize_str(s),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map.iter() {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from)
    }
}

/// One step of a field path: an object key or a list index.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathPart {
    /// Position within a list.
    Index(usize),
    /// Key within an object.
    Key(String),
}

impl PathPart {
    /// Returns the index for [`PathPart::Index`].
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(index) => Some(*index),
            Self::Key(_) => None,
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Index(index) => serde_json::Value::from(*index),
            Self::Key(key) => serde_json::Value::String(key.clone()),
        }
    }
}

impl From<&str> for PathPart {
    fn from(key: &str) -> Self {
        Self::Key(key.to_owned())
    }
}

impl From<String> for PathPart {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<usize> for PathPart {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl fmt::Display for PathPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{index}"),
            Self::Key(key) => f.write_str(key),
        }
    }
}

/// Renders a path as dot-separated parts (`viewer.friends.0.name`).
pub fn format_path(path: &[PathPart]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

/// Compact JSON array rendering of a path, used in derived node ids.
pub(crate) fn path_to_json(path: &[PathPart]) -> serde_json::Value {
    serde_json::Value::Array(path.iter().map(PathPart::to_json).collect())
}
