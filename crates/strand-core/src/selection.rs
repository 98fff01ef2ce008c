// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Query-shape documents: a small AST, a text parser, and a canonical printer.
//!
//! The accepted text is the operation subset of the usual query language:
//! one operation (or a bare selection set), variable definitions with
//! defaults, fields with aliases, arguments, and directives. Fragments are
//! not supported. The canonical `Display` form keys the document memo and
//! the selection-set cache, so two documents that print identically are
//! treated as the same shape.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CacheError;
use crate::ident::NodeId;
use crate::value::Value;

/// Operation type of a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum OperationKind {
    /// Read operation; rooted at `ROOT_QUERY`.
    #[default]
    Query,
    /// Write operation; rooted at `ROOT_MUTATION`.
    Mutation,
    /// Streaming operation; rooted at `ROOT_SUBSCRIPTION`.
    Subscription,
}

impl OperationKind {
    /// Keyword used in query text.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        }
    }

    /// Root node an operation of this kind is written to by default.
    pub fn root_id(self) -> NodeId {
        match self {
            Self::Query => NodeId::root_query(),
            Self::Mutation => NodeId::root_mutation(),
            Self::Subscription => NodeId::root_subscription(),
        }
    }
}

/// A parsed query-shape document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryDocument {
    /// Operation type.
    pub kind: OperationKind,
    /// Operation name, if any.
    pub name: Option<String>,
    /// Declared variables.
    pub variable_definitions: Vec<VariableDefinition>,
    /// Root selection set.
    pub selection_set: SelectionSet,
    /// `true` for a bare `{ ... }` document. Shorthand documents skip
    /// variable validation.
    pub shorthand: bool,
}

impl QueryDocument {
    /// Shorthand query document for `selection_set`.
    pub fn query(selection_set: SelectionSet) -> Self {
        Self {
            kind: OperationKind::Query,
            name: None,
            variable_definitions: Vec::new(),
            selection_set,
            shorthand: true,
        }
    }

    /// Parses query text.
    ///
    /// # Errors
    /// Returns [`CacheError::QuerySyntax`] for malformed or unsupported text.
    pub fn parse(source: &str) -> Result<Self, CacheError> {
        Parser::new(source).document()
    }

    /// Named operation document.
    pub fn operation(kind: OperationKind, name: impl Into<String>, selection_set: SelectionSet) -> Self {
        Self {
            kind,
            name: Some(name.into()),
            variable_definitions: Vec::new(),
            selection_set,
            shorthand: false,
        }
    }

    /// Adds a variable definition; the document stops being shorthand.
    pub fn variable(mut self, definition: VariableDefinition) -> Self {
        self.variable_definitions.push(definition);
        self.shorthand = false;
        self
    }

    /// Returns a copy with `__typename` selected in every nested selection set.
    pub fn with_typename(&self) -> Self {
        let mut document = self.clone();
        for field in &mut document.selection_set.fields {
            if let Some(children) = &mut field.selection_set {
                children.add_typename();
            }
        }
        document
    }

    /// Short label for diagnostics: the operation name or the canonical text.
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.to_string())
    }
}

impl FromStr for QueryDocument {
    type Err = CacheError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        Self::parse(source)
    }
}

impl fmt::Display for QueryDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.shorthand || self.name.is_some() {
            f.write_str(self.kind.keyword())?;
            if let Some(name) = &self.name {
                write!(f, " {name}")?;
            }
            if !self.variable_definitions.is_empty() {
                f.write_str("(")?;
                for (i, definition) in self.variable_definitions.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{definition}")?;
                }
                f.write_str(")")?;
            }
            f.write_str(" ")?;
        }
        write!(f, "{}", self.selection_set)
    }
}

/// `$name: Type = default`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableDefinition {
    /// Variable name without `$`.
    pub name: String,
    /// Type as written, e.g. `[ID!]!`.
    pub type_name: String,
    /// Default value, if declared.
    pub default: Option<ArgumentValue>,
}

impl VariableDefinition {
    /// Definition without a default.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            default: None,
        }
    }

    /// Sets the default value.
    pub fn with_default(mut self, default: ArgumentValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Non-null types are required.
    pub fn required(&self) -> bool {
        self.type_name.ends_with('!')
    }
}

impl fmt::Display for VariableDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}: {}", self.name, self.type_name)?;
        if let Some(default) = &self.default {
            write!(f, " = {default}")?;
        }
        Ok(())
    }
}

/// A brace-delimited list of field selections.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectionSet {
    /// Fields in source order.
    pub fields: Vec<FieldSelection>,
}

impl SelectionSet {
    /// Wraps `fields`.
    pub fn new(fields: Vec<FieldSelection>) -> Self {
        Self { fields }
    }

    fn add_typename(&mut self) {
        for field in &mut self.fields {
            if let Some(children) = &mut field.selection_set {
                children.add_typename();
            }
        }
        let has_typename = self
            .fields
            .iter()
            .any(|field| field.name == "__typename" && field.alias.is_none());
        if !has_typename {
            self.fields.push(FieldSelection::new("__typename"));
        }
    }
}

impl fmt::Display for SelectionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for field in &self.fields {
            write!(f, " {field}")?;
        }
        f.write_str(" }")
    }
}

/// `alias: name(args) @directives { children }`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSelection {
    /// Response key override.
    pub alias: Option<String>,
    /// Schema field name.
    pub name: String,
    /// Arguments, keyed by name.
    pub arguments: BTreeMap<String, ArgumentValue>,
    /// Directives in source order.
    pub directives: Vec<Directive>,
    /// Sub-selection for object-valued fields.
    pub selection_set: Option<SelectionSet>,
}

impl FieldSelection {
    /// Leaf field with no alias, arguments, or directives.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            alias: None,
            name: name.into(),
            arguments: BTreeMap::new(),
            directives: Vec::new(),
            selection_set: None,
        }
    }

    /// Sets the alias.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Adds an argument.
    pub fn arg(mut self, name: impl Into<String>, value: ArgumentValue) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }

    /// Adds a directive.
    pub fn directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    /// Sets the sub-selection.
    pub fn select(mut self, fields: Vec<FieldSelection>) -> Self {
        self.selection_set = Some(SelectionSet::new(fields));
        self
    }

    /// Key the field's value appears under in payloads and results.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

impl fmt::Display for FieldSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(alias) = &self.alias {
            write!(f, "{alias}: ")?;
        }
        f.write_str(&self.name)?;
        write_arguments(f, &self.arguments)?;
        for directive in &self.directives {
            write!(f, " {directive}")?;
        }
        if let Some(children) = &self.selection_set {
            write!(f, " {children}")?;
        }
        Ok(())
    }
}

/// `@name(args)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Directive {
    /// Directive name without `@`.
    pub name: String,
    /// Arguments, keyed by name.
    pub arguments: BTreeMap<String, ArgumentValue>,
}

impl Directive {
    /// Directive without arguments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: BTreeMap::new(),
        }
    }

    /// Adds an argument.
    pub fn arg(mut self, name: impl Into<String>, value: ArgumentValue) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.name)?;
        write_arguments(f, &self.arguments)
    }
}

fn write_arguments(
    f: &mut fmt::Formatter<'_>,
    arguments: &BTreeMap<String, ArgumentValue>,
) -> fmt::Result {
    if arguments.is_empty() {
        return Ok(());
    }
    f.write_str("(")?;
    for (i, (name, value)) in arguments.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{name}: {value}")?;
    }
    f.write_str(")")
}

/// An argument value as written in a document; may reference variables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArgumentValue {
    /// `$name`.
    Variable(String),
    /// `null`.
    Null,
    /// `true` / `false`.
    Bool(bool),
    /// Numeric literal.
    Number(serde_json::Number),
    /// String literal.
    String(String),
    /// Bare enum name.
    Enum(String),
    /// `[ ... ]`.
    List(Vec<ArgumentValue>),
    /// `{ key: value }`.
    Object(BTreeMap<String, ArgumentValue>),
}

impl ArgumentValue {
    /// Variable reference.
    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    /// Calls `visit` with the name of every variable referenced.
    pub fn for_each_variable<'a>(&'a self, visit: &mut impl FnMut(&'a str)) {
        match self {
            Self::Variable(name) => visit(name),
            Self::List(items) => {
                for item in items {
                    item.for_each_variable(visit);
                }
            }
            Self::Object(fields) => {
                for value in fields.values() {
                    value.for_each_variable(visit);
                }
            }
            _ => {}
        }
    }

    /// Converts a variable-free value; variables become `None`.
    pub fn to_constant(&self) -> Option<Value> {
        Some(match self {
            Self::Variable(_) => return None,
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) | Self::Enum(s) => Value::String(s.clone()),
            Self::List(items) => Value::list(
                items
                    .iter()
                    .map(Self::to_constant)
                    .collect::<Option<Vec<_>>>()?,
            ),
            Self::Object(fields) => Value::object(
                fields
                    .iter()
                    .map(|(key, value)| Some((key.clone(), value.to_constant()?)))
                    .collect::<Option<_>>()?,
            ),
        })
    }
}

impl From<Value> for ArgumentValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::List(items) => Self::List(items.iter().cloned().map(Self::from).collect()),
            Value::Object(fields) => Self::Object(
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), Self::from(value.clone())))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for ArgumentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Variable(name) => write!(f, "${name}"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{}", serde_json::Value::String(s.clone())),
            Self::Enum(name) => f.write_str(name),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Object(fields) => {
                f.write_str("{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

struct Parser<'s> {
    source: &'s str,
    pos: usize,
}

impl<'s> Parser<'s> {
    fn new(source: &'s str) -> Self {
        Self { source, pos: 0 }
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, CacheError> {
        Err(CacheError::QuerySyntax {
            message: message.into(),
            offset: self.pos,
        })
    }

    fn bytes(&self) -> &'s [u8] {
        self.source.as_bytes()
    }

    fn skip_ignored(&mut self) {
        while let Some(&byte) = self.bytes().get(self.pos) {
            match byte {
                b' ' | b'\t' | b'\n' | b'\r' | b',' => self.pos += 1,
                b'#' => {
                    while self.bytes().get(self.pos).is_some_and(|b| *b != b'\n') {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
        if self.source[self.pos..].starts_with('\u{feff}') {
            self.pos += '\u{feff}'.len_utf8();
            self.skip_ignored();
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ignored();
        self.bytes().get(self.pos).copied()
    }

    fn eat(&mut self, punct: u8) -> bool {
        if self.peek() == Some(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: u8) -> Result<(), CacheError> {
        if self.eat(punct) {
            Ok(())
        } else {
            self.error(format!("expected `{}`", punct as char))
        }
    }

    fn name(&mut self) -> Result<&'s str, CacheError> {
        self.skip_ignored();
        let start = self.pos;
        let bytes = self.bytes();
        match bytes.get(start) {
            Some(b) if b.is_ascii_alphabetic() || *b == b'_' => {}
            _ => return self.error("expected a name"),
        }
        let mut end = start + 1;
        while bytes
            .get(end)
            .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_')
        {
            end += 1;
        }
        self.pos = end;
        Ok(&self.source[start..end])
    }

    fn document(mut self) -> Result<QueryDocument, CacheError> {
        let document = if self.peek() == Some(b'{') {
            QueryDocument::query(self.selection_set()?)
        } else {
            let keyword_at = self.pos;
            let kind = match self.name()? {
                "query" => OperationKind::Query,
                "mutation" => OperationKind::Mutation,
                "subscription" => OperationKind::Subscription,
                "fragment" => {
                    self.pos = keyword_at;
                    return self.error("fragments are not supported");
                }
                other => {
                    self.pos = keyword_at;
                    return self.error(format!("unknown operation type `{other}`"));
                }
            };
            let name = match self.peek() {
                Some(b) if b.is_ascii_alphabetic() || b == b'_' => Some(self.name()?.to_owned()),
                _ => None,
            };
            let variable_definitions = if self.peek() == Some(b'(') {
                self.variable_definitions()?
            } else {
                Vec::new()
            };
            if self.peek() == Some(b'@') {
                return self.error("operation directives are not supported");
            }
            QueryDocument {
                kind,
                name,
                variable_definitions,
                selection_set: self.selection_set()?,
                shorthand: false,
            }
        };
        if self.peek().is_some() {
            return self.error("expected end of document; only one operation is supported");
        }
        Ok(document)
    }

    fn variable_definitions(&mut self) -> Result<Vec<VariableDefinition>, CacheError> {
        self.expect(b'(')?;
        let mut definitions = Vec::new();
        while !self.eat(b')') {
            self.expect(b'$')?;
            let name = self.name()?.to_owned();
            if definitions.iter().any(|d: &VariableDefinition| d.name == name) {
                return self.error(format!("variable ${name} is declared twice"));
            }
            self.expect(b':')?;
            let type_name = self.type_reference()?;
            let default = if self.eat(b'=') {
                Some(self.value(true)?)
            } else {
                None
            };
            definitions.push(VariableDefinition {
                name,
                type_name,
                default,
            });
        }
        if definitions.is_empty() {
            return self.error("empty variable definitions");
        }
        Ok(definitions)
    }

    fn type_reference(&mut self) -> Result<String, CacheError> {
        let mut text = if self.eat(b'[') {
            let inner = self.type_reference()?;
            self.expect(b']')?;
            format!("[{inner}]")
        } else {
            self.name()?.to_owned()
        };
        if self.eat(b'!') {
            text.push('!');
        }
        Ok(text)
    }

    fn selection_set(&mut self) -> Result<SelectionSet, CacheError> {
        self.expect(b'{')?;
        let mut fields = Vec::new();
        while !self.eat(b'}') {
            if self.peek() == Some(b'.') {
                return self.error("fragment spreads are not supported");
            }
            if self.peek().is_none() {
                return self.error("unterminated selection set");
            }
            fields.push(self.field()?);
        }
        if fields.is_empty() {
            return self.error("empty selection set");
        }
        Ok(SelectionSet { fields })
    }

    fn field(&mut self) -> Result<FieldSelection, CacheError> {
        let first = self.name()?.to_owned();
        let mut field = if self.eat(b':') {
            FieldSelection::new(self.name()?).alias(first)
        } else {
            FieldSelection::new(first)
        };
        if self.peek() == Some(b'(') {
            field.arguments = self.arguments(false)?;
        }
        while self.eat(b'@') {
            let name = self.name()?;
            let mut directive = Directive::new(name);
            if self.peek() == Some(b'(') {
                directive.arguments = self.arguments(false)?;
            }
            field.directives.push(directive);
        }
        if self.peek() == Some(b'{') {
            field.selection_set = Some(self.selection_set()?);
        }
        Ok(field)
    }

    fn arguments(&mut self, constant: bool) -> Result<BTreeMap<String, ArgumentValue>, CacheError> {
        self.expect(b'(')?;
        let mut arguments = BTreeMap::new();
        while !self.eat(b')') {
            let name = self.name()?.to_owned();
            self.expect(b':')?;
            let value = self.value(constant)?;
            if arguments.insert(name.clone(), value).is_some() {
                return self.error(format!("argument `{name}` is given twice"));
            }
        }
        if arguments.is_empty() {
            return self.error("empty argument list");
        }
        Ok(arguments)
    }

    fn value(&mut self, constant: bool) -> Result<ArgumentValue, CacheError> {
        match self.peek() {
            Some(b'$') => {
                if constant {
                    return self.error("variables are not allowed in default values");
                }
                self.pos += 1;
                Ok(ArgumentValue::Variable(self.name()?.to_owned()))
            }
            Some(b'[') => {
                self.pos += 1;
                let mut items = Vec::new();
                while !self.eat(b']') {
                    if self.peek().is_none() {
                        return self.error("unterminated list");
                    }
                    items.push(self.value(constant)?);
                }
                Ok(ArgumentValue::List(items))
            }
            Some(b'{') => {
                self.pos += 1;
                let mut fields = BTreeMap::new();
                while !self.eat(b'}') {
                    let key = self.name()?.to_owned();
                    self.expect(b':')?;
                    let value = self.value(constant)?;
                    if fields.insert(key.clone(), value).is_some() {
                        return self.error(format!("object field `{key}` is given twice"));
                    }
                }
                Ok(ArgumentValue::Object(fields))
            }
            Some(b'"') => self.string(),
            Some(b) if b == b'-' || b.is_ascii_digit() => self.number(),
            Some(_) => Ok(match self.name()? {
                "true" => ArgumentValue::Bool(true),
                "false" => ArgumentValue::Bool(false),
                "null" => ArgumentValue::Null,
                other => ArgumentValue::Enum(other.to_owned()),
            }),
            None => self.error("expected a value"),
        }
    }

    fn string(&mut self) -> Result<ArgumentValue, CacheError> {
        let start = self.pos;
        if self.source[start..].starts_with("\"\"\"") {
            return self.error("block strings are not supported");
        }
        let bytes = self.bytes();
        let mut end = start + 1;
        loop {
            match bytes.get(end) {
                None | Some(b'\n') => return self.error("unterminated string"),
                Some(b'\\') => end += 2,
                Some(b'"') => break,
                Some(_) => end += 1,
            }
        }
        let literal = &self.source[start..=end];
        match serde_json::from_str::<String>(literal) {
            Ok(decoded) => {
                self.pos = end + 1;
                Ok(ArgumentValue::String(decoded))
            }
            Err(err) => self.error(format!("invalid string literal: {err}")),
        }
    }

    fn number(&mut self) -> Result<ArgumentValue, CacheError> {
        let start = self.pos;
        let bytes = self.bytes();
        let mut end = start;
        while bytes
            .get(end)
            .is_some_and(|b| b.is_ascii_digit() || matches!(b, b'-' | b'+' | b'.' | b'e' | b'E'))
        {
            end += 1;
        }
        match serde_json::from_str::<serde_json::Number>(&self.source[start..end]) {
            Ok(number) => {
                self.pos = end;
                Ok(ArgumentValue::Number(number))
            }
            Err(_) => self.error(format!("invalid number `{}`", &self.source[start..end])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_prints_canonically() {
        let document = QueryDocument::parse(
            r#"
            # leading comment
            query Profile($id: ID!, $first: Int = 10) {
              viewer: user(id: $id) {
                name
                friends(first: $first, order: ASC) @include(if: true) { id }
                note(text: "tab\there")
              }
            }
            "#,
        );
        let Ok(document) = document else {
            unreachable!("valid document failed to parse: {document:?}");
        };
        assert_eq!(document.kind, OperationKind::Query);
        assert_eq!(document.name.as_deref(), Some("Profile"));
        assert!(document.variable_definitions[0].required());
        assert!(!document.variable_definitions[1].required());
        assert_eq!(
            document.to_string(),
            "query Profile($id: ID!, $first: Int = 10) { viewer: user(id: $id) { name \
             friends(first: $first, order: ASC) @include(if: true) { id } note(text: \"tab\\there\") } }"
        );
        assert_eq!(QueryDocument::parse(&document.to_string()), Ok(document));
    }

    #[test]
    fn shorthand_documents_print_bare() {
        let Ok(document) = "{ a, b { c } }".parse::<QueryDocument>() else {
            unreachable!("shorthand failed to parse");
        };
        assert!(document.shorthand);
        assert_eq!(document.to_string(), "{ a b { c } }");
    }

    #[test]
    fn rejects_unsupported_syntax() {
        for source in [
            "{ a { ...Frag } }",
            "fragment F on User { id }",
            "{ }",
            "{ a(x: \"\"\"block\"\"\") }",
            "{ a } { b }",
            "{ a(x: 1, x: 2) }",
            "query ($x: Int = $y) { a }",
        ] {
            assert!(
                matches!(
                    QueryDocument::parse(source),
                    Err(CacheError::QuerySyntax { .. })
                ),
                "{source} should be rejected"
            );
        }
    }

    #[test]
    fn with_typename_skips_root() {
        let Ok(document) = QueryDocument::parse("{ viewer { id friends { __typename id } } }")
        else {
            unreachable!("fixture failed to parse");
        };
        assert_eq!(
            document.with_typename().to_string(),
            "{ viewer { id friends { __typename id } __typename } }"
        );
    }
}
