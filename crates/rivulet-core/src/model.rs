//! Project domain types: models, sources, macros and data tests

use crate::diagnostic::Severity;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Node identifier (`model.<name>` or `source.<source>.<table>`)
pub type NodeId = String;

/// Build the node id of a model
pub fn model_id(name: &str) -> NodeId {
    format!("model.{}", name)
}

/// Build the node id of a source table
pub fn source_id(source_name: &str, table_name: &str) -> NodeId {
    format!("source.{}.{}", source_name, table_name)
}

/// How a model is persisted in the warehouse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Materialization {
    /// `CREATE OR REPLACE VIEW`
    View,

    /// `CREATE OR REPLACE TABLE`
    Table,
}

impl Default for Materialization {
    fn default() -> Self {
        Self::View
    }
}

impl Materialization {
    /// SQL keyword used in the DDL statement
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::View => "VIEW",
            Self::Table => "TABLE",
        }
    }
}

impl std::fmt::Display for Materialization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::View => write!(f, "view"),
            Self::Table => write!(f, "table"),
        }
    }
}

impl std::str::FromStr for Materialization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "view" => Ok(Self::View),
            "table" => Ok(Self::Table),
            other => Err(format!(
                "unsupported materialization '{}' (expected 'view' or 'table')",
                other
            )),
        }
    }
}

/// A fully-qualified warehouse relation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    /// Database name (omitted for two-part names)
    pub database: Option<String>,

    /// Schema name
    pub schema: String,

    /// Table or view name
    pub identifier: String,
}

impl Relation {
    pub fn new(database: Option<String>, schema: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            database,
            schema: schema.into(),
            identifier: identifier.into(),
        }
    }

    /// Fully qualified name as it appears in rendered SQL
    pub fn fqn(&self) -> String {
        match &self.database {
            Some(db) => format!("{}.{}.{}", db, self.schema, self.identifier),
            None => format!("{}.{}", self.schema, self.identifier),
        }
    }

    /// `database.schema` (or just `schema`) for schema creation
    pub fn schema_fqn(&self) -> String {
        match &self.database {
            Some(db) => format!("{}.{}", db, self.schema),
            None => self.schema.clone(),
        }
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.fqn())
    }
}

/// A declared column with its generic tests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDecl {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Generic tests declared on this column
    #[serde(default)]
    pub tests: Vec<TestCase>,
}

impl ColumnDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tests: Vec::new(),
        }
    }
}

/// A SQL transformation unit loaded from `models/<name>.sql`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Model name (file stem)
    pub name: String,

    /// Path of the template file, relative to the project root
    pub path: PathBuf,

    /// Raw template text
    pub raw_sql: String,

    /// Materialization strategy
    pub materialization: Materialization,

    /// Target relation
    pub relation: Relation,

    #[serde(default)]
    pub description: String,

    /// Declared columns and their tests
    #[serde(default)]
    pub columns: Vec<ColumnDecl>,
}

impl Model {
    pub fn unique_id(&self) -> NodeId {
        model_id(&self.name)
    }

    /// Iterate every generic test declared on this model's columns
    pub fn tests(&self) -> impl Iterator<Item = &TestCase> {
        self.columns.iter().flat_map(|c| c.tests.iter())
    }
}

/// An externally-owned table, read but never materialized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Source group name (`source('<source_name>', ...)`)
    pub source_name: String,

    /// Table name (`source(..., '<table_name>')`)
    pub table_name: String,

    /// Physical location
    pub relation: Relation,

    /// YAML file declaring this source
    pub path: PathBuf,

    #[serde(default)]
    pub columns: Vec<ColumnDecl>,
}

impl Source {
    pub fn unique_id(&self) -> NodeId {
        source_id(&self.source_name, &self.table_name)
    }

    pub fn tests(&self) -> impl Iterator<Item = &TestCase> {
        self.columns.iter().flat_map(|c| c.tests.iter())
    }
}

/// A macro parameter, optionally with a default expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroParam {
    pub name: String,
    pub default: Option<String>,
}

/// A named, parameterized SQL generator defined in `macros/*.sql`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Macro {
    pub name: String,
    pub params: Vec<MacroParam>,
    pub body: String,
    pub path: PathBuf,
}

impl Macro {
    /// Number of parameters without a default
    pub fn required_args(&self) -> usize {
        self.params.iter().filter(|p| p.default.is_none()).count()
    }

    /// Total number of parameters
    pub fn max_args(&self) -> usize {
        self.params.len()
    }
}

/// The node a generic test is attached to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TestTarget {
    Model { name: String },
    Source { source_name: String, table_name: String },
}

impl TestTarget {
    pub fn node_id(&self) -> NodeId {
        match self {
            Self::Model { name } => model_id(name),
            Self::Source { source_name, table_name } => source_id(source_name, table_name),
        }
    }

    /// Short name used in test ids
    pub fn short_name(&self) -> String {
        match self {
            Self::Model { name } => name.clone(),
            Self::Source { source_name, table_name } => format!("source_{}_{}", source_name, table_name),
        }
    }
}

/// Kinds of generic (schema-declared) tests
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestKind {
    Unique,
    NotNull,

    /// Every non-null value must exist in `to.field`.
    /// `to` is a template expression such as `ref('dim_customers')`.
    Relationships { to: String, field: String },

    /// Values must be one of `values`
    AcceptedValues { values: Vec<String>, quote: bool },
}

impl TestKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unique => "unique",
            Self::NotNull => "not_null",
            Self::Relationships { .. } => "relationships",
            Self::AcceptedValues { .. } => "accepted_values",
        }
    }
}

/// What a test checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TestDefinition {
    /// Parametrized column assertion
    Generic {
        target: TestTarget,
        column: String,
        kind: TestKind,
    },

    /// Standalone query whose returned rows are violations
    Singular { path: PathBuf, raw_sql: String },
}

/// A data-quality assertion evaluated once per run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Stable test id
    pub id: String,

    pub definition: TestDefinition,

    #[serde(default)]
    pub severity: Severity,
}

impl TestCase {
    /// Build a generic test with its conventional id
    pub fn generic(target: TestTarget, column: impl Into<String>, kind: TestKind, severity: Severity) -> Self {
        let column = column.into();
        let mut id = format!("{}_{}_{}", kind.name(), target.short_name(), column);
        if let TestKind::AcceptedValues { values, .. } = &kind {
            for value in values {
                id.push_str("__");
                id.push_str(&sanitize_id_part(value));
            }
        }
        if let TestKind::Relationships { to, field } = &kind {
            id.push_str("__");
            id.push_str(&sanitize_id_part(field));
            id.push_str("__");
            id.push_str(&sanitize_expression(to));
        }

        Self {
            id,
            definition: TestDefinition::Generic { target, column, kind },
            severity,
        }
    }

    /// Build a singular test from a `tests/<name>.sql` file
    pub fn singular(name: impl Into<String>, path: PathBuf, raw_sql: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: name.into(),
            definition: TestDefinition::Singular { path, raw_sql: raw_sql.into() },
            severity,
        }
    }

    /// Test kind name (`unique`, ..., or `singular`)
    pub fn kind_name(&self) -> &'static str {
        match &self.definition {
            TestDefinition::Generic { kind, .. } => kind.name(),
            TestDefinition::Singular { .. } => "singular",
        }
    }

    /// The node the test is attached to, if generic
    pub fn attached_node(&self) -> Option<NodeId> {
        match &self.definition {
            TestDefinition::Generic { target, .. } => Some(target.node_id()),
            TestDefinition::Singular { .. } => None,
        }
    }
}

fn sanitize_id_part(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// `ref('dim_customers')` -> `ref_dim_customers`
fn sanitize_expression(expr: &str) -> String {
    sanitize_id_part(expr)
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}
