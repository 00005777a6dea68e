//! YAML declarations under `models/`
//!
//! ```yaml
//! version: 2
//! sources:
//!   - name: tpch
//!     database: SNOWFLAKE_SAMPLE_DATA
//!     schema: TPCH_SF1
//!     tables:
//!       - name: orders
//!         identifier: ORDERS
//! models:
//!   - name: fct_orders
//!     config:
//!       materialized: table
//!     columns:
//!       - name: order_key
//!         tests: [unique, not_null]
//!       - name: status_code
//!         tests:
//!           - accepted_values:
//!               values: ['P', 'O', 'F']
//! ```

use rivulet_core::{Severity, TestKind};
use serde::Deserialize;
use std::collections::BTreeMap;

/// One `.yml` file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaFile {
    #[serde(default)]
    pub version: Option<u32>,

    #[serde(default)]
    pub sources: Vec<SourceDecl>,

    #[serde(default)]
    pub models: Vec<ModelDecl>,
}

impl SchemaFile {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        // An empty file deserializes as null
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }
}

/// A group of source tables
#[derive(Debug, Clone, Deserialize)]
pub struct SourceDecl {
    pub name: String,

    #[serde(default)]
    pub database: Option<String>,

    /// Defaults to the source name
    #[serde(default)]
    pub schema: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tables: Vec<SourceTableDecl>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceTableDecl {
    pub name: String,

    /// Physical table name, defaults to `name`
    #[serde(default)]
    pub identifier: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub columns: Vec<ColumnYml>,
}

/// Model properties
#[derive(Debug, Clone, Deserialize)]
pub struct ModelDecl {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub config: ModelConfigYml,

    #[serde(default)]
    pub columns: Vec<ColumnYml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelConfigYml {
    #[serde(default)]
    pub materialized: Option<String>,

    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub schema: Option<String>,

    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnYml {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, alias = "data_tests")]
    pub tests: Vec<TestYml>,
}

/// `unique` or `{ accepted_values: { values: [...] } }`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TestYml {
    Name(String),
    Configured(BTreeMap<String, TestArgsYml>),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestArgsYml {
    #[serde(default)]
    pub values: Option<Vec<serde_yaml::Value>>,

    #[serde(default)]
    pub quote: Option<bool>,

    #[serde(default)]
    pub to: Option<String>,

    #[serde(default)]
    pub field: Option<String>,

    #[serde(default)]
    pub severity: Option<String>,

    #[serde(default)]
    pub config: Option<TestConfigYml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestConfigYml {
    #[serde(default)]
    pub severity: Option<String>,
}

impl TestYml {
    /// Resolve to a test kind and its declared severity (if any)
    pub fn resolve(&self) -> Result<(TestKind, Option<Severity>), String> {
        match self {
            Self::Name(name) => Ok((build_kind(name, &TestArgsYml::default())?, None)),
            Self::Configured(map) => {
                let mut entries = map.iter();
                let (name, args) = match (entries.next(), entries.next()) {
                    (Some(entry), None) => entry,
                    _ => return Err("a configured test must have exactly one key".to_string()),
                };

                let severity = args
                    .config
                    .as_ref()
                    .and_then(|c| c.severity.as_ref())
                    .or(args.severity.as_ref())
                    .map(|s| s.parse::<Severity>())
                    .transpose()?;

                Ok((build_kind(name, args)?, severity))
            }
        }
    }
}

fn build_kind(name: &str, args: &TestArgsYml) -> Result<TestKind, String> {
    match name {
        "unique" => Ok(TestKind::Unique),
        "not_null" => Ok(TestKind::NotNull),
        "relationships" => {
            let to = args.to.clone().ok_or("relationships test requires 'to'")?;
            let field = args.field.clone().ok_or("relationships test requires 'field'")?;
            Ok(TestKind::Relationships { to, field })
        }
        "accepted_values" => {
            let values = args
                .values
                .as_ref()
                .ok_or("accepted_values test requires 'values'")?
                .iter()
                .map(yaml_scalar)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(TestKind::AcceptedValues {
                values,
                quote: args.quote.unwrap_or(true),
            })
        }
        other => Err(format!("unknown test '{}'", other)),
    }
}

fn yaml_scalar(value: &serde_yaml::Value) -> Result<String, String> {
    match value {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!("accepted_values entries must be scalars, got {:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SCHEMA: &str = r#"
version: 2

sources:
  - name: tpch
    database: SNOWFLAKE_SAMPLE_DATA
    schema: TPCH_SF1
    tables:
      - name: orders
        identifier: ORDERS
        columns:
          - name: o_orderkey
            tests: [unique]

models:
  - name: fct_orders
    config:
      materialized: table
    columns:
      - name: order_key
        tests:
          - unique
          - not_null
      - name: status_code
        tests:
          - accepted_values:
              values: ['P', 'O', 'F']
              config:
                severity: warn
      - name: customer_key
        data_tests:
          - relationships:
              to: ref('dim_customers')
              field: customer_key
"#;

    #[test]
    fn parse_schema_file() {
        let file = SchemaFile::from_yaml(SCHEMA).unwrap();
        assert_eq!(file.version, Some(2));
        assert_eq!(file.sources[0].tables[0].identifier.as_deref(), Some("ORDERS"));
        assert_eq!(file.models[0].config.materialized.as_deref(), Some("table"));

        let columns = &file.models[0].columns;
        assert_eq!(columns[0].tests.len(), 2);
        assert_eq!(columns[0].tests[1].resolve().unwrap(), (TestKind::NotNull, None));

        assert_eq!(
            columns[1].tests[0].resolve().unwrap(),
            (
                TestKind::AcceptedValues { values: vec!["P".into(), "O".into(), "F".into()], quote: true },
                Some(Severity::Warn)
            )
        );

        assert_eq!(
            columns[2].tests[0].resolve().unwrap().0,
            TestKind::Relationships { to: "ref('dim_customers')".into(), field: "customer_key".into() }
        );
    }

    #[test]
    fn numeric_accepted_values_unquoted() {
        let test: TestYml =
            serde_yaml::from_str("accepted_values: { values: [1, 2, 3], quote: false }").unwrap();
        assert_eq!(
            test.resolve().unwrap().0,
            TestKind::AcceptedValues { values: vec!["1".into(), "2".into(), "3".into()], quote: false }
        );
    }

    #[test]
    fn invalid_tests() {
        assert!(TestYml::Name("freshness".into()).resolve().is_err());
        let test: TestYml = serde_yaml::from_str("relationships: { to: \"ref('x')\" }").unwrap();
        assert!(test.resolve().is_err());
    }

    #[test]
    fn empty_file() {
        let file = SchemaFile::from_yaml("  \n").unwrap();
        assert!(file.models.is_empty());
    }
}
