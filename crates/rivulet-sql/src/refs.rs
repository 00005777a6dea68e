//! Static extraction of template calls
//!
//! Finds `{{ ref('model') }}`, `{{ source('source', 'table') }}` and
//! `{{ config(key='value') }}` without rendering the template, so the
//! dependency graph can be built before anything executes.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

static JINJA_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{#.*?#\}|\{\{.*?\}\}|\{%.*?%\}").expect("valid regex"));

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z_]\w*").expect("valid regex"));

static REF_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bref\s*\(\s*['"]([^'"]+)['"]\s*(?:,\s*['"]([^'"]+)['"]\s*)?\)"#).expect("valid regex")
});

static SOURCE_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bsource\s*\(\s*['"]([^'"]+)['"]\s*,\s*['"]([^'"]+)['"]\s*\)"#).expect("valid regex")
});

static CONFIG_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\bconfig\s*\((.*?)\)").expect("valid regex"));

static CONFIG_KWARG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(\w+)\s*=\s*(?:'([^']*)'|"([^"]*)"|(true|false|True|False|\d+))"#).expect("valid regex")
});

/// A reference found by the static scan
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StaticReference {
    /// ref('model') or ref('package', 'model')
    Ref {
        package: Option<String>,
        model_name: String,
    },

    /// source('source_name', 'table_name')
    Source {
        source_name: String,
        table_name: String,
    },
}

impl StaticReference {
    /// How the call reads in the template
    pub fn display_call(&self) -> String {
        match self {
            Self::Ref { package: Some(package), model_name } => format!("ref('{}', '{}')", package, model_name),
            Self::Ref { package: None, model_name } => format!("ref('{}')", model_name),
            Self::Source { source_name, table_name } => format!("source('{}', '{}')", source_name, table_name),
        }
    }
}

/// A reference together with the line it appears on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedReference {
    pub reference: StaticReference,

    /// 1-indexed line of the call
    pub line: usize,
}

/// A named call inside a Jinja block, such as `{{ cents_to_dollars('amount') }}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedCall {
    pub name: String,

    /// 1-indexed line of the first call
    pub line: usize,
}

/// Extracts template calls from SQL
pub struct ReferenceExtractor;

impl ReferenceExtractor {
    /// Extract distinct references from Jinja blocks, in order of first appearance
    pub fn extract(sql: &str) -> Vec<LocatedReference> {
        let mut found: Vec<LocatedReference> = Vec::new();

        for block in blocks(sql) {
            for located in Self::scan(block.as_str(), block.start(), sql) {
                if !found.iter().any(|f| f.reference == located.reference) {
                    found.push(located);
                }
            }
        }

        found
    }

    /// Extract references from a bare template expression such as
    /// `ref('dim_customers')` (used by relationship tests)
    pub fn extract_from_expression(expr: &str) -> Vec<StaticReference> {
        let mut found = Vec::new();
        for located in Self::scan(expr, 0, expr) {
            if !found.contains(&located.reference) {
                found.push(located.reference);
            }
        }
        found
    }

    /// Distinct names called as functions inside Jinja blocks, in order of
    /// first appearance. Callers match these against the macro table.
    pub fn extract_calls(sql: &str) -> Vec<LocatedCall> {
        let mut found: Vec<LocatedCall> = Vec::new();

        for block in blocks(sql) {
            let text = block.as_str();
            for name in IDENTIFIER.find_iter(text) {
                // Method calls such as `name.upper()` are not macro calls
                let is_method = text[..name.start()].ends_with('.');
                let is_call = text[name.end()..].trim_start().starts_with('(');
                if is_method || !is_call || found.iter().any(|f| f.name == name.as_str()) {
                    continue;
                }
                found.push(LocatedCall {
                    name: name.as_str().to_string(),
                    line: line_of(sql, block.start() + name.start()),
                });
            }
        }

        found
    }

    /// Extract string-valued `config()` keyword arguments.
    /// Later calls override earlier ones.
    pub fn extract_config(sql: &str) -> BTreeMap<String, String> {
        let mut config = BTreeMap::new();

        for block in blocks(sql) {
            for call in CONFIG_CALL.captures_iter(block.as_str()) {
                let args = &call[1];
                for kwarg in CONFIG_KWARG.captures_iter(args) {
                    let value = kwarg
                        .get(2)
                        .or_else(|| kwarg.get(3))
                        .or_else(|| kwarg.get(4))
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default();
                    config.insert(kwarg[1].to_string(), value);
                }
            }
        }

        config
    }

    fn scan(text: &str, offset: usize, full: &str) -> Vec<LocatedReference> {
        let mut hits: Vec<(usize, StaticReference)> = Vec::new();

        for cap in REF_CALL.captures_iter(text) {
            let start = cap.get(0).map(|m| m.start()).unwrap_or(0);
            let reference = match cap.get(2) {
                Some(model) => StaticReference::Ref {
                    package: Some(cap[1].to_string()),
                    model_name: model.as_str().to_string(),
                },
                None => StaticReference::Ref {
                    package: None,
                    model_name: cap[1].to_string(),
                },
            };
            hits.push((start, reference));
        }

        for cap in SOURCE_CALL.captures_iter(text) {
            let start = cap.get(0).map(|m| m.start()).unwrap_or(0);
            hits.push((
                start,
                StaticReference::Source {
                    source_name: cap[1].to_string(),
                    table_name: cap[2].to_string(),
                },
            ));
        }

        hits.sort_by_key(|(start, _)| *start);
        hits.into_iter()
            .map(|(start, reference)| LocatedReference {
                reference,
                line: line_of(full, offset + start),
            })
            .collect()
    }
}

/// Expression and statement blocks, skipping `{# ... #}` comments
fn blocks(sql: &str) -> impl Iterator<Item = regex::Match<'_>> {
    JINJA_BLOCK.find_iter(sql).filter(|block| !block.as_str().starts_with("{#"))
}

/// 1-indexed line number of a byte offset
fn line_of(text: &str, byte_offset: usize) -> usize {
    let end = byte_offset.min(text.len());
    text.as_bytes()[..end].iter().filter(|b| **b == b'\n').count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn refs(sql: &str) -> Vec<StaticReference> {
        ReferenceExtractor::extract(sql).into_iter().map(|r| r.reference).collect()
    }

    #[test]
    fn extract_ref() {
        assert_eq!(
            refs("SELECT * FROM {{ ref('users') }}"),
            vec![StaticReference::Ref { package: None, model_name: "users".into() }]
        );
    }

    #[test]
    fn extract_two_argument_ref() {
        assert_eq!(
            refs(r#"SELECT * FROM {{ ref("analytics", "users") }}"#),
            vec![StaticReference::Ref { package: Some("analytics".into()), model_name: "users".into() }]
        );
    }

    #[test]
    fn extract_source() {
        assert_eq!(
            refs("SELECT * FROM {{ source('tpch', 'orders') }}"),
            vec![StaticReference::Source { source_name: "tpch".into(), table_name: "orders".into() }]
        );
    }

    #[test]
    fn extract_multiple_in_order_with_lines() {
        let sql = "with base as (\n  select * from {{ source('raw', 'users') }}\n),\nfiltered as (\n  select * from {{ ref('stg_users') }}\n)\nselect * from {{ ref('stg_users') }}";

        let located = ReferenceExtractor::extract(sql);
        assert_eq!(located.len(), 2);
        assert_eq!(located[0].line, 2);
        assert_eq!(located[1].line, 5);
        assert_eq!(located[1].reference.display_call(), "ref('stg_users')");
    }

    #[test]
    fn ignores_calls_outside_jinja() {
        assert!(refs("select ref('x') from t -- not a template").is_empty());
        assert!(refs("select * from orders_ref").is_empty());
    }

    #[test]
    fn refs_inside_statement_blocks() {
        let sql = "{% set upstream = ref('stg_orders') %}select * from {{ upstream }}";
        assert_eq!(
            refs(sql),
            vec![StaticReference::Ref { package: None, model_name: "stg_orders".into() }]
        );
    }

    #[test]
    fn expression_references() {
        assert_eq!(
            ReferenceExtractor::extract_from_expression("ref('dim_customers')"),
            vec![StaticReference::Ref { package: None, model_name: "dim_customers".into() }]
        );
    }

    #[test]
    fn config_kwargs() {
        let sql = "{{ config(materialized='table', alias=\"orders\", enabled=true) }}\nselect 1";
        let config = ReferenceExtractor::extract_config(sql);
        assert_eq!(config.get("materialized").map(String::as_str), Some("table"));
        assert_eq!(config.get("alias").map(String::as_str), Some("orders"));
        assert_eq!(config.get("enabled").map(String::as_str), Some("true"));
    }

    #[test]
    fn commented_out_calls_are_ignored() {
        let sql = "{# {{ ref('retired_model') }} #}\nselect * from {{ ref('orders') }}";
        assert_eq!(
            refs(sql),
            vec![StaticReference::Ref { package: None, model_name: "orders".into() }]
        );

        let config = ReferenceExtractor::extract_config("{# {{ config(materialized='table') }} #}\nselect 1");
        assert!(config.is_empty());
    }

    #[test]
    fn function_calls_with_lines() {
        let sql = "select\n  {{ cents_to_dollars('amount') }},\n  {{ coalesce_all(ref('x')) }}\n{# {{ retired() }} #}\nfrom {{ name.upper() }}";
        let calls = ReferenceExtractor::extract_calls(sql);
        assert_eq!(
            calls,
            vec![
                LocatedCall { name: "cents_to_dollars".into(), line: 2 },
                LocatedCall { name: "coalesce_all".into(), line: 3 },
                LocatedCall { name: "ref".into(), line: 3 },
            ]
        );
    }
}
