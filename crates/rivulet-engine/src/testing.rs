//! Data tests: compile assertions to violation-counting queries and run them
//!
//! Every test query returns the rows that violate the assertion. The runner
//! wraps it as
//!
//! ```sql
//! select count(*) as failures from (
//! <query>
//! ) as test_query
//! ```
//!
//! and any count above zero is a violation, reported at the test's severity.

use crate::materializer::strip_terminator;
use rivulet_core::{
    model_id, NodeId, Severity, TestCase, TestDefinition, TestKind, TestResult, TestStatus,
    TestTarget,
};
use rivulet_jinja::{RenderError, Renderer};
use rivulet_sql::{ReferenceExtractor, StaticReference};
use rivulet_warehouse::{ConnectionPool, PooledConnection, WarehouseError};
use std::time::Instant;

/// A test with its final SQL and the models it reads
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledTest {
    pub id: String,
    pub kind: String,
    pub severity: Severity,

    /// Display name of the node a generic test is attached to
    pub node: Option<String>,

    /// Models the test reads; it runs only once all of them are built
    pub depends_on: Vec<NodeId>,

    /// Models whose dependents an error-severity failure blocks
    pub blocks: Vec<NodeId>,

    /// Wrapped count query
    pub sql: String,
}

/// Violation query for a generic test.
///
/// `parent` is the rendered relation of a `relationships` test's `to`.
pub fn generic_query(kind: &TestKind, relation: &str, column: &str, parent: Option<&str>) -> String {
    match kind {
        TestKind::Unique => format!(
            "select {col} as unique_field, count(*) as n_records\nfrom {rel}\nwhere {col} is not null\ngroup by {col}\nhaving count(*) > 1",
            col = column,
            rel = relation
        ),
        TestKind::NotNull => format!("select *\nfrom {}\nwhere {} is null", relation, column),
        TestKind::Relationships { to, field } => format!(
            "select child.{col} as child_value\nfrom {rel} as child\nleft join {parent} as parent\n  on child.{col} = parent.{field}\nwhere child.{col} is not null\n  and parent.{field} is null",
            col = column,
            rel = relation,
            parent = parent.unwrap_or(to),
            field = field
        ),
        TestKind::AcceptedValues { values, quote } => {
            let list = values
                .iter()
                .map(|v| if *quote { quote_literal(v) } else { v.clone() })
                .collect::<Vec<_>>()
                .join(", ");
            format!("select *\nfrom {}\nwhere {} not in ({})", relation, column, list)
        }
    }
}

/// Wrap a violation query so it returns a single `failures` count
pub fn wrap_count(query: &str) -> String {
    format!(
        "select count(*) as failures from (\n{}\n) as test_query",
        strip_terminator(query)
    )
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn referenced_models(references: impl IntoIterator<Item = StaticReference>) -> Vec<NodeId> {
    references
        .into_iter()
        .filter_map(|r| match r {
            StaticReference::Ref { model_name, .. } => Some(model_id(&model_name)),
            StaticReference::Source { .. } => None,
        })
        .collect()
}

fn push_unique(ids: &mut Vec<NodeId>, more: Vec<NodeId>) {
    for id in more {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
}

/// Render a test into its final query
pub fn compile_test(test: &TestCase, renderer: &Renderer) -> Result<CompiledTest, RenderError> {
    match &test.definition {
        TestDefinition::Generic { target, column, kind } => {
            let symbols = renderer.symbols();
            let (relation, node, mut depends_on) = match target {
                TestTarget::Model { name } => {
                    let symbol = symbols.resolve_ref(name).map_err(|e| unresolved(e.to_string()))?;
                    (symbol.relation.fqn(), name.clone(), vec![model_id(name)])
                }
                TestTarget::Source { source_name, table_name } => {
                    let symbol = symbols
                        .resolve_source(source_name, table_name)
                        .map_err(|e| unresolved(e.to_string()))?;
                    (symbol.relation.fqn(), format!("{}.{}", source_name, table_name), Vec::new())
                }
            };
            let blocks = depends_on.clone();

            let parent = match kind {
                TestKind::Relationships { to, .. } => {
                    push_unique(
                        &mut depends_on,
                        referenced_models(ReferenceExtractor::extract_from_expression(to)),
                    );
                    Some(renderer.render_expression(to, None)?)
                }
                _ => None,
            };

            Ok(CompiledTest {
                id: test.id.clone(),
                kind: kind.name().to_string(),
                severity: test.severity,
                node: Some(node),
                depends_on,
                blocks,
                sql: wrap_count(&generic_query(kind, &relation, column, parent.as_deref())),
            })
        }
        TestDefinition::Singular { path, raw_sql } => {
            let rendered = renderer.render(raw_sql, None, Some(path))?;
            let mut depends_on = Vec::new();
            push_unique(
                &mut depends_on,
                referenced_models(ReferenceExtractor::extract(raw_sql).into_iter().map(|l| l.reference)),
            );

            Ok(CompiledTest {
                id: test.id.clone(),
                kind: test.kind_name().to_string(),
                severity: test.severity,
                node: None,
                blocks: depends_on.clone(),
                depends_on,
                sql: wrap_count(&rendered),
            })
        }
    }
}

fn unresolved(reference: String) -> RenderError {
    RenderError::UnresolvedReference {
        reference,
        file_path: None,
        line: None,
    }
}

/// Runs compiled tests through the connection pool
#[derive(Clone)]
pub struct TestRunner {
    pool: ConnectionPool,
}

impl TestRunner {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Wait for a connection slot
    pub async fn checkout(&self) -> Result<PooledConnection, WarehouseError> {
        self.pool.checkout().await
    }

    /// Execute one test on a checked-out connection.
    ///
    /// A query error counts against the test at its severity.
    pub async fn run(&self, connection: &PooledConnection, test: &CompiledTest) -> TestResult {
        let start = Instant::now();
        let outcome = connection.execute(&test.sql).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let (failures, message) = match outcome {
            Ok(result) if result.row_count() == 0 => (0, None),
            Ok(result) => match result.first_u64() {
                Some(count) => (count, None),
                None => (0, Some("could not read the failure count".to_string())),
            },
            Err(e) => (0, Some(e.to_string())),
        };

        let status = if failures == 0 && message.is_none() {
            TestStatus::Passed
        } else if test.severity == Severity::Error {
            TestStatus::Failed
        } else {
            TestStatus::Warned
        };

        match status {
            TestStatus::Passed => tracing::info!(test = %test.id, "test passed"),
            _ => tracing::warn!(
                test = %test.id,
                severity = %test.severity,
                failures,
                error = message.as_deref().unwrap_or(""),
                "test violated"
            ),
        }

        TestResult {
            test_id: test.id.clone(),
            kind: test.kind.clone(),
            severity: test.severity,
            status,
            failures,
            node: test.node.clone(),
            message,
            duration_ms,
        }
    }

    /// Result for a test that was not evaluated
    pub fn skipped(test: &CompiledTest, message: impl Into<String>) -> TestResult {
        TestResult {
            test_id: test.id.clone(),
            kind: test.kind.clone(),
            severity: test.severity,
            status: TestStatus::Skipped,
            failures: 0,
            node: test.node.clone(),
            message: Some(message.into()),
            duration_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rivulet_core::{Materialization, Model, Relation, Source};
    use rivulet_jinja::{RenderContext, SymbolTable};
    use rivulet_warehouse::{MockWarehouse, QueryResult, WarehouseError};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn renderer() -> Renderer {
        let model = |name: &str| Model {
            name: name.to_string(),
            path: PathBuf::from(format!("models/{}.sql", name)),
            raw_sql: "select 1".to_string(),
            materialization: Materialization::Table,
            relation: Relation::new(None, "analytics", name),
            description: String::new(),
            columns: Vec::new(),
        };
        let source = Source {
            source_name: "raw".into(),
            table_name: "orders".into(),
            relation: Relation::new(None, "raw", "ORDERS"),
            path: PathBuf::from("models/sources.yml"),
            columns: Vec::new(),
        };

        Renderer::new(
            SymbolTable::from_parts(&[model("fct_orders"), model("dim_customers")], &[source], &[]),
            RenderContext::new(),
        )
    }

    fn fct(column: &str, kind: TestKind, severity: Severity) -> TestCase {
        TestCase::generic(TestTarget::Model { name: "fct_orders".into() }, column, kind, severity)
    }

    #[test]
    fn generic_queries() {
        assert_eq!(
            generic_query(&TestKind::NotNull, "analytics.fct_orders", "order_key", None),
            "select *\nfrom analytics.fct_orders\nwhere order_key is null"
        );
        assert!(generic_query(&TestKind::Unique, "t", "id", None).contains("having count(*) > 1"));

        let accepted = TestKind::AcceptedValues {
            values: vec!["P".into(), "O".into(), "it's".into()],
            quote: true,
        };
        assert_eq!(
            generic_query(&accepted, "t", "status_code", None),
            "select *\nfrom t\nwhere status_code not in ('P', 'O', 'it''s')"
        );

        let numeric = TestKind::AcceptedValues { values: vec!["1".into(), "2".into()], quote: false };
        assert!(generic_query(&numeric, "t", "n", None).ends_with("not in (1, 2)"));
    }

    #[test]
    fn compile_generic_test() {
        let test = fct("order_key", TestKind::NotNull, Severity::Error);
        let compiled = compile_test(&test, &renderer()).unwrap();

        assert_eq!(compiled.id, "not_null_fct_orders_order_key");
        assert_eq!(compiled.node.as_deref(), Some("fct_orders"));
        assert_eq!(compiled.depends_on, vec![model_id("fct_orders")]);
        assert_eq!(
            compiled.sql,
            "select count(*) as failures from (\nselect *\nfrom analytics.fct_orders\nwhere order_key is null\n) as test_query"
        );
    }

    #[test]
    fn compile_relationships_test() {
        let kind = TestKind::Relationships {
            to: "ref('dim_customers')".into(),
            field: "customer_key".into(),
        };
        let compiled = compile_test(&fct("customer_key", kind, Severity::Error), &renderer()).unwrap();

        assert_eq!(compiled.depends_on, vec![model_id("fct_orders"), model_id("dim_customers")]);
        assert_eq!(compiled.blocks, vec![model_id("fct_orders")]);
        assert!(compiled.sql.contains("left join analytics.dim_customers as parent"));
        assert!(compiled.sql.contains("and parent.customer_key is null"));
    }

    #[test]
    fn compile_source_and_singular_tests() {
        let source_test = TestCase::generic(
            TestTarget::Source { source_name: "raw".into(), table_name: "orders".into() },
            "o_orderkey",
            TestKind::Unique,
            Severity::Warn,
        );
        let compiled = compile_test(&source_test, &renderer()).unwrap();
        assert!(compiled.depends_on.is_empty());
        assert_eq!(compiled.node.as_deref(), Some("raw.orders"));
        assert!(compiled.sql.contains("from raw.ORDERS"));

        let singular = TestCase::singular(
            "assert_positive_totals",
            PathBuf::from("tests/assert_positive_totals.sql"),
            "select * from {{ ref('fct_orders') }} where total < 0;\n",
            Severity::Error,
        );
        let compiled = compile_test(&singular, &renderer()).unwrap();
        assert_eq!(compiled.kind, "singular");
        assert_eq!(compiled.depends_on, vec![model_id("fct_orders")]);
        assert_eq!(
            compiled.sql,
            "select count(*) as failures from (\nselect * from analytics.fct_orders where total < 0\n) as test_query"
        );
    }

    #[test]
    fn unknown_target_is_unresolved() {
        let test = TestCase::generic(
            TestTarget::Model { name: "missing".into() },
            "id",
            TestKind::NotNull,
            Severity::Error,
        );
        assert!(matches!(
            compile_test(&test, &renderer()),
            Err(RenderError::UnresolvedReference { .. })
        ));
    }

    #[tokio::test]
    async fn run_outcomes_by_severity() {
        let mock = MockWarehouse::builder()
            .with_response("status_code", QueryResult::scalar("failures", 1))
            .with_failure("broken", WarehouseError::QueryError("invalid identifier".into()))
            .build();
        let runner = TestRunner::new(ConnectionPool::new(Arc::new(mock), 1));
        let renderer = renderer();

        let accepted = TestKind::AcceptedValues {
            values: vec!["P".into(), "O".into(), "F".into()],
            quote: true,
        };
        let error = compile_test(&fct("status_code", accepted.clone(), Severity::Error), &renderer).unwrap();
        let warn = compile_test(&fct("status_code", accepted, Severity::Warn), &renderer).unwrap();
        let clean = compile_test(&fct("order_key", TestKind::Unique, Severity::Error), &renderer).unwrap();
        let broken = compile_test(&fct("broken", TestKind::NotNull, Severity::Error), &renderer).unwrap();

        let connection = runner.checkout().await.unwrap();

        let result = runner.run(&connection, &error).await;
        assert_eq!((result.status, result.failures), (TestStatus::Failed, 1));

        assert_eq!(runner.run(&connection, &warn).await.status, TestStatus::Warned);

        // empty rowset counts as zero failures
        let result = runner.run(&connection, &clean).await;
        assert_eq!((result.status, result.failures), (TestStatus::Passed, 0));

        let result = runner.run(&connection, &broken).await;
        assert_eq!(result.status, TestStatus::Failed);
        assert!(result.message.unwrap().contains("invalid identifier"));
    }

    #[test]
    fn skipped_result() {
        let compiled = compile_test(&fct("order_key", TestKind::NotNull, Severity::Error), &renderer()).unwrap();
        let result = TestRunner::skipped(&compiled, "model 'fct_orders' was not built");
        assert_eq!(result.status, TestStatus::Skipped);
        assert_eq!(result.node.as_deref(), Some("fct_orders"));
    }
}
