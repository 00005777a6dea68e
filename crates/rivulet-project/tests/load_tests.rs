//! Integration tests loading a project from disk

use pretty_assertions::assert_eq;
use rivulet_core::{Config, Materialization, Severity, TestPolicy};
use rivulet_project::{DependencyGraph, GraphError, LoadError, Project};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn tpch_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    write(
        root,
        "models/staging/sources.yml",
        r#"
version: 2
sources:
  - name: tpch
    database: SNOWFLAKE_SAMPLE_DATA
    schema: TPCH_SF1
    tables:
      - name: orders
        identifier: ORDERS
"#,
    );
    write(
        root,
        "models/staging/stg_orders.sql",
        "select o_orderkey as order_key, o_orderstatus as status_code\nfrom {{ source('tpch', 'orders') }}\n",
    );
    write(
        root,
        "models/marts/fct_orders.sql",
        "select order_key, status_code\nfrom {{ ref('stg_orders') }}\n",
    );
    write(
        root,
        "models/marts/schema.yml",
        r#"
version: 2
models:
  - name: fct_orders
    config:
      materialized: table
    columns:
      - name: order_key
        tests: [unique, not_null]
      - name: status_code
        tests:
          - accepted_values:
              values: ['P', 'O', 'F']
"#,
    );
    write(
        root,
        "macros/money.sql",
        "{% macro cents_to_dollars(column, scale=2) %}round({{ column }} / 100, {{ scale }}){% endmacro %}\n",
    );
    write(
        root,
        "tests/assert_no_future_orders.sql",
        "{{ config(severity='warn') }}\nselect * from {{ ref('fct_orders') }} where false\n",
    );

    dir
}

fn config() -> Config {
    Config::from_toml(
        r#"
        test_policy = "after_all"

        [target]
        database = "ANALYTICS"
        schema = "DBT_DEV"
        "#,
    )
    .unwrap()
}

#[test]
fn load_tpch_project() {
    let dir = tpch_project();
    let project = Project::load(dir.path(), config()).unwrap();

    assert_eq!(project.config.test_policy, TestPolicy::AfterAll);

    // Sorted by path: models/marts/ before models/staging/
    let names: Vec<&str> = project.models.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["fct_orders", "stg_orders"]);

    let fct = project.model("fct_orders").unwrap();
    assert_eq!(fct.materialization, Materialization::Table);
    assert_eq!(fct.relation.fqn(), "ANALYTICS.DBT_DEV.fct_orders");
    assert_eq!(fct.path, Path::new("models/marts/fct_orders.sql"));

    let stg = project.model("stg_orders").unwrap();
    assert_eq!(stg.materialization, Materialization::View);

    assert_eq!(project.sources.len(), 1);
    assert_eq!(project.sources[0].relation.fqn(), "SNOWFLAKE_SAMPLE_DATA.TPCH_SF1.ORDERS");

    assert_eq!(project.macros.len(), 1);
    assert_eq!(project.macros[0].name, "cents_to_dollars");

    let test_ids: Vec<&str> = project.tests().iter().map(|t| t.id.as_str()).collect();
    assert_eq!(
        test_ids,
        vec![
            "unique_fct_orders_order_key",
            "not_null_fct_orders_order_key",
            "accepted_values_fct_orders_status_code__P__O__F",
            "assert_no_future_orders",
        ]
    );
    assert_eq!(project.singular_tests[0].severity, Severity::Warn);
}

#[test]
fn graph_from_loaded_project() {
    let dir = tpch_project();
    let project = Project::load(dir.path(), config()).unwrap();
    let dag = DependencyGraph::build(&project.models, &project.sources).unwrap();

    assert_eq!(dag.parents("model.fct_orders"), vec!["model.stg_orders"]);
    assert_eq!(dag.parents("model.stg_orders"), vec!["source.tpch.orders"]);
    assert_eq!(dag.downstream("source.tpch.orders"), vec!["model.fct_orders", "model.stg_orders"]);
}

#[test]
fn undeclared_source_is_unknown_reference() {
    let dir = tpch_project();
    write(dir.path(), "models/staging/stg_customers.sql", "select * from {{ source('tpch', 'customer') }}");

    let project = Project::load(dir.path(), config()).unwrap();
    let errors = DependencyGraph::build(&project.models, &project.sources).unwrap_err();
    assert!(matches!(
        &errors[0],
        GraphError::UnknownReference { consumer, target, .. }
            if consumer == "stg_customers" && target == "source('tpch', 'customer')"
    ));
}

#[test]
fn duplicate_model_names() {
    let dir = tpch_project();
    write(dir.path(), "models/other/stg_orders.sql", "select 1");

    let err = Project::load(dir.path(), config()).unwrap_err();
    assert!(matches!(err, LoadError::DuplicateModel { ref name, .. } if name == "stg_orders"));
}

#[test]
fn unterminated_macro_fails_load() {
    let dir = tpch_project();
    write(dir.path(), "macros/broken.sql", "{% macro broken(a) %}\n{{ a }}\n");

    let err = Project::load(dir.path(), config()).unwrap_err();
    assert!(matches!(err, LoadError::Macro(_)));
}

#[test]
fn invalid_yaml() {
    let dir = tpch_project();
    write(dir.path(), "models/bad.yml", "models: [");

    let err = Project::load(dir.path(), config()).unwrap_err();
    assert!(matches!(err, LoadError::Yaml { .. }));
}

#[test]
fn empty_project() {
    let dir = TempDir::new().unwrap();
    let project = Project::load(dir.path(), Config::default()).unwrap();
    assert!(project.models.is_empty());
    assert!(project.tests().is_empty());
}

#[test]
fn relationships_to_different_parents_get_distinct_ids() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "models/dim_a.sql", "select 1 as id");
    write(dir.path(), "models/dim_b.sql", "select 1 as id");
    write(dir.path(), "models/fct.sql", "select 1 as cid");
    write(
        dir.path(),
        "models/schema.yml",
        r#"
models:
  - name: fct
    columns:
      - name: cid
        tests:
          - relationships:
              to: ref('dim_a')
              field: id
          - relationships:
              to: ref('dim_b')
              field: id
"#,
    );

    let project = Project::load(dir.path(), Config::default()).unwrap();
    let test_ids: Vec<&str> = project.tests().iter().map(|t| t.id.as_str()).collect();
    assert_eq!(
        test_ids,
        vec!["relationships_fct_cid__id__ref_dim_a", "relationships_fct_cid__id__ref_dim_b"]
    );
}

#[test]
fn colliding_test_ids_fail_load() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "models/fct.sql", "select 'a b' as status");
    write(
        dir.path(),
        "models/schema.yml",
        r#"
models:
  - name: fct
    columns:
      - name: status
        tests:
          - accepted_values:
              values: ['a b']
          - accepted_values:
              values: ['a_b']
"#,
    );

    let err = Project::load(dir.path(), Config::default()).unwrap_err();
    assert!(matches!(err, LoadError::DuplicateTest { ref id } if id == "accepted_values_fct_status__a_b"));
}
