//! Integration tests for rendering a small project end to end

use rivulet_core::{Materialization, Model, Relation, Source};
use rivulet_jinja::{parse_macros, RenderContext, RenderError, Renderer, SymbolTable};
use std::path::{Path, PathBuf};

const MACROS: &str = r#"{% macro status_label(column) %}case {{ column }} when 'F' then 'fulfilled' when 'O' then 'open' else 'pending' end{% endmacro %}
{% macro staged(name) %}{{ ref('stg_' ~ name) }}{% endmacro %}
"#;

fn project() -> (Vec<Model>, Vec<Source>) {
    let model = |name: &str, sql: &str| Model {
        name: name.to_string(),
        path: PathBuf::from(format!("models/{}.sql", name)),
        raw_sql: sql.to_string(),
        materialization: Materialization::View,
        relation: Relation::new(Some("ANALYTICS".into()), "DBT_DEV", name),
        description: String::new(),
        columns: Vec::new(),
    };

    let models = vec![
        model(
            "stg_orders",
            "select o_orderkey as order_key, o_orderstatus as status_code\nfrom {{ source('tpch', 'orders') }}",
        ),
        model(
            "fct_orders",
            "{{ config(materialized='table') }}\nselect order_key, status_code, {{ status_label('status_code') }} as status\nfrom {{ staged('orders') }}",
        ),
    ];

    let sources = vec![Source {
        source_name: "tpch".into(),
        table_name: "orders".into(),
        relation: Relation::new(Some("SNOWFLAKE_SAMPLE_DATA".into()), "TPCH_SF1", "ORDERS"),
        path: PathBuf::from("models/sources.yml"),
        columns: Vec::new(),
    }];

    (models, sources)
}

#[test]
fn render_project_with_macros() {
    let (models, sources) = project();
    let macros = parse_macros(MACROS, Path::new("macros/orders.sql")).unwrap();
    let renderer = Renderer::new(
        SymbolTable::from_parts(&models, &sources, &macros),
        RenderContext::new(),
    );

    let staged = renderer.render_model(&models[0]).unwrap();
    assert!(staged.ends_with("from SNOWFLAKE_SAMPLE_DATA.TPCH_SF1.ORDERS"));

    let fct = renderer.render_model(&models[1]).unwrap();
    assert_eq!(
        fct,
        "\nselect order_key, status_code, case status_code when 'F' then 'fulfilled' when 'O' then 'open' else 'pending' end as status\nfrom ANALYTICS.DBT_DEV.stg_orders"
    );
}

#[test]
fn macro_referencing_unknown_model() {
    let (models, sources) = project();
    let macros = parse_macros(MACROS, Path::new("macros/orders.sql")).unwrap();
    let renderer = Renderer::new(
        SymbolTable::from_parts(&models, &sources, &macros),
        RenderContext::new(),
    );

    let err = renderer
        .render("select * from {{ staged('customers') }}", None, Some(Path::new("models/x.sql")))
        .unwrap_err();
    assert!(matches!(err, RenderError::UnresolvedReference { .. }));
    assert!(err.to_string().contains("stg_customers"));
}
