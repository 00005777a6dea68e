//! Materialization: turn rendered model SQL into warehouse objects

use rivulet_core::{Materialization, Model, NodeId, Relation};
use rivulet_warehouse::{ConnectionPool, PooledConnection, WarehouseError};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// A model with its rendered SQL, ready to materialize
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledModel {
    pub node_id: NodeId,
    pub name: String,
    pub path: PathBuf,
    pub relation: Relation,
    pub materialization: Materialization,

    /// Rendered SELECT, without trailing semicolon
    pub sql: String,
}

impl CompiledModel {
    pub fn new(model: &Model, rendered_sql: &str) -> Self {
        Self {
            node_id: model.unique_id(),
            name: model.name.clone(),
            path: model.path.clone(),
            relation: model.relation.clone(),
            materialization: model.materialization,
            sql: strip_terminator(rendered_sql),
        }
    }

    /// The `CREATE OR REPLACE` statement for this model
    pub fn create_statement(&self) -> String {
        create_statement(self.materialization, &self.relation, &self.sql)
    }
}

/// `CREATE OR REPLACE VIEW|TABLE <relation> AS\n<sql>`
pub fn create_statement(materialization: Materialization, relation: &Relation, sql: &str) -> String {
    format!(
        "CREATE OR REPLACE {} {} AS\n{}",
        materialization.keyword(),
        relation.fqn(),
        sql
    )
}

pub fn create_schema_statement(schema_fqn: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", schema_fqn)
}

/// Drop trailing whitespace and statement terminators
pub fn strip_terminator(sql: &str) -> String {
    sql.trim_end().trim_end_matches(';').trim_end().to_string()
}

/// Issues model DDL through the connection pool
#[derive(Clone)]
pub struct Materializer {
    pool: ConnectionPool,
}

impl Materializer {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Wait for a connection slot
    pub async fn checkout(&self) -> Result<PooledConnection, WarehouseError> {
        self.pool.checkout().await
    }

    /// Create or replace the model's relation on a checked-out connection
    pub async fn materialize(&self, connection: &PooledConnection, model: &CompiledModel) -> Result<(), WarehouseError> {
        tracing::debug!(
            model = %model.name,
            relation = %model.relation,
            materialization = %model.materialization,
            "materializing"
        );
        connection.execute(&model.create_statement()).await?;
        Ok(())
    }

    /// `CREATE SCHEMA IF NOT EXISTS` once per distinct schema, in name order
    pub async fn create_schemas<'a>(
        &self,
        models: impl IntoIterator<Item = &'a CompiledModel>,
    ) -> Result<usize, WarehouseError> {
        let schemas: BTreeSet<String> = models.into_iter().map(|m| m.relation.schema_fqn()).collect();

        for schema in &schemas {
            tracing::info!(schema = %schema, "ensuring schema exists");
            self.pool.execute(&create_schema_statement(schema)).await?;
        }

        Ok(schemas.len())
    }
}
