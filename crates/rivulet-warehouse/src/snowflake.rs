//! Snowflake warehouse
//!
//! Runs model DDL and test queries through the Snowflake SQL API. The
//! connecting role needs:
//! - USAGE on the target database and warehouse
//! - CREATE SCHEMA on the database (when `create_schemas` is enabled)
//! - CREATE VIEW / CREATE TABLE on the target schemas
//!
//! ## Authentication Methods
//!
//! 1. Password authentication (username/password)
//! 2. Key-pair authentication (private key PEM)
//!
//! ## Usage
//!
//! ```rust,ignore
//! let warehouse = SnowflakeWarehouse::builder()
//!     .with_password("xy12345.us-east-1", "username", "password")
//!     .with_warehouse("COMPUTE_WH")
//!     .with_role("TRANSFORMER")
//!     .build()?;
//!
//! warehouse.execute("CREATE OR REPLACE VIEW ANALYTICS.STG_ORDERS AS\nselect 1").await?;
//! ```
//!
//! Reference: https://docs.snowflake.com/en/developer-guide/sql-api/index

use crate::adapter::{QueryResult, Warehouse, WarehouseError};
use rivulet_core::WarehouseConfig;

#[cfg(feature = "snowflake")]
use snowflake_api::SnowflakeApi;

#[cfg_attr(feature = "snowflake", allow(dead_code))]
const NOT_COMPILED: &str =
    "Snowflake support not compiled. Rebuild with: cargo build --features snowflake";

/// Snowflake authentication credentials
#[derive(Clone)]
#[cfg_attr(not(feature = "snowflake"), allow(dead_code))]
pub enum SnowflakeCredentials {
    /// Password-based authentication
    Password(String),
    /// Key-pair authentication (PEM format private key)
    PrivateKey(String),
}

/// Builder for SnowflakeWarehouse
// Connection fields are only read by the feature-gated `build`
#[cfg_attr(not(feature = "snowflake"), allow(dead_code))]
pub struct SnowflakeWarehouseBuilder {
    account: String,
    username: String,
    credentials: SnowflakeCredentials,
    warehouse: Option<String>,
    role: Option<String>,
    database: Option<String>,
    schema: Option<String>,
}

impl SnowflakeWarehouseBuilder {
    /// Create new builder with password authentication
    pub fn with_password(
        account: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::with_credentials(account, username, SnowflakeCredentials::Password(password.into()))
    }

    /// Create new builder with key-pair authentication
    pub fn with_key_pair(
        account: impl Into<String>,
        username: impl Into<String>,
        private_key_pem: impl Into<String>,
    ) -> Self {
        Self::with_credentials(
            account,
            username,
            SnowflakeCredentials::PrivateKey(private_key_pem.into()),
        )
    }

    fn with_credentials(
        account: impl Into<String>,
        username: impl Into<String>,
        credentials: SnowflakeCredentials,
    ) -> Self {
        Self {
            account: account.into(),
            username: username.into(),
            credentials,
            warehouse: None,
            role: None,
            database: None,
            schema: None,
        }
    }

    /// Set the warehouse to use
    pub fn with_warehouse(mut self, warehouse: impl Into<String>) -> Self {
        self.warehouse = Some(warehouse.into());
        self
    }

    /// Set the role to use
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Set the default database
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the default schema
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Account identifier this builder connects to
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Build the warehouse
    #[cfg(feature = "snowflake")]
    pub fn build(self) -> Result<SnowflakeWarehouse, WarehouseError> {
        let api = match &self.credentials {
            SnowflakeCredentials::Password(password) => SnowflakeApi::with_password_auth(
                &self.account,
                self.warehouse.as_deref(),
                self.database.as_deref(),
                self.schema.as_deref(),
                &self.username,
                self.role.as_deref(),
                password,
            )
            .map_err(|e| {
                WarehouseError::AuthenticationError(format!(
                    "Failed to authenticate with Snowflake: {}",
                    e
                ))
            })?,
            SnowflakeCredentials::PrivateKey(private_key_pem) => {
                SnowflakeApi::with_certificate_auth(
                    &self.account,
                    self.warehouse.as_deref(),
                    self.database.as_deref(),
                    self.schema.as_deref(),
                    &self.username,
                    self.role.as_deref(),
                    private_key_pem,
                )
                .map_err(|e| {
                    WarehouseError::AuthenticationError(format!(
                        "Failed to authenticate with key-pair: {}",
                        e
                    ))
                })?
            }
        };

        Ok(SnowflakeWarehouse {
            api,
            account: self.account,
        })
    }

    /// Build without snowflake feature
    #[cfg(not(feature = "snowflake"))]
    pub fn build(self) -> Result<SnowflakeWarehouse, WarehouseError> {
        Err(WarehouseError::ConfigError(NOT_COMPILED.to_string()))
    }
}

/// Snowflake warehouse
pub struct SnowflakeWarehouse {
    #[cfg(feature = "snowflake")]
    api: SnowflakeApi,

    account: String,
}

impl SnowflakeWarehouse {
    /// Builder pattern entry point
    pub fn builder() -> SnowflakeWarehouseBuilderInit {
        SnowflakeWarehouseBuilderInit
    }

    /// Account identifier
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Prepare a builder from the `[warehouse]` table of `rivulet.toml`.
    ///
    /// Each key falls back to its `SNOWFLAKE_*` environment variable.
    /// `private_key_path` takes precedence over `password`.
    pub fn builder_from_config(
        config: &WarehouseConfig,
    ) -> Result<SnowflakeWarehouseBuilder, WarehouseError> {
        let required = |key: &str, env: &str| {
            config.setting(key, env).filter(|v| !v.is_empty()).ok_or_else(|| {
                WarehouseError::ConfigError(format!(
                    "missing Snowflake setting '{}' (or {} environment variable)",
                    key, env
                ))
            })
        };

        let account = required("account", "SNOWFLAKE_ACCOUNT")?;
        let username = required("user", "SNOWFLAKE_USER")?;

        let mut builder = match config.setting("private_key_path", "SNOWFLAKE_PRIVATE_KEY_PATH") {
            Some(path) if !path.is_empty() => {
                let pem = std::fs::read_to_string(&path).map_err(|e| {
                    WarehouseError::ConfigError(format!(
                        "cannot read private key {}: {}",
                        path, e
                    ))
                })?;
                SnowflakeWarehouseBuilder::with_key_pair(account, username, pem)
            }
            _ => {
                let password = required("password", "SNOWFLAKE_PASSWORD")?;
                SnowflakeWarehouseBuilder::with_password(account, username, password)
            }
        };

        if let Some(warehouse) = config.setting("warehouse", "SNOWFLAKE_WAREHOUSE") {
            builder = builder.with_warehouse(warehouse);
        }
        if let Some(role) = config.setting("role", "SNOWFLAKE_ROLE") {
            builder = builder.with_role(role);
        }
        if let Some(database) = config.setting("database", "SNOWFLAKE_DATABASE") {
            builder = builder.with_database(database);
        }
        if let Some(schema) = config.setting("schema", "SNOWFLAKE_SCHEMA") {
            builder = builder.with_schema(schema);
        }

        Ok(builder)
    }

    /// Connect using the `[warehouse]` table of `rivulet.toml`
    pub fn from_config(config: &WarehouseConfig) -> Result<Self, WarehouseError> {
        Self::builder_from_config(config)?.build()
    }
}

/// Empty struct for builder pattern initialization
pub struct SnowflakeWarehouseBuilderInit;

impl SnowflakeWarehouseBuilderInit {
    pub fn with_password(
        self,
        account: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> SnowflakeWarehouseBuilder {
        SnowflakeWarehouseBuilder::with_password(account, username, password)
    }

    pub fn with_key_pair(
        self,
        account: impl Into<String>,
        username: impl Into<String>,
        private_key_pem: impl Into<String>,
    ) -> SnowflakeWarehouseBuilder {
        SnowflakeWarehouseBuilder::with_key_pair(account, username, private_key_pem)
    }
}

#[async_trait::async_trait]
impl Warehouse for SnowflakeWarehouse {
    fn name(&self) -> &'static str {
        "Snowflake"
    }

    #[cfg(feature = "snowflake")]
    async fn execute(&self, sql: &str) -> Result<QueryResult, WarehouseError> {
        let result = self
            .api
            .exec(sql)
            .await
            .map_err(|e| WarehouseError::from_message(e.to_string()))?;

        match result {
            snowflake_api::QueryResult::Arrow(batches) => arrow::batches_to_rows(&batches),
            snowflake_api::QueryResult::Json(json) => arrow::json_to_rows(json.value),
            snowflake_api::QueryResult::Empty => Ok(QueryResult::empty()),
        }
    }

    #[cfg(not(feature = "snowflake"))]
    async fn execute(&self, _sql: &str) -> Result<QueryResult, WarehouseError> {
        Err(WarehouseError::ConfigError(NOT_COMPILED.to_string()))
    }

    #[cfg(feature = "snowflake")]
    async fn test_connection(&self) -> Result<(), WarehouseError> {
        self.api
            .exec("SELECT 1")
            .await
            .map_err(|e| WarehouseError::NetworkError(format!("Connection test failed: {}", e)))?;
        Ok(())
    }

    #[cfg(not(feature = "snowflake"))]
    async fn test_connection(&self) -> Result<(), WarehouseError> {
        Err(WarehouseError::ConfigError(NOT_COMPILED.to_string()))
    }
}

/// Arrow record batches to JSON rows
#[cfg(feature = "snowflake")]
mod arrow {
    use crate::adapter::{QueryResult, WarehouseError};
    use arrow_array::cast::AsArray;
    use arrow_array::types::{
        Decimal128Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
    };
    use arrow_array::{Array, ArrayRef, RecordBatch};
    use arrow_schema::DataType;
    use serde_json::Value;

    pub fn batches_to_rows(batches: &[RecordBatch]) -> Result<QueryResult, WarehouseError> {
        let mut result = QueryResult::empty();

        if let Some(first) = batches.first() {
            result.columns = first
                .schema()
                .fields()
                .iter()
                .map(|f| f.name().clone())
                .collect();
        }

        for batch in batches {
            for row in 0..batch.num_rows() {
                let values = batch.columns().iter().map(|col| cell(col, row)).collect();
                result.rows.push(values);
            }
        }

        Ok(result)
    }

    pub fn json_to_rows(value: Value) -> Result<QueryResult, WarehouseError> {
        match value {
            Value::Array(rows) => {
                let rows = rows
                    .into_iter()
                    .map(|row| match row {
                        Value::Array(values) => Ok(values),
                        other => Err(WarehouseError::InvalidResponse(format!(
                            "expected a row array, got {}",
                            other
                        ))),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(QueryResult { columns: Vec::new(), rows })
            }
            Value::Null => Ok(QueryResult::empty()),
            other => Err(WarehouseError::InvalidResponse(format!(
                "unexpected JSON result: {}",
                other
            ))),
        }
    }

    fn cell(col: &ArrayRef, row: usize) -> Value {
        if col.is_null(row) {
            return Value::Null;
        }

        match col.data_type() {
            DataType::Int8 => col.as_primitive::<Int8Type>().value(row).into(),
            DataType::Int16 => col.as_primitive::<Int16Type>().value(row).into(),
            DataType::Int32 => col.as_primitive::<Int32Type>().value(row).into(),
            DataType::Int64 => col.as_primitive::<Int64Type>().value(row).into(),
            DataType::Float32 => f64::from(col.as_primitive::<Float32Type>().value(row)).into(),
            DataType::Float64 => col.as_primitive::<Float64Type>().value(row).into(),
            DataType::Decimal128(_, scale) => {
                let raw = col.as_primitive::<Decimal128Type>().value(row);
                if *scale <= 0 {
                    i64::try_from(raw).map(Value::from).unwrap_or(Value::Null)
                } else {
                    Value::from(raw as f64 / 10f64.powi(i32::from(*scale)))
                }
            }
            DataType::Utf8 => col.as_string::<i32>().value(row).into(),
            DataType::LargeUtf8 => col.as_string::<i64>().value(row).into(),
            DataType::Boolean => col.as_boolean().value(row).into(),
            _ => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(settings: &[(&str, &str)]) -> WarehouseConfig {
        WarehouseConfig {
            warehouse_type: "snowflake".to_string(),
            settings: settings
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn builder_from_config_reads_settings() {
        let builder = SnowflakeWarehouse::builder_from_config(&config(&[
            ("account", "xy12345.us-east-1"),
            ("user", "loader"),
            ("password", "secret"),
            ("warehouse", "COMPUTE_WH"),
        ]))
        .unwrap();

        assert_eq!(builder.account(), "xy12345.us-east-1");
        assert_eq!(builder.username, "loader");
        assert_eq!(builder.warehouse.as_deref(), Some("COMPUTE_WH"));
        assert!(matches!(builder.credentials, SnowflakeCredentials::Password(ref p) if p == "secret"));
    }

    #[test]
    fn missing_private_key_file_is_config_error() {
        let err = SnowflakeWarehouse::builder_from_config(&config(&[
            ("account", "acct"),
            ("user", "loader"),
            ("private_key_path", "/nonexistent/rivulet/key.p8"),
        ]))
        .err()
        .unwrap();

        assert!(matches!(err, WarehouseError::ConfigError(_)));
    }

    #[cfg(not(feature = "snowflake"))]
    #[test]
    fn build_without_feature_fails() {
        let result = SnowflakeWarehouse::builder()
            .with_password("account", "user", "pass")
            .build();
        assert!(matches!(result, Err(WarehouseError::ConfigError(_))));
    }
}
