//! Warehouse trait: submit SQL, receive a rowset or an error

use serde::{Deserialize, Serialize};

/// Rows returned by a statement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names, in order
    pub columns: Vec<String>,

    /// Row values, one entry per column
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryResult {
    /// A statement that returned no rows (DDL, empty select)
    pub fn empty() -> Self {
        Self::default()
    }

    /// A single row with a single column
    pub fn scalar(column: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            columns: vec![column.into()],
            rows: vec![vec![value.into()]],
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// First column of the first row as an unsigned count.
    ///
    /// Warehouses disagree on numeric encodings, so integers, floats and
    /// numeric strings are all accepted.
    pub fn first_u64(&self) -> Option<u64> {
        let value = self.rows.first()?.first()?;
        match value {
            serde_json::Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
            serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        }
    }
}

/// Errors returned by a warehouse
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WarehouseError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Query failed: {0}")]
    QueryError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection pool closed")]
    PoolClosed,
}

impl WarehouseError {
    /// Classify a driver error message
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains("does not exist") || message.contains("not found") {
            Self::ObjectNotFound(message)
        } else if message.contains("Insufficient privileges") || message.contains("Permission") {
            Self::PermissionDenied(message)
        } else {
            Self::QueryError(message)
        }
    }
}

/// A warehouse that executes SQL statements
#[async_trait::async_trait]
pub trait Warehouse: Send + Sync {
    /// Get the warehouse name (e.g., "Snowflake")
    fn name(&self) -> &'static str;

    /// Execute one statement and return its rows
    async fn execute(&self, sql: &str) -> Result<QueryResult, WarehouseError>;

    /// Test the connection to the warehouse
    ///
    /// This is useful for validating credentials before a run starts.
    async fn test_connection(&self) -> Result<(), WarehouseError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_u64_encodings() {
        assert_eq!(QueryResult::scalar("failures", 3).first_u64(), Some(3));
        assert_eq!(QueryResult::scalar("failures", json!(2.0)).first_u64(), Some(2));
        assert_eq!(QueryResult::scalar("failures", "7").first_u64(), Some(7));
        assert_eq!(QueryResult::scalar("failures", json!(null)).first_u64(), None);
        assert_eq!(QueryResult::empty().first_u64(), None);
    }

    #[test]
    fn classify_messages() {
        assert!(matches!(
            WarehouseError::from_message("Table 'X' does not exist or not authorized."),
            WarehouseError::ObjectNotFound(_)
        ));
        assert!(matches!(
            WarehouseError::from_message("Insufficient privileges to operate on schema"),
            WarehouseError::PermissionDenied(_)
        ));
        assert!(matches!(
            WarehouseError::from_message("syntax error line 1 at position 7"),
            WarehouseError::QueryError(_)
        ));
    }
}
