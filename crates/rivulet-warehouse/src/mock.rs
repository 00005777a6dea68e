//! Mock warehouse for testing
//!
//! This warehouse records every statement and answers with scripted
//! results without connecting anywhere. It's useful for:
//! - Unit testing the planner, materializer and test runner
//! - Dry runs (`rivulet run --dry-run`)
//! - Simulating statement failures and latency
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rivulet_warehouse::{MockWarehouse, QueryResult, Warehouse};
//!
//! let warehouse = MockWarehouse::builder()
//!     .with_response("not in ('P', 'O', 'F')", QueryResult::scalar("failures", 1))
//!     .with_failure("fct_broken", WarehouseError::QueryError("syntax error".into()))
//!     .with_latency(10)
//!     .build();
//!
//! warehouse.execute("CREATE OR REPLACE VIEW ...").await?;
//! assert_eq!(warehouse.statements().await.len(), 1);
//! ```

use crate::adapter::{QueryResult, Warehouse, WarehouseError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Mock warehouse
///
/// Responses and failures are matched by substring against the submitted
/// SQL; the first registered match wins. Unmatched statements succeed with
/// no rows. Clones share recorded statements and scripts.
pub struct MockWarehouse {
    /// Every statement received, in submission order
    statements: Arc<RwLock<Vec<String>>>,

    /// (pattern, rows) scripted responses
    responses: Arc<RwLock<Vec<(String, QueryResult)>>>,

    /// (pattern, error) scripted failures, checked before responses
    failures: Arc<RwLock<Vec<(String, WarehouseError)>>>,

    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,

    /// Simulate connection failure
    fail_connection: bool,

    /// Simulate query latency (milliseconds)
    latency_ms: u64,

    /// Name to return from name() method
    warehouse_name: &'static str,
}

impl MockWarehouse {
    /// Create a mock warehouse with no scripts
    pub fn new() -> Self {
        MockWarehouseBuilder::new().build()
    }

    /// Builder pattern entry point
    pub fn builder() -> MockWarehouseBuilder {
        MockWarehouseBuilder::new()
    }

    /// Answer statements containing `pattern` with `result`
    pub async fn add_response(&self, pattern: impl Into<String>, result: QueryResult) {
        self.responses.write().await.push((pattern.into(), result));
    }

    /// Fail statements containing `pattern` with `error`
    pub async fn add_failure(&self, pattern: impl Into<String>, error: WarehouseError) {
        self.failures.write().await.push((pattern.into(), error));
    }

    /// Statements received so far
    pub async fn statements(&self) -> Vec<String> {
        self.statements.read().await.clone()
    }

    /// Statements containing `pattern`
    pub async fn statements_matching(&self, pattern: &str) -> Vec<String> {
        self.statements
            .read()
            .await
            .iter()
            .filter(|s| s.contains(pattern))
            .cloned()
            .collect()
    }

    pub async fn clear_statements(&self) {
        self.statements.write().await.clear();
    }

    /// Highest number of statements observed executing at once
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Simulate latency if configured
    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
    }

    async fn answer(&self, sql: &str) -> Result<QueryResult, WarehouseError> {
        self.statements.write().await.push(sql.to_string());
        self.simulate_latency().await;

        if let Some((_, error)) = self.failures.read().await.iter().find(|(p, _)| sql.contains(p.as_str())) {
            return Err(error.clone());
        }

        Ok(self
            .responses
            .read()
            .await
            .iter()
            .find(|(p, _)| sql.contains(p.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_default())
    }
}

impl Default for MockWarehouse {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MockWarehouse {
    fn clone(&self) -> Self {
        Self {
            statements: Arc::clone(&self.statements),
            responses: Arc::clone(&self.responses),
            failures: Arc::clone(&self.failures),
            in_flight: Arc::clone(&self.in_flight),
            max_in_flight: Arc::clone(&self.max_in_flight),
            fail_connection: self.fail_connection,
            latency_ms: self.latency_ms,
            warehouse_name: self.warehouse_name,
        }
    }
}

#[async_trait::async_trait]
impl Warehouse for MockWarehouse {
    fn name(&self) -> &'static str {
        self.warehouse_name
    }

    async fn execute(&self, sql: &str) -> Result<QueryResult, WarehouseError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = self.answer(sql).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn test_connection(&self) -> Result<(), WarehouseError> {
        self.simulate_latency().await;

        if self.fail_connection {
            Err(WarehouseError::NetworkError(
                "Simulated connection failure".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

/// Builder for creating MockWarehouse with scripted results
pub struct MockWarehouseBuilder {
    responses: Vec<(String, QueryResult)>,
    failures: Vec<(String, WarehouseError)>,
    fail_connection: bool,
    latency_ms: u64,
    warehouse_name: &'static str,
}

impl MockWarehouseBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            responses: Vec::new(),
            failures: Vec::new(),
            fail_connection: false,
            latency_ms: 0,
            warehouse_name: "Mock",
        }
    }

    /// Answer statements containing `pattern` with `result`
    pub fn with_response(mut self, pattern: impl Into<String>, result: QueryResult) -> Self {
        self.responses.push((pattern.into(), result));
        self
    }

    /// Fail statements containing `pattern`
    pub fn with_failure(mut self, pattern: impl Into<String>, error: WarehouseError) -> Self {
        self.failures.push((pattern.into(), error));
        self
    }

    /// Configure connection failure
    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    /// Configure latency
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Set warehouse name
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.warehouse_name = name;
        self
    }

    /// Build the MockWarehouse
    pub fn build(self) -> MockWarehouse {
        MockWarehouse {
            statements: Arc::new(RwLock::new(Vec::new())),
            responses: Arc::new(RwLock::new(self.responses)),
            failures: Arc::new(RwLock::new(self.failures)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            fail_connection: self.fail_connection,
            latency_ms: self.latency_ms,
            warehouse_name: self.warehouse_name,
        }
    }
}

impl Default for MockWarehouseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_statements_and_defaults_to_empty() {
        let warehouse = MockWarehouse::new();
        let result = warehouse.execute("CREATE OR REPLACE VIEW a AS\nselect 1").await.unwrap();

        assert_eq!(result, QueryResult::empty());
        assert_eq!(warehouse.statements().await, vec!["CREATE OR REPLACE VIEW a AS\nselect 1"]);
        assert_eq!(warehouse.name(), "Mock");
    }

    #[tokio::test]
    async fn scripted_responses_first_match_wins() {
        let warehouse = MockWarehouse::builder()
            .with_response("status_code", QueryResult::scalar("failures", 1))
            .with_response("failures", QueryResult::scalar("failures", 0))
            .build();

        let hit = warehouse
            .execute("select count(*) as failures from (select * from t where status_code not in ('P')) as test_query")
            .await
            .unwrap();
        assert_eq!(hit.first_u64(), Some(1));

        let other = warehouse
            .execute("select count(*) as failures from (select 1) as test_query")
            .await
            .unwrap();
        assert_eq!(other.first_u64(), Some(0));
    }

    #[tokio::test]
    async fn scripted_failures() {
        let warehouse = MockWarehouse::new();
        warehouse
            .add_failure("broken", WarehouseError::QueryError("syntax error".into()))
            .await;

        let err = warehouse.execute("CREATE OR REPLACE TABLE s.broken AS select").await.unwrap_err();
        assert_eq!(err, WarehouseError::QueryError("syntax error".into()));
        assert!(warehouse.execute("select 1").await.is_ok());
        assert_eq!(warehouse.statements_matching("broken").await.len(), 1);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let warehouse = MockWarehouse::new();
        let clone = warehouse.clone();
        clone.execute("select 1").await.unwrap();
        assert_eq!(warehouse.statements().await.len(), 1);

        warehouse.clear_statements().await;
        assert!(clone.statements().await.is_empty());
    }

    #[tokio::test]
    async fn connection_failure() {
        let warehouse = MockWarehouse::builder().with_connection_failure().with_name("Flaky").build();
        assert!(warehouse.test_connection().await.is_err());
        assert_eq!(warehouse.name(), "Flaky");
    }
}
