//! Warehouse connections for running models and tests
//!
//! A [`Warehouse`] accepts one SQL statement at a time and returns its rows.
//! Runs reach the warehouse through a [`ConnectionPool`], which caps the
//! number of statements in flight.
//!
//! ## Features
//!
//! Enable warehouse support via Cargo features:
//! - `snowflake` - Snowflake support
//!
//! The [`MockWarehouse`] is always available and backs `--dry-run` and tests.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rivulet_warehouse::{connect, ConnectionPool};
//!
//! let warehouse = connect(config.warehouse.as_ref())?;
//! let pool = ConnectionPool::new(warehouse, config.threads);
//! pool.execute("CREATE SCHEMA IF NOT EXISTS ANALYTICS").await?;
//! ```

pub mod adapter;
pub mod mock;
pub mod pool;
pub mod snowflake;

pub use adapter::{QueryResult, Warehouse, WarehouseError};
pub use mock::{MockWarehouse, MockWarehouseBuilder};
pub use pool::{ConnectionPool, PooledConnection};
pub use snowflake::{SnowflakeWarehouse, SnowflakeWarehouseBuilder};

use rivulet_core::WarehouseConfig;
use std::sync::Arc;

/// Open the warehouse named by `[warehouse] type`.
///
/// No `[warehouse]` table means the mock warehouse.
pub fn connect(config: Option<&WarehouseConfig>) -> Result<Arc<dyn Warehouse>, WarehouseError> {
    let Some(config) = config else {
        return Ok(Arc::new(MockWarehouse::new()));
    };

    match config.warehouse_type.to_lowercase().as_str() {
        "mock" => Ok(Arc::new(MockWarehouse::new())),
        "snowflake" => Ok(Arc::new(SnowflakeWarehouse::from_config(config)?)),
        other => Err(WarehouseError::ConfigError(format!(
            "unsupported warehouse type '{}' (expected snowflake or mock)",
            other
        ))),
    }
}
