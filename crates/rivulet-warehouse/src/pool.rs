//! Bounded connection pool
//!
//! Every statement a run issues goes through the pool, so at most `size`
//! statements are in flight against the warehouse at any time.

use crate::adapter::{QueryResult, Warehouse, WarehouseError};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A fixed number of connection slots over one warehouse
#[derive(Clone)]
pub struct ConnectionPool {
    warehouse: Arc<dyn Warehouse>,
    slots: Arc<Semaphore>,
    size: usize,
}

impl ConnectionPool {
    /// Pool with `size` slots (at least one)
    pub fn new(warehouse: Arc<dyn Warehouse>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            warehouse,
            slots: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots not currently checked out
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn warehouse_name(&self) -> &'static str {
        self.warehouse.name()
    }

    /// Wait for a free slot
    pub async fn checkout(&self) -> Result<PooledConnection, WarehouseError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| WarehouseError::PoolClosed)?;

        Ok(PooledConnection {
            warehouse: Arc::clone(&self.warehouse),
            _permit: permit,
        })
    }

    /// Check out a slot, run one statement, return the slot
    pub async fn execute(&self, sql: &str) -> Result<QueryResult, WarehouseError> {
        let connection = self.checkout().await?;
        connection.execute(sql).await
    }

    /// Refuse further checkouts; statements already running finish
    pub fn close(&self) {
        self.slots.close();
    }
}

/// A checked-out slot, returned to the pool on drop
pub struct PooledConnection {
    warehouse: Arc<dyn Warehouse>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub async fn execute(&self, sql: &str) -> Result<QueryResult, WarehouseError> {
        tracing::debug!(warehouse = self.warehouse.name(), sql = %sql, "executing statement");
        self.warehouse.execute(sql).await
    }
}
