//! The statement-execution seam.
//!
//! The engine owns plan construction, pagination and hydration; running a statement against a
//! connection is delegated to a [`QueryExecutor`]. `SqlitePools` is the bundled implementation;
//! tests wrap it to record or fail statements.

use async_trait::async_trait;

use crate::error::HydrateError;
use crate::results::ResultSet;
use crate::types::{ReadRouting, RowValues};

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run a SELECT on the connection tier named by `routing` and materialize its rows.
    ///
    /// # Errors
    /// Backend, pool, or conversion failures.
    async fn select(
        &self,
        routing: ReadRouting,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, HydrateError>;

    /// Run a DML statement on the primary and return rows affected.
    ///
    /// # Errors
    /// Backend, pool, or conversion failures.
    async fn dml(&self, sql: &str, params: &[RowValues]) -> Result<usize, HydrateError>;

    /// Run several `;`-separated statements on the primary without parameters.
    ///
    /// # Errors
    /// Backend or pool failures.
    async fn execute_batch(&self, sql: &str) -> Result<(), HydrateError>;

    /// Connections available to one tier; sizes the per-request statement semaphore.
    fn pool_size(&self) -> u32 {
        1
    }
}
