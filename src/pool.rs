use async_trait::async_trait;
use bb8::Pool;
use tracing::debug;

use crate::error::HydrateError;
use crate::executor::QueryExecutor;
use crate::results::ResultSet;
use crate::sqlite::{SqliteManager, SqliteOptions, execute_batch, execute_dml, execute_select};
use crate::types::{ReadRouting, RowValues};

/// Primary and optional replica `SQLite` pools.
///
/// `ReadRouting::Primary` statements and every write go to the primary. `ReadRouting::Replica`
/// reads use the replica pool when one is configured and the primary otherwise.
#[derive(Clone, Debug)]
pub struct SqlitePools {
    primary: Pool<SqliteManager>,
    replica: Option<Pool<SqliteManager>>,
    pool_size: u32,
}

impl SqlitePools {
    /// # Errors
    /// Returns `HydrateError::ConnectionError` if either pool cannot be built.
    pub async fn new(opts: SqliteOptions) -> Result<Self, HydrateError> {
        let primary = SqliteManager::primary(&opts)
            .build_pool(opts.pool_size)
            .await?;
        let replica = match opts.replica_path.clone() {
            Some(path) => Some(
                SqliteManager::replica(&opts, path)
                    .build_pool(opts.pool_size)
                    .await?,
            ),
            None => None,
        };
        Ok(Self {
            primary,
            replica,
            pool_size: opts.pool_size,
        })
    }

    fn pool_for(&self, routing: ReadRouting) -> &Pool<SqliteManager> {
        match (routing, &self.replica) {
            (ReadRouting::Replica, Some(replica)) => replica,
            _ => &self.primary,
        }
    }

    #[must_use]
    pub fn has_replica(&self) -> bool {
        self.replica.is_some()
    }
}

#[async_trait]
impl QueryExecutor for SqlitePools {
    async fn select(
        &self,
        routing: ReadRouting,
        sql: &str,
        params: &[RowValues],
    ) -> Result<ResultSet, HydrateError> {
        execute_select(self.pool_for(routing), sql, params).await
    }

    async fn dml(&self, sql: &str, params: &[RowValues]) -> Result<usize, HydrateError> {
        execute_dml(&self.primary, sql, params).await
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), HydrateError> {
        debug!(len = sql.len(), "sqlite execute_batch");
        execute_batch(&self.primary, sql).await
    }

    fn pool_size(&self) -> u32 {
        self.pool_size
    }
}
