use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bb8::{ManageConnection, Pool};
use rusqlite::OpenFlags;
use tokio::sync::Mutex;

use crate::error::HydrateError;
use crate::pool::SqlitePools;

use super::connection::run_blocking;

/// A pooled `SQLite` connection. rusqlite connections are `Send` but not `Sync`, so the pool
/// hands out a shared handle and blocking work locks it on a worker thread.
pub type SharedSqliteConnection = Arc<Mutex<rusqlite::Connection>>;

/// Options for configuring the primary/replica `SQLite` pools.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    pub db_path: String,
    pub replica_path: Option<String>,
    pub pool_size: u32,
    pub wal: bool,
    pub busy_timeout: Duration,
}

impl SqliteOptions {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            db_path,
            replica_path: None,
            pool_size: 8,
            wal: true,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Fluent builder for `SQLite` options.
#[derive(Debug, Clone)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            opts: SqliteOptions::new(db_path),
        }
    }

    /// Serve `ReadRouting::Replica` statements from read-only connections to `path`.
    #[must_use]
    pub fn replica(mut self, path: String) -> Self {
        self.opts.replica_path = Some(path);
        self
    }

    #[must_use]
    pub fn pool_size(mut self, pool_size: u32) -> Self {
        self.opts.pool_size = pool_size.max(1);
        self
    }

    #[must_use]
    pub fn wal(mut self, wal: bool) -> Self {
        self.opts.wal = wal;
        self
    }

    #[must_use]
    pub fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.opts.busy_timeout = busy_timeout;
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }

    /// Build the pools.
    ///
    /// # Errors
    /// Returns `HydrateError::ConnectionError` if a pool cannot open its first connection.
    pub async fn build(self) -> Result<SqlitePools, HydrateError> {
        SqlitePools::new(self.finish()).await
    }
}

/// bb8 manager for `SQLite` connections.
#[derive(Debug, Clone)]
pub struct SqliteManager {
    path: String,
    read_only: bool,
    wal: bool,
    busy_timeout: Duration,
}

impl SqliteManager {
    #[must_use]
    pub fn primary(opts: &SqliteOptions) -> Self {
        Self {
            path: opts.db_path.clone(),
            read_only: false,
            wal: opts.wal,
            busy_timeout: opts.busy_timeout,
        }
    }

    #[must_use]
    pub fn replica(opts: &SqliteOptions, path: String) -> Self {
        Self {
            path,
            read_only: true,
            wal: false,
            busy_timeout: opts.busy_timeout,
        }
    }

    /// Build a pool from this manager, opening one connection up front so a bad path fails here.
    ///
    /// # Errors
    /// Returns `HydrateError::ConnectionError` if the pool cannot be built.
    pub async fn build_pool(self, size: u32) -> Result<Pool<SqliteManager>, HydrateError> {
        let path = self.path.clone();
        Pool::builder()
            .max_size(size)
            .min_idle(Some(1))
            .build(self)
            .await
            .map_err(|e| HydrateError::ConnectionError(format!("sqlite pool for {path}: {e:?}")))
    }
}

impl ManageConnection for SqliteManager {
    type Connection = SharedSqliteConnection;
    type Error = HydrateError;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let manager = self.clone();
        async move {
            let conn = tokio::task::spawn_blocking(move || {
                let flags = if manager.read_only {
                    OpenFlags::SQLITE_OPEN_READ_ONLY
                        | OpenFlags::SQLITE_OPEN_URI
                        | OpenFlags::SQLITE_OPEN_NO_MUTEX
                } else {
                    OpenFlags::default()
                };
                let conn = rusqlite::Connection::open_with_flags(&manager.path, flags)?;
                conn.busy_timeout(manager.busy_timeout)?;
                if manager.wal {
                    conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;
                }
                Ok::<_, HydrateError>(conn)
            })
            .await
            .map_err(|e| {
                HydrateError::ConnectionError(format!("sqlite connect join error: {e}"))
            })??;
            Ok(Arc::new(Mutex::new(conn)))
        }
    }

    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let handle = Arc::clone(conn);
        async move {
            run_blocking(handle, |guard| {
                guard.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
                Ok(())
            })
            .await
        }
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}
