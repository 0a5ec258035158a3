use crate::error::HydrateError;

use super::config::SharedSqliteConnection;

/// Run rusqlite work for `conn` on the blocking pool.
pub(crate) async fn run_blocking<F, R>(
    conn: SharedSqliteConnection,
    func: F,
) -> Result<R, HydrateError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, HydrateError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard)
    })
    .await
    .map_err(|e| HydrateError::ExecutionError(format!("sqlite spawn_blocking join error: {e}")))?
}
