use bb8::Pool;

use crate::error::HydrateError;
use crate::results::ResultSet;
use crate::types::RowValues;

use super::config::SqliteManager;
use super::connection::run_blocking;
use super::params::Params;
use super::query::build_result_set;

async fn checkout(
    pool: &Pool<SqliteManager>,
) -> Result<bb8::PooledConnection<'_, SqliteManager>, HydrateError> {
    pool.get()
        .await
        .map_err(|e| HydrateError::ConnectionError(format!("sqlite checkout error: {e:?}")))
}

/// Execute a SELECT query on a pooled connection.
///
/// # Errors
/// Returns `HydrateError` if checkout, preparation or execution fails.
pub async fn execute_select(
    pool: &Pool<SqliteManager>,
    query: &str,
    params: &[RowValues],
) -> Result<ResultSet, HydrateError> {
    let params_owned = Params::convert(params)?.0;
    let sql_owned = query.to_owned();
    let conn = checkout(pool).await?;
    run_blocking(std::sync::Arc::clone(&*conn), move |guard| {
        let mut stmt = guard.prepare(&sql_owned)?;
        build_result_set(&mut stmt, &params_owned)
    })
    .await
}

/// Execute a DML query (INSERT, UPDATE, DELETE).
///
/// # Errors
/// Returns `HydrateError` if checkout or execution fails.
pub async fn execute_dml(
    pool: &Pool<SqliteManager>,
    query: &str,
    params: &[RowValues],
) -> Result<usize, HydrateError> {
    let converted = Params::convert(params)?;
    let sql_owned = query.to_owned();
    let conn = checkout(pool).await?;
    run_blocking(std::sync::Arc::clone(&*conn), move |guard| {
        let refs = converted.as_refs();
        Ok(guard.execute(&sql_owned, &refs[..])?)
    })
    .await
}

/// Execute a batch of SQL statements using auto-commit.
///
/// # Errors
/// Returns `HydrateError` if checkout or execution fails.
pub async fn execute_batch(pool: &Pool<SqliteManager>, query: &str) -> Result<(), HydrateError> {
    let sql_owned = query.to_owned();
    let conn = checkout(pool).await?;
    run_blocking(std::sync::Arc::clone(&*conn), move |guard| {
        Ok(guard.execute_batch(&sql_owned)?)
    })
    .await
}
