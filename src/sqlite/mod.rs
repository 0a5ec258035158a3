// SQLite backend.
//
// - config: pool options and the bb8 connection manager
// - connection: blocking execution on a pooled connection
// - params: conversion from `RowValues` to rusqlite values
// - query: result extraction
// - executor: select/dml/batch entry points used by `SqlitePools`

pub mod config;
pub mod connection;
pub mod executor;
pub mod params;
pub mod query;

pub use config::{SqliteManager, SqliteOptions, SqliteOptionsBuilder};
pub use executor::{execute_batch, execute_dml, execute_select};
pub use params::Params;
pub use query::build_result_set;
