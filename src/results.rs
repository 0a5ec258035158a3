//! Materialized statement results handed from the executor to row decoders.

mod result_set;
mod row;

pub use result_set::ResultSet;
pub use row::CustomDbRow;
