//! Templated query composition, two-phase pagination and concurrent relation hydration.
//!
//! An entity is described once as a [`QuerySpec`]: SQL text templates rendered against the
//! caller's options, a role-selected [`QueryVariant`], a row decoder, and the relations to hydrate.
//! A [`Query`] runs the spec under a [`RequestContext`]: it counts and fetches one page, decodes
//! rows (skipping bad ones), then fetches every enabled relation concurrently in one batched
//! statement each and stitches the results back onto the records.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sql_hydrate::prelude::*;
//! use sql_hydrate::sourcing::{PurchaseOrderOptions, new_purchase_order_builder};
//!
//! # async fn run() -> Result<(), HydrateError> {
//! let pools = SqliteOptionsBuilder::new("sourcing.db".to_string()).build().await?;
//! let ctx = RequestContext::new(Arc::new(pools), EngineConfig::default());
//!
//! let options = PurchaseOrderOptions {
//!     role: Role::Admin,
//!     include_items: true,
//!     include_inquiry: true,
//!     ..PurchaseOrderOptions::default()
//! };
//! let page = Query::new(&ctx, new_purchase_order_builder(&options)?)
//!     .pagination(&PaginationParams::new(1, 20).with_keyword("PO-"))
//!     .paginate()
//!     .await?;
//! println!("{} of {:?}", page.records.len(), page.total_record);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod decode;
pub mod error;
pub mod executor;
pub mod hydrate;
pub mod paginate;
pub mod prelude;
pub mod query;
pub mod query_spec;
pub mod results;
pub mod sourcing;
pub mod template;
pub mod types;

#[cfg(feature = "sqlite")]
pub mod pool;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use config::EngineConfig;
pub use context::RequestContext;
pub use error::HydrateError;
pub use executor::QueryExecutor;
pub use hydrate::{HydrationReport, Relation, RelationKey, RelationTask, hydrate};
pub use paginate::{Page, PaginationParams};
pub use query::Query;
pub use query_spec::{Predicate, QuerySpec, QuerySpecBuilder, QueryVariant, select_variant};
pub use types::{ReadRouting, Role, RowValues};
