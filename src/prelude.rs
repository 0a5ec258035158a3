//! Convenient imports for common functionality.

pub use crate::config::EngineConfig;
pub use crate::context::RequestContext;
pub use crate::decode::{FromRow, RowView};
pub use crate::error::HydrateError;
pub use crate::executor::QueryExecutor;
pub use crate::hydrate::{HydrationReport, Relation, RelationKey, RelationTask};
pub use crate::paginate::{Page, PaginationParams};
pub use crate::query::Query;
pub use crate::query_spec::{Predicate, QuerySpec, QuerySpecBuilder, QueryVariant, select_variant};
pub use crate::results::{CustomDbRow, ResultSet};
pub use crate::template::FuncMap;
pub use crate::types::{ReadRouting, Role, RowValues};

#[cfg(feature = "sqlite")]
pub use crate::pool::SqlitePools;
#[cfg(feature = "sqlite")]
pub use crate::sqlite::{SqliteOptions, SqliteOptionsBuilder};
