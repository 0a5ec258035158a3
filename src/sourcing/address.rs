use serde::{Deserialize, Serialize};

use super::label_or;
use super::models::Address;
use crate::error::HydrateError;
use crate::query_spec::QuerySpec;
use crate::types::Role;

pub(crate) const ENTITY: &str = "addresses";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressOptions {
    pub role: Role,
    pub label: Option<String>,
}

const ADDRESS_SQL: &str = "
SELECT /* {{ Description }} */ a.id, a.user_id, a.line1, a.city, a.country_code
FROM addresses a
";

/// # Errors
/// Build-time errors only.
pub fn new_address_builder(options: &AddressOptions) -> Result<QuerySpec<Address>, HydrateError> {
    QuerySpec::builder(ENTITY)
        .raw_sql(ADDRESS_SQL)
        .options(options)
        .describe(label_or(options.label.as_ref(), "address_builder"), options.role)
        .order_by(&["a.id"])
        .keyword_columns(&["a.line1", "a.city"])
        .decode_as::<Address>()
        .build()
}
