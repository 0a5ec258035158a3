use serde::{Deserialize, Serialize};

use super::label_or;
use super::models::PurchaseOrderItem;
use crate::error::HydrateError;
use crate::query_spec::QuerySpec;
use crate::types::Role;

pub(crate) const ENTITY: &str = "purchase_order_items";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PurchaseOrderItemOptions {
    pub role: Role,
    pub label: Option<String>,
}

const ITEM_SQL: &str = "
SELECT /* {{ Description }} */ poi.id, poi.purchase_order_id, poi.sku, poi.quantity, poi.unit_price
FROM purchase_order_items poi
";

/// # Errors
/// Build-time errors only.
pub fn new_purchase_order_item_builder(
    options: &PurchaseOrderItemOptions,
) -> Result<QuerySpec<PurchaseOrderItem>, HydrateError> {
    QuerySpec::builder(ENTITY)
        .raw_sql(ITEM_SQL)
        .options(options)
        .describe(
            label_or(options.label.as_ref(), "purchase_order_item_builder"),
            options.role,
        )
        .order_by(&["poi.purchase_order_id", "poi.id"])
        .keyword_columns(&["poi.sku"])
        .decode_as::<PurchaseOrderItem>()
        .build()
}
