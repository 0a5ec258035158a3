//! A worked instantiation: the purchase-order aggregate of a B2B sourcing marketplace.
//!
//! `new_purchase_order_builder` selects a role variant, renders its SQL against the caller's
//! options and declares six relations. Two of them (`items`, `inquiry`) run nested specs; the
//! inquiry spec can in turn hydrate its shipping address through the address spec.

mod address;
mod inquiry;
mod models;
mod purchase_order;
mod purchase_order_item;

pub use address::{AddressOptions, new_address_builder};
pub use inquiry::{InquiryOptions, new_inquiry_builder};
pub use models::{
    Address, IN_HOUSE_SAMPLE_MAKER, Inquiry, Invoice, PurchaseOrder, PurchaseOrderAlias,
    PurchaseOrderItem, PurchaseOrderTracking, User,
};
pub use purchase_order::{PURCHASE_ORDER_VARIANTS, PurchaseOrderOptions, new_purchase_order_builder};
pub use purchase_order_item::{PurchaseOrderItemOptions, new_purchase_order_item_builder};

use tracing::warn;

use crate::context::RequestContext;
use crate::decode::{FromRow, RowView};
use crate::error::HydrateError;
use crate::hydrate::RelationKey;
use crate::query::Query;
use crate::query_spec::{Predicate, QuerySpec};

/// DDL for every table the sourcing specs read.
pub const SCHEMA: &str = include_str!("schema.sql");

const USER_SQL: &str = "SELECT u.id, u.name, u.email, u.company_name FROM users u";

/// `select WHERE column IN (keys) [ORDER BY order]` decoded straight into `R`. Rows that fail
/// to decode are logged and left out, as in the main listing.
async fn find_in<R: FromRow, K: RelationKey>(
    ctx: &RequestContext,
    select: &str,
    column: &str,
    keys: &[K],
    order: &str,
) -> Result<Vec<R>, HydrateError> {
    let predicate = Predicate::in_list(column, keys);
    let mut sql = format!("{select} WHERE {}", predicate.sql);
    if !order.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(order);
    }
    let rows = ctx.select(&sql, &predicate.params).await?;
    let mut records = Vec::with_capacity(rows.len());
    for (index, row) in rows.results.iter().enumerate() {
        match R::from_row(&RowView::new(row)) {
            Ok(record) => records.push(record),
            Err(error) => warn!(sql = select, row = index, %error, "related row skipped"),
        }
    }
    Ok(records)
}

/// Batch lookup through another entity's spec; that spec hydrates its own relations.
async fn find_nested<R: Send + 'static, K: RelationKey>(
    ctx: RequestContext,
    spec: Option<QuerySpec<R>>,
    column: &'static str,
    keys: Vec<K>,
) -> Result<Vec<R>, HydrateError> {
    match spec {
        Some(spec) => {
            Query::new(&ctx, spec)
                .filter_in(column, &keys)
                .unbounded()
                .find()
                .await
        }
        None => Ok(Vec::new()),
    }
}

fn label_or(label: Option<&String>, default: &str) -> String {
    label.cloned().unwrap_or_else(|| default.to_string())
}
