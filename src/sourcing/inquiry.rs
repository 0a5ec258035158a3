use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::address::{self, AddressOptions, new_address_builder};
use super::models::{Address, Inquiry, PurchaseOrder, User};
use super::purchase_order::{self, PurchaseOrderOptions, new_purchase_order_builder};
use super::{USER_SQL, find_in, find_nested, label_or};
use crate::error::HydrateError;
use crate::hydrate::{Relation, RelationTask};
use crate::query_spec::QuerySpec;
use crate::types::Role;

pub(crate) const ENTITY: &str = "inquiries";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InquiryOptions {
    pub role: Role,
    pub label: Option<String>,
    /// Caller identity, forwarded to nested purchase-order lookups that scope by it.
    pub user_id: Option<String>,
    pub consistent_read: bool,
    pub include_user: bool,
    pub include_shipping_address: bool,
    pub include_purchase_orders: bool,
}

const INQUIRY_SQL: &str = "
SELECT /* {{ Description }} */ iq.id, iq.reference_id, iq.title, iq.user_id,
    iq.shipping_address_id, iq.status, iq.created_at
FROM inquiries iq
";

const INQUIRY_COUNT_SQL: &str = "SELECT /* {{ Description }} */ 1 FROM inquiries iq";

/// # Errors
/// Build-time errors, including those of the nested address and purchase-order specs.
pub fn new_inquiry_builder(options: &InquiryOptions) -> Result<QuerySpec<Inquiry>, HydrateError> {
    QuerySpec::builder(ENTITY)
        .raw_sql(INQUIRY_SQL)
        .count_sql(INQUIRY_COUNT_SQL)
        .options(options)
        .describe(label_or(options.label.as_ref(), "inquiry_builder"), options.role)
        .consistent_read(options.consistent_read)
        .order_by(&["iq.created_at DESC", "iq.id DESC"])
        .keyword_columns(&["iq.reference_id", "iq.title"])
        .decode_as::<Inquiry>()
        .relation(user_relation(options))
        .relation(shipping_address_relation(options)?)
        .relation(purchase_orders_relation(options)?)
        .build()
}

fn user_relation(options: &InquiryOptions) -> Arc<dyn Relation<Inquiry>> {
    RelationTask::<Inquiry, String, User>::new("user", options.include_user)
        .key(|iq| Some(iq.user_id.clone()))
        .fetch(|ctx, ids| async move { find_in(&ctx, USER_SQL, "u.id", &ids, "").await })
        .match_on(|user| user.id.clone())
        .attach(|iq, mut users| iq.user = users.pop())
        .into_relation()
}

fn shipping_address_relation(
    options: &InquiryOptions,
) -> Result<Arc<dyn Relation<Inquiry>>, HydrateError> {
    let spec = options
        .include_shipping_address
        .then(|| {
            new_address_builder(&AddressOptions {
                role: options.role,
                ..AddressOptions::default()
            })
        })
        .transpose()?;
    Ok(
        RelationTask::<Inquiry, String, Address>::new(
            "shipping_address",
            options.include_shipping_address,
        )
        .key(|iq| iq.shipping_address_id.clone())
        .fetch(move |ctx, ids| find_nested(ctx, spec.clone(), "a.id", ids))
        .match_on(|address| address.id.clone())
        .attach(|iq, mut addresses| iq.shipping_address = addresses.pop())
        .nests(address::ENTITY)
        .into_relation(),
    )
}

fn purchase_orders_relation(
    options: &InquiryOptions,
) -> Result<Arc<dyn Relation<Inquiry>>, HydrateError> {
    let spec = options
        .include_purchase_orders
        .then(|| {
            new_purchase_order_builder(&PurchaseOrderOptions {
                role: options.role,
                user_id: options.user_id.clone(),
                ..PurchaseOrderOptions::default()
            })
        })
        .transpose()?;
    Ok(
        RelationTask::<Inquiry, String, PurchaseOrder>::new(
            "purchase_orders",
            options.include_purchase_orders,
        )
        .key(|iq| Some(iq.id.clone()))
        .fetch(move |ctx, ids| find_nested(ctx, spec.clone(), "po.inquiry_id", ids))
        .match_any(|po| po.inquiry_id.iter().cloned().collect())
        .attach(|iq, orders| iq.purchase_orders = orders)
        .nests(purchase_order::ENTITY)
        .into_relation(),
    )
}
