use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::inquiry::{self, InquiryOptions, new_inquiry_builder};
use super::models::{
    IN_HOUSE_SAMPLE_MAKER, Inquiry, Invoice, PurchaseOrder, PurchaseOrderAlias,
    PurchaseOrderItem, PurchaseOrderTracking, User,
};
use super::purchase_order_item::{self, PurchaseOrderItemOptions, new_purchase_order_item_builder};
use super::{USER_SQL, find_in, find_nested, label_or};
use crate::error::HydrateError;
use crate::hydrate::{Relation, RelationTask};
use crate::query_spec::{Predicate, QuerySpec, QueryVariant, select_variant};
use crate::types::Role;

pub(crate) const ENTITY: &str = "purchase_orders";

/// Caller options for purchase-order listings. Every `include_*` flag defaults to `false`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PurchaseOrderOptions {
    pub role: Role,
    pub label: Option<String>,
    /// Caller identity; required by the buyer and seller variants.
    pub user_id: Option<String>,
    pub consistent_read: bool,
    pub statuses: Vec<String>,

    /// Join the buyer into the listing row (staff variants only).
    pub include_users: bool,
    pub include_items: bool,
    pub include_inquiry: bool,
    /// Let the nested inquiry hydrate its shipping address.
    pub include_inquiry_address: bool,
    pub include_trackings: bool,
    pub include_assignees: bool,
    pub include_sample_maker: bool,
    pub include_invoice: bool,
}

const STAFF_SQL: &str = "
SELECT /* {{ Description }} */ po.*
{{- if .include_users }}, u.id AS u__id, u.name AS u__name, u.email AS u__email,
    u.company_name AS u__company_name{{ end }}
FROM purchase_orders po
{{- if .include_users }} LEFT JOIN users u ON u.id = po.user_id{{ end }}
";

const MEMBER_SQL: &str = "
SELECT /* {{ Description }} */ po.id, po.reference_id, po.inquiry_id, po.user_id,
    po.sample_maker_id, po.assignee_ids, po.invoice_number, po.status, po.total_amount,
    po.created_at, po.updated_at
FROM purchase_orders po
";

const STAFF_COUNT_SQL: &str = "
SELECT /* {{ Description }} */ 1 FROM purchase_orders po
{{- if .include_users }} LEFT JOIN users u ON u.id = po.user_id{{ end }}
";

const MEMBER_COUNT_SQL: &str = "SELECT /* {{ Description }} */ 1 FROM purchase_orders po";

const STAFF_ORDER: &[&str] = &["po.updated_at DESC", "po.id DESC"];
const MEMBER_ORDER: &[&str] = &["po.created_at DESC", "po.id DESC"];

fn caller_id<'a>(options: &'a PurchaseOrderOptions, role: &str) -> Result<&'a str, HydrateError> {
    options
        .user_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            HydrateError::ConfigError(format!("{role} purchase orders require a user_id"))
        })
}

fn buyer_scope(options: &PurchaseOrderOptions) -> Result<Predicate, HydrateError> {
    let user_id = caller_id(options, "buyer")?;
    Ok(Predicate::new("po.user_id = ?", vec![user_id.into()]))
}

fn seller_scope(options: &PurchaseOrderOptions) -> Result<Predicate, HydrateError> {
    let user_id = caller_id(options, "seller")?;
    Ok(Predicate::new("po.sample_maker_id = ?", vec![user_id.into()]))
}

/// Role variants. Guests have none.
pub static PURCHASE_ORDER_VARIANTS: &[QueryVariant<PurchaseOrderOptions>] = &[
    QueryVariant {
        role: Role::Admin,
        raw_sql: STAFF_SQL,
        count_sql: Some(STAFF_COUNT_SQL),
        order_by: STAFF_ORDER,
        scope: None,
    },
    QueryVariant {
        role: Role::Staff,
        raw_sql: STAFF_SQL,
        count_sql: Some(STAFF_COUNT_SQL),
        order_by: STAFF_ORDER,
        scope: None,
    },
    QueryVariant {
        role: Role::Buyer,
        raw_sql: MEMBER_SQL,
        count_sql: Some(MEMBER_COUNT_SQL),
        order_by: MEMBER_ORDER,
        scope: Some(buyer_scope),
    },
    QueryVariant {
        role: Role::Seller,
        raw_sql: MEMBER_SQL,
        count_sql: Some(MEMBER_COUNT_SQL),
        order_by: MEMBER_ORDER,
        scope: Some(seller_scope),
    },
];

/// Purchase-order listing for `options.role`.
///
/// # Errors
/// `ConfigError` for a role without a variant or a member role without `user_id`, plus any
/// build-time error of the nested item and inquiry specs.
pub fn new_purchase_order_builder(
    options: &PurchaseOrderOptions,
) -> Result<QuerySpec<PurchaseOrder>, HydrateError> {
    let variant = select_variant(ENTITY, PURCHASE_ORDER_VARIANTS, options.role)?;
    let mut builder = QuerySpec::builder(ENTITY)
        .variant(variant, options)
        .options(options)
        .describe(label_or(options.label.as_ref(), "purchase_order_builder"), options.role)
        .consistent_read(options.consistent_read)
        .keyword_columns(&["po.reference_id", "po.status"])
        .decode_as::<PurchaseOrderAlias>();
    if !options.statuses.is_empty() {
        builder = builder.predicate(Predicate::in_list("po.status", &options.statuses));
    }
    builder
        .relation(items_relation(options)?)
        .relation(inquiry_relation(options)?)
        .relation(trackings_relation(options))
        .relation(assignees_relation(options))
        .relation(sample_maker_relation(options))
        .relation(invoice_relation(options))
        .build()
}

fn items_relation(
    options: &PurchaseOrderOptions,
) -> Result<Arc<dyn Relation<PurchaseOrder>>, HydrateError> {
    let spec = options
        .include_items
        .then(|| {
            new_purchase_order_item_builder(&PurchaseOrderItemOptions {
                role: options.role,
                ..PurchaseOrderItemOptions::default()
            })
        })
        .transpose()?;
    Ok(
        RelationTask::<PurchaseOrder, String, PurchaseOrderItem>::new("items", options.include_items)
            .key(|po| Some(po.id.clone()))
            .fetch(move |ctx, ids| find_nested(ctx, spec.clone(), "poi.purchase_order_id", ids))
            .match_on(|item| item.purchase_order_id.clone())
            .attach(|po, items| po.items = items)
            .nests(purchase_order_item::ENTITY)
            .into_relation(),
    )
}

fn inquiry_relation(
    options: &PurchaseOrderOptions,
) -> Result<Arc<dyn Relation<PurchaseOrder>>, HydrateError> {
    let spec = options
        .include_inquiry
        .then(|| {
            new_inquiry_builder(&InquiryOptions {
                role: options.role,
                user_id: options.user_id.clone(),
                include_shipping_address: options.include_inquiry_address,
                ..InquiryOptions::default()
            })
        })
        .transpose()?;
    Ok(
        RelationTask::<PurchaseOrder, String, Inquiry>::new("inquiry", options.include_inquiry)
            .key(|po| po.inquiry_id.clone())
            .fetch(move |ctx, ids| find_nested(ctx, spec.clone(), "iq.id", ids))
            .match_on(|iq| iq.id.clone())
            .attach(|po, mut inquiries| po.inquiry = inquiries.pop())
            .nests(inquiry::ENTITY)
            .into_relation(),
    )
}

const TRACKING_SQL: &str =
    "SELECT t.id, t.purchase_order_id, t.action, t.created_at FROM purchase_order_trackings t";

fn trackings_relation(options: &PurchaseOrderOptions) -> Arc<dyn Relation<PurchaseOrder>> {
    RelationTask::<PurchaseOrder, String, PurchaseOrderTracking>::new(
        "trackings",
        options.include_trackings,
    )
    .key(|po| Some(po.id.clone()))
    .fetch(|ctx, ids| async move {
        find_in(
            &ctx,
            TRACKING_SQL,
            "t.purchase_order_id",
            &ids,
            "t.created_at, t.id",
        )
        .await
    })
    .match_on(|tracking| tracking.purchase_order_id.clone())
    .attach(|po, trackings| po.trackings = trackings)
    .into_relation()
}

fn assignees_relation(options: &PurchaseOrderOptions) -> Arc<dyn Relation<PurchaseOrder>> {
    RelationTask::<PurchaseOrder, String, User>::new("assignees", options.include_assignees)
        .keys(|po| po.assignee_ids.clone())
        .fetch(|ctx, ids| async move { find_in(&ctx, USER_SQL, "u.id", &ids, "u.id").await })
        .match_on(|user| user.id.clone())
        .attach(|po, users| po.assignees = users)
        .into_relation()
}

fn sample_maker_relation(options: &PurchaseOrderOptions) -> Arc<dyn Relation<PurchaseOrder>> {
    RelationTask::<PurchaseOrder, String, User>::new(
        "sample_maker",
        options.include_sample_maker,
    )
    .key(|po| po.sample_maker_id.clone())
    .fetch(|ctx, ids| async move {
        let (in_house, accounts): (Vec<String>, Vec<String>) =
            ids.into_iter().partition(|id| id == IN_HOUSE_SAMPLE_MAKER);
        let mut users: Vec<User> = if accounts.is_empty() {
            Vec::new()
        } else {
            find_in(&ctx, USER_SQL, "u.id", &accounts, "").await?
        };
        if !in_house.is_empty() {
            users.push(User::in_house_sample_room());
        }
        Ok::<_, HydrateError>(users)
    })
    .match_on(|user| user.id.clone())
    .attach(|po, mut users| po.sample_maker = users.pop())
    .into_relation()
}

const INVOICE_SQL: &str = "SELECT inv.invoice_number, inv.total, inv.status FROM invoices inv";

fn invoice_relation(options: &PurchaseOrderOptions) -> Arc<dyn Relation<PurchaseOrder>> {
    RelationTask::<PurchaseOrder, i64, Invoice>::new("invoice", options.include_invoice)
        .key(|po| po.invoice_number)
        .fetch(|ctx, numbers| async move {
            find_in(&ctx, INVOICE_SQL, "inv.invoice_number", &numbers, "").await
        })
        .match_on(|invoice| invoice.invoice_number)
        .attach(|po, mut invoices| po.invoice = invoices.pop())
        .into_relation()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> PurchaseOrderOptions {
        PurchaseOrderOptions {
            role: Role::Admin,
            ..PurchaseOrderOptions::default()
        }
    }

    #[test]
    fn guest_has_no_variant() {
        let err = new_purchase_order_builder(&PurchaseOrderOptions::default()).unwrap_err();
        assert!(matches!(err, HydrateError::ConfigError(_)));
        assert!(err.is_build_time());
    }

    #[test]
    fn buyer_variant_needs_the_caller() {
        let options = PurchaseOrderOptions {
            role: Role::Buyer,
            ..PurchaseOrderOptions::default()
        };
        let err = new_purchase_order_builder(&options).unwrap_err();
        assert!(matches!(err, HydrateError::ConfigError(ref m) if m.contains("user_id")));
    }

    #[test]
    fn staff_join_follows_include_users() {
        let plain = new_purchase_order_builder(&admin()).unwrap();
        assert!(!plain.raw_sql().contains("LEFT JOIN users"));
        assert!(plain.raw_sql().contains("/* purchase_order_builder-Admin */"));

        let joined = new_purchase_order_builder(&PurchaseOrderOptions {
            include_users: true,
            ..admin()
        })
        .unwrap();
        assert!(joined.raw_sql().contains("po.*, u.id AS u__id"));
        assert!(joined.raw_sql().ends_with("LEFT JOIN users u ON u.id = po.user_id"));
    }

    #[test]
    fn staff_count_joins_users_with_the_listing() {
        let plain = new_purchase_order_builder(&admin()).unwrap();
        assert!(!plain.count_sql().unwrap().contains("users"));

        let joined = new_purchase_order_builder(&PurchaseOrderOptions {
            include_users: true,
            ..admin()
        })
        .unwrap();
        assert!(
            joined
                .count_sql()
                .unwrap()
                .ends_with("FROM purchase_orders po LEFT JOIN users u ON u.id = po.user_id")
        );
    }

    #[test]
    fn buyer_listing_hides_internal_note() {
        let spec = new_purchase_order_builder(&PurchaseOrderOptions {
            role: Role::Buyer,
            user_id: Some("buyer-1".into()),
            ..PurchaseOrderOptions::default()
        })
        .unwrap();
        assert!(!spec.raw_sql().contains("internal_note"));
        assert!(!spec.raw_sql().contains("po.*"));
        assert_eq!(spec.order_by(), &["po.created_at DESC", "po.id DESC"]);
    }

    #[test]
    fn include_flags_enable_relations() {
        let spec = new_purchase_order_builder(&PurchaseOrderOptions {
            include_items: true,
            include_invoice: true,
            ..admin()
        })
        .unwrap();
        assert_eq!(spec.enabled_relations(), vec!["items", "invoice"]);
        assert!(new_purchase_order_builder(&admin()).unwrap().enabled_relations().is_empty());
    }

    #[test]
    fn consistent_read_routes_to_primary() {
        let spec = new_purchase_order_builder(&PurchaseOrderOptions {
            consistent_read: true,
            ..admin()
        })
        .unwrap();
        assert_eq!(spec.routing(), Some(crate::types::ReadRouting::Primary));
        assert_eq!(new_purchase_order_builder(&admin()).unwrap().routing(), None);
    }
}
