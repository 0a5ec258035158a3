use chrono::NaiveDateTime;
use serde::Serialize;

use crate::decode::{FromRow, RowView};
use crate::error::HydrateError;

/// Sample maker id meaning the in-house sample room rather than a seller account.
pub const IN_HOUSE_SAMPLE_MAKER: &str = "inflow";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
}

impl User {
    #[must_use]
    pub fn in_house_sample_room() -> Self {
        Self {
            id: IN_HOUSE_SAMPLE_MAKER.to_string(),
            name: "Inflow Sample Room".to_string(),
            ..Self::default()
        }
    }
}

impl FromRow for User {
    fn from_row(row: &RowView<'_>) -> Result<Self, HydrateError> {
        Ok(Self {
            id: row.text("id")?,
            name: row.text_or_default("name")?,
            email: row.opt_text("email")?,
            company_name: row.opt_text("company_name")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Address {
    pub id: String,
    pub user_id: String,
    pub line1: String,
    pub city: String,
    pub country_code: String,
}

impl FromRow for Address {
    fn from_row(row: &RowView<'_>) -> Result<Self, HydrateError> {
        Ok(Self {
            id: row.text("id")?,
            user_id: row.text_or_default("user_id")?,
            line1: row.text_or_default("line1")?,
            city: row.text_or_default("city")?,
            country_code: row.text_or_default("country_code")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inquiry {
    pub id: String,
    pub reference_id: String,
    pub title: String,
    pub user_id: String,
    pub shipping_address_id: Option<String>,
    pub status: String,
    pub created_at: NaiveDateTime,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<Address>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub purchase_orders: Vec<PurchaseOrder>,
}

impl FromRow for Inquiry {
    fn from_row(row: &RowView<'_>) -> Result<Self, HydrateError> {
        Ok(Self {
            id: row.text("id")?,
            reference_id: row.text("reference_id")?,
            title: row.text_or_default("title")?,
            user_id: row.text("user_id")?,
            shipping_address_id: row.opt_text("shipping_address_id")?.filter(|s| !s.is_empty()),
            status: row.text_or_default("status")?,
            created_at: row.timestamp("created_at")?,
            user: None,
            shipping_address: None,
            purchase_orders: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PurchaseOrderItem {
    pub id: String,
    pub purchase_order_id: String,
    pub sku: String,
    pub quantity: i64,
    pub unit_price: f64,
}

impl FromRow for PurchaseOrderItem {
    fn from_row(row: &RowView<'_>) -> Result<Self, HydrateError> {
        Ok(Self {
            id: row.text("id")?,
            purchase_order_id: row.text("purchase_order_id")?,
            sku: row.text_or_default("sku")?,
            quantity: row.int("quantity")?,
            unit_price: row.float("unit_price")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchaseOrderTracking {
    pub id: String,
    pub purchase_order_id: String,
    pub action: String,
    pub created_at: NaiveDateTime,
}

impl FromRow for PurchaseOrderTracking {
    fn from_row(row: &RowView<'_>) -> Result<Self, HydrateError> {
        Ok(Self {
            id: row.text("id")?,
            purchase_order_id: row.text("purchase_order_id")?,
            action: row.text_or_default("action")?,
            created_at: row.timestamp("created_at")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invoice {
    pub invoice_number: i64,
    pub total: f64,
    pub status: String,
}

impl FromRow for Invoice {
    fn from_row(row: &RowView<'_>) -> Result<Self, HydrateError> {
        Ok(Self {
            invoice_number: row.int("invoice_number")?,
            total: row.float("total")?,
            status: row.text_or_default("status")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchaseOrder {
    pub id: String,
    pub reference_id: String,
    pub inquiry_id: Option<String>,
    pub user_id: String,
    pub sample_maker_id: Option<String>,
    pub assignee_ids: Vec<String>,
    pub invoice_number: Option<i64>,
    pub status: String,
    pub total_amount: f64,
    /// Staff-only; never selected for buyers and sellers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_note: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inquiry: Option<Inquiry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<PurchaseOrderItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trackings: Vec<PurchaseOrderTracking>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_maker: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice: Option<Invoice>,
}

/// Flattened decode target for the purchase-order listing: the order's own columns plus the
/// buyer joined under the `u__` prefix.
#[derive(Debug)]
pub struct PurchaseOrderAlias {
    pub order: PurchaseOrder,
    pub user: Option<User>,
}

impl FromRow for PurchaseOrderAlias {
    fn from_row(row: &RowView<'_>) -> Result<Self, HydrateError> {
        let sample_maker_id = row.opt_text("sample_maker_id")?.filter(|s| !s.is_empty());
        let order = PurchaseOrder {
            id: row.text("id")?,
            reference_id: row.text("reference_id")?,
            inquiry_id: row.opt_text("inquiry_id")?.filter(|s| !s.is_empty()),
            user_id: row.text("user_id")?,
            sample_maker_id,
            assignee_ids: row.json("assignee_ids")?,
            invoice_number: row.opt_int("invoice_number")?.filter(|n| *n > 0),
            status: row.text_or_default("status")?,
            total_amount: row.float("total_amount")?,
            internal_note: row.opt_text("internal_note")?,
            created_at: row.timestamp("created_at")?,
            updated_at: row.timestamp("updated_at")?,
            user: None,
            inquiry: None,
            items: Vec::new(),
            trackings: Vec::new(),
            assignees: Vec::new(),
            sample_maker: None,
            invoice: None,
        };
        Ok(Self {
            order,
            user: row.embedded("u__")?,
        })
    }
}

impl From<PurchaseOrderAlias> for PurchaseOrder {
    fn from(alias: PurchaseOrderAlias) -> Self {
        PurchaseOrder {
            user: alias.user,
            ..alias.order
        }
    }
}
