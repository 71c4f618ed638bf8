use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct Supplier {
    pub id: Uuid,
    pub company_name: String,
    pub contact_person: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub country: Option<String>,
    pub address: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct PurchaseOrder {
    pub id: Uuid,
    pub po_number: String,
    pub supplier_id: Uuid,
    pub po_date: NaiveDate,
    pub status: String,
    pub currency: String,
    pub total_amount: Decimal,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct PurchaseOrderItem {
    pub id: Uuid,
    pub po_id: Uuid,
    pub product_id: Uuid,
    pub description: String,
    pub quantity: Decimal,
    pub quantity_received: Decimal,
    pub unit: String,
    pub unit_price: Decimal,
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct Grn {
    pub id: Uuid,
    pub grn_number: String,
    pub grn_date: NaiveDate,
    pub supplier_id: Uuid,
    pub po_id: Option<Uuid>,
    pub supplier_invoice_number: Option<String>,
    pub supplier_invoice_date: Option<NaiveDate>,
    pub delivery_note_number: Option<String>,
    pub received_by: Option<String>,
    pub currency: String,
    pub exchange_rate: Decimal,
    pub total_quantity: Decimal,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub status: String,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct GrnItem {
    pub id: Uuid,
    pub grn_id: Uuid,
    pub line_number: i32,
    pub po_item_id: Option<Uuid>,
    pub product_id: Uuid,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub manufacture_date: Option<NaiveDate>,
    pub description: String,
    pub quantity_received: Decimal,
    pub unit: String,
    pub unit_cost: Decimal,
    pub line_total: Decimal,
    pub notes: Option<String>,
}
