use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct Batch {
    pub id: Uuid,
    pub batch_number: String,
    pub product_id: Uuid,
    pub grn_item_id: Option<Uuid>,
    pub quantity_received: Decimal,
    pub quantity_available: Decimal,
    pub unit: String,
    pub unit_cost: Decimal,
    pub expiry_date: Option<NaiveDate>,
    pub manufacture_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

/// Per-product stock position aggregated over available batch quantity.
#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct StockRow {
    pub product_id: Uuid,
    pub product_name: String,
    pub product_code: String,
    pub unit: String,
    pub batch_count: i64,
    pub quantity_available: Decimal,
    pub nearest_expiry: Option<NaiveDate>,
}
