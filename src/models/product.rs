use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub product_name: String,
    pub product_code: String,
    pub generic_name: Option<String>,
    pub category: Option<String>,
    pub unit: String,
    pub pack_size: Option<String>,
    pub default_purchase_price: Option<Decimal>,
    pub default_selling_price: Option<Decimal>,
    pub is_active: bool,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
