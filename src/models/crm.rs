use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct CrmContact {
    pub id: Uuid,
    pub company_name: String,
    pub company_type: Option<String>,
    pub industry: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub address: Option<String>,
    pub website: Option<String>,
    pub contact_person: Option<String>,
    pub designation: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub mobile: Option<String>,
    pub customer_type: String,
    pub tags: Option<Vec<String>>,
    pub first_contact_date: Option<NaiveDate>,
    pub last_contact_date: Option<NaiveDate>,
    pub total_inquiries: i32,
    pub total_orders: i32,
    pub lifetime_value: Decimal,
    pub notes: Option<String>,
    pub is_active: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct Inquiry {
    pub id: Uuid,
    pub inquiry_number: String,
    pub inquiry_date: NaiveDate,
    pub product_name: String,
    pub specification: Option<String>,
    pub quantity: String,
    pub supplier_name: Option<String>,
    pub supplier_country: Option<String>,
    pub company_name: String,
    pub contact_person: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub email_subject: Option<String>,
    pub status: String,
    pub priority: String,
    pub coa_sent: bool,
    pub msds_sent: bool,
    pub sample_sent: bool,
    pub price_quoted: bool,
    pub delivery_date_expected: Option<NaiveDate>,
    pub ai_confidence_score: f32,
    pub source: String,
    pub source_email_id: Option<Uuid>,
    pub remarks: Option<String>,
    pub assigned_to: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct Activity {
    pub id: Uuid,
    pub inquiry_id: Uuid,
    pub activity_type: String,
    pub description: Option<String>,
    pub activity_date: NaiveDate,
    pub follow_up_date: Option<NaiveDate>,
    pub is_completed: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct Reminder {
    pub id: Uuid,
    pub inquiry_id: Uuid,
    pub reminder_type: String,
    pub title: String,
    pub due_date: DateTime<Utc>,
    pub is_completed: bool,
    pub assigned_to: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct EmailInboxRow {
    pub id: Uuid,
    pub gmail_connection_id: Uuid,
    pub gmail_message_id: String,
    pub gmail_thread_id: Option<String>,
    pub subject: String,
    pub from_email: String,
    pub from_name: Option<String>,
    pub body_text: String,
    pub received_at: DateTime<Utc>,
    pub is_processed: bool,
    pub is_inquiry: bool,
    pub converted_to_inquiry: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GmailConnection {
    pub id: Uuid,
    pub user_id: Uuid,
    pub email_address: String,
    pub access_token: String,
    pub refresh_token: String,
    pub access_token_expires_at: Option<DateTime<Utc>>,
    pub is_connected: bool,
    pub sync_enabled: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
