pub mod auth;
pub mod crm;
pub mod email;
pub mod finance;
pub mod inventory;
pub mod products;
pub mod purchasing;
pub mod sales;

use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use tower_cookies::Cookies;

use crate::{database::Database, middleware::get_current_user};

#[derive(Serialize)]
pub struct DashboardResponse {
    pub user_name: String,
    pub role: String,
    pub product_count: i64,
    pub customer_count: i64,
    pub open_inquiry_count: i64,
    pub pending_reminder_count: i64,
    pub draft_grn_count: i64,
}

pub async fn dashboard(
    cookies: Cookies,
    State(db): State<Database>,
) -> Result<Json<DashboardResponse>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let product_count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM products WHERE is_active = true")
            .fetch_one(&db)
            .await
            .unwrap_or(0);

    let customer_count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM customers WHERE is_active = true")
            .fetch_one(&db)
            .await
            .unwrap_or(0);

    let open_inquiry_count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM crm_inquiries WHERE status NOT IN ('won', 'lost')",
    )
    .fetch_one(&db)
    .await
    .unwrap_or(0);

    let pending_reminder_count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM crm_reminders WHERE NOT is_completed AND assigned_to = $1",
    )
    .bind(user.id)
    .fetch_one(&db)
    .await
    .unwrap_or(0);

    let draft_grn_count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM goods_receipt_notes WHERE status = 'draft'",
    )
    .fetch_one(&db)
    .await
    .unwrap_or(0);

    Ok(Json(DashboardResponse {
        user_name: user.full_name.clone(),
        role: user.role.clone(),
        product_count,
        customer_count,
        open_inquiry_count,
        pending_reminder_count,
        draft_grn_count,
    }))
}
