use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::Database,
    middleware::{get_current_user, require_role},
    models::Payment,
};

#[derive(Deserialize)]
pub struct PaymentForm {
    invoice_id: Uuid,
    payment_date: Option<NaiveDate>,
    amount: Decimal,
    method: Option<String>,
    reference: Option<String>,
    notes: Option<String>,
}

/// Outstanding balance per customer across unpaid invoices.
#[derive(Debug, Serialize, FromRow)]
pub struct ReceivableRow {
    pub customer_id: Uuid,
    pub company_name: String,
    pub invoice_count: i64,
    pub total_invoiced: Decimal,
    pub total_paid: Decimal,
    pub balance: Decimal,
}

pub async fn list_payments(
    cookies: Cookies,
    State(db): State<Database>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Vec<Payment>>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["accounts", "sales"])?;

    let payments = sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments WHERE invoice_id = $1 ORDER BY payment_date, created_at",
    )
    .bind(invoice_id)
    .fetch_all(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(payments))
}

/// Records a payment against an invoice. When cumulative payments reach the
/// invoice total the invoice flips to 'paid', otherwise to 'partially_paid'.
pub async fn record_payment(
    cookies: Cookies,
    State(db): State<Database>,
    Json(form): Json<PaymentForm>,
) -> Result<(StatusCode, Json<Payment>), StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["accounts"])?;

    if form.amount <= Decimal::ZERO {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    let mut tx = db
        .begin()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let invoice: Option<(Decimal, String)> = sqlx::query_as(
        "SELECT total_amount, status FROM sales_invoices WHERE id = $1 FOR UPDATE",
    )
    .bind(form.invoice_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let (total_amount, status) = invoice.ok_or(StatusCode::NOT_FOUND)?;
    if status == "cancelled" {
        return Err(StatusCode::CONFLICT);
    }

    let payment = sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments (invoice_id, payment_date, amount, method, reference, notes, created_by)
        VALUES ($1, COALESCE($2, CURRENT_DATE), $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(form.invoice_id)
    .bind(form.payment_date)
    .bind(form.amount)
    .bind(&form.method)
    .bind(&form.reference)
    .bind(&form.notes)
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        log::error!("failed to record payment: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let paid: Decimal = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE invoice_id = $1",
    )
    .bind(form.invoice_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let new_status = if paid >= total_amount {
        "paid"
    } else {
        "partially_paid"
    };
    sqlx::query("UPDATE sales_invoices SET status = $2 WHERE id = $1")
        .bind(form.invoice_id)
        .bind(new_status)
        .execute(&mut *tx)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    tx.commit()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn receivables(
    cookies: Cookies,
    State(db): State<Database>,
) -> Result<Json<Vec<ReceivableRow>>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["accounts"])?;

    let rows = sqlx::query_as::<_, ReceivableRow>(
        r#"
        SELECT c.id AS customer_id, c.company_name,
               COUNT(i.id) AS invoice_count,
               COALESCE(SUM(i.total_amount), 0) AS total_invoiced,
               COALESCE(SUM(p.paid), 0) AS total_paid,
               COALESCE(SUM(i.total_amount), 0) - COALESCE(SUM(p.paid), 0) AS balance
        FROM customers c
        JOIN sales_invoices i ON i.customer_id = c.id AND i.status NOT IN ('paid', 'cancelled')
        LEFT JOIN (
            SELECT invoice_id, SUM(amount) AS paid FROM payments GROUP BY invoice_id
        ) p ON p.invoice_id = i.id
        GROUP BY c.id, c.company_name
        HAVING COALESCE(SUM(i.total_amount), 0) - COALESCE(SUM(p.paid), 0) > 0
        ORDER BY balance DESC
        "#,
    )
    .fetch_all(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(rows))
}
