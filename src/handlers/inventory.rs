use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::Database,
    middleware::{get_current_user, require_role},
    models::{Batch, StockRow},
};

#[derive(Deserialize)]
pub struct BatchListQuery {
    product_id: Option<Uuid>,
    #[serde(default)]
    include_empty: bool,
}

#[derive(Deserialize)]
pub struct ExpiryQuery {
    /// Window in days, defaults to 90.
    days: Option<i64>,
}

#[derive(Deserialize)]
pub struct BatchCreateForm {
    batch_number: String,
    product_id: Uuid,
    quantity_received: Decimal,
    unit: Option<String>,
    unit_cost: Option<Decimal>,
    expiry_date: Option<chrono::NaiveDate>,
    manufacture_date: Option<chrono::NaiveDate>,
}

#[derive(Deserialize)]
pub struct BatchAdjustForm {
    quantity_available: Option<Decimal>,
    expiry_date: Option<chrono::NaiveDate>,
    manufacture_date: Option<chrono::NaiveDate>,
}

/// Stock position per product, aggregated over batches with quantity left.
pub async fn stock(
    cookies: Cookies,
    State(db): State<Database>,
) -> Result<Json<Vec<StockRow>>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales", "warehouse"])?;

    let rows = sqlx::query_as::<_, StockRow>(
        r#"
        SELECT p.id AS product_id, p.product_name, p.product_code, p.unit,
               COUNT(b.id) AS batch_count,
               COALESCE(SUM(b.quantity_available), 0) AS quantity_available,
               MIN(b.expiry_date) FILTER (WHERE b.quantity_available > 0) AS nearest_expiry
        FROM products p
        LEFT JOIN batches b ON b.product_id = p.id AND b.quantity_available > 0
        WHERE p.is_active = true
        GROUP BY p.id, p.product_name, p.product_code, p.unit
        ORDER BY p.product_name
        "#,
    )
    .fetch_all(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(rows))
}

pub async fn list_batches(
    cookies: Cookies,
    State(db): State<Database>,
    Query(query): Query<BatchListQuery>,
) -> Result<Json<Vec<Batch>>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales", "warehouse"])?;

    let mut sql = String::from("SELECT * FROM batches WHERE 1 = 1");
    if query.product_id.is_some() {
        sql.push_str(" AND product_id = $1");
    }
    if !query.include_empty {
        sql.push_str(" AND quantity_available > 0");
    }
    sql.push_str(" ORDER BY expiry_date NULLS LAST, created_at");

    let mut q = sqlx::query_as::<_, Batch>(&sql);
    if let Some(product_id) = query.product_id {
        q = q.bind(product_id);
    }

    let batches = q
        .fetch_all(&db)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(batches))
}

pub async fn get_batch(
    cookies: Cookies,
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> Result<Json<Batch>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales", "warehouse"])?;

    let batch = sqlx::query_as::<_, Batch>("SELECT * FROM batches WHERE id = $1")
        .bind(id)
        .fetch_optional(&db)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(batch))
}

/// Manual stock entry for goods that arrived without a GRN (opening stock,
/// returns). GRN posting is the usual way batches come into being.
pub async fn create_batch(
    cookies: Cookies,
    State(db): State<Database>,
    Json(form): Json<BatchCreateForm>,
) -> Result<(StatusCode, Json<Batch>), StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["warehouse"])?;

    if form.quantity_received <= Decimal::ZERO || form.batch_number.trim().is_empty() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    let batch = sqlx::query_as::<_, Batch>(
        r#"
        INSERT INTO batches (
            batch_number, product_id, quantity_received, quantity_available,
            unit, unit_cost, expiry_date, manufacture_date
        )
        VALUES ($1, $2, $3, $3, COALESCE($4, 'KG'), COALESCE($5, 0), $6, $7)
        RETURNING *
        "#,
    )
    .bind(form.batch_number.trim())
    .bind(form.product_id)
    .bind(form.quantity_received)
    .bind(&form.unit)
    .bind(form.unit_cost)
    .bind(form.expiry_date)
    .bind(form.manufacture_date)
    .fetch_one(&db)
    .await
    .map_err(|e| {
        log::error!("failed to create batch: {}", e);
        StatusCode::CONFLICT
    })?;

    Ok((StatusCode::CREATED, Json(batch)))
}

/// Batches expiring inside the window, soonest first.
pub async fn expiring_soon(
    cookies: Cookies,
    State(db): State<Database>,
    Query(query): Query<ExpiryQuery>,
) -> Result<Json<Vec<Batch>>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales", "warehouse"])?;

    let cutoff = (Utc::now() + Duration::days(query.days.unwrap_or(90))).date_naive();

    let batches = sqlx::query_as::<_, Batch>(
        r#"
        SELECT * FROM batches
        WHERE quantity_available > 0 AND expiry_date IS NOT NULL AND expiry_date <= $1
        ORDER BY expiry_date
        "#,
    )
    .bind(cutoff)
    .fetch_all(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(batches))
}

/// Manual correction of a batch (stock counts, expiry fixes). Quantity can
/// only be set to a non-negative value and never above quantity_received.
pub async fn adjust_batch(
    cookies: Cookies,
    State(db): State<Database>,
    Path(id): Path<Uuid>,
    Json(form): Json<BatchAdjustForm>,
) -> Result<Json<Batch>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["warehouse"])?;

    if let Some(qty) = form.quantity_available {
        if qty < Decimal::ZERO {
            return Err(StatusCode::UNPROCESSABLE_ENTITY);
        }
    }

    let batch = sqlx::query_as::<_, Batch>(
        r#"
        UPDATE batches SET
            quantity_available = LEAST(COALESCE($2, quantity_available), quantity_received),
            expiry_date = COALESCE($3, expiry_date),
            manufacture_date = COALESCE($4, manufacture_date)
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(form.quantity_available)
    .bind(form.expiry_date)
    .bind(form.manufacture_date)
    .fetch_optional(&db)
    .await
    .map_err(|e| {
        log::error!("failed to adjust batch {}: {}", id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(batch))
}
