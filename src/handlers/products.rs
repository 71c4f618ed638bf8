use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::Database,
    middleware::{get_current_user, require_role},
    models::Product,
};

#[derive(Deserialize)]
pub struct ProductListQuery {
    #[serde(default)]
    include_inactive: bool,
}

#[derive(Deserialize)]
pub struct ProductForm {
    product_name: String,
    product_code: String,
    generic_name: Option<String>,
    category: Option<String>,
    unit: Option<String>,
    pack_size: Option<String>,
    default_purchase_price: Option<Decimal>,
    default_selling_price: Option<Decimal>,
    notes: Option<String>,
}

pub async fn list(
    cookies: Cookies,
    State(db): State<Database>,
    Query(query): Query<ProductListQuery>,
) -> Result<Json<Vec<Product>>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales", "warehouse"])?;

    let sql = if query.include_inactive {
        "SELECT * FROM products ORDER BY product_name"
    } else {
        "SELECT * FROM products WHERE is_active = true ORDER BY product_name"
    };

    let products = sqlx::query_as::<_, Product>(sql)
        .fetch_all(&db)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(products))
}

pub async fn get(
    cookies: Cookies,
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> Result<Json<Product>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales", "warehouse"])?;

    let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
        .bind(id)
        .fetch_optional(&db)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(product))
}

pub async fn create(
    cookies: Cookies,
    State(db): State<Database>,
    Json(form): Json<ProductForm>,
) -> Result<(StatusCode, Json<Product>), StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["warehouse"])?;

    let product = sqlx::query_as::<_, Product>(
        r#"
        INSERT INTO products (
            product_name, product_code, generic_name, category, unit,
            pack_size, default_purchase_price, default_selling_price, notes, created_by
        )
        VALUES ($1, $2, $3, $4, COALESCE($5, 'KG'), $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(&form.product_name)
    .bind(&form.product_code)
    .bind(&form.generic_name)
    .bind(&form.category)
    .bind(&form.unit)
    .bind(&form.pack_size)
    .bind(form.default_purchase_price)
    .bind(form.default_selling_price)
    .bind(&form.notes)
    .bind(user.id)
    .fetch_one(&db)
    .await
    .map_err(|e| {
        log::error!("failed to create product: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn update(
    cookies: Cookies,
    State(db): State<Database>,
    Path(id): Path<Uuid>,
    Json(form): Json<ProductForm>,
) -> Result<Json<Product>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["warehouse"])?;

    let product = sqlx::query_as::<_, Product>(
        r#"
        UPDATE products SET
            product_name = $2, product_code = $3, generic_name = $4, category = $5,
            unit = COALESCE($6, unit), pack_size = $7, default_purchase_price = $8,
            default_selling_price = $9, notes = $10, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&form.product_name)
    .bind(&form.product_code)
    .bind(&form.generic_name)
    .bind(&form.category)
    .bind(&form.unit)
    .bind(&form.pack_size)
    .bind(form.default_purchase_price)
    .bind(form.default_selling_price)
    .bind(&form.notes)
    .fetch_optional(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(product))
}

// Products referenced by batches or documents are deactivated, not removed
pub async fn deactivate(
    cookies: Cookies,
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["warehouse"])?;

    let result = sqlx::query("UPDATE products SET is_active = false, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(&db)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if result.rows_affected() == 0 {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(StatusCode::NO_CONTENT)
}
