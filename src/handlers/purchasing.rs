use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::Database,
    middleware::{get_current_user, require_role},
    models::{Grn, GrnItem, PurchaseOrder, PurchaseOrderItem, Supplier},
    utils::next_document_number,
};

/// Indonesian VAT (PPN) applied on GRN subtotals.
fn ppn_rate() -> Decimal {
    Decimal::new(11, 2)
}

// ---------------------------------------------------------------------------
// Suppliers

#[derive(Deserialize)]
pub struct SupplierForm {
    company_name: String,
    contact_person: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    country: Option<String>,
    address: Option<String>,
}

pub async fn list_suppliers(
    cookies: Cookies,
    State(db): State<Database>,
) -> Result<Json<Vec<Supplier>>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["accounts", "warehouse"])?;

    let suppliers = sqlx::query_as::<_, Supplier>(
        "SELECT * FROM suppliers WHERE is_active = true ORDER BY company_name",
    )
    .fetch_all(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(suppliers))
}

pub async fn create_supplier(
    cookies: Cookies,
    State(db): State<Database>,
    Json(form): Json<SupplierForm>,
) -> Result<(StatusCode, Json<Supplier>), StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["accounts", "warehouse"])?;

    let supplier = sqlx::query_as::<_, Supplier>(
        r#"
        INSERT INTO suppliers (company_name, contact_person, email, phone, country, address)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(&form.company_name)
    .bind(&form.contact_person)
    .bind(&form.email)
    .bind(&form.phone)
    .bind(&form.country)
    .bind(&form.address)
    .fetch_one(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((StatusCode::CREATED, Json(supplier)))
}

pub async fn update_supplier(
    cookies: Cookies,
    State(db): State<Database>,
    Path(id): Path<Uuid>,
    Json(form): Json<SupplierForm>,
) -> Result<Json<Supplier>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["accounts", "warehouse"])?;

    let supplier = sqlx::query_as::<_, Supplier>(
        r#"
        UPDATE suppliers SET
            company_name = $2, contact_person = $3, email = $4, phone = $5,
            country = $6, address = $7, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&form.company_name)
    .bind(&form.contact_person)
    .bind(&form.email)
    .bind(&form.phone)
    .bind(&form.country)
    .bind(&form.address)
    .fetch_optional(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(supplier))
}

// ---------------------------------------------------------------------------
// Purchase orders

#[derive(Deserialize)]
pub struct PoItemForm {
    product_id: Uuid,
    description: Option<String>,
    quantity: Decimal,
    unit: Option<String>,
    unit_price: Decimal,
}

#[derive(Deserialize)]
pub struct PoForm {
    supplier_id: Uuid,
    po_date: Option<NaiveDate>,
    currency: Option<String>,
    notes: Option<String>,
    items: Vec<PoItemForm>,
}

#[derive(Deserialize)]
pub struct PoListQuery {
    status: Option<String>,
    supplier_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct PoView {
    #[serde(flatten)]
    pub order: PurchaseOrder,
    pub items: Vec<PurchaseOrderItem>,
}

pub async fn list_purchase_orders(
    cookies: Cookies,
    State(db): State<Database>,
    Query(query): Query<PoListQuery>,
) -> Result<Json<Vec<PurchaseOrder>>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["accounts", "warehouse"])?;

    let orders = sqlx::query_as::<_, PurchaseOrder>(
        r#"
        SELECT * FROM purchase_orders
        WHERE ($1::TEXT IS NULL OR status = $1)
          AND ($2::UUID IS NULL OR supplier_id = $2)
        ORDER BY po_date DESC, po_number DESC
        "#,
    )
    .bind(&query.status)
    .bind(query.supplier_id)
    .fetch_all(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(orders))
}

pub async fn get_purchase_order(
    cookies: Cookies,
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> Result<Json<PoView>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["accounts", "warehouse"])?;

    let order = sqlx::query_as::<_, PurchaseOrder>("SELECT * FROM purchase_orders WHERE id = $1")
        .bind(id)
        .fetch_optional(&db)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let items = sqlx::query_as::<_, PurchaseOrderItem>(
        "SELECT * FROM purchase_order_items WHERE po_id = $1 ORDER BY id",
    )
    .bind(id)
    .fetch_all(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(PoView { order, items }))
}

pub async fn create_purchase_order(
    cookies: Cookies,
    State(db): State<Database>,
    Json(form): Json<PoForm>,
) -> Result<(StatusCode, Json<PoView>), StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["accounts", "warehouse"])?;

    if form.items.is_empty() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    let po_number = next_document_number(&db, "purchase_orders", "po_number", "PO")
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let total: Decimal = form
        .items
        .iter()
        .map(|i| i.quantity * i.unit_price)
        .sum();

    let mut tx = db
        .begin()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let order = sqlx::query_as::<_, PurchaseOrder>(
        r#"
        INSERT INTO purchase_orders (po_number, supplier_id, po_date, status, currency, total_amount, notes, created_by)
        VALUES ($1, $2, COALESCE($3, CURRENT_DATE), 'open', COALESCE($4, 'IDR'), $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(&po_number)
    .bind(form.supplier_id)
    .bind(form.po_date)
    .bind(&form.currency)
    .bind(total)
    .bind(&form.notes)
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        log::error!("failed to create purchase order: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let mut items = Vec::with_capacity(form.items.len());
    for item in &form.items {
        let row = sqlx::query_as::<_, PurchaseOrderItem>(
            r#"
            INSERT INTO purchase_order_items (po_id, product_id, description, quantity, unit, unit_price)
            VALUES ($1, $2, COALESCE($3, ''), $4, COALESCE($5, 'KG'), $6)
            RETURNING *
            "#,
        )
        .bind(order.id)
        .bind(item.product_id)
        .bind(&item.description)
        .bind(item.quantity)
        .bind(&item.unit)
        .bind(item.unit_price)
        .fetch_one(&mut *tx)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        items.push(row);
    }

    tx.commit()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((StatusCode::CREATED, Json(PoView { order, items })))
}

// ---------------------------------------------------------------------------
// Goods receipt notes

#[derive(Deserialize)]
pub struct GrnItemForm {
    po_item_id: Option<Uuid>,
    product_id: Uuid,
    batch_number: Option<String>,
    expiry_date: Option<NaiveDate>,
    manufacture_date: Option<NaiveDate>,
    description: Option<String>,
    quantity_received: Decimal,
    unit: Option<String>,
    unit_cost: Decimal,
    notes: Option<String>,
}

#[derive(Deserialize)]
pub struct GrnForm {
    supplier_id: Uuid,
    po_id: Option<Uuid>,
    grn_date: Option<NaiveDate>,
    supplier_invoice_number: Option<String>,
    supplier_invoice_date: Option<NaiveDate>,
    delivery_note_number: Option<String>,
    received_by: Option<String>,
    currency: Option<String>,
    exchange_rate: Option<Decimal>,
    notes: Option<String>,
    items: Vec<GrnItemForm>,
}

#[derive(Serialize)]
pub struct GrnView {
    #[serde(flatten)]
    pub grn: Grn,
    pub items: Vec<GrnItem>,
}

pub async fn list_grns(
    cookies: Cookies,
    State(db): State<Database>,
) -> Result<Json<Vec<Grn>>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["accounts", "warehouse"])?;

    let grns = sqlx::query_as::<_, Grn>(
        "SELECT * FROM goods_receipt_notes ORDER BY grn_date DESC, grn_number DESC",
    )
    .fetch_all(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(grns))
}

pub async fn get_grn(
    cookies: Cookies,
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> Result<Json<GrnView>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["accounts", "warehouse"])?;

    let grn = sqlx::query_as::<_, Grn>("SELECT * FROM goods_receipt_notes WHERE id = $1")
        .bind(id)
        .fetch_optional(&db)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let items = sqlx::query_as::<_, GrnItem>(
        "SELECT * FROM goods_receipt_items WHERE grn_id = $1 ORDER BY line_number",
    )
    .bind(id)
    .fetch_all(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(GrnView { grn, items }))
}

/// Creates a draft GRN. Line totals, subtotal, PPN and grand total are
/// computed server-side from the submitted quantities and costs.
pub async fn create_grn(
    cookies: Cookies,
    State(db): State<Database>,
    Json(form): Json<GrnForm>,
) -> Result<(StatusCode, Json<GrnView>), StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["warehouse"])?;

    if form.items.is_empty() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    if form.items.iter().any(|i| i.quantity_received <= Decimal::ZERO) {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    let grn_number = next_document_number(&db, "goods_receipt_notes", "grn_number", "GRN")
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let total_quantity: Decimal = form.items.iter().map(|i| i.quantity_received).sum();
    let subtotal: Decimal = form
        .items
        .iter()
        .map(|i| (i.quantity_received * i.unit_cost).round_dp(2))
        .sum();
    let tax_amount = (subtotal * ppn_rate()).round_dp(2);
    let total_amount = subtotal + tax_amount;

    let mut tx = db
        .begin()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let grn = sqlx::query_as::<_, Grn>(
        r#"
        INSERT INTO goods_receipt_notes (
            grn_number, grn_date, supplier_id, po_id, supplier_invoice_number,
            supplier_invoice_date, delivery_note_number, received_by, currency,
            exchange_rate, total_quantity, subtotal, tax_amount, total_amount,
            status, notes, created_by
        )
        VALUES ($1, COALESCE($2, CURRENT_DATE), $3, $4, $5, $6, $7, $8,
                COALESCE($9, 'IDR'), COALESCE($10, 1), $11, $12, $13, $14,
                'draft', $15, $16)
        RETURNING *
        "#,
    )
    .bind(&grn_number)
    .bind(form.grn_date)
    .bind(form.supplier_id)
    .bind(form.po_id)
    .bind(&form.supplier_invoice_number)
    .bind(form.supplier_invoice_date)
    .bind(&form.delivery_note_number)
    .bind(&form.received_by)
    .bind(&form.currency)
    .bind(form.exchange_rate)
    .bind(total_quantity)
    .bind(subtotal)
    .bind(tax_amount)
    .bind(total_amount)
    .bind(&form.notes)
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        log::error!("failed to create GRN: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let mut items = Vec::with_capacity(form.items.len());
    for (index, item) in form.items.iter().enumerate() {
        let line_total = (item.quantity_received * item.unit_cost).round_dp(2);
        let row = sqlx::query_as::<_, GrnItem>(
            r#"
            INSERT INTO goods_receipt_items (
                grn_id, line_number, po_item_id, product_id, batch_number,
                expiry_date, manufacture_date, description, quantity_received,
                unit, unit_cost, line_total, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, COALESCE($8, ''), $9,
                    COALESCE($10, 'KG'), $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(grn.id)
        .bind((index + 1) as i32)
        .bind(item.po_item_id)
        .bind(item.product_id)
        .bind(&item.batch_number)
        .bind(item.expiry_date)
        .bind(item.manufacture_date)
        .bind(&item.description)
        .bind(item.quantity_received)
        .bind(&item.unit)
        .bind(item.unit_cost)
        .bind(line_total)
        .bind(&item.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        items.push(row);
    }

    tx.commit()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((StatusCode::CREATED, Json(GrnView { grn, items })))
}

/// Posts a draft GRN: creates one stock batch per line, bumps the received
/// quantity on any linked PO items, and stamps the GRN posted. Runs in a
/// single transaction and only ever fires once per GRN.
pub async fn post_grn(
    cookies: Cookies,
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> Result<Json<Grn>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["warehouse"])?;

    let mut tx = db
        .begin()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    // Row lock so two concurrent posts cannot both see 'draft'.
    let grn = sqlx::query_as::<_, Grn>(
        "SELECT * FROM goods_receipt_notes WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .ok_or(StatusCode::NOT_FOUND)?;

    if grn.status != "draft" {
        return Err(StatusCode::CONFLICT);
    }

    let items = sqlx::query_as::<_, GrnItem>(
        "SELECT * FROM goods_receipt_items WHERE grn_id = $1 ORDER BY line_number",
    )
    .bind(id)
    .fetch_all(&mut *tx)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    for item in &items {
        let batch_number = item
            .batch_number
            .clone()
            .unwrap_or_else(|| format!("{}-L{}", grn.grn_number, item.line_number));

        sqlx::query(
            r#"
            INSERT INTO batches (
                batch_number, product_id, grn_item_id, quantity_received,
                quantity_available, unit, unit_cost, expiry_date, manufacture_date
            )
            VALUES ($1, $2, $3, $4, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&batch_number)
        .bind(item.product_id)
        .bind(item.id)
        .bind(item.quantity_received)
        .bind(&item.unit)
        .bind(item.unit_cost)
        .bind(item.expiry_date)
        .bind(item.manufacture_date)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            log::error!("failed to create batch for GRN {}: {}", grn.grn_number, e);
            StatusCode::CONFLICT
        })?;

        if let Some(po_item_id) = item.po_item_id {
            sqlx::query(
                "UPDATE purchase_order_items SET quantity_received = quantity_received + $2 WHERE id = $1",
            )
            .bind(po_item_id)
            .bind(item.quantity_received)
            .execute(&mut *tx)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        }
    }

    // Close out the PO once every line is fully received.
    if let Some(po_id) = grn.po_id {
        sqlx::query(
            r#"
            UPDATE purchase_orders SET status = 'received'
            WHERE id = $1 AND NOT EXISTS (
                SELECT 1 FROM purchase_order_items
                WHERE po_id = $1 AND quantity_received < quantity
            )
            "#,
        )
        .bind(po_id)
        .execute(&mut *tx)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    }

    let posted = sqlx::query_as::<_, Grn>(
        "UPDATE goods_receipt_notes SET status = 'posted', posted_at = $2 WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    tx.commit()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(posted))
}

/// Drafts can be discarded; posted GRNs are permanent.
pub async fn delete_grn(
    cookies: Cookies,
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["warehouse"])?;

    let result = sqlx::query("DELETE FROM goods_receipt_notes WHERE id = $1 AND status = 'draft'")
        .bind(id)
        .execute(&db)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if result.rows_affected() == 0 {
        let exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM goods_receipt_notes WHERE id = $1")
                .bind(id)
                .fetch_optional(&db)
                .await
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        return Err(if exists.is_some() {
            StatusCode::CONFLICT
        } else {
            StatusCode::NOT_FOUND
        });
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ppn_is_eleven_percent() {
        let subtotal = Decimal::new(1_000_000, 0);
        assert_eq!(subtotal * ppn_rate(), Decimal::new(110_000, 0));
    }
}
