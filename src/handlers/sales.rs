use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::Database,
    middleware::{get_current_user, require_role},
    models::{
        Customer, DeliveryChallan, DeliveryChallanItem, SalesInvoice, SalesInvoiceItem,
    },
    utils::next_document_number,
};

// ---------------------------------------------------------------------------
// Customers

#[derive(Deserialize)]
pub struct CustomerForm {
    company_name: String,
    contact_person: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    country: Option<String>,
    city: Option<String>,
    address: Option<String>,
    tax_id: Option<String>,
    payment_terms: Option<String>,
    notes: Option<String>,
}

pub async fn list_customers(
    cookies: Cookies,
    State(db): State<Database>,
) -> Result<Json<Vec<Customer>>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales", "accounts"])?;

    let customers = sqlx::query_as::<_, Customer>(
        "SELECT * FROM customers WHERE is_active = true ORDER BY company_name",
    )
    .fetch_all(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(customers))
}

pub async fn create_customer(
    cookies: Cookies,
    State(db): State<Database>,
    Json(form): Json<CustomerForm>,
) -> Result<(StatusCode, Json<Customer>), StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales", "accounts"])?;

    let customer = sqlx::query_as::<_, Customer>(
        r#"
        INSERT INTO customers (
            company_name, contact_person, email, phone, country, city,
            address, tax_id, payment_terms, notes
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(&form.company_name)
    .bind(&form.contact_person)
    .bind(&form.email)
    .bind(&form.phone)
    .bind(&form.country)
    .bind(&form.city)
    .bind(&form.address)
    .bind(&form.tax_id)
    .bind(&form.payment_terms)
    .bind(&form.notes)
    .fetch_one(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((StatusCode::CREATED, Json(customer)))
}

pub async fn update_customer(
    cookies: Cookies,
    State(db): State<Database>,
    Path(id): Path<Uuid>,
    Json(form): Json<CustomerForm>,
) -> Result<Json<Customer>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales", "accounts"])?;

    let customer = sqlx::query_as::<_, Customer>(
        r#"
        UPDATE customers SET
            company_name = $2, contact_person = $3, email = $4, phone = $5,
            country = $6, city = $7, address = $8, tax_id = $9,
            payment_terms = $10, notes = $11, updated_at = NOW()
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
    .bind(&form.city)
    .bind(&form.address)
    .bind(&form.tax_id)
    .bind(&form.payment_terms)
    .bind(&form.notes)
    .fetch_optional(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(customer))
}

// ---------------------------------------------------------------------------
// Sales invoices

#[derive(Deserialize)]
pub struct InvoiceItemForm {
    product_id: Uuid,
    description: Option<String>,
    quantity: Decimal,
    unit: Option<String>,
    unit_price: Decimal,
}

#[derive(Deserialize)]
pub struct InvoiceForm {
    customer_id: Uuid,
    invoice_date: Option<NaiveDate>,
    currency: Option<String>,
    due_date: Option<NaiveDate>,
    tax_rate_percent: Option<Decimal>,
    notes: Option<String>,
    items: Vec<InvoiceItemForm>,
}

#[derive(Deserialize)]
pub struct InvoiceListQuery {
    status: Option<String>,
    customer_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct InvoiceView {
    #[serde(flatten)]
    pub invoice: SalesInvoice,
    pub items: Vec<SalesInvoiceItem>,
}

pub async fn list_invoices(
    cookies: Cookies,
    State(db): State<Database>,
    Query(query): Query<InvoiceListQuery>,
) -> Result<Json<Vec<SalesInvoice>>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales", "accounts"])?;

    let invoices = sqlx::query_as::<_, SalesInvoice>(
        r#"
        SELECT * FROM sales_invoices
        WHERE ($1::TEXT IS NULL OR status = $1)
          AND ($2::UUID IS NULL OR customer_id = $2)
        ORDER BY invoice_date DESC, invoice_number DESC
        "#,
    )
    .bind(&query.status)
    .bind(query.customer_id)
    .fetch_all(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(invoices))
}

pub async fn get_invoice(
    cookies: Cookies,
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> Result<Json<InvoiceView>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales", "accounts"])?;

    let invoice = sqlx::query_as::<_, SalesInvoice>("SELECT * FROM sales_invoices WHERE id = $1")
        .bind(id)
        .fetch_optional(&db)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let items = sqlx::query_as::<_, SalesInvoiceItem>(
        "SELECT * FROM sales_invoice_items WHERE invoice_id = $1 ORDER BY line_number",
    )
    .bind(id)
    .fetch_all(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(InvoiceView { invoice, items }))
}

/// Creates an invoice in 'issued' status. Totals are computed server-side;
/// tax defaults to 11% (PPN) unless the form overrides the rate.
pub async fn create_invoice(
    cookies: Cookies,
    State(db): State<Database>,
    Json(form): Json<InvoiceForm>,
) -> Result<(StatusCode, Json<InvoiceView>), StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales", "accounts"])?;

    if form.items.is_empty() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    if form.items.iter().any(|i| i.quantity <= Decimal::ZERO) {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    let invoice_number = next_document_number(&db, "sales_invoices", "invoice_number", "INV")
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let subtotal: Decimal = form
        .items
        .iter()
        .map(|i| (i.quantity * i.unit_price).round_dp(2))
        .sum();
    let tax_rate = form.tax_rate_percent.unwrap_or(Decimal::new(11, 0));
    let tax_amount = (subtotal * tax_rate / Decimal::new(100, 0)).round_dp(2);
    let total_amount = subtotal + tax_amount;

    let mut tx = db
        .begin()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let invoice = sqlx::query_as::<_, SalesInvoice>(
        r#"
        INSERT INTO sales_invoices (
            invoice_number, invoice_date, customer_id, currency, subtotal,
            tax_amount, total_amount, status, due_date, notes, created_by
        )
        VALUES ($1, COALESCE($2, CURRENT_DATE), $3, COALESCE($4, 'IDR'),
                $5, $6, $7, 'issued', $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(&invoice_number)
    .bind(form.invoice_date)
    .bind(form.customer_id)
    .bind(&form.currency)
    .bind(subtotal)
    .bind(tax_amount)
    .bind(total_amount)
    .bind(form.due_date)
    .bind(&form.notes)
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        log::error!("failed to create invoice: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let mut items = Vec::with_capacity(form.items.len());
    for (index, item) in form.items.iter().enumerate() {
        let line_total = (item.quantity * item.unit_price).round_dp(2);
        let row = sqlx::query_as::<_, SalesInvoiceItem>(
            r#"
            INSERT INTO sales_invoice_items (
                invoice_id, line_number, product_id, description, quantity, unit, unit_price, line_total
            )
            VALUES ($1, $2, $3, COALESCE($4, ''), $5, COALESCE($6, 'KG'), $7, $8)
            RETURNING *
            "#,
        )
        .bind(invoice.id)
        .bind((index + 1) as i32)
        .bind(item.product_id)
        .bind(&item.description)
        .bind(item.quantity)
        .bind(&item.unit)
        .bind(item.unit_price)
        .bind(line_total)
        .fetch_one(&mut *tx)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        items.push(row);
    }

    tx.commit()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((StatusCode::CREATED, Json(InvoiceView { invoice, items })))
}

// ---------------------------------------------------------------------------
// Delivery challans

#[derive(Deserialize)]
pub struct ChallanItemForm {
    batch_id: Uuid,
    quantity: Decimal,
}

#[derive(Deserialize)]
pub struct ChallanForm {
    customer_id: Uuid,
    invoice_id: Option<Uuid>,
    challan_date: Option<NaiveDate>,
    vehicle_number: Option<String>,
    driver_name: Option<String>,
    notes: Option<String>,
    items: Vec<ChallanItemForm>,
}

#[derive(Serialize)]
pub struct ChallanView {
    #[serde(flatten)]
    pub challan: DeliveryChallan,
    pub items: Vec<DeliveryChallanItem>,
}

pub async fn list_challans(
    cookies: Cookies,
    State(db): State<Database>,
) -> Result<Json<Vec<DeliveryChallan>>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales", "warehouse"])?;

    let challans = sqlx::query_as::<_, DeliveryChallan>(
        "SELECT * FROM delivery_challans ORDER BY challan_date DESC, challan_number DESC",
    )
    .fetch_all(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(challans))
}

pub async fn get_challan(
    cookies: Cookies,
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> Result<Json<ChallanView>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales", "warehouse"])?;

    let challan =
        sqlx::query_as::<_, DeliveryChallan>("SELECT * FROM delivery_challans WHERE id = $1")
            .bind(id)
            .fetch_optional(&db)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::NOT_FOUND)?;

    let items = sqlx::query_as::<_, DeliveryChallanItem>(
        "SELECT * FROM delivery_challan_items WHERE challan_id = $1 ORDER BY line_number",
    )
    .bind(id)
    .fetch_all(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(ChallanView { challan, items }))
}

/// Issues a delivery challan. Each line draws down its batch inside the
/// transaction; a line asking for more than the batch has left aborts the
/// whole challan with 409.
pub async fn create_challan(
    cookies: Cookies,
    State(db): State<Database>,
    Json(form): Json<ChallanForm>,
) -> Result<(StatusCode, Json<ChallanView>), StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales", "warehouse"])?;

    if form.items.is_empty() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    if form.items.iter().any(|i| i.quantity <= Decimal::ZERO) {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    let challan_number = next_document_number(&db, "delivery_challans", "challan_number", "DC")
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut tx = db
        .begin()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let challan = sqlx::query_as::<_, DeliveryChallan>(
        r#"
        INSERT INTO delivery_challans (
            challan_number, challan_date, customer_id, invoice_id,
            vehicle_number, driver_name, status, notes, created_by
        )
        VALUES ($1, COALESCE($2, CURRENT_DATE), $3, $4, $5, $6, 'issued', $7, $8)
        RETURNING *
        "#,
    )
    .bind(&challan_number)
    .bind(form.challan_date)
    .bind(form.customer_id)
    .bind(form.invoice_id)
    .bind(&form.vehicle_number)
    .bind(&form.driver_name)
    .bind(&form.notes)
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        log::error!("failed to create challan: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let mut items = Vec::with_capacity(form.items.len());
    for (index, item) in form.items.iter().enumerate() {
        // Guarded decrement: no row updated means not enough stock left.
        let batch: Option<(Uuid, String)> = sqlx::query_as(
            r#"
            UPDATE batches SET quantity_available = quantity_available - $2
            WHERE id = $1 AND quantity_available >= $2
            RETURNING product_id, unit
            "#,
        )
        .bind(item.batch_id)
        .bind(item.quantity)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let (product_id, unit) = batch.ok_or(StatusCode::CONFLICT)?;

        let row = sqlx::query_as::<_, DeliveryChallanItem>(
            r#"
            INSERT INTO delivery_challan_items (challan_id, line_number, batch_id, product_id, quantity, unit)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(challan.id)
        .bind((index + 1) as i32)
        .bind(item.batch_id)
        .bind(product_id)
        .bind(item.quantity)
        .bind(&unit)
        .fetch_one(&mut *tx)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        items.push(row);
    }

    tx.commit()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((StatusCode::CREATED, Json(ChallanView { challan, items })))
}

pub async fn mark_challan_delivered(
    cookies: Cookies,
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryChallan>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales", "warehouse"])?;

    let challan = sqlx::query_as::<_, DeliveryChallan>(
        "UPDATE delivery_challans SET status = 'delivered' WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .fetch_optional(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(challan))
}
