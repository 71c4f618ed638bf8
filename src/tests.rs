//! Document-flow checks against a real database, driven through the router.

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::PgPool;
use tower::ServiceExt;

use crate::create_router;

fn test_router(db: PgPool) -> Router {
    std::env::set_var("JWT_SECRET", "flow-test-signing-secret");
    create_router(db)
}

async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    cookie: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if !cookie.is_empty() {
        builder = builder.header(header::COOKIE, cookie);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Registers an admin user and returns its auth cookie.
async fn login_admin(app: &Router) -> String {
    let (status, _) = request(
        app,
        "POST",
        "/api/auth/register",
        "",
        Some(json!({
            "email": "admin@pharmadesk.test",
            "password": "correct-horse-battery",
            "full_name": "Flow Admin",
            "role": "admin"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({
                        "email": "admin@pharmadesk.test",
                        "password": "correct-horse-battery"
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("login sets the auth cookie")
        .to_str()
        .unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

async fn create_product(app: &Router, cookie: &str, name: &str, code: &str) -> String {
    let (status, product) = request(
        app,
        "POST",
        "/api/products",
        cookie,
        Some(json!({ "product_name": name, "product_code": code })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    product["id"].as_str().unwrap().to_string()
}

async fn create_customer(app: &Router, cookie: &str) -> String {
    let (status, customer) = request(
        app,
        "POST",
        "/api/customers",
        cookie,
        Some(json!({ "company_name": "PT Kimia Sejahtera" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    customer["id"].as_str().unwrap().to_string()
}

fn decimal(value: &Value) -> Decimal {
    value.as_str().unwrap().parse().unwrap()
}

#[sqlx::test]
async fn grn_posts_once_and_only_once(db: PgPool) {
    let app = test_router(db);
    let cookie = login_admin(&app).await;

    let (status, supplier) = request(
        &app,
        "POST",
        "/api/suppliers",
        &cookie,
        Some(json!({ "company_name": "Nippon Chemical" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let supplier_id = supplier["id"].as_str().unwrap();
    let product_id = create_product(&app, &cookie, "Sodium Hypophosphite", "SHP-01").await;

    let (status, grn) = request(
        &app,
        "POST",
        "/api/grns",
        &cookie,
        Some(json!({
            "supplier_id": supplier_id,
            "items": [{
                "product_id": product_id,
                "batch_number": "NC-2408-A",
                "quantity_received": 100,
                "unit_cost": 12.5
            }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(grn["status"], "draft");
    let grn_id = grn["id"].as_str().unwrap();

    let (status, posted) = request(
        &app,
        "POST",
        &format!("/api/grns/{grn_id}/post"),
        &cookie,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(posted["status"], "posted");

    // posting again must not create a second set of batches
    let (status, _) = request(
        &app,
        "POST",
        &format!("/api/grns/{grn_id}/post"),
        &cookie,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, batches) = request(
        &app,
        "GET",
        &format!("/api/inventory/batches?product_id={product_id}"),
        &cookie,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(batches.as_array().unwrap().len(), 1);
    assert_eq!(decimal(&batches[0]["quantity_available"]), Decimal::from(100));
}

#[sqlx::test]
async fn short_batch_rolls_back_the_whole_challan(db: PgPool) {
    let app = test_router(db);
    let cookie = login_admin(&app).await;

    let product_id = create_product(&app, &cookie, "Paracetamol BP", "PCM-01").await;
    let customer_id = create_customer(&app, &cookie).await;

    let (status, batch) = request(
        &app,
        "POST",
        "/api/inventory/batches",
        &cookie,
        Some(json!({
            "batch_number": "PCM-2408-A",
            "product_id": product_id,
            "quantity_received": 10
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let batch_id = batch["id"].as_str().unwrap();

    // first line would fit, second overdraws the same batch
    let (status, _) = request(
        &app,
        "POST",
        "/api/challans",
        &cookie,
        Some(json!({
            "customer_id": customer_id,
            "items": [
                { "batch_id": batch_id, "quantity": 4 },
                { "batch_id": batch_id, "quantity": 100 }
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, batch) = request(
        &app,
        "GET",
        &format!("/api/inventory/batches/{batch_id}"),
        &cookie,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&batch["quantity_available"]), Decimal::from(10));

    let (status, challans) = request(&app, "GET", "/api/challans", &cookie, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(challans.as_array().unwrap().is_empty());
}

#[sqlx::test]
async fn payments_drive_invoice_status_to_paid(db: PgPool) {
    let app = test_router(db);
    let cookie = login_admin(&app).await;

    let product_id = create_product(&app, &cookie, "Ibuprofen BP", "IBU-01").await;
    let customer_id = create_customer(&app, &cookie).await;

    let (status, invoice) = request(
        &app,
        "POST",
        "/api/invoices",
        &cookie,
        Some(json!({
            "customer_id": customer_id,
            "items": [{ "product_id": product_id, "quantity": 2, "unit_price": 50 }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let invoice_id = invoice["id"].as_str().unwrap().to_string();
    let total = decimal(&invoice["total_amount"]);
    // 100 + 11% PPN
    assert_eq!(total, "111.00".parse().unwrap());

    let (status, _) = request(
        &app,
        "POST",
        "/api/payments",
        &cookie,
        Some(json!({ "invoice_id": invoice_id, "amount": 50 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, invoice) = request(&app, "GET", &format!("/api/invoices/{invoice_id}"), &cookie, None).await;
    assert_eq!(invoice["status"], "partially_paid");

    let remainder = total - Decimal::from(50);
    let (status, _) = request(
        &app,
        "POST",
        "/api/payments",
        &cookie,
        Some(json!({ "invoice_id": invoice_id, "amount": remainder.to_string() })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, invoice) = request(&app, "GET", &format!("/api/invoices/{invoice_id}"), &cookie, None).await;
    assert_eq!(invoice["status"], "paid");
}
