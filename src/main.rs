mod database;
mod email;
mod handlers;
mod middleware;
mod models;
#[cfg(test)]
mod tests;
mod utils;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, patch, post, put},
    Router,
};
use dotenvy::dotenv;
use std::env;
use tower::ServiceBuilder;
use tower_cookies::CookieManagerLayer;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use database::{create_database_pool, Database};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    env_logger::init();

    // Initialize database
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let db = create_database_pool(&database_url)
        .await
        .expect("Failed to connect to database");

    log::info!("Database connection successful");

    // Build the application router
    let app = create_router(db);

    // Get port from environment or use default
    let port = env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{}", port);

    log::info!("PharmaDesk server starting on http://{}", addr);

    // Start the server
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

fn create_router(db: Database) -> Router {
    Router::new()
        // Auth (no session required)
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/me", get(handlers::auth::me))
        // Dashboard
        .route("/api/dashboard", get(handlers::dashboard))
        // Products
        .route("/api/products", get(handlers::products::list))
        .route("/api/products", post(handlers::products::create))
        .route("/api/products/:id", get(handlers::products::get))
        .route("/api/products/:id", put(handlers::products::update))
        .route("/api/products/:id", delete(handlers::products::deactivate))
        // Inventory
        .route("/api/inventory/stock", get(handlers::inventory::stock))
        .route("/api/inventory/batches", get(handlers::inventory::list_batches))
        .route("/api/inventory/batches", post(handlers::inventory::create_batch))
        .route("/api/inventory/batches/:id", get(handlers::inventory::get_batch))
        .route("/api/inventory/batches/:id", patch(handlers::inventory::adjust_batch))
        .route("/api/inventory/expiring", get(handlers::inventory::expiring_soon))
        // Suppliers and purchasing
        .route("/api/suppliers", get(handlers::purchasing::list_suppliers))
        .route("/api/suppliers", post(handlers::purchasing::create_supplier))
        .route("/api/suppliers/:id", put(handlers::purchasing::update_supplier))
        .route("/api/purchase-orders", get(handlers::purchasing::list_purchase_orders))
        .route("/api/purchase-orders", post(handlers::purchasing::create_purchase_order))
        .route("/api/purchase-orders/:id", get(handlers::purchasing::get_purchase_order))
        .route("/api/grns", get(handlers::purchasing::list_grns))
        .route("/api/grns", post(handlers::purchasing::create_grn))
        .route("/api/grns/:id", get(handlers::purchasing::get_grn))
        .route("/api/grns/:id", delete(handlers::purchasing::delete_grn))
        .route("/api/grns/:id/post", post(handlers::purchasing::post_grn))
        // Customers and sales
        .route("/api/customers", get(handlers::sales::list_customers))
        .route("/api/customers", post(handlers::sales::create_customer))
        .route("/api/customers/:id", put(handlers::sales::update_customer))
        .route("/api/invoices", get(handlers::sales::list_invoices))
        .route("/api/invoices", post(handlers::sales::create_invoice))
        .route("/api/invoices/:id", get(handlers::sales::get_invoice))
        .route("/api/challans", get(handlers::sales::list_challans))
        .route("/api/challans", post(handlers::sales::create_challan))
        .route("/api/challans/:id", get(handlers::sales::get_challan))
        .route("/api/challans/:id/delivered", post(handlers::sales::mark_challan_delivered))
        // Finance
        .route("/api/invoices/:id/payments", get(handlers::finance::list_payments))
        .route("/api/payments", post(handlers::finance::record_payment))
        .route("/api/receivables", get(handlers::finance::receivables))
        // CRM contacts
        .route("/api/crm/contacts", get(handlers::crm::list_contacts))
        .route("/api/crm/contacts", post(handlers::crm::create_contact))
        .route("/api/crm/contacts/import", post(handlers::crm::import_contacts))
        .route("/api/crm/contacts/:id", put(handlers::crm::update_contact))
        .route("/api/crm/contacts/:id", delete(handlers::crm::deactivate_contact))
        // CRM inquiries
        .route("/api/crm/inquiries", get(handlers::crm::list_inquiries))
        .route("/api/crm/inquiries", post(handlers::crm::create_inquiry))
        .route("/api/crm/inquiries/bulk", post(handlers::crm::bulk_inquiries))
        .route("/api/crm/inquiries/:id", get(handlers::crm::get_inquiry))
        .route("/api/crm/inquiries/:id", patch(handlers::crm::patch_inquiry))
        .route("/api/crm/inquiries/:id", delete(handlers::crm::delete_inquiry))
        .route("/api/crm/inquiries/:id/email", get(handlers::crm::get_inquiry_email))
        .route("/api/crm/inquiries/:id/activities", get(handlers::crm::list_activities))
        .route("/api/crm/inquiries/:id/activities", post(handlers::crm::create_activity))
        // CRM email inbox
        .route("/api/crm/inbox", get(handlers::crm::list_inbox))
        .route("/api/crm/inbox/:id/convert", post(handlers::crm::convert_inbox_email))
        // CRM reminders
        .route("/api/crm/reminders", get(handlers::crm::list_reminders))
        .route("/api/crm/reminders/:id/complete", post(handlers::crm::complete_reminder))
        // Gmail connection and sync
        .route("/api/email/connection", get(handlers::email::connection_status))
        .route("/api/email/connection", post(handlers::email::connect))
        .route("/api/email/connection", patch(handlers::email::update_connection))
        .route("/api/email/connection", delete(handlers::email::disconnect))
        .route("/api/email/sync", post(handlers::email::sync_now))
        .route("/api/email/send", post(handlers::email::send))
        .route("/api/email/parse", post(handlers::email::parse_preview))
        // Middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CookieManagerLayer::new())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(10 * 1024 * 1024)), // 10MB
        )
        .with_state(db)
}
