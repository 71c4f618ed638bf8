use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use axum_extra::extract::Multipart;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    database::Database,
    middleware::{get_current_user, require_role},
    models::{Activity, CrmContact, EmailInboxRow, Inquiry, Reminder},
    utils::{next_document_number, next_document_number_in_tx},
};

// ---------------------------------------------------------------------------
// Contacts

#[derive(Deserialize)]
pub struct ContactForm {
    company_name: String,
    company_type: Option<String>,
    industry: Option<String>,
    country: Option<String>,
    city: Option<String>,
    address: Option<String>,
    website: Option<String>,
    contact_person: Option<String>,
    designation: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    mobile: Option<String>,
    customer_type: Option<String>,
    tags: Option<Vec<String>>,
    notes: Option<String>,
}

#[derive(Deserialize)]
pub struct ContactListQuery {
    search: Option<String>,
    customer_type: Option<String>,
}

pub async fn list_contacts(
    cookies: Cookies,
    State(db): State<Database>,
    Query(query): Query<ContactListQuery>,
) -> Result<Json<Vec<CrmContact>>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    let pattern = query.search.map(|s| format!("%{}%", s));
    let contacts = sqlx::query_as::<_, CrmContact>(
        r#"
        SELECT * FROM crm_contacts
        WHERE is_active = true
          AND ($1::TEXT IS NULL OR company_name ILIKE $1 OR contact_person ILIKE $1 OR email ILIKE $1)
          AND ($2::TEXT IS NULL OR customer_type = $2)
        ORDER BY company_name
        "#,
    )
    .bind(&pattern)
    .bind(&query.customer_type)
    .fetch_all(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(contacts))
}

pub async fn create_contact(
    cookies: Cookies,
    State(db): State<Database>,
    Json(form): Json<ContactForm>,
) -> Result<(StatusCode, Json<CrmContact>), StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    let contact = insert_contact(&db, &form, user.id)
        .await
        .map_err(|e| {
            log::error!("failed to create contact: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok((StatusCode::CREATED, Json(contact)))
}

async fn insert_contact(
    db: &Database,
    form: &ContactForm,
    created_by: Uuid,
) -> Result<CrmContact, sqlx::Error> {
    sqlx::query_as::<_, CrmContact>(
        r#"
        INSERT INTO crm_contacts (
            company_name, company_type, industry, country, city, address,
            website, contact_person, designation, email, phone, mobile,
            customer_type, tags, first_contact_date, notes, created_by
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                COALESCE($13, 'prospect'), $14, CURRENT_DATE, $15, $16)
        RETURNING *
        "#,
    )
    .bind(&form.company_name)
    .bind(&form.company_type)
    .bind(&form.industry)
    .bind(&form.country)
    .bind(&form.city)
    .bind(&form.address)
    .bind(&form.website)
    .bind(&form.contact_person)
    .bind(&form.designation)
    .bind(&form.email)
    .bind(&form.phone)
    .bind(&form.mobile)
    .bind(&form.customer_type)
    .bind(&form.tags)
    .bind(&form.notes)
    .bind(created_by)
    .fetch_one(db)
    .await
}

pub async fn update_contact(
    cookies: Cookies,
    State(db): State<Database>,
    Path(id): Path<Uuid>,
    Json(form): Json<ContactForm>,
) -> Result<Json<CrmContact>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    let contact = sqlx::query_as::<_, CrmContact>(
        r#"
        UPDATE crm_contacts SET
            company_name = $2, company_type = $3, industry = $4, country = $5,
            city = $6, address = $7, website = $8, contact_person = $9,
            designation = $10, email = $11, phone = $12, mobile = $13,
            customer_type = COALESCE($14, customer_type), tags = $15, notes = $16
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&form.company_name)
    .bind(&form.company_type)
    .bind(&form.industry)
    .bind(&form.country)
    .bind(&form.city)
    .bind(&form.address)
    .bind(&form.website)
    .bind(&form.contact_person)
    .bind(&form.designation)
    .bind(&form.email)
    .bind(&form.phone)
    .bind(&form.mobile)
    .bind(&form.customer_type)
    .bind(&form.tags)
    .bind(&form.notes)
    .fetch_optional(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(contact))
}

pub async fn deactivate_contact(
    cookies: Cookies,
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    let result = sqlx::query("UPDATE crm_contacts SET is_active = false WHERE id = $1")
        .bind(id)
        .execute(&db)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if result.rows_affected() == 0 {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// CSV contact import

#[derive(Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Accepts a multipart upload with a `file` field holding a CSV export.
/// Headers are matched loosely (case, spaces and underscores ignored,
/// common synonyms accepted) so exports from other systems import cleanly.
pub async fn import_contacts(
    cookies: Cookies,
    State(db): State<Database>,
    mut multipart: Multipart,
) -> Result<Json<ImportReport>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    let mut content = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        if field.name() == Some("file") {
            content = Some(field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?);
        }
    }
    let content = content.ok_or(StatusCode::BAD_REQUEST)?;

    let rows = parse_csv(&content);
    let mut report = ImportReport {
        imported: 0,
        skipped: 0,
        errors: Vec::new(),
    };

    let Some((header, body)) = rows.split_first() else {
        return Ok(Json(report));
    };
    let columns: Vec<ContactColumn> = header.iter().map(|h| map_header(h)).collect();
    if !columns.contains(&ContactColumn::CompanyName) {
        report
            .errors
            .push("no company name column recognised in header".to_string());
        return Ok(Json(report));
    }

    for (line_no, row) in body.iter().enumerate() {
        let mut form = ContactForm {
            company_name: String::new(),
            company_type: None,
            industry: None,
            country: None,
            city: None,
            address: None,
            website: None,
            contact_person: None,
            designation: None,
            email: None,
            phone: None,
            mobile: None,
            customer_type: None,
            tags: None,
            notes: None,
        };
        for (column, value) in columns.iter().zip(row.iter()) {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            column.assign(&mut form, value);
        }
        if form.company_name.is_empty() {
            report.skipped += 1;
            continue;
        }
        match insert_contact(&db, &form, user.id).await {
            Ok(_) => report.imported += 1,
            Err(e) => {
                report.skipped += 1;
                report.errors.push(format!("row {}: {}", line_no + 2, e));
            }
        }
    }

    Ok(Json(report))
}

#[derive(Debug, PartialEq, Clone, Copy)]
enum ContactColumn {
    CompanyName,
    CompanyType,
    Industry,
    Country,
    City,
    Address,
    Website,
    ContactPerson,
    Designation,
    Email,
    Phone,
    Mobile,
    CustomerType,
    Notes,
    Ignored,
}

impl ContactColumn {
    fn assign(self, form: &mut ContactForm, value: &str) {
        let v = value.to_string();
        match self {
            Self::CompanyName => form.company_name = v,
            Self::CompanyType => form.company_type = Some(v),
            Self::Industry => form.industry = Some(v),
            Self::Country => form.country = Some(v),
            Self::City => form.city = Some(v),
            Self::Address => form.address = Some(v),
            Self::Website => form.website = Some(v),
            Self::ContactPerson => form.contact_person = Some(v),
            Self::Designation => form.designation = Some(v),
            Self::Email => form.email = Some(v),
            Self::Phone => form.phone = Some(v),
            Self::Mobile => form.mobile = Some(v),
            Self::CustomerType => form.customer_type = Some(v.to_lowercase()),
            Self::Notes => form.notes = Some(v),
            Self::Ignored => {}
        }
    }
}

fn map_header(raw: &str) -> ContactColumn {
    let key: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    match key.as_str() {
        "companyname" | "company" | "organisation" | "organization" | "firm" => {
            ContactColumn::CompanyName
        }
        "companytype" | "type" => ContactColumn::CompanyType,
        "industry" | "sector" => ContactColumn::Industry,
        "country" => ContactColumn::Country,
        "city" | "town" => ContactColumn::City,
        "address" | "fulladdress" => ContactColumn::Address,
        "website" | "url" | "web" => ContactColumn::Website,
        "contactperson" | "contact" | "name" | "personname" => ContactColumn::ContactPerson,
        "designation" | "title" | "jobtitle" | "position" => ContactColumn::Designation,
        "email" | "emailaddress" | "mail" => ContactColumn::Email,
        "phone" | "phonenumber" | "telephone" | "tel" | "landline" => ContactColumn::Phone,
        "mobile" | "mobilenumber" | "cell" | "whatsapp" => ContactColumn::Mobile,
        "customertype" | "status" | "stage" => ContactColumn::CustomerType,
        "notes" | "remarks" | "comment" | "comments" => ContactColumn::Notes,
        _ => ContactColumn::Ignored,
    }
}

/// Minimal CSV reader: comma separated, double quotes around fields that
/// contain commas or newlines, "" escapes a quote inside a quoted field.
fn parse_csv(content: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
        } else {
            match c {
                '"' => in_quotes = true,
                ',' => row.push(std::mem::take(&mut field)),
                '\r' => {}
                '\n' => {
                    row.push(std::mem::take(&mut field));
                    if row.iter().any(|f| !f.trim().is_empty()) {
                        rows.push(std::mem::take(&mut row));
                    } else {
                        row.clear();
                    }
                }
                _ => field.push(c),
            }
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        if row.iter().any(|f| !f.trim().is_empty()) {
            rows.push(row);
        }
    }
    rows
}

// ---------------------------------------------------------------------------
// Inquiries

#[derive(Deserialize)]
pub struct InquiryForm {
    product_name: String,
    specification: Option<String>,
    quantity: Option<String>,
    supplier_name: Option<String>,
    supplier_country: Option<String>,
    company_name: Option<String>,
    contact_person: Option<String>,
    contact_email: Option<String>,
    contact_phone: Option<String>,
    priority: Option<String>,
    delivery_date_expected: Option<NaiveDate>,
    remarks: Option<String>,
    assigned_to: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct InquiryListQuery {
    status: Option<String>,
    priority: Option<String>,
    assigned_to: Option<Uuid>,
    search: Option<String>,
}

/// Partial update: only fields present in the body change. This backs the
/// inline single-field edits on the inquiry board.
#[derive(Deserialize)]
pub struct InquiryPatch {
    product_name: Option<String>,
    specification: Option<String>,
    quantity: Option<String>,
    supplier_name: Option<String>,
    supplier_country: Option<String>,
    company_name: Option<String>,
    contact_person: Option<String>,
    contact_email: Option<String>,
    contact_phone: Option<String>,
    status: Option<String>,
    priority: Option<String>,
    coa_sent: Option<bool>,
    msds_sent: Option<bool>,
    sample_sent: Option<bool>,
    price_quoted: Option<bool>,
    delivery_date_expected: Option<NaiveDate>,
    remarks: Option<String>,
    assigned_to: Option<Uuid>,
}

const INQUIRY_STATUSES: &[&str] = &[
    "new",
    "in_progress",
    "quoted",
    "sampled",
    "won",
    "lost",
    "closed",
];
const PRIORITIES: &[&str] = &["low", "medium", "high", "urgent"];

pub async fn list_inquiries(
    cookies: Cookies,
    State(db): State<Database>,
    Query(query): Query<InquiryListQuery>,
) -> Result<Json<Vec<Inquiry>>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    let pattern = query.search.map(|s| format!("%{}%", s));
    let inquiries = sqlx::query_as::<_, Inquiry>(
        r#"
        SELECT * FROM crm_inquiries
        WHERE ($1::TEXT IS NULL OR status = $1)
          AND ($2::TEXT IS NULL OR priority = $2)
          AND ($3::UUID IS NULL OR assigned_to = $3)
          AND ($4::TEXT IS NULL OR product_name ILIKE $4 OR company_name ILIKE $4 OR inquiry_number ILIKE $4)
        ORDER BY created_at DESC
        "#,
    )
    .bind(&query.status)
    .bind(&query.priority)
    .bind(query.assigned_to)
    .bind(&pattern)
    .fetch_all(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(inquiries))
}

pub async fn get_inquiry(
    cookies: Cookies,
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> Result<Json<Inquiry>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    let inquiry = sqlx::query_as::<_, Inquiry>("SELECT * FROM crm_inquiries WHERE id = $1")
        .bind(id)
        .fetch_optional(&db)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(inquiry))
}

pub async fn create_inquiry(
    cookies: Cookies,
    State(db): State<Database>,
    Json(form): Json<InquiryForm>,
) -> Result<(StatusCode, Json<Inquiry>), StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    if form.product_name.trim().is_empty() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    if let Some(p) = &form.priority {
        if !PRIORITIES.contains(&p.as_str()) {
            return Err(StatusCode::UNPROCESSABLE_ENTITY);
        }
    }

    let inquiry_number = next_document_number(&db, "crm_inquiries", "inquiry_number", "INQ")
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let inquiry = sqlx::query_as::<_, Inquiry>(
        r#"
        INSERT INTO crm_inquiries (
            inquiry_number, product_name, specification, quantity, supplier_name,
            supplier_country, company_name, contact_person, contact_email,
            contact_phone, priority, delivery_date_expected, remarks,
            source, assigned_to, created_by
        )
        VALUES ($1, $2, $3, COALESCE($4, ''), $5, $6, COALESCE($7, 'Unknown'),
                $8, $9, $10, COALESCE($11, 'medium'), $12, $13, 'manual', $14, $15)
        RETURNING *
        "#,
    )
    .bind(&inquiry_number)
    .bind(form.product_name.trim())
    .bind(&form.specification)
    .bind(&form.quantity)
    .bind(&form.supplier_name)
    .bind(&form.supplier_country)
    .bind(&form.company_name)
    .bind(&form.contact_person)
    .bind(&form.contact_email)
    .bind(&form.contact_phone)
    .bind(&form.priority)
    .bind(form.delivery_date_expected)
    .bind(&form.remarks)
    .bind(form.assigned_to)
    .bind(user.id)
    .fetch_one(&db)
    .await
    .map_err(|e| {
        log::error!("failed to create inquiry: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok((StatusCode::CREATED, Json(inquiry)))
}

pub async fn patch_inquiry(
    cookies: Cookies,
    State(db): State<Database>,
    Path(id): Path<Uuid>,
    Json(patch): Json<InquiryPatch>,
) -> Result<Json<Inquiry>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    if let Some(s) = &patch.status {
        if !INQUIRY_STATUSES.contains(&s.as_str()) {
            return Err(StatusCode::UNPROCESSABLE_ENTITY);
        }
    }
    if let Some(p) = &patch.priority {
        if !PRIORITIES.contains(&p.as_str()) {
            return Err(StatusCode::UNPROCESSABLE_ENTITY);
        }
    }

    let inquiry = sqlx::query_as::<_, Inquiry>(
        r#"
        UPDATE crm_inquiries SET
            product_name = COALESCE($2, product_name),
            specification = COALESCE($3, specification),
            quantity = COALESCE($4, quantity),
            supplier_name = COALESCE($5, supplier_name),
            supplier_country = COALESCE($6, supplier_country),
            company_name = COALESCE($7, company_name),
            contact_person = COALESCE($8, contact_person),
            contact_email = COALESCE($9, contact_email),
            contact_phone = COALESCE($10, contact_phone),
            status = COALESCE($11, status),
            priority = COALESCE($12, priority),
            coa_sent = COALESCE($13, coa_sent),
            msds_sent = COALESCE($14, msds_sent),
            sample_sent = COALESCE($15, sample_sent),
            price_quoted = COALESCE($16, price_quoted),
            delivery_date_expected = COALESCE($17, delivery_date_expected),
            remarks = COALESCE($18, remarks),
            assigned_to = COALESCE($19, assigned_to),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&patch.product_name)
    .bind(&patch.specification)
    .bind(&patch.quantity)
    .bind(&patch.supplier_name)
    .bind(&patch.supplier_country)
    .bind(&patch.company_name)
    .bind(&patch.contact_person)
    .bind(&patch.contact_email)
    .bind(&patch.contact_phone)
    .bind(&patch.status)
    .bind(&patch.priority)
    .bind(patch.coa_sent)
    .bind(patch.msds_sent)
    .bind(patch.sample_sent)
    .bind(patch.price_quoted)
    .bind(patch.delivery_date_expected)
    .bind(&patch.remarks)
    .bind(patch.assigned_to)
    .fetch_optional(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(inquiry))
}

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BulkAction {
    SetStatus { status: String },
    SetPriority { priority: String },
    Assign { assigned_to: Uuid },
    Delete,
}

#[derive(Deserialize)]
pub struct BulkInquiryForm {
    ids: Vec<Uuid>,
    #[serde(flatten)]
    action: BulkAction,
}

#[derive(Serialize)]
pub struct BulkResult {
    pub affected: u64,
}

/// Row actions applied to a grid selection in one statement.
pub async fn bulk_inquiries(
    cookies: Cookies,
    State(db): State<Database>,
    Json(form): Json<BulkInquiryForm>,
) -> Result<Json<BulkResult>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    if form.ids.is_empty() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    let result = match &form.action {
        BulkAction::SetStatus { status } => {
            if !INQUIRY_STATUSES.contains(&status.as_str()) {
                return Err(StatusCode::UNPROCESSABLE_ENTITY);
            }
            sqlx::query(
                "UPDATE crm_inquiries SET status = $2, updated_at = NOW() WHERE id = ANY($1)",
            )
            .bind(&form.ids)
            .bind(status)
            .execute(&db)
            .await
        }
        BulkAction::SetPriority { priority } => {
            if !PRIORITIES.contains(&priority.as_str()) {
                return Err(StatusCode::UNPROCESSABLE_ENTITY);
            }
            sqlx::query(
                "UPDATE crm_inquiries SET priority = $2, updated_at = NOW() WHERE id = ANY($1)",
            )
            .bind(&form.ids)
            .bind(priority)
            .execute(&db)
            .await
        }
        BulkAction::Assign { assigned_to } => sqlx::query(
            "UPDATE crm_inquiries SET assigned_to = $2, updated_at = NOW() WHERE id = ANY($1)",
        )
        .bind(&form.ids)
        .bind(assigned_to)
        .execute(&db)
        .await,
        BulkAction::Delete => sqlx::query("DELETE FROM crm_inquiries WHERE id = ANY($1)")
            .bind(&form.ids)
            .execute(&db)
            .await,
    };

    let result = result.map_err(|e| {
        log::error!("bulk inquiry action failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(BulkResult {
        affected: result.rows_affected(),
    }))
}

pub async fn delete_inquiry(
    cookies: Cookies,
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    let result = sqlx::query("DELETE FROM crm_inquiries WHERE id = $1")
        .bind(id)
        .execute(&db)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if result.rows_affected() == 0 {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Source email behind an email-sourced inquiry.
pub async fn get_inquiry_email(
    cookies: Cookies,
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> Result<Json<EmailInboxRow>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    let email = sqlx::query_as::<_, EmailInboxRow>(
        r#"
        SELECT e.* FROM crm_email_inbox e
        JOIN crm_inquiries i ON i.source_email_id = e.id
        WHERE i.id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(email))
}

// ---------------------------------------------------------------------------
// Email inbox

#[derive(Deserialize)]
pub struct InboxListQuery {
    #[serde(default)]
    unconverted_only: bool,
}

pub async fn list_inbox(
    cookies: Cookies,
    State(db): State<Database>,
    Query(query): Query<InboxListQuery>,
) -> Result<Json<Vec<EmailInboxRow>>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    let rows = sqlx::query_as::<_, EmailInboxRow>(
        r#"
        SELECT e.* FROM crm_email_inbox e
        JOIN gmail_connections g ON g.id = e.gmail_connection_id
        WHERE g.user_id = $1 AND ($2 = false OR e.converted_to_inquiry IS NULL)
        ORDER BY e.received_at DESC
        "#,
    )
    .bind(user.id)
    .bind(query.unconverted_only)
    .fetch_all(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(rows))
}

#[derive(Deserialize)]
pub struct ConvertForm {
    product_name: String,
    specification: Option<String>,
    quantity: Option<String>,
    company_name: Option<String>,
    priority: Option<String>,
    remarks: Option<String>,
    #[serde(default)]
    coa_requested: bool,
    #[serde(default)]
    msds_requested: bool,
    #[serde(default)]
    sample_requested: bool,
    #[serde(default)]
    price_requested: bool,
}

/// Manual conversion of an inbox email the sync pass did not open an
/// inquiry for. Inserts the inquiry, flags the inbox row converted and
/// creates reminders for the requested documents, all in one transaction.
pub async fn convert_inbox_email(
    cookies: Cookies,
    State(db): State<Database>,
    Path(id): Path<Uuid>,
    Json(form): Json<ConvertForm>,
) -> Result<(StatusCode, Json<Inquiry>), StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    if form.product_name.trim().is_empty() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    if let Some(p) = &form.priority {
        if !PRIORITIES.contains(&p.as_str()) {
            return Err(StatusCode::UNPROCESSABLE_ENTITY);
        }
    }

    let mut tx = db
        .begin()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let email = sqlx::query_as::<_, EmailInboxRow>(
        "SELECT * FROM crm_email_inbox WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .ok_or(StatusCode::NOT_FOUND)?;

    if email.converted_to_inquiry.is_some() {
        return Err(StatusCode::CONFLICT);
    }

    let inquiry_number =
        next_document_number_in_tx(&mut tx, "crm_inquiries", "inquiry_number", "INQ")
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let inquiry = sqlx::query_as::<_, Inquiry>(
        r#"
        INSERT INTO crm_inquiries (
            inquiry_number, product_name, specification, quantity, company_name,
            contact_person, contact_email, email_subject, priority, remarks,
            source, source_email_id, assigned_to, created_by
        )
        VALUES ($1, $2, $3, COALESCE($4, ''), COALESCE($5, 'Unknown'),
                $6, $7, $8, COALESCE($9, 'medium'), $10, 'email', $11, $12, $12)
        RETURNING *
        "#,
    )
    .bind(&inquiry_number)
    .bind(form.product_name.trim())
    .bind(&form.specification)
    .bind(&form.quantity)
    .bind(&form.company_name)
    .bind(&email.from_name)
    .bind(&email.from_email)
    .bind(&email.subject)
    .bind(&form.priority)
    .bind(&form.remarks)
    .bind(email.id)
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        log::error!("failed to convert email {}: {}", email.gmail_message_id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    sqlx::query(
        "UPDATE crm_email_inbox SET is_processed = true, is_inquiry = true, converted_to_inquiry = $2 WHERE id = $1",
    )
    .bind(email.id)
    .bind(inquiry.id)
    .execute(&mut *tx)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    for spec in crate::email::sync::derive_reminders(
        form.coa_requested,
        form.msds_requested,
        form.sample_requested,
        form.price_requested,
    ) {
        sqlx::query(
            r#"
            INSERT INTO crm_reminders (inquiry_id, reminder_type, title, due_date, assigned_to, created_by)
            VALUES ($1, $2, $3, $4, $5, $5)
            "#,
        )
        .bind(inquiry.id)
        .bind(spec.reminder_type)
        .bind(spec.title)
        .bind(chrono::Utc::now() + chrono::Duration::days(spec.due_in_days))
        .bind(user.id)
        .execute(&mut *tx)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    }

    tx.commit()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((StatusCode::CREATED, Json(inquiry)))
}

// ---------------------------------------------------------------------------
// Activities

#[derive(Deserialize)]
pub struct ActivityForm {
    activity_type: String,
    description: Option<String>,
    activity_date: Option<NaiveDate>,
    follow_up_date: Option<NaiveDate>,
}

const ACTIVITY_TYPES: &[&str] = &["call", "email", "meeting", "follow_up", "note"];

pub async fn list_activities(
    cookies: Cookies,
    State(db): State<Database>,
    Path(inquiry_id): Path<Uuid>,
) -> Result<Json<Vec<Activity>>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    let activities = sqlx::query_as::<_, Activity>(
        "SELECT * FROM crm_activities WHERE inquiry_id = $1 ORDER BY activity_date DESC, created_at DESC",
    )
    .bind(inquiry_id)
    .fetch_all(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(activities))
}

pub async fn create_activity(
    cookies: Cookies,
    State(db): State<Database>,
    Path(inquiry_id): Path<Uuid>,
    Json(form): Json<ActivityForm>,
) -> Result<(StatusCode, Json<Activity>), StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    if !ACTIVITY_TYPES.contains(&form.activity_type.as_str()) {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    let activity = sqlx::query_as::<_, Activity>(
        r#"
        INSERT INTO crm_activities (inquiry_id, activity_type, description, activity_date, follow_up_date, created_by)
        VALUES ($1, $2, $3, COALESCE($4, CURRENT_DATE), $5, $6)
        RETURNING *
        "#,
    )
    .bind(inquiry_id)
    .bind(&form.activity_type)
    .bind(&form.description)
    .bind(form.activity_date)
    .bind(form.follow_up_date)
    .bind(user.id)
    .fetch_one(&db)
    .await
    .map_err(|e| {
        log::error!("failed to log activity: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok((StatusCode::CREATED, Json(activity)))
}

// ---------------------------------------------------------------------------
// Reminders

#[derive(Deserialize)]
pub struct ReminderListQuery {
    #[serde(default)]
    include_completed: bool,
}

pub async fn list_reminders(
    cookies: Cookies,
    State(db): State<Database>,
    Query(query): Query<ReminderListQuery>,
) -> Result<Json<Vec<Reminder>>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    let reminders = sqlx::query_as::<_, Reminder>(
        r#"
        SELECT * FROM crm_reminders
        WHERE assigned_to = $1 AND ($2 OR NOT is_completed)
        ORDER BY due_date
        "#,
    )
    .bind(user.id)
    .bind(query.include_completed)
    .fetch_all(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(reminders))
}

/// Completing a reminder also flips the matching sent flag on its inquiry,
/// so the board and the reminder list stay in step.
pub async fn complete_reminder(
    cookies: Cookies,
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> Result<Json<Reminder>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    let mut tx = db
        .begin()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let reminder = sqlx::query_as::<_, Reminder>(
        "UPDATE crm_reminders SET is_completed = true WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .ok_or(StatusCode::NOT_FOUND)?;

    let flag_column = match reminder.reminder_type.as_str() {
        "send_coa" => Some("coa_sent"),
        "send_msds" => Some("msds_sent"),
        "send_sample" => Some("sample_sent"),
        "send_price" => Some("price_quoted"),
        _ => None,
    };
    if let Some(column) = flag_column {
        sqlx::query(&format!(
            "UPDATE crm_inquiries SET {column} = true, updated_at = NOW() WHERE id = $1"
        ))
        .bind(reminder.inquiry_id)
        .execute(&mut *tx)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    }

    tx.commit()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(reminder))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_match_loosely() {
        assert_eq!(map_header("Company Name"), ContactColumn::CompanyName);
        assert_eq!(map_header("ORGANIZATION"), ContactColumn::CompanyName);
        assert_eq!(map_header("e-mail"), ContactColumn::Email);
        assert_eq!(map_header("Job Title"), ContactColumn::Designation);
        assert_eq!(map_header("whatsapp"), ContactColumn::Mobile);
        assert_eq!(map_header("random junk"), ContactColumn::Ignored);
    }

    #[test]
    fn csv_handles_quotes_and_blank_lines() {
        let rows = parse_csv("company,email\n\"Acme, Inc\",a@acme.com\n\n\"Say \"\"hi\"\"\",b@x.com\n");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], vec!["Acme, Inc", "a@acme.com"]);
        assert_eq!(rows[2][0], "Say \"hi\"");
    }

    #[test]
    fn csv_last_line_without_newline() {
        let rows = parse_csv("a,b\nc,d");
        assert_eq!(rows, vec![vec!["a", "b"], vec!["c", "d"]]);
    }
}
