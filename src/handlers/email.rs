use axum::{extract::State, http::StatusCode, response::Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;

use crate::{
    database::Database,
    email::{
        ensure_access_token, gmail,
        parse::{self, EmailParseRequest, ParsedInquiry, ParserConfig},
        sync::{self, SyncReport},
        EmailError,
    },
    middleware::{get_current_user, require_role},
    models::GmailConnection,
};

/// Connection details without the OAuth tokens.
#[derive(Serialize)]
pub struct ConnectionStatus {
    pub email_address: String,
    pub is_connected: bool,
    pub sync_enabled: bool,
    pub last_sync: Option<DateTime<Utc>>,
}

impl From<GmailConnection> for ConnectionStatus {
    fn from(c: GmailConnection) -> Self {
        Self {
            email_address: c.email_address,
            is_connected: c.is_connected,
            sync_enabled: c.sync_enabled,
            last_sync: c.last_sync,
        }
    }
}

#[derive(Deserialize)]
pub struct ConnectForm {
    email_address: String,
    access_token: String,
    refresh_token: String,
    access_token_expires_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct ConnectionSettingsForm {
    sync_enabled: bool,
}

fn email_error_status(err: &EmailError) -> StatusCode {
    match err {
        EmailError::NotConnected => StatusCode::BAD_REQUEST,
        EmailError::AuthExpired | EmailError::RefreshFailed(_) => StatusCode::UNAUTHORIZED,
        EmailError::ParserUnconfigured => StatusCode::SERVICE_UNAVAILABLE,
        EmailError::Api { status, .. } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn connection_status(
    cookies: Cookies,
    State(db): State<Database>,
) -> Result<Json<ConnectionStatus>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    let connection = sqlx::query_as::<_, GmailConnection>(
        "SELECT * FROM gmail_connections WHERE user_id = $1",
    )
    .bind(user.id)
    .fetch_optional(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(ConnectionStatus::from(connection)))
}

/// Stores (or replaces) the caller's Gmail OAuth tokens. Token exchange
/// itself happens in the frontend OAuth flow; this endpoint persists the
/// result.
pub async fn connect(
    cookies: Cookies,
    State(db): State<Database>,
    Json(form): Json<ConnectForm>,
) -> Result<Json<ConnectionStatus>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    let connection = sqlx::query_as::<_, GmailConnection>(
        r#"
        INSERT INTO gmail_connections (
            user_id, email_address, access_token, refresh_token,
            access_token_expires_at, is_connected, sync_enabled
        )
        VALUES ($1, $2, $3, $4, $5, true, true)
        ON CONFLICT (user_id) DO UPDATE SET
            email_address = EXCLUDED.email_address,
            access_token = EXCLUDED.access_token,
            refresh_token = EXCLUDED.refresh_token,
            access_token_expires_at = EXCLUDED.access_token_expires_at,
            is_connected = true
        RETURNING *
        "#,
    )
    .bind(user.id)
    .bind(&form.email_address)
    .bind(&form.access_token)
    .bind(&form.refresh_token)
    .bind(form.access_token_expires_at)
    .fetch_one(&db)
    .await
    .map_err(|e| {
        log::error!("failed to store gmail connection: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(ConnectionStatus::from(connection)))
}

pub async fn update_connection(
    cookies: Cookies,
    State(db): State<Database>,
    Json(form): Json<ConnectionSettingsForm>,
) -> Result<Json<ConnectionStatus>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    let connection = sqlx::query_as::<_, GmailConnection>(
        "UPDATE gmail_connections SET sync_enabled = $2 WHERE user_id = $1 RETURNING *",
    )
    .bind(user.id)
    .bind(form.sync_enabled)
    .fetch_optional(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(ConnectionStatus::from(connection)))
}

pub async fn disconnect(
    cookies: Cookies,
    State(db): State<Database>,
) -> Result<StatusCode, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    let result = sqlx::query(
        "UPDATE gmail_connections SET is_connected = false, sync_enabled = false WHERE user_id = $1",
    )
    .bind(user.id)
    .execute(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if result.rows_affected() == 0 {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Pulls unread mail from the caller's Gmail inbox, files each message and
/// opens inquiries for the ones that look like one.
pub async fn sync_now(
    cookies: Cookies,
    State(db): State<Database>,
) -> Result<Json<SyncReport>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    let report = sync::sync_inbox(&db, user.id).await.map_err(|e| {
        log::error!("gmail sync failed for {}: {}", user.email, e);
        email_error_status(&e)
    })?;

    Ok(Json(report))
}

#[derive(Deserialize)]
pub struct SendForm {
    to: String,
    subject: String,
    body: String,
    /// When set, the send is logged as an email activity on this inquiry.
    inquiry_id: Option<uuid::Uuid>,
}

#[derive(Serialize)]
pub struct SendResult {
    pub gmail_message_id: String,
}

/// The CRM composer: sends through the caller's connected mailbox.
pub async fn send(
    cookies: Cookies,
    State(db): State<Database>,
    Json(form): Json<SendForm>,
) -> Result<Json<SendResult>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    let connection = sqlx::query_as::<_, GmailConnection>(
        "SELECT * FROM gmail_connections WHERE user_id = $1 AND is_connected = true",
    )
    .bind(user.id)
    .fetch_optional(&db)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .ok_or_else(|| email_error_status(&EmailError::NotConnected))?;

    let client = reqwest::Client::new();
    let access_token = ensure_access_token(&db, &client, &connection)
        .await
        .map_err(|e| email_error_status(&e))?;

    let gmail_message_id = gmail::send_message(
        &client,
        &access_token,
        &connection.email_address,
        &form.to,
        &form.subject,
        &form.body,
    )
    .await
    .map_err(|e| {
        log::error!("send from {} failed: {}", connection.email_address, e);
        email_error_status(&e)
    })?;

    if let Some(inquiry_id) = form.inquiry_id {
        let logged = sqlx::query(
            r#"
            INSERT INTO crm_activities (inquiry_id, activity_type, description, is_completed, created_by)
            VALUES ($1, 'email', $2, true, $3)
            "#,
        )
        .bind(inquiry_id)
        .bind(format!("Sent \"{}\" to {}", form.subject, form.to))
        .bind(user.id)
        .execute(&db)
        .await;
        if let Err(e) = logged {
            log::warn!("sent mail but failed to log activity: {}", e);
        }
    }

    Ok(Json(SendResult { gmail_message_id }))
}

/// One-off extraction preview: runs the parser on a pasted email without
/// touching the inbox or creating an inquiry.
pub async fn parse_preview(
    cookies: Cookies,
    State(db): State<Database>,
    Json(request): Json<EmailParseRequest>,
) -> Result<Json<ParsedInquiry>, StatusCode> {
    let user = get_current_user(cookies, &db)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;
    require_role(&user, &["sales"])?;

    let config = ParserConfig::from_env().ok_or_else(|| {
        log::error!("{}", EmailError::ParserUnconfigured);
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    let client = reqwest::Client::new();

    let parsed = parse::parse_email(&db, &client, &config, &request)
        .await
        .map_err(|e| {
            log::error!("email parse failed: {}", e);
            email_error_status(&e)
        })?;

    Ok(Json(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_errors_map_to_http_statuses() {
        assert_eq!(
            email_error_status(&EmailError::NotConnected),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            email_error_status(&EmailError::AuthExpired),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            email_error_status(&EmailError::ParserUnconfigured),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            email_error_status(&EmailError::Api {
                status: 429,
                message: String::new()
            }),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
