//! Gmail-driven inquiry ingestion.
//!
//! Modules:
//! - gmail: Gmail API v1 client (list unread, fetch full message, MIME body)
//! - parse: chat-completion email structuring + domain cache
//! - sync: the sync pipeline (refresh token, list, parse, persist)

pub mod gmail;
pub mod parse;
pub mod sync;

use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::{database::Database, models::GmailConnection};

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Gmail not connected")]
    NotConnected,
    #[error("access token expired or revoked")]
    AuthExpired,
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("completion endpoint not configured")]
    ParserUnconfigured,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

fn status_is_retryable(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn retry_delay(
    attempt: u32,
    policy: &RetryPolicy,
    retry_after: Option<&reqwest::header::HeaderValue>,
) -> Duration {
    if let Some(value) = retry_after.and_then(|v| v.to_str().ok()) {
        if let Ok(secs) = value.parse::<u64>() {
            return Duration::from_secs(secs.min(30));
        }
    }

    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    let base = policy
        .initial_backoff_ms
        .saturating_mul(exponent)
        .min(policy.max_backoff_ms);
    Duration::from_millis(base)
}

pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, EmailError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let Some(cloned) = request.try_clone() else {
            return request.send().await.map_err(EmailError::Http);
        };

        match cloned.send().await {
            Ok(response) => {
                let status = response.status();
                if status_is_retryable(status) && attempt < attempts {
                    let delay = retry_delay(
                        attempt,
                        policy,
                        response.headers().get(reqwest::header::RETRY_AFTER),
                    );
                    log::warn!(
                        "retry {}/{} after status {} (sleep {:?})",
                        attempt,
                        attempts,
                        status,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                let retryable_transport = err.is_timeout() || err.is_connect();
                if retryable_transport && attempt < attempts {
                    let delay = retry_delay(attempt, policy, None);
                    log::warn!(
                        "retry {}/{} after transport error: {} (sleep {:?})",
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                return Err(EmailError::Http(err));
            }
        }
    }
}

/// Whether the stored access token needs a refresh (60s safety margin).
pub fn token_needs_refresh(connection: &GmailConnection) -> bool {
    match connection.access_token_expires_at {
        None => true,
        Some(expires_at) => expires_at <= Utc::now() + chrono::Duration::seconds(60),
    }
}

/// Return a usable access token for the connection, exchanging the refresh
/// token at Google's token endpoint when the stored one has expired. The
/// refreshed token and its expiry are written back to the connection row.
pub async fn ensure_access_token(
    db: &Database,
    client: &reqwest::Client,
    connection: &GmailConnection,
) -> Result<String, EmailError> {
    if !token_needs_refresh(connection) {
        return Ok(connection.access_token.clone());
    }

    let client_id = std::env::var("GOOGLE_CLIENT_ID")
        .map_err(|_| EmailError::RefreshFailed("GOOGLE_CLIENT_ID not set".to_string()))?;
    let client_secret = std::env::var("GOOGLE_CLIENT_SECRET")
        .map_err(|_| EmailError::RefreshFailed("GOOGLE_CLIENT_SECRET not set".to_string()))?;

    let resp = client
        .post(GOOGLE_TOKEN_URL)
        .form(&[
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("refresh_token", connection.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .await?;

    let status = resp.status();
    let body_text = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        let lowered = body_text.to_lowercase();
        if lowered.contains("invalid_grant") {
            return Err(EmailError::AuthExpired);
        }
        return Err(EmailError::RefreshFailed(format!(
            "HTTP {}: {}",
            status, body_text
        )));
    }

    let body: serde_json::Value = serde_json::from_str(&body_text)?;
    let access_token = body["access_token"]
        .as_str()
        .ok_or_else(|| EmailError::RefreshFailed("no access_token in response".to_string()))?
        .to_string();
    let expires_in = body["expires_in"].as_i64().unwrap_or(3600);
    let expires_at = Utc::now() + chrono::Duration::seconds(expires_in);

    update_connection_token(db, connection.id, &access_token, expires_at).await?;

    Ok(access_token)
}

async fn update_connection_token(
    db: &Database,
    connection_id: Uuid,
    access_token: &str,
    expires_at: chrono::DateTime<chrono::Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE gmail_connections SET access_token = $2, access_token_expires_at = $3 WHERE id = $1",
    )
    .bind(connection_id)
    .bind(access_token)
    .bind(expires_at)
    .execute(db)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn connection_expiring_at(
        expiry: Option<chrono::DateTime<Utc>>,
    ) -> GmailConnection {
        GmailConnection {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            email_address: "sales@pharma.example".to_string(),
            access_token: "ya29.current".to_string(),
            refresh_token: "1//refresh".to_string(),
            access_token_expires_at: expiry,
            is_connected: true,
            sync_enabled: true,
            last_sync: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn missing_expiry_forces_refresh() {
        assert!(token_needs_refresh(&connection_expiring_at(None)));
    }

    #[test]
    fn future_expiry_keeps_token() {
        let conn = connection_expiring_at(Some(Utc::now() + ChronoDuration::hours(1)));
        assert!(!token_needs_refresh(&conn));
    }

    #[test]
    fn near_expiry_counts_as_expired() {
        let conn = connection_expiring_at(Some(Utc::now() + ChronoDuration::seconds(30)));
        assert!(token_needs_refresh(&conn));
    }

    #[test]
    fn retry_delay_grows_and_caps() {
        let policy = RetryPolicy::default();
        let first = retry_delay(1, &policy, None);
        let second = retry_delay(2, &policy, None);
        let huge = retry_delay(10, &policy, None);
        assert!(second > first);
        assert_eq!(huge, Duration::from_millis(policy.max_backoff_ms));
    }

    #[test]
    fn retry_after_header_wins() {
        let policy = RetryPolicy::default();
        let header = reqwest::header::HeaderValue::from_static("5");
        assert_eq!(retry_delay(1, &policy, Some(&header)), Duration::from_secs(5));
    }
}
