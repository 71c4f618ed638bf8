//! Gmail API v1 — list unread inbox messages and fetch full bodies.

use std::sync::OnceLock;

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde::Deserialize;

use super::{send_with_retry, EmailError, RetryPolicy};

const MESSAGES_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages";
const SEND_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages/send";

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStub {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetail {
    #[serde(default)]
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    internal_date: String,
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payload {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Option<PayloadBody>,
    #[serde(default)]
    parts: Vec<Payload>,
}

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct PayloadBody {
    #[serde(default)]
    data: Option<String>,
}

// ============================================================================
// Public types
// ============================================================================

/// A fully fetched inbox message, header fields already split out.
#[derive(Debug, Clone)]
pub struct FetchedEmail {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub from_email: String,
    pub from_name: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

// ============================================================================
// Gmail API
// ============================================================================

/// List unread inbox message stubs, newest first, up to `max_results`.
pub async fn list_unread(
    client: &reqwest::Client,
    access_token: &str,
    max_results: u32,
) -> Result<Vec<MessageStub>, EmailError> {
    let resp = send_with_retry(
        client
            .get(MESSAGES_URL)
            .bearer_auth(access_token)
            .query(&[
                ("q", "label:inbox is:unread"),
                ("maxResults", &max_results.to_string()),
            ]),
        &RetryPolicy::default(),
    )
    .await?;

    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(EmailError::AuthExpired);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(EmailError::Api {
            status: status.as_u16(),
            message: body,
        });
    }

    let list: MessageListResponse = resp.json().await?;
    Ok(list.messages)
}

/// Fetch one message in full and extract subject, sender and body text.
pub async fn fetch_message(
    client: &reqwest::Client,
    access_token: &str,
    message_id: &str,
) -> Result<FetchedEmail, EmailError> {
    let url = format!("{}/{}", MESSAGES_URL, message_id);

    let resp = send_with_retry(
        client
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("format", "full")]),
        &RetryPolicy::default(),
    )
    .await?;

    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(EmailError::AuthExpired);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(EmailError::Api {
            status: status.as_u16(),
            message: body,
        });
    }

    let detail: MessageDetail = resp.json().await?;

    let (subject, from) = match &detail.payload {
        Some(payload) => (
            get_header(&payload.headers, "Subject"),
            get_header(&payload.headers, "From"),
        ),
        None => (String::new(), String::new()),
    };
    let (from_name, from_email) = split_from(&from);

    let body = detail
        .payload
        .as_ref()
        .and_then(extract_body)
        .unwrap_or_default();

    Ok(FetchedEmail {
        id: detail.id,
        thread_id: detail.thread_id,
        subject,
        from_email,
        from_name,
        body,
        received_at: parse_internal_date(&detail.internal_date),
    })
}

/// Send a plain-text message from the connected mailbox. Returns the new
/// Gmail message id.
pub async fn send_message(
    client: &reqwest::Client,
    access_token: &str,
    from: &str,
    to: &str,
    subject: &str,
    body: &str,
) -> Result<String, EmailError> {
    use base64::Engine;

    let raw = format!(
        "From: {from}\r\nTo: {to}\r\nSubject: {subject}\r\n\
         MIME-Version: 1.0\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\n\r\n{body}"
    );
    let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw);

    let resp = send_with_retry(
        client
            .post(SEND_URL)
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "raw": encoded })),
        &RetryPolicy::default(),
    )
    .await?;

    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(EmailError::AuthExpired);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(EmailError::Api {
            status: status.as_u16(),
            message: body,
        });
    }

    let sent: MessageStub = resp.json().await?;
    Ok(sent.id)
}

fn get_header(headers: &[Header], name: &str) -> String {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
        .unwrap_or_default()
}

/// `"Jane Doe <jane@acme.com>"` → `("Jane Doe", "jane@acme.com")`.
/// A bare address yields an empty display name.
pub fn split_from(from: &str) -> (String, String) {
    if let (Some(lt), Some(gt)) = (from.find('<'), from.rfind('>')) {
        if lt < gt {
            let email = from[lt + 1..gt].trim().to_string();
            let name = from[..lt].trim().trim_matches('"').trim().to_string();
            return (name, email);
        }
    }
    (String::new(), from.trim().to_string())
}

/// Gmail's internalDate is epoch milliseconds as a string.
fn parse_internal_date(raw: &str) -> DateTime<Utc> {
    raw.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

// ============================================================================
// MIME body extraction
// ============================================================================

/// Pull the best text body out of a message payload.
///
/// Precedence: the payload's own body data, then a top-level text/plain
/// part, then text/html with tags stripped, then a recursive walk of
/// nested multipart containers.
fn extract_body(payload: &Payload) -> Option<String> {
    if let Some(data) = payload.body.as_ref().and_then(|b| b.data.as_deref()) {
        if let Some(text) = decode_url_safe_base64(data) {
            if !text.is_empty() {
                return Some(text);
            }
        }
    }

    for part in &payload.parts {
        if part.mime_type == "text/plain" {
            if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
                if let Some(text) = decode_url_safe_base64(data) {
                    return Some(text);
                }
            }
        }
    }

    for part in &payload.parts {
        if part.mime_type == "text/html" {
            if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
                if let Some(html) = decode_url_safe_base64(data) {
                    return Some(strip_html(&html));
                }
            }
        }
    }

    for part in &payload.parts {
        if !part.parts.is_empty() {
            if let Some(text) = extract_body(part) {
                return Some(text);
            }
        }
    }

    None
}

/// Strip tags and unescape non-breaking spaces from an HTML body.
pub fn strip_html(html: &str) -> String {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    let tags = TAGS.get_or_init(|| Regex::new(r"<[^>]*>").unwrap());
    tags.replace_all(html, "").replace("&nbsp;", " ")
}

/// Decode URL-safe base64 (no padding) as used by the Gmail API.
fn decode_url_safe_base64(data: &str) -> Option<String> {
    use base64::Engine;
    match base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(data) {
        Ok(bytes) => String::from_utf8(bytes).ok(),
        Err(_) => None,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn b64(text: &str) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(text)
    }

    #[test]
    fn message_list_deserializes() {
        let json = r#"{
            "messages": [
                {"id": "msg1", "threadId": "thread1"},
                {"id": "msg2", "threadId": "thread2"}
            ],
            "resultSizeEstimate": 2
        }"#;

        let resp: MessageListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.messages.len(), 2);
        assert_eq!(resp.messages[0].id, "msg1");
        assert_eq!(resp.messages[1].thread_id, "thread2");
    }

    #[test]
    fn empty_inbox_deserializes() {
        let resp: MessageListResponse =
            serde_json::from_str(r#"{"resultSizeEstimate": 0}"#).unwrap();
        assert!(resp.messages.is_empty());
    }

    #[test]
    fn split_from_with_display_name() {
        let (name, email) = split_from("Budi Santoso <budi@kimiafarma.co.id>");
        assert_eq!(name, "Budi Santoso");
        assert_eq!(email, "budi@kimiafarma.co.id");
    }

    #[test]
    fn split_from_bare_address() {
        let (name, email) = split_from("purchasing@acme.com");
        assert_eq!(name, "");
        assert_eq!(email, "purchasing@acme.com");
    }

    #[test]
    fn split_from_quoted_name() {
        let (name, email) = split_from("\"Procurement, Dept\" <po@acme.com>");
        assert_eq!(name, "Procurement, Dept");
        assert_eq!(email, "po@acme.com");
    }

    #[test]
    fn body_prefers_plain_text_part() {
        let json = format!(
            r#"{{
                "mimeType": "multipart/alternative",
                "headers": [],
                "parts": [
                    {{"mimeType": "text/html", "body": {{"data": "{}"}}}},
                    {{"mimeType": "text/plain", "body": {{"data": "{}"}}}}
                ]
            }}"#,
            b64("<p>hello</p>"),
            b64("hello plain")
        );
        let payload: Payload = serde_json::from_str(&json).unwrap();
        assert_eq!(extract_body(&payload).unwrap(), "hello plain");
    }

    #[test]
    fn body_falls_back_to_stripped_html() {
        let json = format!(
            r#"{{
                "mimeType": "multipart/alternative",
                "headers": [],
                "parts": [
                    {{"mimeType": "text/html", "body": {{"data": "{}"}}}}
                ]
            }}"#,
            b64("<p>Need&nbsp;150 KG</p><br/>")
        );
        let payload: Payload = serde_json::from_str(&json).unwrap();
        assert_eq!(extract_body(&payload).unwrap(), "Need 150 KG");
    }

    #[test]
    fn body_recurses_into_nested_multipart() {
        let json = format!(
            r#"{{
                "mimeType": "multipart/mixed",
                "headers": [],
                "parts": [
                    {{
                        "mimeType": "multipart/alternative",
                        "parts": [
                            {{"mimeType": "text/plain", "body": {{"data": "{}"}}}}
                        ]
                    }}
                ]
            }}"#,
            b64("nested body")
        );
        let payload: Payload = serde_json::from_str(&json).unwrap();
        assert_eq!(extract_body(&payload).unwrap(), "nested body");
    }

    #[test]
    fn body_uses_direct_data_when_present() {
        let json = format!(
            r#"{{"mimeType": "text/plain", "headers": [], "body": {{"data": "{}"}}}}"#,
            b64("direct")
        );
        let payload: Payload = serde_json::from_str(&json).unwrap();
        assert_eq!(extract_body(&payload).unwrap(), "direct");
    }

    #[test]
    fn strip_html_removes_tags_and_nbsp() {
        assert_eq!(
            strip_html("<div>COA&nbsp;&amp; MSDS <b>required</b></div>"),
            "COA &amp; MSDS required"
        );
    }

    #[test]
    fn internal_date_parses_epoch_millis() {
        let dt = parse_internal_date("1700000000000");
        assert_eq!(dt.timestamp(), 1_700_000_000);
    }
}
