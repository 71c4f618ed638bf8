//! The inbox sync pipeline: refresh the connection token, list unread
//! messages, then fetch / parse / persist in concurrent batches of five.
//! Each message lands as an inbox row; the ones the parser recognizes
//! also become an inquiry plus its derived reminders, all in one
//! transaction keyed on the Gmail message id.

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::{
    ensure_access_token, gmail,
    parse::{self, EmailParseRequest, ParserConfig},
    EmailError,
};
use crate::{database::Database, models::GmailConnection, utils::next_document_number_in_tx};

const MAX_MESSAGES: u32 = 50;
const BATCH_SIZE: usize = 5;

#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    pub processed_count: u32,
    pub new_inquiries_count: u32,
    pub total_messages: u32,
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    inquiry: bool,
}

/// Run one sync pass for the given user's connected mailbox.
pub async fn sync_inbox(db: &Database, user_id: Uuid) -> Result<SyncReport, EmailError> {
    let connection = sqlx::query_as::<_, GmailConnection>(
        "SELECT * FROM gmail_connections WHERE user_id = $1 AND is_connected = true",
    )
    .bind(user_id)
    .fetch_optional(db)
    .await?
    .ok_or(EmailError::NotConnected)?;

    let client = reqwest::Client::new();
    let access_token = ensure_access_token(db, &client, &connection).await?;

    let stubs = gmail::list_unread(&client, &access_token, MAX_MESSAGES).await?;
    let parser_config = ParserConfig::from_env();

    let mut report = SyncReport {
        total_messages: stubs.len() as u32,
        ..Default::default()
    };

    for batch in stubs.chunks(BATCH_SIZE) {
        let mut tasks = JoinSet::new();
        for stub in batch {
            let db = db.clone();
            let client = client.clone();
            let token = access_token.clone();
            let config = parser_config.clone();
            let connection = connection.clone();
            let message_id = stub.id.clone();
            tasks.spawn(async move {
                process_message(&db, &client, &token, &connection, config.as_ref(), &message_id)
                    .await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(Some(outcome))) => {
                    report.processed_count += 1;
                    if outcome.inquiry {
                        report.new_inquiries_count += 1;
                    }
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => log::error!("sync: message failed: {}", e),
                Err(e) => log::error!("sync: task panicked: {}", e),
            }
        }
    }

    sqlx::query("UPDATE gmail_connections SET last_sync = NOW() WHERE id = $1")
        .bind(connection.id)
        .execute(db)
        .await?;

    Ok(report)
}

/// Fetch, deduplicate, parse and persist a single message.
/// Returns None when the message was already seen.
async fn process_message(
    db: &Database,
    client: &reqwest::Client,
    access_token: &str,
    connection: &GmailConnection,
    parser_config: Option<&ParserConfig>,
    message_id: &str,
) -> Result<Option<Outcome>, EmailError> {
    let email = gmail::fetch_message(client, access_token, message_id).await?;

    let existing: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM crm_email_inbox WHERE gmail_message_id = $1")
            .bind(&email.id)
            .fetch_optional(db)
            .await?;
    if existing.is_some() {
        return Ok(None);
    }

    // A parse failure files the email as a plain inbox message
    let parsed = match parser_config {
        Some(config) => {
            let request = EmailParseRequest {
                subject: email.subject.clone(),
                body: email.body.clone(),
                from_email: email.from_email.clone(),
                from_name: email.from_name.clone(),
            };
            match parse::parse_email(db, client, config, &request).await {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    log::warn!("sync: parse failed for {}: {}", email.id, e);
                    None
                }
            }
        }
        None => None,
    };

    let is_inquiry = parsed.as_ref().map(parse::is_inquiry).unwrap_or(false);

    let mut tx = db.begin().await?;

    let inbox_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO crm_email_inbox (
            gmail_connection_id, gmail_message_id, gmail_thread_id, subject,
            from_email, from_name, body_text, received_at, is_processed, is_inquiry
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
        RETURNING id
        "#,
    )
    .bind(connection.id)
    .bind(&email.id)
    .bind(&email.thread_id)
    .bind(&email.subject)
    .bind(&email.from_email)
    .bind(&email.from_name)
    .bind(&email.body)
    .bind(email.received_at)
    .bind(is_inquiry)
    .fetch_one(&mut *tx)
    .await?;

    if let (true, Some(parsed)) = (is_inquiry, parsed.as_ref()) {
        // Taken inside the transaction: concurrent batch tasks serialize on
        // the series lock instead of colliding on the UNIQUE constraint.
        let number =
            next_document_number_in_tx(&mut tx, "crm_inquiries", "inquiry_number", "INQ").await?;

        let inquiry_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO crm_inquiries (
                inquiry_number, inquiry_date, product_name, quantity,
                supplier_name, supplier_country, company_name, contact_person,
                contact_email, contact_phone, email_subject, status, priority,
                delivery_date_expected, ai_confidence_score, source,
                source_email_id, remarks, assigned_to, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'new', $12,
                    NULL, $13, 'email', $14, $15, $16, $16)
            RETURNING id
            "#,
        )
        .bind(&number)
        .bind(email.received_at.date_naive())
        .bind(if parsed.product_name.is_empty() {
            "Unknown Product"
        } else {
            parsed.product_name.as_str()
        })
        .bind(&parsed.quantity)
        .bind(&parsed.supplier_name)
        .bind(&parsed.supplier_country)
        .bind(&parsed.company_name)
        .bind(&parsed.contact_person)
        .bind(&email.from_email)
        .bind(&parsed.contact_phone)
        .bind(&email.subject)
        .bind(&parsed.urgency)
        .bind(parsed.confidence_score)
        .bind(inbox_id)
        .bind(&parsed.remarks)
        .bind(connection.user_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE crm_email_inbox SET converted_to_inquiry = $2 WHERE id = $1")
            .bind(inbox_id)
            .bind(inquiry_id)
            .execute(&mut *tx)
            .await?;

        for spec in derive_reminders(
            parsed.coa_requested,
            parsed.msds_requested,
            parsed.sample_requested,
            parsed.price_requested,
        ) {
            sqlx::query(
                r#"
                INSERT INTO crm_reminders (
                    inquiry_id, reminder_type, title, due_date, assigned_to, created_by
                )
                VALUES ($1, $2, $3, $4, $5, $5)
                "#,
            )
            .bind(inquiry_id)
            .bind(spec.reminder_type)
            .bind(spec.title)
            .bind(Utc::now() + chrono::Duration::days(spec.due_in_days))
            .bind(connection.user_id)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;

    Ok(Some(Outcome { inquiry: is_inquiry }))
}

#[derive(Debug, PartialEq, Eq)]
pub struct ReminderSpec {
    pub reminder_type: &'static str,
    pub title: &'static str,
    pub due_in_days: i64,
}

/// One follow-up task per requested document, with short due dates:
/// certificates in two days, samples in three, prices next day.
pub fn derive_reminders(coa: bool, msds: bool, sample: bool, price: bool) -> Vec<ReminderSpec> {
    let mut reminders = Vec::new();
    if coa {
        reminders.push(ReminderSpec {
            reminder_type: "send_coa",
            title: "Send COA to customer",
            due_in_days: 2,
        });
    }
    if msds {
        reminders.push(ReminderSpec {
            reminder_type: "send_msds",
            title: "Send MSDS to customer",
            due_in_days: 2,
        });
    }
    if sample {
        reminders.push(ReminderSpec {
            reminder_type: "send_sample",
            title: "Send sample to customer",
            due_in_days: 3,
        });
    }
    if price {
        reminders.push(ReminderSpec {
            reminder_type: "send_price",
            title: "Send price quote to customer",
            due_in_days: 1,
        });
    }
    reminders
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_flags_no_reminders() {
        assert!(derive_reminders(false, false, false, false).is_empty());
    }

    #[test]
    fn each_flag_yields_one_reminder() {
        let reminders = derive_reminders(true, true, true, true);
        assert_eq!(reminders.len(), 4);
        assert_eq!(reminders[0].reminder_type, "send_coa");
        assert_eq!(reminders[1].reminder_type, "send_msds");
        assert_eq!(reminders[2].reminder_type, "send_sample");
        assert_eq!(reminders[3].reminder_type, "send_price");
    }

    #[test]
    fn price_quote_is_due_next_day() {
        let reminders = derive_reminders(false, false, false, true);
        assert_eq!(reminders[0].due_in_days, 1);
        assert_eq!(reminders[0].title, "Send price quote to customer");
    }

    #[test]
    fn sample_gets_the_longest_window() {
        let reminders = derive_reminders(true, false, true, false);
        let sample = reminders
            .iter()
            .find(|r| r.reminder_type == "send_sample")
            .unwrap();
        assert_eq!(sample.due_in_days, 3);
    }
}
