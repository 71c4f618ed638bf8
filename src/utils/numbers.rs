//! Month-scoped document numbers: GRN-202608-0001, INQ-202608-0001, ...

use chrono::{Datelike, Utc};
use sqlx::{Postgres, Transaction};

use crate::database::Database;

/// Next number for a document series. Looks at the highest existing number
/// under the current month's prefix and increments its suffix.
///
/// `table` and `column` are internal constants, never user input.
pub async fn next_document_number(
    db: &Database,
    table: &str,
    column: &str,
    prefix: &str,
) -> Result<String, sqlx::Error> {
    let month_prefix = month_prefix(prefix);

    let latest: Option<String> = sqlx::query_scalar(&latest_query(table, column))
        .bind(format!("{}%", month_prefix))
        .fetch_optional(db)
        .await?;

    Ok(bump(&month_prefix, latest.as_deref()))
}

/// Same series counter, taken inside an open transaction. A prefix-keyed
/// advisory lock serializes concurrent writers until the transaction ends,
/// so parallel sync tasks cannot derive the same suffix.
pub async fn next_document_number_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    column: &str,
    prefix: &str,
) -> Result<String, sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(prefix)
        .execute(&mut **tx)
        .await?;

    let month_prefix = month_prefix(prefix);

    let latest: Option<String> = sqlx::query_scalar(&latest_query(table, column))
        .bind(format!("{}%", month_prefix))
        .fetch_optional(&mut **tx)
        .await?;

    Ok(bump(&month_prefix, latest.as_deref()))
}

fn month_prefix(prefix: &str) -> String {
    let now = Utc::now();
    format!("{}-{:04}{:02}-", prefix, now.year(), now.month())
}

fn latest_query(table: &str, column: &str) -> String {
    format!("SELECT {column} FROM {table} WHERE {column} LIKE $1 ORDER BY {column} DESC LIMIT 1")
}

fn bump(month_prefix: &str, latest: Option<&str>) -> String {
    let next = latest.and_then(parse_suffix).map(|s| s + 1).unwrap_or(1);
    format!("{}{:04}", month_prefix, next)
}

fn parse_suffix(number: &str) -> Option<u32> {
    number.rsplit('-').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    #[test]
    fn suffix_parses_from_full_number() {
        assert_eq!(parse_suffix("GRN-202608-0042"), Some(42));
        assert_eq!(parse_suffix("INQ-202601-0001"), Some(1));
    }

    #[test]
    fn suffix_rejects_garbage() {
        assert_eq!(parse_suffix("GRN-202608-"), None);
        assert_eq!(parse_suffix("not a number"), None);
    }

    #[test]
    fn bump_starts_series_and_increments() {
        assert_eq!(bump("INQ-202608-", None), "INQ-202608-0001");
        assert_eq!(bump("INQ-202608-", Some("INQ-202608-0041")), "INQ-202608-0042");
    }

    #[sqlx::test]
    async fn concurrent_writers_get_distinct_numbers(db: PgPool) {
        let write = |db: PgPool| async move {
            let mut tx = db.begin().await.unwrap();
            let number =
                next_document_number_in_tx(&mut tx, "crm_inquiries", "inquiry_number", "INQ")
                    .await
                    .unwrap();
            sqlx::query(
                "INSERT INTO crm_inquiries (inquiry_number, product_name) VALUES ($1, 'Sodium Hypophosphite')",
            )
            .bind(&number)
            .execute(&mut *tx)
            .await
            .unwrap();
            tx.commit().await.unwrap();
            number
        };

        let (a, b) = tokio::join!(write(db.clone()), write(db.clone()));
        assert_ne!(a, b);
    }
}
