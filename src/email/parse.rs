//! Structure a pharmaceutical inquiry email via a hosted chat-completion
//! endpoint, with a sender-domain company cache in front of it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{send_with_retry, EmailError, RetryPolicy};
use crate::database::Database;

const SYSTEM_PROMPT: &str = "You are an AI assistant specialized in parsing pharmaceutical industry inquiry emails. Extract key information from emails written in Indonesian or English.

Your task is to analyze the email and extract:
1. Product name (e.g., \"Sodium Hypophosphite Pharma Grade IHS\")
2. Quantity with units (e.g., \"150 KG\", \"2 MT\")
3. Supplier/Manufacturer name if mentioned
4. Country of origin if mentioned (Japan, China, India, etc.)
5. Company name from signature or context
6. Contact person name
7. Whether COA (Certificate of Analysis) is requested
8. Whether MSDS (Material Safety Data Sheet) is requested
9. Whether sample is requested
10. Whether price quotation is requested
11. Urgency level based on keywords like \"urgent\", \"ASAP\", \"segera\", \"mendesak\"
12. Any additional remarks or special requirements
13. Phone/WhatsApp number if present
14. Detect the primary language (Indonesian or English)

Return a JSON object with the extracted information. If information is not found, use null or false for boolean fields.";

/// Mail providers whose domains say nothing about the sender's company.
const FREE_MAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "yahoo.com",
    "yahoo.co.id",
    "hotmail.com",
    "outlook.com",
    "live.com",
    "icloud.com",
    "aol.com",
    "protonmail.com",
];

#[derive(Debug, Clone)]
pub struct ParserConfig {
    pub api_key: String,
    pub chat_url: String,
    pub model: String,
}

impl ParserConfig {
    /// None when no API key is configured; the sync pipeline then files
    /// every email as a plain inbox message.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").ok()?;
        Some(Self {
            api_key,
            chat_url: std::env::var("OPENAI_CHAT_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string()),
            model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailParseRequest {
    pub subject: String,
    pub body: String,
    pub from_email: String,
    #[serde(default)]
    pub from_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParsedInquiry {
    pub product_name: String,
    pub quantity: String,
    pub supplier_name: Option<String>,
    pub supplier_country: Option<String>,
    pub company_name: String,
    pub contact_person: Option<String>,
    pub contact_email: String,
    pub contact_phone: Option<String>,
    pub coa_requested: bool,
    pub msds_requested: bool,
    pub sample_requested: bool,
    pub price_requested: bool,
    pub urgency: String,
    pub remarks: Option<String>,
    pub confidence: String,
    pub confidence_score: f32,
    pub detected_language: String,
    pub company_from_cache: bool,
}

/// An email counts as a sales inquiry when the model found a plausible
/// product name, or was at least moderately confident overall.
pub fn is_inquiry(parsed: &ParsedInquiry) -> bool {
    parsed.product_name.chars().count() > 2 || parsed.confidence_score >= 0.5
}

/// Full parse step: domain-cache lookup, completion call, normalization,
/// cache write-back.
pub async fn parse_email(
    db: &Database,
    client: &reqwest::Client,
    config: &ParserConfig,
    request: &EmailParseRequest,
) -> Result<ParsedInquiry, EmailError> {
    let domain = email_domain(&request.from_email);
    let cached_company = match domain.as_deref() {
        Some(d) if !is_free_mail_domain(d) => lookup_domain(db, d).await?,
        _ => None,
    };

    let raw = call_completion(client, config, request).await?;
    let mut parsed = normalize(&raw, &request.from_email, &request.from_name);

    if let Some(company) = cached_company {
        parsed.company_name = company;
        parsed.company_from_cache = true;
    } else if let Some(d) = domain.as_deref() {
        if !is_free_mail_domain(d) && parsed.company_name != "Unknown" {
            store_domain(db, d, &parsed.company_name).await?;
        }
    }

    Ok(parsed)
}

async fn call_completion(
    client: &reqwest::Client,
    config: &ParserConfig,
    request: &EmailParseRequest,
) -> Result<Value, EmailError> {
    let user_prompt = build_user_prompt(request);

    let body = serde_json::json!({
        "model": config.model,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            { "role": "user", "content": user_prompt }
        ],
        "temperature": 0.3,
        "response_format": { "type": "json_object" }
    });

    let resp = send_with_retry(
        client
            .post(&config.chat_url)
            .bearer_auth(&config.api_key)
            .json(&body),
        &RetryPolicy::default(),
    )
    .await?;

    let status = resp.status();
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(EmailError::Api {
            status: status.as_u16(),
            message,
        });
    }

    let completion: Value = resp.json().await?;
    let content = completion["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| EmailError::Api {
            status: status.as_u16(),
            message: "completion had no message content".to_string(),
        })?;

    Ok(serde_json::from_str(content)?)
}

fn build_user_prompt(request: &EmailParseRequest) -> String {
    format!(
        "Parse this pharmaceutical inquiry email:\n\n\
         SUBJECT: {}\n\
         FROM: {} <{}>\n\n\
         BODY:\n{}\n\n\
         Respond with a JSON object containing the extracted information.",
        request.subject, request.from_name, request.from_email, request.body
    )
}

// ============================================================================
// Normalization — the model answers in whichever key style it likes
// ============================================================================

/// Map the model's JSON onto the typed payload, accepting camelCase,
/// snake_case and short-key spellings for every field.
pub fn normalize(ai: &Value, from_email: &str, from_name: &str) -> ParsedInquiry {
    let contact_person = pick_str(ai, &["contactPerson", "contact_person", "contact"])
        .or_else(|| (!from_name.is_empty()).then(|| from_name.to_string()));
    let (confidence, confidence_score) = confidence_of(ai);

    ParsedInquiry {
        product_name: pick_str(ai, &["productName", "product_name"]).unwrap_or_default(),
        quantity: pick_str(ai, &["quantity"]).unwrap_or_default(),
        supplier_name: pick_str(ai, &["supplierName", "supplier_name", "supplier"]),
        supplier_country: pick_str(ai, &["supplierCountry", "supplier_country", "country"]),
        company_name: pick_str(ai, &["companyName", "company_name", "company"])
            .unwrap_or_else(|| "Unknown".to_string()),
        contact_person,
        contact_email: from_email.to_string(),
        contact_phone: pick_str(ai, &["contactPhone", "contact_phone", "phone", "whatsapp"]),
        coa_requested: pick_bool(ai, &["coaRequested", "coa_requested", "coa"]),
        msds_requested: pick_bool(ai, &["msdsRequested", "msds_requested", "msds"]),
        sample_requested: pick_bool(ai, &["sampleRequested", "sample_requested", "sample"]),
        // A quotation request is assumed unless the model says otherwise
        price_requested: pick_bool_or(ai, &["priceRequested", "price_requested", "price"], true),
        urgency: pick_str(ai, &["urgency"]).unwrap_or_else(|| "medium".to_string()),
        remarks: pick_str(ai, &["remarks", "notes", "additional_info"]),
        confidence,
        confidence_score,
        detected_language: pick_str(ai, &["detectedLanguage", "detected_language", "language"])
            .unwrap_or_else(|| "unknown".to_string()),
        company_from_cache: false,
    }
}

fn pick_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        value
            .get(k)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

fn pick_bool(value: &Value, keys: &[&str]) -> bool {
    pick_bool_or(value, keys, false)
}

fn pick_bool_or(value: &Value, keys: &[&str], default: bool) -> bool {
    keys.iter()
        .find_map(|k| value.get(k).and_then(Value::as_bool))
        .unwrap_or(default)
}

/// Confidence may come back as a label or a number; produce both. A reply
/// with no recognizable confidence counts as low so it cannot clear the
/// inquiry gate on its own.
fn confidence_of(value: &Value) -> (String, f32) {
    for key in ["confidenceScore", "confidence_score", "confidence"] {
        match value.get(key) {
            Some(Value::Number(n)) => {
                let score = n.as_f64().unwrap_or(0.0).clamp(0.0, 1.0) as f32;
                return (label_for_score(score).to_string(), score);
            }
            Some(Value::String(label)) => {
                let label = label.to_lowercase();
                let score = match label.as_str() {
                    "high" => 0.9,
                    "medium" => 0.6,
                    "low" => 0.3,
                    _ => continue,
                };
                return (label, score);
            }
            _ => continue,
        }
    }
    ("low".to_string(), 0.0)
}

fn label_for_score(score: f32) -> &'static str {
    if score >= 0.75 {
        "high"
    } else if score >= 0.5 {
        "medium"
    } else {
        "low"
    }
}

pub fn email_domain(address: &str) -> Option<String> {
    let (_, domain) = address.rsplit_once('@')?;
    Some(domain.trim().to_lowercase()).filter(|d| d.contains('.'))
}

pub fn is_free_mail_domain(domain: &str) -> bool {
    FREE_MAIL_DOMAINS.contains(&domain)
}

// ============================================================================
// Domain cache
// ============================================================================

async fn lookup_domain(db: &Database, domain: &str) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        UPDATE email_domain_mappings
        SET hit_count = hit_count + 1, updated_at = NOW()
        WHERE domain = $1
        RETURNING company_name
        "#,
    )
    .bind(domain)
    .fetch_optional(db)
    .await
}

async fn store_domain(db: &Database, domain: &str, company_name: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO email_domain_mappings (domain, company_name)
        VALUES ($1, $2)
        ON CONFLICT (domain)
        DO UPDATE SET company_name = EXCLUDED.company_name, updated_at = NOW()
        "#,
    )
    .bind(domain)
    .bind(company_name)
    .execute(db)
    .await?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_camel_case_response() {
        let ai = json!({
            "productName": "Sodium Hypophosphite Pharma Grade",
            "quantity": "150 KG",
            "supplierName": "Nippon Chemical",
            "supplierCountry": "Japan",
            "companyName": "PT Kimia Sejahtera",
            "contactPerson": "Budi",
            "coaRequested": true,
            "msdsRequested": false,
            "sampleRequested": true,
            "priceRequested": true,
            "urgency": "high",
            "confidence": "high",
            "detectedLanguage": "Indonesian"
        });

        let parsed = normalize(&ai, "budi@kimia.co.id", "Budi Santoso");
        assert_eq!(parsed.product_name, "Sodium Hypophosphite Pharma Grade");
        assert_eq!(parsed.company_name, "PT Kimia Sejahtera");
        assert_eq!(parsed.contact_person.as_deref(), Some("Budi"));
        assert_eq!(parsed.contact_email, "budi@kimia.co.id");
        assert!(parsed.coa_requested);
        assert!(!parsed.msds_requested);
        assert!(parsed.sample_requested);
        assert_eq!(parsed.confidence, "high");
        assert!((parsed.confidence_score - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn normalize_snake_case_response() {
        let ai = json!({
            "product_name": "Paracetamol BP",
            "quantity": "2 MT",
            "company_name": "Acme Pharma",
            "coa_requested": true,
            "confidence_score": 0.8,
            "language": "English"
        });

        let parsed = normalize(&ai, "po@acmepharma.com", "");
        assert_eq!(parsed.product_name, "Paracetamol BP");
        assert_eq!(parsed.company_name, "Acme Pharma");
        assert!(parsed.coa_requested);
        assert_eq!(parsed.detected_language, "English");
        assert_eq!(parsed.confidence, "high");
        assert!((parsed.confidence_score - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn normalize_fills_defaults() {
        let parsed = normalize(&json!({}), "someone@corp.com", "");
        assert_eq!(parsed.product_name, "");
        assert_eq!(parsed.company_name, "Unknown");
        assert_eq!(parsed.urgency, "medium");
        assert!(parsed.price_requested); // default-on
        assert!(!parsed.coa_requested);
        assert!(parsed.contact_person.is_none());
        assert_eq!(parsed.confidence, "low");
        assert_eq!(parsed.confidence_score, 0.0);
    }

    #[test]
    fn missing_confidence_does_not_open_an_inquiry() {
        // A newsletter the model parses without product or confidence must
        // stay a plain inbox row, not become an "Unknown Product" inquiry.
        let parsed = normalize(&json!({"detectedLanguage": "English"}), "news@corp.com", "");
        assert!(parsed.confidence_score < 0.5);
        assert!(!is_inquiry(&parsed));

        let labeled = normalize(&json!({"confidence": "gibberish"}), "news@corp.com", "");
        assert!(!is_inquiry(&labeled));
    }

    #[test]
    fn normalize_falls_back_to_sender_name() {
        let parsed = normalize(&json!({}), "jane@corp.com", "Jane Doe");
        assert_eq!(parsed.contact_person.as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn inquiry_gate_uses_product_name_or_confidence() {
        let mut parsed = normalize(&json!({}), "a@b.com", "");
        parsed.confidence_score = 0.3;
        assert!(!is_inquiry(&parsed));

        parsed.product_name = "Ibuprofen".to_string();
        assert!(is_inquiry(&parsed));

        parsed.product_name.clear();
        parsed.confidence_score = 0.5;
        assert!(is_inquiry(&parsed));
    }

    #[test]
    fn two_char_product_name_is_not_enough() {
        let mut parsed = normalize(&json!({}), "a@b.com", "");
        parsed.confidence_score = 0.0;
        parsed.product_name = "ok".to_string();
        assert!(!is_inquiry(&parsed));
    }

    #[test]
    fn domain_extraction() {
        assert_eq!(email_domain("jane@Acme.COM"), Some("acme.com".to_string()));
        assert_eq!(email_domain("not-an-address"), None);
        // dotted but @-less strings must not reach the domain cache
        assert_eq!(email_domain("no.reply.invalid"), None);
        assert_eq!(email_domain("jane@localhost"), None);
    }

    #[test]
    fn free_mail_domains_are_flagged() {
        assert!(is_free_mail_domain("gmail.com"));
        assert!(!is_free_mail_domain("kimiafarma.co.id"));
    }

    #[test]
    fn user_prompt_carries_email_fields() {
        let req = EmailParseRequest {
            subject: "Inquiry Sodium Hypophosphite".to_string(),
            body: "Mohon penawaran 150 KG".to_string(),
            from_email: "budi@kimia.co.id".to_string(),
            from_name: "Budi".to_string(),
        };
        let prompt = build_user_prompt(&req);
        assert!(prompt.contains("SUBJECT: Inquiry Sodium Hypophosphite"));
        assert!(prompt.contains("Budi <budi@kimia.co.id>"));
        assert!(prompt.contains("Mohon penawaran 150 KG"));
    }
}
