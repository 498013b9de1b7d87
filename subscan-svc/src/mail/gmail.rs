//! Gmail REST driver
//!
//! Lists with a transactional-focused query, fetches metadata headers only,
//! and decodes full bodies from the base64url part tree. Requests are paced
//! by a token bucket, retried with exponential backoff plus jitter on
//! 429/403/5xx, and bounded by both the per-operation timeout and the chunk
//! deadline, whichever is tighter.

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use governor::{Quota, RateLimiter};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use crate::mail::normalize::parse_address;
use crate::mail::{DriverError, DriverResult, EmailBody, EmailMeta, ListPage, MailboxDriver};
use crate::models::{DriverTimeouts, QueryMode, ScanOptions};
use crate::resolve::domains::domain_of_email;

const GMAIL_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Attachment parts larger than this are never fetched
const ATTACHMENT_FETCH_MAX: i64 = 250 * 1024;

/// Retry attempts for transient provider failures
const MAX_ATTEMPTS: u32 = 3;

/// Headers requested in metadata fetches
const METADATA_HEADERS: &[&str] = &[
    "From",
    "Subject",
    "Date",
    "Reply-To",
    "Return-Path",
    "List-Unsubscribe",
    "List-Id",
    "Precedence",
    "Auto-Submitted",
];

/// Phrase disjunction appended to the transactional query
const TRANSACTIONAL_PHRASES: &[&str] = &[
    "\"receipt\"",
    "\"invoice\"",
    "\"payment\"",
    "\"subscription\"",
    "\"renewal\"",
    "\"billed\"",
    "\"charged\"",
    "\"your order\"",
    "\"trial\"",
];

/// Build the Gmail search query for the configured scan shape
pub fn build_query(options: &ScanOptions) -> String {
    let mut query = format!("in:anywhere newer_than:{}d", options.days_back);
    match options.query_mode {
        QueryMode::Transactions => {
            if !options.include_promotions {
                query.push_str(" -category:promotions -category:social");
            }
            query.push_str(&format!(" ({})", TRANSACTIONAL_PHRASES.join(" OR ")));
        }
        QueryMode::Broad => {
            query.push_str(" -in:chats");
            if !options.include_promotions {
                query.push_str(" -category:promotions -category:social");
            }
        }
    }
    query
}

// -- wire types ------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    id: String,
    #[serde(default)]
    snippet: String,
    #[serde(rename = "internalDate")]
    internal_date: Option<String>,
    payload: Option<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(rename = "mimeType", default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<WireHeader>,
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct WireHeader {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct PartBody {
    #[serde(default)]
    size: i64,
    data: Option<String>,
    #[serde(rename = "attachmentId")]
    attachment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AttachmentResponse {
    data: Option<String>,
}

/// Account summary from the Gmail profile endpoint
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailProfile {
    pub email_address: String,
    #[serde(default)]
    pub messages_total: i64,
}

/// Verify a token by fetching the account profile
pub async fn fetch_profile(access_token: &str, timeout_ms: u64) -> DriverResult<GmailProfile> {
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()
        .expect("Failed to build HTTP client");

    let response = client
        .get(format!("{GMAIL_BASE}/profile"))
        .bearer_auth(access_token)
        .timeout(Duration::from_millis(timeout_ms))
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                DriverError::Timeout
            } else {
                DriverError::Network(e.to_string())
            }
        })?;

    match response.status().as_u16() {
        200..=299 => response
            .json::<GmailProfile>()
            .await
            .map_err(|e| DriverError::Protocol(format!("bad profile body: {e}"))),
        401 => Err(DriverError::Auth("access token rejected".into())),
        s => Err(DriverError::Status(s)),
    }
}

// -- driver ----------------------------------------------------------------

/// Gmail REST mailbox driver
pub struct GmailDriver {
    client: Client,
    access_token: String,
    query: String,
    page_size: u32,
    timeouts: DriverTimeouts,
    /// Chunk deadline; operations never outlive it
    deadline_at: Option<Instant>,
    /// Request pacing: Gmail quota units are generous but bursty 429s are not
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl GmailDriver {
    /// Create a driver for one chunk of one session
    pub fn new(access_token: String, options: &ScanOptions, timeouts: DriverTimeouts) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");

        let rate_limiter = RateLimiter::direct(Quota::per_second(
            NonZeroU32::new(10).expect("10 is non-zero"),
        ));

        Self {
            client,
            access_token,
            query: build_query(options),
            page_size: options.page_size,
            timeouts: timeouts.clamped(),
            deadline_at: None,
            rate_limiter,
        }
    }

    /// Bound every operation by the chunk deadline
    pub fn with_deadline(mut self, deadline_at: Instant) -> Self {
        self.deadline_at = Some(deadline_at);
        self
    }

    /// The query this driver lists with (surfaced in chunk stats)
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Tighter of the per-op timeout and the remaining deadline
    fn effective_timeout(&self, op_ms: u64) -> DriverResult<Duration> {
        let op = Duration::from_millis(op_ms);
        match self.deadline_at {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(DriverError::Timeout);
                }
                Ok(op.min(remaining))
            }
            None => Ok(op),
        }
    }

    /// Issue a GET with pacing, retries and the layered timeout
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        op_ms: u64,
    ) -> DriverResult<T> {
        let mut last_err = DriverError::Timeout;

        for attempt in 1..=MAX_ATTEMPTS {
            let timeout = self.effective_timeout(op_ms)?;
            self.rate_limiter.until_ready().await;

            let response = self
                .client
                .get(url)
                .bearer_auth(&self.access_token)
                .timeout(timeout)
                .send()
                .await;

            let err = match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    match status {
                        200..=299 => {
                            return resp.json::<T>().await.map_err(|e| {
                                DriverError::Protocol(format!("bad response body: {e}"))
                            });
                        }
                        401 => return Err(DriverError::Auth("access token rejected".into())),
                        429 | 403 => DriverError::RateLimited,
                        s => DriverError::Status(s),
                    }
                }
                Err(e) if e.is_timeout() => DriverError::Timeout,
                Err(e) => DriverError::Network(e.to_string()),
            };

            if !err.is_retryable() || attempt == MAX_ATTEMPTS {
                return Err(err);
            }

            let backoff_ms =
                400u64 * 2u64.pow(attempt - 1) + rand::thread_rng().gen_range(0..250);
            let backoff = Duration::from_millis(backoff_ms);
            if let Some(deadline) = self.deadline_at {
                if Instant::now() + backoff >= deadline {
                    return Err(err);
                }
            }
            tracing::debug!(url, attempt, backoff_ms, error = %err, "Retrying Gmail request");
            last_err = err;
            tokio::time::sleep(backoff).await;
        }

        Err(last_err)
    }

    fn meta_from_response(&self, msg: MessageResponse) -> EmailMeta {
        let mut headers = std::collections::HashMap::new();
        if let Some(payload) = &msg.payload {
            for h in &payload.headers {
                headers.insert(h.name.to_lowercase(), h.value.clone());
            }
        }

        let from_raw = headers.get("from").cloned().unwrap_or_default();
        let (_, from_email) = parse_address(&from_raw);
        let from_domain = domain_of_email(&from_email).unwrap_or_default();

        EmailMeta {
            id: msg.id,
            from: from_raw,
            from_email,
            from_domain,
            subject: headers.get("subject").cloned().unwrap_or_default(),
            snippet: msg.snippet,
            date_ms: msg.internal_date.and_then(|d| d.parse::<i64>().ok()),
            headers,
        }
    }

    /// Walk the part tree, decoding inline bodies and collecting
    /// externalized attachment parts small enough to fetch
    fn collect_parts<'a>(
        part: &'a Part,
        text: &mut String,
        html: &mut String,
        attachments: &mut Vec<(&'a str, String)>,
    ) {
        let is_text = part.mime_type.eq_ignore_ascii_case("text/plain");
        let is_html = part.mime_type.eq_ignore_ascii_case("text/html");

        if is_text || is_html {
            if let Some(body) = &part.body {
                if let Some(data) = &body.data {
                    if let Some(decoded) = decode_b64url(data) {
                        if is_text {
                            text.push_str(&decoded);
                            text.push('\n');
                        } else {
                            html.push_str(&decoded);
                        }
                    }
                } else if let Some(aid) = &body.attachment_id {
                    if body.size <= ATTACHMENT_FETCH_MAX {
                        attachments.push((aid.as_str(), part.mime_type.clone()));
                    }
                }
            }
        }

        for child in &part.parts {
            Self::collect_parts(child, text, html, attachments);
        }
    }
}

/// Gmail base64url comes with and without padding depending on the part
fn decode_b64url(data: &str) -> Option<String> {
    let bytes = URL_SAFE
        .decode(data)
        .or_else(|_| URL_SAFE_NO_PAD.decode(data))
        .ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

#[async_trait::async_trait]
impl MailboxDriver for GmailDriver {
    async fn list_page(&self, cursor: Option<&str>) -> DriverResult<ListPage> {
        let mut url = format!(
            "{}/messages?q={}&maxResults={}",
            GMAIL_BASE,
            urlencode(&self.query),
            self.page_size
        );
        if let Some(token) = cursor {
            url.push_str(&format!("&pageToken={}", urlencode(token)));
        }

        let response: ListResponse = self.get_json(&url, self.timeouts.list_ms).await?;

        Ok(ListPage {
            ids: response.messages.into_iter().map(|m| m.id).collect(),
            next_cursor: response.next_page_token,
        })
    }

    async fn fetch_metadata(&self, id: &str) -> DriverResult<EmailMeta> {
        let header_params: String = METADATA_HEADERS
            .iter()
            .map(|h| format!("&metadataHeaders={h}"))
            .collect();
        let url = format!("{}/messages/{}?format=METADATA{}", GMAIL_BASE, id, header_params);

        let response: MessageResponse = self.get_json(&url, self.timeouts.meta_ms).await?;
        Ok(self.meta_from_response(response))
    }

    async fn fetch_full(&self, id: &str) -> DriverResult<EmailBody> {
        let url = format!("{}/messages/{}?format=FULL", GMAIL_BASE, id);
        let response: MessageResponse = self.get_json(&url, self.timeouts.full_ms).await?;

        let mut text = String::new();
        let mut html = String::new();
        let mut attachments = Vec::new();

        if let Some(payload) = &response.payload {
            Self::collect_parts(payload, &mut text, &mut html, &mut attachments);
        }

        // Body parts externalized as attachments get a second fetch
        for (attachment_id, mime_type) in attachments {
            let url = format!(
                "{}/messages/{}/attachments/{}",
                GMAIL_BASE, id, attachment_id
            );
            match self
                .get_json::<AttachmentResponse>(&url, self.timeouts.attach_ms)
                .await
            {
                Ok(att) => {
                    if let Some(decoded) = att.data.as_deref().and_then(decode_b64url) {
                        if mime_type.eq_ignore_ascii_case("text/html") {
                            html.push_str(&decoded);
                        } else {
                            text.push_str(&decoded);
                            text.push('\n');
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(message_id = id, error = %e, "Attachment fetch skipped");
                }
            }
        }

        if text.is_empty() && !html.is_empty() {
            text = crate::mail::normalize::html_to_text(&html);
        }

        Ok(EmailBody { text, html })
    }
}

/// Minimal query-string escaping for the handful of characters Gmail queries
/// contain
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            ' ' => out.push_str("%20"),
            '"' => out.push_str("%22"),
            '#' => out.push_str("%23"),
            '&' => out.push_str("%26"),
            '+' => out.push_str("%2B"),
            ':' => out.push_str("%3A"),
            '?' => out.push_str("%3F"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScanMode;

    #[test]
    fn test_transactional_query_shape() {
        let options = ScanOptions {
            days_back: 90,
            ..ScanOptions::default()
        };
        let q = build_query(&options);
        assert!(q.starts_with("in:anywhere newer_than:90d"));
        assert!(q.contains("-category:promotions"));
        assert!(q.contains("-category:social"));
        assert!(q.contains("\"receipt\" OR \"invoice\""));
    }

    #[test]
    fn test_broad_query_shape() {
        let options = ScanOptions {
            mode: ScanMode::Deep,
            query_mode: QueryMode::Broad,
            days_back: 365,
            include_promotions: true,
            ..ScanOptions::default()
        };
        let q = build_query(&options);
        assert!(q.contains("-in:chats"));
        assert!(!q.contains("-category:promotions"));
        assert!(!q.contains("OR"));
    }

    #[test]
    fn test_decode_b64url_both_paddings() {
        let padded = URL_SAFE.encode("hello world");
        let unpadded = URL_SAFE_NO_PAD.encode("hello world");
        assert_eq!(decode_b64url(&padded).as_deref(), Some("hello world"));
        assert_eq!(decode_b64url(&unpadded).as_deref(), Some("hello world"));
    }

    #[test]
    fn test_urlencode() {
        assert_eq!(urlencode("a b:\"c\""), "a%20b%3A%22c%22");
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(DriverError::RateLimited.is_retryable());
        assert!(DriverError::Status(503).is_retryable());
        assert!(!DriverError::Status(404).is_retryable());
        assert!(!DriverError::Auth("x".into()).is_retryable());
    }
}
