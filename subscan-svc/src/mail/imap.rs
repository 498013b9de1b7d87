//! IMAP mailbox driver
//!
//! Opens INBOX read-only, searches `SINCE now - daysBack`, and pages by uid:
//! the cursor is base64url(`{"uid": lastProcessedUid}`) and a resumed scan
//! sees strictly `uid > lastProcessed`. Headers for a whole page come back
//! in one batch FETCH and are cached, so the metadata stage never reopens
//! the connection per message. A cheap subject/from prefilter drops obvious
//! marketing before any full-source fetch.

use async_imap::types::Fetch;
use async_imap::Session;
use async_native_tls::TlsStream;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

use crate::mail::normalize::{normalize_body, parse_address, snippet_of};
use crate::mail::{DriverError, DriverResult, EmailBody, EmailMeta, ListPage, MailboxDriver};
use crate::models::DriverTimeouts;
use crate::resolve::domains::domain_of_email;

/// IMAP connection settings from the HTTP surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_secure")]
    pub secure: bool,
    pub username: String,
    pub password: String,
}

fn default_secure() -> bool {
    true
}

/// Uid continuation token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct ImapCursor {
    uid: u32,
}

/// Mailbox probe result for the verify surface
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyInfo {
    pub mailbox_exists: u32,
    pub capabilities: Vec<String>,
}

/// Encode the continuation cursor
pub fn encode_cursor(uid: u32) -> String {
    let json = serde_json::to_string(&ImapCursor { uid }).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

/// Decode a continuation cursor; malformed input restarts from the top
pub fn decode_cursor(cursor: &str) -> Option<u32> {
    let bytes = URL_SAFE_NO_PAD.decode(cursor).ok()?;
    let parsed: ImapCursor = serde_json::from_slice(&bytes).ok()?;
    Some(parsed.uid)
}

/// From-address local parts that mark a sender as promotional
const PROMO_LOCAL_PARTS: &[&str] = &["promo", "promos", "offers", "deals", "marketing", "newsletter"];

/// Subject fragments that disqualify a message before any body fetch
const PROMO_SUBJECT_MARKERS: &[&str] = &["newsletter", "% off", "flash sale", "don't miss", "last chance"];

/// Cheap subject/from marketing prefilter applied during listing
fn passes_prefilter(meta: &EmailMeta) -> bool {
    let local = meta.from_email.split('@').next().unwrap_or("");
    if PROMO_LOCAL_PARTS.iter().any(|p| local.starts_with(p)) {
        return false;
    }
    let subject = meta.subject.to_lowercase();
    !PROMO_SUBJECT_MARKERS.iter().any(|m| subject.contains(m))
}

/// Owned data copied out of a borrowed `Fetch`
struct FetchData {
    uid: u32,
    header: Option<Vec<u8>>,
    body: Option<Vec<u8>>,
    date_ms: Option<i64>,
}

impl FetchData {
    fn from_fetch(fetch: &Fetch) -> Option<Self> {
        Some(Self {
            uid: fetch.uid?,
            header: fetch.header().map(|h| h.to_vec()),
            body: fetch.body().map(|b| b.to_vec()),
            date_ms: fetch.internal_date().map(|d| d.timestamp_millis()),
        })
    }
}

/// A logged-in session over either transport
enum AnySession {
    Tls(Session<TlsStream<TcpStream>>),
    Plain(Session<TcpStream>),
}

impl AnySession {
    /// EXAMINE INBOX read-only; returns the mailbox message count
    async fn examine_inbox(&mut self) -> DriverResult<u32> {
        let result = match self {
            AnySession::Tls(s) => s.examine("INBOX").await,
            AnySession::Plain(s) => s.examine("INBOX").await,
        };
        result
            .map(|mailbox| mailbox.exists)
            .map_err(|e| DriverError::Protocol(format!("EXAMINE failed: {e}")))
    }

    /// Report which of the probed capabilities the server advertises
    async fn capability_probe(&mut self, probes: &[&str]) -> Vec<String> {
        let caps = match self {
            AnySession::Tls(s) => s.capabilities().await,
            AnySession::Plain(s) => s.capabilities().await,
        };
        match caps {
            Ok(caps) => probes
                .iter()
                .filter(|p| caps.has_str(p))
                .map(|p| p.to_string())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn uid_search_since(&mut self, date: &str) -> DriverResult<Vec<u32>> {
        let query = format!("SINCE {date}");
        let uids = match self {
            AnySession::Tls(s) => s.uid_search(&query).await,
            AnySession::Plain(s) => s.uid_search(&query).await,
        }
        .map_err(|e| DriverError::Protocol(format!("SEARCH failed: {e}")))?;

        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn uid_fetch_collect(&mut self, uid_set: &str, query: &str) -> DriverResult<Vec<FetchData>> {
        macro_rules! collect {
            ($session:expr) => {{
                let stream = $session
                    .uid_fetch(uid_set, query)
                    .await
                    .map_err(|e| DriverError::Protocol(format!("FETCH failed: {e}")))?;
                let fetches: Vec<Fetch> = stream
                    .try_collect()
                    .await
                    .map_err(|e| DriverError::Protocol(format!("FETCH stream failed: {e}")))?;
                fetches
            }};
        }

        let fetches = match self {
            AnySession::Tls(s) => collect!(s),
            AnySession::Plain(s) => collect!(s),
        };

        Ok(fetches.iter().filter_map(FetchData::from_fetch).collect())
    }

    async fn logout(mut self) {
        let _ = match &mut self {
            AnySession::Tls(s) => s.logout().await,
            AnySession::Plain(s) => s.logout().await,
        };
    }
}

/// IMAP mailbox driver
pub struct ImapDriver {
    config: ImapConfig,
    days_back: u32,
    page_size: u32,
    timeouts: DriverTimeouts,
    deadline_at: Option<Instant>,
    /// Page-batch metadata served to the per-id contract without refetching
    meta_cache: DashMap<String, EmailMeta>,
}

impl ImapDriver {
    pub fn new(
        config: ImapConfig,
        days_back: u32,
        page_size: u32,
        timeouts: DriverTimeouts,
    ) -> Self {
        Self {
            config,
            days_back,
            page_size,
            timeouts: timeouts.clamped(),
            deadline_at: None,
            meta_cache: DashMap::new(),
        }
    }

    pub fn with_deadline(mut self, deadline_at: Instant) -> Self {
        self.deadline_at = Some(deadline_at);
        self
    }

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

    /// Connect, negotiate TLS when configured, and log in
    async fn connect(&self) -> DriverResult<AnySession> {
        let address = (self.config.host.as_str(), self.config.port);
        let tcp = tokio::time::timeout(Duration::from_secs(10), TcpStream::connect(address))
            .await
            .map_err(|_| DriverError::Timeout)?
            .map_err(|e| DriverError::Network(format!("connect failed: {e}")))?;

        if self.config.secure {
            let tls = async_native_tls::TlsConnector::new();
            let tls_stream = tls
                .connect(self.config.host.as_str(), tcp)
                .await
                .map_err(|e| DriverError::Network(format!("TLS handshake failed: {e}")))?;
            let client = async_imap::Client::new(tls_stream);
            let session = client
                .login(&self.config.username, &self.config.password)
                .await
                .map_err(|(e, _)| DriverError::Auth(format!("login rejected: {e}")))?;
            Ok(AnySession::Tls(session))
        } else {
            let client = async_imap::Client::new(tcp);
            let session = client
                .login(&self.config.username, &self.config.password)
                .await
                .map_err(|(e, _)| DriverError::Auth(format!("login rejected: {e}")))?;
            Ok(AnySession::Plain(session))
        }
    }

    /// Probe the mailbox for `/v1/email/verify`: connect, read capabilities,
    /// open INBOX read-only
    pub async fn verify(&self) -> DriverResult<VerifyInfo> {
        let timeout = self.effective_timeout(self.timeouts.list_ms)?;

        let work = async {
            let mut session = self.connect().await?;
            let capabilities = session
                .capability_probe(&["IMAP4rev1", "IDLE", "UIDPLUS", "MOVE", "CONDSTORE"])
                .await;
            let mailbox_exists = session.examine_inbox().await?;
            session.logout().await;
            Ok(VerifyInfo {
                mailbox_exists,
                capabilities,
            })
        };

        tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| DriverError::Timeout)?
    }

    /// SEARCH date in RFC 3501 `DD-Mon-YYYY` form
    fn since_date(&self) -> String {
        let date = Utc::now() - ChronoDuration::days(self.days_back as i64);
        date.format("%d-%b-%Y").to_string()
    }

    fn meta_from_headers(uid: u32, header_bytes: &[u8], date_ms: Option<i64>) -> EmailMeta {
        let mut headers = std::collections::HashMap::new();
        if let Ok((parsed, _)) = mailparse::parse_headers(header_bytes) {
            for h in &parsed {
                headers.insert(h.get_key().to_lowercase(), h.get_value());
            }
        }

        let from_raw = headers.get("from").cloned().unwrap_or_default();
        let (_, from_email) = parse_address(&from_raw);
        let from_domain = domain_of_email(&from_email).unwrap_or_default();

        let date_ms = date_ms.or_else(|| {
            headers
                .get("date")
                .and_then(|d| mailparse::dateparse(d).ok())
                .map(|secs| secs * 1000)
        });

        EmailMeta {
            id: uid.to_string(),
            from: from_raw,
            from_email,
            from_domain,
            subject: headers.get("subject").cloned().unwrap_or_default(),
            snippet: String::new(),
            date_ms,
            headers,
        }
    }

    /// Walk a parsed MIME tree collecting text and html bodies
    fn collect_bodies(part: &mailparse::ParsedMail, text: &mut String, html: &mut String) {
        let mimetype = part.ctype.mimetype.to_lowercase();
        if part.subparts.is_empty() {
            if let Ok(body) = part.get_body() {
                if mimetype == "text/html" {
                    html.push_str(&body);
                } else if mimetype.starts_with("text/") {
                    text.push_str(&body);
                    text.push('\n');
                }
            }
        }
        for sub in &part.subparts {
            Self::collect_bodies(sub, text, html);
        }
    }
}

#[async_trait::async_trait]
impl MailboxDriver for ImapDriver {
    async fn list_page(&self, cursor: Option<&str>) -> DriverResult<ListPage> {
        let after_uid = cursor.and_then(decode_cursor).unwrap_or(0);
        let timeout = self.effective_timeout(self.timeouts.list_ms)?;

        let work = async {
            let mut session = self.connect().await?;
            session.examine_inbox().await?;

            let uids = session.uid_search_since(&self.since_date()).await?;
            let eligible: Vec<u32> = uids.into_iter().filter(|u| *u > after_uid).collect();

            let page: Vec<u32> = eligible
                .iter()
                .copied()
                .take(self.page_size as usize)
                .collect();
            let has_more = eligible.len() > page.len();

            let mut ids = Vec::with_capacity(page.len());
            if !page.is_empty() {
                let uid_set = page
                    .iter()
                    .map(|u| u.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                let fetched = session
                    .uid_fetch_collect(&uid_set, "(UID INTERNALDATE RFC822.HEADER)")
                    .await?;

                for data in fetched {
                    let Some(header) = data.header.as_deref() else {
                        continue;
                    };
                    let meta = Self::meta_from_headers(data.uid, header, data.date_ms);
                    if !passes_prefilter(&meta) {
                        tracing::debug!(uid = data.uid, "IMAP prefilter dropped message");
                        continue;
                    }
                    ids.push(meta.id.clone());
                    self.meta_cache.insert(meta.id.clone(), meta);
                }
            }

            session.logout().await;

            let next_cursor = if has_more {
                page.last().map(|last| encode_cursor(*last))
            } else {
                None
            };

            Ok(ListPage { ids, next_cursor })
        };

        tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| DriverError::Timeout)?
    }

    async fn fetch_metadata(&self, id: &str) -> DriverResult<EmailMeta> {
        if let Some(meta) = self.meta_cache.get(id) {
            return Ok(meta.clone());
        }

        let uid: u32 = id
            .parse()
            .map_err(|_| DriverError::Protocol(format!("bad uid: {id}")))?;
        let timeout = self.effective_timeout(self.timeouts.meta_ms)?;

        let work = async {
            let mut session = self.connect().await?;
            session.examine_inbox().await?;
            let fetched = session
                .uid_fetch_collect(&uid.to_string(), "(UID INTERNALDATE RFC822.HEADER)")
                .await?;
            session.logout().await;

            let data = fetched
                .into_iter()
                .next()
                .ok_or_else(|| DriverError::Protocol(format!("uid {uid} not found")))?;
            let header = data
                .header
                .as_deref()
                .ok_or_else(|| DriverError::Protocol("missing header data".into()))?;
            Ok(Self::meta_from_headers(data.uid, header, data.date_ms))
        };

        tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| DriverError::Timeout)?
    }

    async fn fetch_full(&self, id: &str) -> DriverResult<EmailBody> {
        let uid: u32 = id
            .parse()
            .map_err(|_| DriverError::Protocol(format!("bad uid: {id}")))?;
        let timeout = self.effective_timeout(self.timeouts.full_ms)?;

        let work = async {
            let mut session = self.connect().await?;
            session.examine_inbox().await?;
            let fetched = session
                .uid_fetch_collect(&uid.to_string(), "(UID BODY.PEEK[])")
                .await?;
            session.logout().await;

            let data = fetched
                .into_iter()
                .next()
                .ok_or_else(|| DriverError::Protocol(format!("uid {uid} not found")))?;
            let raw = data
                .body
                .as_deref()
                .ok_or_else(|| DriverError::Protocol("missing body data".into()))?;

            let parsed = mailparse::parse_mail(raw)
                .map_err(|e| DriverError::Protocol(format!("unparseable message: {e}")))?;

            let mut text = String::new();
            let mut html = String::new();
            Self::collect_bodies(&parsed, &mut text, &mut html);

            if text.is_empty() && !html.is_empty() {
                text = crate::mail::normalize::html_to_text(&html);
            }
            let text = normalize_body(&text);

            // Backfill the snippet for cached metadata now that a body exists
            if let Some(mut meta) = self.meta_cache.get_mut(id) {
                if meta.snippet.is_empty() {
                    meta.snippet = snippet_of(&text);
                }
            }

            Ok(EmailBody { text, html })
        };

        tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| DriverError::Timeout)?
    }
}
