//! Mailbox drivers
//!
//! Both drivers share one contract: list a page of message ids behind an
//! opaque cursor, fetch cheap metadata per id, fetch full bodies per id.
//! Every operation runs under a per-op timeout and, transitively, the chunk
//! deadline; transient failures are retryable, everything else is skipped by
//! the caller.

pub mod gmail;
pub mod imap;
pub mod normalize;

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// One page of message ids plus the continuation cursor
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub ids: Vec<String>,
    pub next_cursor: Option<String>,
}

/// Cheap message metadata: headers, subject, snippet, date
#[derive(Debug, Clone, Default)]
pub struct EmailMeta {
    pub id: String,
    /// Raw From display string
    pub from: String,
    /// Sender address, lowercased
    pub from_email: String,
    /// Sender domain, lowercased
    pub from_domain: String,
    pub subject: String,
    pub snippet: String,
    pub date_ms: Option<i64>,
    /// Header map with lowercased keys
    pub headers: HashMap<String, String>,
}

/// Full message bodies
#[derive(Debug, Clone, Default)]
pub struct EmailBody {
    pub text: String,
    pub html: String,
}

/// Driver failure taxonomy
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("provider returned status {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("operation timed out")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl DriverError {
    /// Transient failures worth a backoff retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DriverError::RateLimited
                | DriverError::Status(500 | 502 | 503 | 504)
                | DriverError::Network(_)
                | DriverError::Timeout
        )
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Contract shared by the Gmail and IMAP drivers
#[async_trait]
pub trait MailboxDriver: Send + Sync {
    /// List up to a page of message ids; `None` cursor starts from the top
    async fn list_page(&self, cursor: Option<&str>) -> DriverResult<ListPage>;

    /// Fetch headers/snippet/date for one message
    async fn fetch_metadata(&self, id: &str) -> DriverResult<EmailMeta>;

    /// Fetch full text/html bodies for one message
    async fn fetch_full(&self, id: &str) -> DriverResult<EmailBody>;
}
