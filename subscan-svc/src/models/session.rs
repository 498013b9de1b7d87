//! Scan session state machine
//!
//! A session is one scanning job bound to (user, provider). It progresses
//! queued → running → done | canceled | error, one chunk at a time, with
//! `pages`, `scanned_total` and `found_total` only ever growing. Terminal
//! states are sticky: once reached, no further transition is accepted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::options::ScanOptions;

/// Mailbox provider backing a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gmail,
    Imap,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gmail => "gmail",
            Provider::Imap => "imap",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gmail" => Some(Provider::Gmail),
            "imap" => Some(Provider::Imap),
            _ => None,
        }
    }
}

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created by the HTTP start surface, not yet leased
    Queued,
    /// At least one chunk has run or is running
    Running,
    /// Cursor exhausted, candidate cap reached, or page cap reached
    Done,
    /// External cancel observed between chunks
    Canceled,
    /// Fatal failure with a closed error code
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Queued => "queued",
            SessionStatus::Running => "running",
            SessionStatus::Done => "done",
            SessionStatus::Canceled => "canceled",
            SessionStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(SessionStatus::Queued),
            "running" => Some(SessionStatus::Running),
            "done" => Some(SessionStatus::Done),
            "canceled" => Some(SessionStatus::Canceled),
            "error" => Some(SessionStatus::Error),
            _ => None,
        }
    }

    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Done | SessionStatus::Canceled | SessionStatus::Error
        )
    }
}

/// Closed set of fatal error codes a session can terminate with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanErrorCode {
    MissingToken,
    TokenBootstrapFailed,
    SessionCreateFailed,
    QueueEnqueueFailed,
    UnsupportedProvider,
    ChunkError,
    Deadline,
    GmailListFailed,
    AuthFailed,
    NeedsAppPassword,
    NetworkError,
    Unknown,
}

impl ScanErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanErrorCode::MissingToken => "MISSING_TOKEN",
            ScanErrorCode::TokenBootstrapFailed => "TOKEN_BOOTSTRAP_FAILED",
            ScanErrorCode::SessionCreateFailed => "SESSION_CREATE_FAILED",
            ScanErrorCode::QueueEnqueueFailed => "QUEUE_ENQUEUE_FAILED",
            ScanErrorCode::UnsupportedProvider => "UNSUPPORTED_PROVIDER",
            ScanErrorCode::ChunkError => "CHUNK_ERROR",
            ScanErrorCode::Deadline => "DEADLINE",
            ScanErrorCode::GmailListFailed => "GMAIL_LIST_FAILED",
            ScanErrorCode::AuthFailed => "AUTH_FAILED",
            ScanErrorCode::NeedsAppPassword => "NEEDS_APP_PASSWORD",
            ScanErrorCode::NetworkError => "NETWORK_ERROR",
            ScanErrorCode::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MISSING_TOKEN" => Some(ScanErrorCode::MissingToken),
            "TOKEN_BOOTSTRAP_FAILED" => Some(ScanErrorCode::TokenBootstrapFailed),
            "SESSION_CREATE_FAILED" => Some(ScanErrorCode::SessionCreateFailed),
            "QUEUE_ENQUEUE_FAILED" => Some(ScanErrorCode::QueueEnqueueFailed),
            "UNSUPPORTED_PROVIDER" => Some(ScanErrorCode::UnsupportedProvider),
            "CHUNK_ERROR" => Some(ScanErrorCode::ChunkError),
            "DEADLINE" => Some(ScanErrorCode::Deadline),
            "GMAIL_LIST_FAILED" => Some(ScanErrorCode::GmailListFailed),
            "AUTH_FAILED" => Some(ScanErrorCode::AuthFailed),
            "NEEDS_APP_PASSWORD" => Some(ScanErrorCode::NeedsAppPassword),
            "NETWORK_ERROR" => Some(ScanErrorCode::NetworkError),
            "UNKNOWN" => Some(ScanErrorCode::Unknown),
            _ => None,
        }
    }
}

/// One scanning job for one user/provider pair
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSession {
    /// Unique session identifier
    pub id: Uuid,

    /// Opaque user subject from the bearer token
    pub user_id: String,

    /// Mailbox provider
    pub provider: Provider,

    /// Current lifecycle status
    pub status: SessionStatus,

    /// Provider-specific continuation token (Gmail pageToken, IMAP uid blob)
    ///
    /// Only mutated by the owning lease holder.
    pub cursor: Option<String>,

    /// Budget-clamped scan options
    pub options: ScanOptions,

    /// Chunks processed so far (monotonic)
    pub pages: i64,

    /// Messages screened so far (monotonic)
    pub scanned_total: i64,

    /// Candidates persisted so far (monotonic)
    pub found_total: i64,

    /// Stats blob from the most recent chunk
    pub last_stats: Option<serde_json::Value>,

    /// Set only when status = error
    pub error_code: Option<ScanErrorCode>,
    pub error_message: Option<String>,

    /// Lease bookkeeping: worker identity and expiry
    pub leased_by: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl ScanSession {
    /// Create a new session in `queued`
    pub fn new(user_id: impl Into<String>, provider: Provider, options: ScanOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            provider,
            status: SessionStatus::Queued,
            cursor: None,
            options,
            pages: 0,
            scanned_total: 0,
            found_total: 0,
            last_stats: None,
            error_code: None,
            error_message: None,
            leased_by: None,
            lease_expires_at: None,
            created_at: Utc::now(),
        }
    }

    /// Check whether the session has reached a sticky terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Termination test applied after every chunk
    ///
    /// Done when the cursor is exhausted, the page cap is reached, or the
    /// candidate cap is reached.
    pub fn should_finish(&self) -> bool {
        self.cursor.is_none()
            || self.pages >= self.options.max_pages as i64
            || self.found_total >= self.options.max_candidates as i64
    }
}
