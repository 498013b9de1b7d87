//! Event-log record types for the subscan event system
//!
//! Every client-visible fact about a scan flows through the append-only
//! per-session event log and out over SSE. The event type set is closed;
//! payloads are opaque JSON shaped by the writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of event types visible on the SSE stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// First event of every session, written idempotently at creation
    Hello,
    /// Per-chunk progress snapshot
    Progress,
    /// Newly persisted candidates from one chunk
    Candidates,
    /// Keep-alive emitted by the streamer, never persisted
    Ping,
    /// Terminal success
    Done,
    /// Terminal failure with an error code
    Error,
}

impl EventType {
    /// Wire name used in the `event:` field of the SSE frame and in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Hello => "hello",
            EventType::Progress => "progress",
            EventType::Candidates => "candidates",
            EventType::Ping => "ping",
            EventType::Done => "done",
            EventType::Error => "error",
        }
    }

    /// Parse a stored wire name back into the enum
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hello" => Some(EventType::Hello),
            "progress" => Some(EventType::Progress),
            "candidates" => Some(EventType::Candidates),
            "ping" => Some(EventType::Ping),
            "done" => Some(EventType::Done),
            "error" => Some(EventType::Error),
            _ => None,
        }
    }

    /// Terminal events stop the SSE projection loop
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::Done | EventType::Error)
    }
}

/// One persisted row of the per-session event log
///
/// Ids are strictly increasing; consumers observe rows in id order.
/// Rows sharing a `(session_id, dedupe_key)` pair collapse to one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub session_id: Uuid,
    pub user_id: String,
    pub event_type: EventType,
    pub payload: serde_json::Value,
    pub dedupe_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_round_trip() {
        for et in [
            EventType::Hello,
            EventType::Progress,
            EventType::Candidates,
            EventType::Ping,
            EventType::Done,
            EventType::Error,
        ] {
            assert_eq!(EventType::parse(et.as_str()), Some(et));
        }
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        assert_eq!(EventType::parse("scan_failed_v0"), None);
    }

    #[test]
    fn test_terminal_classification() {
        assert!(EventType::Done.is_terminal());
        assert!(EventType::Error.is_terminal());
        assert!(!EventType::Progress.is_terminal());
        assert!(!EventType::Ping.is_terminal());
    }
}
