//! Scan job queue
//!
//! An in-process queue with deterministic job ids: one job is one chunk of
//! one session at one cursor position. Enqueueing the same
//! `(session, cursor)` twice is a no-op, which is what makes `/run` retries
//! and crash-recovery re-enqueues harmless. Delivery is at-least-once; the
//! store's idempotent writes make effects exactly-once-observable.

pub mod worker;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One unit of queued work
#[derive(Debug, Clone)]
pub struct ScanJob {
    pub id: String,
    pub session_id: Uuid,
}

/// Deterministic job id for a (session, cursor) pair
pub fn job_id(session_id: Uuid, cursor: Option<&str>) -> String {
    format!("{}:chunk:{}", session_id, cursor.unwrap_or("start"))
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,
}

/// In-process scan queue with enqueue idempotence
pub struct ScanQueue {
    tx: mpsc::UnboundedSender<ScanJob>,
    seen: DashMap<String, ()>,
}

impl ScanQueue {
    /// Create the queue and the receiver its worker loop consumes
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScanJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                seen: DashMap::new(),
            },
            rx,
        )
    }

    /// Enqueue one chunk; returns false when the job id was already seen
    pub fn enqueue_chunk(&self, session_id: Uuid, cursor: Option<&str>) -> Result<bool, QueueError> {
        let id = job_id(session_id, cursor);
        if self.seen.insert(id.clone(), ()).is_some() {
            tracing::debug!(job_id = %id, "Duplicate enqueue collapsed");
            return Ok(false);
        }

        self.tx
            .send(ScanJob { id, session_id })
            .map_err(|_| QueueError::Closed)?;
        Ok(true)
    }

    /// Drop the dedupe entries of a finished session
    pub fn clear_session(&self, session_id: Uuid) {
        let prefix = format!("{}:", session_id);
        self.seen.retain(|k, _| !k.starts_with(&prefix));
    }
}
