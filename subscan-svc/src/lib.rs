//! subscan-svc library interface
//!
//! Exposes the scanning pipeline, store and router so integration tests can
//! exercise them directly.

pub mod api;
pub mod classify;
pub mod config;
pub mod detect;
pub mod engine;
pub mod extract;
pub mod mail;
pub mod models;
pub mod queue;
pub mod resolve;
pub mod store;
pub mod token;

pub use crate::api::{ApiError, ApiResult};

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::models::DriverTimeouts;
use crate::queue::ScanQueue;
use crate::store::DirectoryCache;
use crate::token::TokenProvider;

/// Application context shared across handlers and the worker
#[derive(Clone)]
pub struct AppContext {
    /// Database connection pool
    pub db: SqlitePool,
    /// Chunk job queue
    pub queue: Arc<ScanQueue>,
    /// Per-session token source
    pub tokens: Arc<dyn TokenProvider>,
    /// Process-wide merchant directory cache (15-minute TTL)
    pub directory: Arc<DirectoryCache>,
    /// Driver per-operation timeouts
    pub timeouts: DriverTimeouts,
    /// SSE store poll interval
    pub sse_poll_ms: u64,
    /// SSE keep-alive ping interval
    pub sse_ping_ms: u64,
}

impl AppContext {
    /// Assemble the context and the queue receiver its worker consumes
    pub fn new(
        db: SqlitePool,
        tokens: Arc<dyn TokenProvider>,
        sse_poll_ms: u64,
        sse_ping_ms: u64,
    ) -> (Self, tokio::sync::mpsc::UnboundedReceiver<queue::ScanJob>) {
        let (queue, rx) = ScanQueue::new();
        (
            Self {
                db,
                queue: Arc::new(queue),
                tokens,
                directory: Arc::new(DirectoryCache::new()),
                timeouts: DriverTimeouts::default(),
                sse_poll_ms,
                sse_ping_ms,
            },
            rx,
        )
    }
}
