//! Shared test fixtures: in-memory app context and a scripted mailbox driver
//!
//! Each integration test binary compiles this module separately, so not
//! every helper is used from every binary.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use subscan_svc::mail::{
    DriverError, DriverResult, EmailBody, EmailMeta, ListPage, MailboxDriver,
};
use subscan_svc::models::ScanOptions;
use subscan_svc::queue::ScanJob;
use subscan_svc::store;
use subscan_svc::token::MemoryTokenProvider;
use subscan_svc::AppContext;

/// Fresh in-memory context plus the worker queue receiver
pub async fn test_context() -> (AppContext, tokio::sync::mpsc::UnboundedReceiver<ScanJob>) {
    let db = store::init_memory().await.expect("memory pool");
    AppContext::new(db, Arc::new(MemoryTokenProvider::new()), 50, 100)
}

/// Build message metadata the way drivers do
pub fn message(
    id: &str,
    from: &str,
    subject: &str,
    snippet: &str,
    date_ms: i64,
    headers: &[(&str, &str)],
) -> EmailMeta {
    let (_, from_email) = subscan_svc::mail::normalize::parse_address(from);
    let from_domain =
        subscan_svc::resolve::domains::domain_of_email(&from_email).unwrap_or_default();
    EmailMeta {
        id: id.to_string(),
        from: from.to_string(),
        from_email,
        from_domain,
        subject: subject.to_string(),
        snippet: snippet.to_string(),
        date_ms: Some(date_ms),
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.to_string()))
            .collect(),
    }
}

pub fn body(text: &str) -> EmailBody {
    EmailBody {
        text: text.to_string(),
        html: String::new(),
    }
}

/// Scripted in-memory mailbox: pages of ids with metadata and bodies
///
/// The cursor is the page index as a string, which exercises the engine's
/// cursor plumbing without a provider.
#[derive(Default)]
pub struct ScriptedDriver {
    pub pages: Vec<Vec<String>>,
    pub metas: HashMap<String, EmailMeta>,
    pub bodies: HashMap<String, EmailBody>,
    pub list_calls: AtomicUsize,
    pub full_calls: AtomicUsize,
    /// Artificial latency injected into every full fetch
    pub full_delay_ms: u64,
}

impl ScriptedDriver {
    pub fn single_page(messages: Vec<(EmailMeta, Option<EmailBody>)>) -> Self {
        let mut driver = ScriptedDriver::default();
        let mut page = Vec::new();
        for (meta, body) in messages {
            page.push(meta.id.clone());
            if let Some(body) = body {
                driver.bodies.insert(meta.id.clone(), body);
            }
            driver.metas.insert(meta.id.clone(), meta);
        }
        driver.pages.push(page);
        driver
    }
}

#[async_trait]
impl MailboxDriver for ScriptedDriver {
    async fn list_page(&self, cursor: Option<&str>) -> DriverResult<ListPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let index: usize = cursor.map(|c| c.parse().unwrap_or(0)).unwrap_or(0);
        let Some(ids) = self.pages.get(index) else {
            return Ok(ListPage::default());
        };
        let next_cursor = if index + 1 < self.pages.len() {
            Some((index + 1).to_string())
        } else {
            None
        };
        Ok(ListPage {
            ids: ids.clone(),
            next_cursor,
        })
    }

    async fn fetch_metadata(&self, id: &str) -> DriverResult<EmailMeta> {
        self.metas
            .get(id)
            .cloned()
            .ok_or_else(|| DriverError::Status(404))
    }

    async fn fetch_full(&self, id: &str) -> DriverResult<EmailBody> {
        self.full_calls.fetch_add(1, Ordering::SeqCst);
        if self.full_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.full_delay_ms)).await;
        }
        self.bodies
            .get(id)
            .cloned()
            .ok_or_else(|| DriverError::Status(404))
    }
}

/// Chunk context over the default quick budget
pub fn chunk_context(
    options: ScanOptions,
    cursor: Option<String>,
) -> subscan_svc::engine::ChunkContext {
    let options = options.enforce_budgets();
    subscan_svc::engine::ChunkContext {
        cursor,
        list_budget: options.max_list_ids as usize,
        deadline_at: Instant::now() + std::time::Duration::from_millis(options.chunk_ms),
        query: "test-query".to_string(),
        directory: Arc::new(seed_directory()),
        overrides: Vec::new(),
        options,
    }
}

/// Directory slice matching the seeded defaults the tests rely on
pub fn seed_directory() -> Vec<store::DirectoryEntry> {
    vec![
        store::DirectoryEntry {
            canonical_name: "Netflix".to_string(),
            sender_emails: vec!["info@account.netflix.com".to_string()],
            sender_domains: vec!["netflix.com".to_string()],
            keywords: vec!["netflix".to_string()],
        },
        store::DirectoryEntry {
            canonical_name: "Apple".to_string(),
            sender_emails: vec!["no_reply@email.apple.com".to_string()],
            sender_domains: vec!["apple.com".to_string()],
            keywords: vec!["app store".to_string()],
        },
        store::DirectoryEntry {
            canonical_name: "Udemy".to_string(),
            sender_emails: vec![],
            sender_domains: vec!["udemy.com".to_string(), "udemymail.com".to_string()],
            keywords: vec!["udemy".to_string()],
        },
    ]
}
