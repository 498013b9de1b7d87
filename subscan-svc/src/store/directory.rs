//! Merchant directory and user overrides
//!
//! The directory maps sender emails, sender domains and keywords to
//! canonical merchant names. It is read-only to the scanning core and cached
//! process-wide for 15 minutes; `/v1/merchant/confirm` writes user overrides
//! to their own table, which the resolver consults before the directory.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// One canonical merchant with its known sender surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub canonical_name: String,
    pub sender_emails: Vec<String>,
    pub sender_domains: Vec<String>,
    pub keywords: Vec<String>,
}

/// One user-scoped merchant pin, keyed by sender email or sender domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserOverride {
    pub user_id: String,
    pub sender_email: Option<String>,
    pub sender_domain: Option<String>,
    pub canonical_name: String,
}

/// Load the full directory
pub async fn load_directory(pool: &SqlitePool) -> Result<Vec<DirectoryEntry>> {
    let rows = sqlx::query(
        "SELECT canonical_name, sender_emails, sender_domains, keywords FROM merchant_directory",
    )
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let sender_emails: String = row.get("sender_emails");
        let sender_domains: String = row.get("sender_domains");
        let keywords: String = row.get("keywords");
        entries.push(DirectoryEntry {
            canonical_name: row.get("canonical_name"),
            sender_emails: serde_json::from_str(&sender_emails)?,
            sender_domains: serde_json::from_str(&sender_domains)?,
            keywords: serde_json::from_str(&keywords)?,
        });
    }
    Ok(entries)
}

/// Load one user's overrides
pub async fn load_overrides(pool: SqlitePool, user_id: &str) -> Result<Vec<UserOverride>> {
    let rows = sqlx::query(
        "SELECT user_id, sender_email, sender_domain, canonical_name FROM merchant_overrides WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_all(&pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| UserOverride {
            user_id: row.get("user_id"),
            sender_email: row.get("sender_email"),
            sender_domain: row.get("sender_domain"),
            canonical_name: row.get("canonical_name"),
        })
        .collect())
}

/// Upsert a user override on its axis (email or domain)
pub async fn upsert_override(pool: &SqlitePool, ovr: &UserOverride) -> Result<()> {
    if ovr.sender_email.is_none() && ovr.sender_domain.is_none() {
        anyhow::bail!("override requires a sender email or sender domain");
    }

    let now = Utc::now().to_rfc3339();

    if let Some(email) = &ovr.sender_email {
        sqlx::query(
            r#"
            INSERT INTO merchant_overrides (user_id, sender_email, sender_domain, canonical_name, created_at)
            VALUES (?, ?, NULL, ?, ?)
            ON CONFLICT(user_id, sender_email) DO UPDATE SET canonical_name = excluded.canonical_name
            "#,
        )
        .bind(&ovr.user_id)
        .bind(email.to_lowercase())
        .bind(&ovr.canonical_name)
        .bind(&now)
        .execute(pool)
        .await?;
    }

    if let Some(domain) = &ovr.sender_domain {
        sqlx::query(
            r#"
            INSERT INTO merchant_overrides (user_id, sender_email, sender_domain, canonical_name, created_at)
            VALUES (?, NULL, ?, ?, ?)
            ON CONFLICT(user_id, sender_domain) DO UPDATE SET canonical_name = excluded.canonical_name
            "#,
        )
        .bind(&ovr.user_id)
        .bind(domain.to_lowercase())
        .bind(&ovr.canonical_name)
        .bind(&now)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Process-wide directory cache with a 15-minute TTL
///
/// Lazy-loaded on first read, refreshed on expiry, never mutated by request
/// handlers. This is the only module-level state in the service.
pub struct DirectoryCache {
    ttl: Duration,
    inner: RwLock<Option<(Instant, Arc<Vec<DirectoryEntry>>)>>,
}

impl DirectoryCache {
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(15 * 60))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(None),
        }
    }

    /// Read the directory, refreshing from the store when the TTL expired
    pub fn get(
        self: Arc<Self>,
        pool: SqlitePool,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Arc<Vec<DirectoryEntry>>>> + Send>> {
        Box::pin(async move {
            {
                let guard = self.inner.read().await;
                if let Some((loaded_at, entries)) = guard.as_ref() {
                    if loaded_at.elapsed() < self.ttl {
                        return Ok(entries.clone());
                    }
                }
            }

            let mut guard = self.inner.write().await;
            // Another task may have refreshed while we waited for the write lock
            if let Some((loaded_at, entries)) = guard.as_ref() {
                if loaded_at.elapsed() < self.ttl {
                    return Ok(entries.clone());
                }
            }

            let entries = Arc::new(load_directory(&pool).await?);
            tracing::debug!(merchants = entries.len(), "Merchant directory refreshed");
            *guard = Some((Instant::now(), entries.clone()));
            Ok(entries)
        })
    }
}

impl Default for DirectoryCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Seed a starter directory on first boot
pub async fn seed_directory_if_empty(pool: &SqlitePool) -> subscan_common::Result<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM merchant_directory")
        .fetch_one(pool)
        .await?;
    if count > 0 {
        return Ok(());
    }

    for (name, emails, domains, keywords) in STARTER_DIRECTORY {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO merchant_directory
                (canonical_name, sender_emails, sender_domains, keywords)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(*name)
        .bind(serde_json::to_string(emails)?)
        .bind(serde_json::to_string(domains)?)
        .bind(serde_json::to_string(keywords)?)
        .execute(pool)
        .await?;
    }

    tracing::info!(
        merchants = STARTER_DIRECTORY.len(),
        "Seeded starter merchant directory"
    );
    Ok(())
}

type SeedRow = (&'static str, &'static [&'static str], &'static [&'static str], &'static [&'static str]);

/// Well-known subscription merchants shipped with the service
const STARTER_DIRECTORY: &[SeedRow] = &[
    (
        "Netflix",
        &["info@account.netflix.com"],
        &["netflix.com"],
        &["netflix"],
    ),
    (
        "Spotify",
        &["no-reply@spotify.com"],
        &["spotify.com"],
        &["spotify premium", "spotify"],
    ),
    (
        "Apple",
        &["no_reply@email.apple.com"],
        &["apple.com", "itunes.com"],
        &["app store", "itunes", "apple subscription"],
    ),
    (
        "PayPal",
        &["service@paypal.com"],
        &["paypal.com"],
        &["paypal"],
    ),
    (
        "Google Play",
        &["googleplay-noreply@google.com"],
        &["play.google.com", "google.com"],
        &["google play"],
    ),
    (
        "Amazon Prime",
        &["auto-confirm@amazon.com"],
        &["amazon.com", "primevideo.com"],
        &["amazon prime", "prime membership"],
    ),
    (
        "Disney+",
        &[],
        &["disneyplus.com", "mail.disneyplus.com"],
        &["disney+", "disney plus"],
    ),
    ("Hulu", &[], &["hulu.com", "hulumail.com"], &["hulu"]),
    (
        "YouTube Premium",
        &[],
        &["youtube.com"],
        &["youtube premium", "youtube music"],
    ),
    (
        "Adobe",
        &[],
        &["adobe.com", "mail.adobe.com"],
        &["creative cloud", "adobe"],
    ),
    ("Dropbox", &[], &["dropbox.com", "dropboxmail.com"], &["dropbox"]),
    ("Notion", &[], &["notion.so", "mail.notion.so"], &["notion"]),
    ("GitHub", &[], &["github.com"], &["github"]),
    (
        "LinkedIn",
        &[],
        &["linkedin.com"],
        &["linkedin premium", "linkedin"],
    ),
    ("Audible", &[], &["audible.com"], &["audible"]),
    ("OpenAI", &[], &["openai.com"], &["chatgpt plus", "openai"]),
    (
        "Microsoft 365",
        &[],
        &["microsoft.com"],
        &["microsoft 365", "office 365"],
    ),
    ("Udemy", &[], &["udemy.com", "udemymail.com"], &["udemy"]),
    ("Patreon", &[], &["patreon.com"], &["patreon"]),
    (
        "New York Times",
        &[],
        &["nytimes.com"],
        &["nytimes", "times subscription"],
    ),
];
