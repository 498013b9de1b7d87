//! Database initialization
//!
//! Creates the schema idempotently at startup and seeds the merchant
//! directory on first boot so a fresh deployment recognizes the major
//! subscription platforms without external data.

use sqlx::SqlitePool;
use std::path::Path;
use subscan_common::Result;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePool::connect(&db_url).await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    configure_and_migrate(&pool).await?;
    Ok(pool)
}

/// In-memory pool for tests
///
/// Pinned to one connection: each pooled connection to `:memory:` would
/// otherwise be its own empty database.
pub async fn init_memory() -> Result<SqlitePool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    configure_and_migrate(&pool).await?;
    Ok(pool)
}

async fn configure_and_migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;

    create_sessions_table(pool).await?;
    create_events_table(pool).await?;
    create_candidates_table(pool).await?;
    create_directory_tables(pool).await?;

    crate::store::directory::seed_directory_if_empty(pool).await?;

    Ok(())
}

async fn create_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            provider TEXT NOT NULL,
            status TEXT NOT NULL,
            cursor TEXT,
            options TEXT NOT NULL,
            pages INTEGER NOT NULL DEFAULT 0,
            scanned_total INTEGER NOT NULL DEFAULT 0,
            found_total INTEGER NOT NULL DEFAULT 0,
            last_stats TEXT,
            error_code TEXT,
            error_message TEXT,
            leased_by TEXT,
            lease_expires_at TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_scan_sessions_user ON scan_sessions(user_id, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            dedupe_key TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(session_id, dedupe_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_scan_events_session ON scan_events(session_id, id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_candidates_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_candidates (
            session_id TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            merchant TEXT NOT NULL,
            amount REAL,
            currency TEXT,
            confidence INTEGER NOT NULL,
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(session_id, fingerprint)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_directory_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS merchant_directory (
            canonical_name TEXT PRIMARY KEY,
            sender_emails TEXT NOT NULL,
            sender_domains TEXT NOT NULL,
            keywords TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS merchant_overrides (
            user_id TEXT NOT NULL,
            sender_email TEXT,
            sender_domain TEXT,
            canonical_name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(user_id, sender_email),
            UNIQUE(user_id, sender_domain)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
