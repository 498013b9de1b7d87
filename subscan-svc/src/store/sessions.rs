//! Scan session persistence
//!
//! Sessions are mutated only by their lease holder, with two exceptions:
//! external cancel (allowed from any writer, observed by the worker between
//! chunks) and lease stealing after expiry. Progress counters only move
//! forward; the SQL enforces that with additive updates rather than
//! overwrites.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{Provider, ScanErrorCode, ScanOptions, ScanSession, SessionStatus};

/// Lease TTL granted on acquisition and renewal
pub const LEASE_TTL_SECS: i64 = 30;

/// Insert a freshly created session
pub async fn create_session(pool: &SqlitePool, session: &ScanSession) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO scan_sessions (
            id, user_id, provider, status, cursor, options,
            pages, scanned_total, found_total, last_stats,
            error_code, error_message, leased_by, lease_expires_at, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(session.id.to_string())
    .bind(&session.user_id)
    .bind(session.provider.as_str())
    .bind(session.status.as_str())
    .bind(&session.cursor)
    .bind(serde_json::to_string(&session.options)?)
    .bind(session.pages)
    .bind(session.scanned_total)
    .bind(session.found_total)
    .bind(
        session
            .last_stats
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?,
    )
    .bind(session.error_code.map(|c| c.as_str()))
    .bind(&session.error_message)
    .bind(&session.leased_by)
    .bind(session.lease_expires_at.map(|t| t.to_rfc3339()))
    .bind(session.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a session by id
pub async fn load_session(pool: &SqlitePool, session_id: Uuid) -> Result<Option<ScanSession>> {
    let row = sqlx::query(
        r#"
        SELECT id, user_id, provider, status, cursor, options,
               pages, scanned_total, found_total, last_stats,
               error_code, error_message, leased_by, lease_expires_at, created_at
        FROM scan_sessions
        WHERE id = ?
        "#,
    )
    .bind(session_id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let provider: String = row.get("provider");
    let provider = Provider::parse(&provider)
        .ok_or_else(|| anyhow::anyhow!("unknown provider in store: {}", provider))?;

    let status: String = row.get("status");
    let status = SessionStatus::parse(&status)
        .ok_or_else(|| anyhow::anyhow!("unknown status in store: {}", status))?;

    let options: String = row.get("options");
    let options: ScanOptions = serde_json::from_str(&options)?;

    let last_stats: Option<String> = row.get("last_stats");
    let last_stats = last_stats
        .map(|s| serde_json::from_str(&s))
        .transpose()?;

    let error_code: Option<String> = row.get("error_code");
    let error_code = error_code.and_then(|c| ScanErrorCode::parse(&c));

    Ok(Some(ScanSession {
        id: session_id,
        user_id: row.get("user_id"),
        provider,
        status,
        cursor: row.get("cursor"),
        options,
        pages: row.get("pages"),
        scanned_total: row.get("scanned_total"),
        found_total: row.get("found_total"),
        last_stats,
        error_code,
        error_message: row.get("error_message"),
        leased_by: row.get("leased_by"),
        lease_expires_at: parse_ts(row.get("lease_expires_at"))?,
        created_at: parse_ts(Some(row.get("created_at")))?
            .ok_or_else(|| anyhow::anyhow!("session missing created_at"))?,
    }))
}

fn parse_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    Ok(s.map(|s| DateTime::parse_from_rfc3339(&s))
        .transpose()?
        .map(|dt| dt.with_timezone(&Utc)))
}

/// Try to acquire (or steal an expired) lease on a session
///
/// Returns true when this worker now holds the lease. A live lease held by
/// another worker is never stolen.
pub async fn try_lease(pool: &SqlitePool, session_id: Uuid, worker_id: &str) -> Result<bool> {
    let now = Utc::now();
    let expires = now + Duration::seconds(LEASE_TTL_SECS);

    let result = sqlx::query(
        r#"
        UPDATE scan_sessions
        SET leased_by = ?, lease_expires_at = ?
        WHERE id = ?
          AND status IN ('queued', 'running')
          AND (leased_by IS NULL OR leased_by = ? OR lease_expires_at < ?)
        "#,
    )
    .bind(worker_id)
    .bind(expires.to_rfc3339())
    .bind(session_id.to_string())
    .bind(worker_id)
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Renew a held lease between chunk stages
pub async fn renew_lease(pool: &SqlitePool, session_id: Uuid, worker_id: &str) -> Result<bool> {
    let expires = Utc::now() + Duration::seconds(LEASE_TTL_SECS);

    let result = sqlx::query(
        "UPDATE scan_sessions SET lease_expires_at = ? WHERE id = ? AND leased_by = ?",
    )
    .bind(expires.to_rfc3339())
    .bind(session_id.to_string())
    .bind(worker_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Mark a queued session running (first lease)
pub async fn mark_running(pool: &SqlitePool, session_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE scan_sessions SET status = 'running' WHERE id = ? AND status = 'queued'",
    )
    .bind(session_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Advance a session after a chunk: counters are additive, cursor and stats
/// replaced. Guarded by the lease so a stale worker cannot advance a stolen
/// session.
pub async fn update_progress(
    pool: &SqlitePool,
    session_id: Uuid,
    worker_id: &str,
    scanned_delta: i64,
    found_delta: i64,
    cursor: Option<&str>,
    last_stats: &serde_json::Value,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE scan_sessions
        SET pages = pages + 1,
            scanned_total = scanned_total + ?,
            found_total = found_total + ?,
            cursor = ?,
            last_stats = ?
        WHERE id = ? AND leased_by = ?
        "#,
    )
    .bind(scanned_delta.max(0))
    .bind(found_delta.max(0))
    .bind(cursor)
    .bind(serde_json::to_string(last_stats)?)
    .bind(session_id.to_string())
    .bind(worker_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// External cancel: queued/running sessions only, terminal states sticky
pub async fn cancel_session(pool: &SqlitePool, session_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE scan_sessions SET status = 'canceled' WHERE id = ? AND status IN ('queued', 'running')",
    )
    .bind(session_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Mark a session done and release the lease
pub async fn mark_done(pool: &SqlitePool, session_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE scan_sessions
        SET status = 'done', leased_by = NULL, lease_expires_at = NULL
        WHERE id = ? AND status IN ('queued', 'running')
        "#,
    )
    .bind(session_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Mark a session failed with a closed error code
pub async fn mark_error(
    pool: &SqlitePool,
    session_id: Uuid,
    code: ScanErrorCode,
    message: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE scan_sessions
        SET status = 'error', error_code = ?, error_message = ?,
            leased_by = NULL, lease_expires_at = NULL
        WHERE id = ? AND status IN ('queued', 'running')
        "#,
    )
    .bind(code.as_str())
    .bind(message)
    .bind(session_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Sessions left non-terminal with an expired (or absent) lease
///
/// Used at startup to resume scans interrupted by a crash or restart; the
/// cursor plus idempotent events make re-enqueueing safe.
pub async fn list_resumable(pool: &SqlitePool) -> Result<Vec<Uuid>> {
    let now = Utc::now().to_rfc3339();

    let rows = sqlx::query(
        r#"
        SELECT id FROM scan_sessions
        WHERE status IN ('queued', 'running')
          AND (lease_expires_at IS NULL OR lease_expires_at < ?)
        "#,
    )
    .bind(now)
    .fetch_all(pool)
    .await?;

    let mut ids = Vec::with_capacity(rows.len());
    for row in rows {
        let id: String = row.get("id");
        ids.push(Uuid::parse_str(&id)?);
    }
    Ok(ids)
}
