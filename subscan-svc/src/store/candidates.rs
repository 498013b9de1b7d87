//! Candidate persistence with (session, fingerprint) dedupe
//!
//! Candidates are immutable once inserted; re-running a chunk after a lease
//! steal or retry simply inserts zero new rows. The inserted-row count is the
//! session's `foundDelta`.

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::Candidate;

/// Insert candidates, silently dropping fingerprints already persisted.
///
/// Returns how many rows were actually inserted.
pub async fn upsert_candidates(
    pool: &SqlitePool,
    session_id: Uuid,
    candidates: &[Candidate],
) -> Result<u64> {
    let mut inserted = 0u64;
    let now = Utc::now().to_rfc3339();

    for candidate in candidates {
        let result = sqlx::query(
            r#"
            INSERT INTO scan_candidates (
                session_id, fingerprint, merchant, amount, currency,
                confidence, event_type, payload, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id, fingerprint) DO NOTHING
            "#,
        )
        .bind(session_id.to_string())
        .bind(&candidate.fingerprint)
        .bind(&candidate.merchant)
        .bind(candidate.amount)
        .bind(&candidate.currency)
        .bind(candidate.confidence as i64)
        .bind(candidate.event_type.as_str())
        .bind(serde_json::to_string(candidate)?)
        .bind(&now)
        .execute(pool)
        .await?;

        inserted += result.rows_affected();
    }

    Ok(inserted)
}

/// Load all candidates for a session, newest first
pub async fn list_candidates(pool: &SqlitePool, session_id: Uuid) -> Result<Vec<Candidate>> {
    let rows = sqlx::query(
        "SELECT payload FROM scan_candidates WHERE session_id = ? ORDER BY rowid DESC",
    )
    .bind(session_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut candidates = Vec::with_capacity(rows.len());
    for row in rows {
        let payload: String = row.get("payload");
        candidates.push(serde_json::from_str(&payload)?);
    }
    Ok(candidates)
}

/// Count persisted candidates for a session
pub async fn count_candidates(pool: &SqlitePool, session_id: Uuid) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM scan_candidates WHERE session_id = ?")
            .bind(session_id.to_string())
            .fetch_one(pool)
            .await?;
    Ok(count)
}
