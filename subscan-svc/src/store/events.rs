//! Append-only per-session event log
//!
//! Ids come from the table's autoincrement and are therefore strictly
//! increasing; the `(session_id, dedupe_key)` unique index collapses
//! concurrent duplicate writes to a single row, which is what makes worker
//! retries invisible to SSE consumers.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use subscan_common::events::{EventRecord, EventType};
use uuid::Uuid;

/// Append an event; duplicate `(session_id, dedupe_key)` writes are dropped.
///
/// Returns the new row id, or None when an identical dedupe key already
/// claimed the slot.
pub async fn append_event(
    pool: &SqlitePool,
    session_id: Uuid,
    user_id: &str,
    event_type: EventType,
    payload: &serde_json::Value,
    dedupe_key: Option<&str>,
) -> Result<Option<i64>> {
    let result = sqlx::query(
        r#"
        INSERT INTO scan_events (session_id, user_id, event_type, payload, dedupe_key, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(session_id, dedupe_key) DO NOTHING
        "#,
    )
    .bind(session_id.to_string())
    .bind(user_id)
    .bind(event_type.as_str())
    .bind(serde_json::to_string(payload)?)
    .bind(dedupe_key)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        tracing::debug!(
            session_id = %session_id,
            dedupe_key = dedupe_key.unwrap_or(""),
            "Duplicate event write collapsed"
        );
        return Ok(None);
    }

    Ok(Some(result.last_insert_rowid()))
}

/// Fetch events with `id > after_id` in id order, up to `limit` rows
pub async fn poll_events_after(
    pool: &SqlitePool,
    session_id: Uuid,
    after_id: i64,
    limit: i64,
) -> Result<Vec<EventRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, session_id, user_id, event_type, payload, dedupe_key, created_at
        FROM scan_events
        WHERE session_id = ? AND id > ?
        ORDER BY id ASC
        LIMIT ?
        "#,
    )
    .bind(session_id.to_string())
    .bind(after_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut events = Vec::with_capacity(rows.len());
    for row in rows {
        let event_type: String = row.get("event_type");
        let Some(event_type) = EventType::parse(&event_type) else {
            // Unknown rows are skipped rather than poisoning the stream
            tracing::warn!(event_type = %event_type, "Skipping event with unknown type");
            continue;
        };

        let payload: String = row.get("payload");
        let created_at: String = row.get("created_at");

        events.push(EventRecord {
            id: row.get("id"),
            session_id,
            user_id: row.get("user_id"),
            event_type,
            payload: serde_json::from_str(&payload)?,
            dedupe_key: row.get("dedupe_key"),
            created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
        });
    }

    Ok(events)
}

/// Trailing slice of a session's log, newest first (diagnostics surface)
pub async fn tail_events(
    pool: &SqlitePool,
    session_id: Uuid,
    limit: i64,
) -> Result<Vec<EventRecord>> {
    let last_id: Option<i64> =
        sqlx::query_scalar("SELECT MAX(id) FROM scan_events WHERE session_id = ?")
            .bind(session_id.to_string())
            .fetch_one(pool)
            .await?;

    let Some(last_id) = last_id else {
        return Ok(Vec::new());
    };

    poll_events_after(pool, session_id, last_id - limit, limit).await
}
