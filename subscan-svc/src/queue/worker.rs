//! Scan worker
//!
//! Consumes chunk jobs from the queue and drives the session state machine:
//! lease, run one chunk, persist candidates, advance counters and cursor,
//! emit events, then either finish or enqueue the next chunk. Cancellation
//! is observed between chunks by re-reading the session; every event write
//! carries a dedupe key so at-least-once delivery never duplicates anything
//! a client sees.

use anyhow::Result;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::engine::{run_chunk, ChunkContext, ChunkError};
use crate::mail::gmail::GmailDriver;
use crate::mail::DriverError;
use crate::models::{Provider, ScanErrorCode, ScanSession, SessionStatus};
use crate::queue::ScanJob;
use crate::store::{candidates, directory, events, sessions};
use crate::AppContext;
use subscan_common::events::EventType;

/// Pause between chunks of the same session
const INTER_CHUNK_SLEEP_MS: u64 = 120;

/// Consume jobs until the queue closes
pub async fn run_worker(ctx: AppContext, mut rx: mpsc::UnboundedReceiver<ScanJob>) {
    let worker_id = format!("worker-{}", Uuid::new_v4());
    tracing::info!(worker_id = %worker_id, "Scan worker started");

    while let Some(job) = rx.recv().await {
        if let Err(e) = process_job(&ctx, &worker_id, &job).await {
            tracing::error!(job_id = %job.id, error = %e, "Scan job failed unexpectedly");
        }
        tokio::time::sleep(Duration::from_millis(INTER_CHUNK_SLEEP_MS)).await;
    }

    tracing::info!(worker_id = %worker_id, "Scan worker stopped");
}

/// Re-enqueue sessions stranded by a crash or restart
///
/// Safe because job ids, event dedupe keys and candidate fingerprints make a
/// replayed chunk invisible to the client.
pub async fn resume_stale_sessions(ctx: &AppContext) -> Result<usize> {
    let ids = sessions::list_resumable(&ctx.db).await?;
    let mut resumed = 0usize;
    for session_id in &ids {
        if let Some(session) = sessions::load_session(&ctx.db, *session_id).await? {
            if ctx
                .queue
                .enqueue_chunk(session.id, session.cursor.as_deref())
                .is_ok()
            {
                resumed += 1;
                tracing::info!(session_id = %session.id, "Resumed stale session");
            }
        }
    }
    Ok(resumed)
}

/// Execute one chunk job end to end
async fn process_job(ctx: &AppContext, worker_id: &str, job: &ScanJob) -> Result<()> {
    let Some(session) = sessions::load_session(&ctx.db, job.session_id).await? else {
        tracing::warn!(job_id = %job.id, "Job for unknown session dropped");
        return Ok(());
    };

    // Terminal states are sticky; a canceled session still owes the client
    // its terminal event
    match session.status {
        SessionStatus::Canceled => {
            emit_done(ctx, &session, true).await?;
            ctx.queue.clear_session(session.id);
            return Ok(());
        }
        SessionStatus::Done | SessionStatus::Error => {
            ctx.queue.clear_session(session.id);
            return Ok(());
        }
        SessionStatus::Queued | SessionStatus::Running => {}
    }

    if !sessions::try_lease(&ctx.db, session.id, worker_id).await? {
        tracing::warn!(session_id = %session.id, "Lease held elsewhere, skipping job");
        return Ok(());
    }

    if session.status == SessionStatus::Queued {
        sessions::mark_running(&ctx.db, session.id).await?;
        events::append_event(
            &ctx.db,
            session.id,
            &session.user_id,
            EventType::Progress,
            &json!({ "phase": "starting", "pages": 0 }),
            Some("progress:starting"),
        )
        .await?;
    }

    if session.provider != Provider::Gmail {
        fail_session(
            ctx,
            &session,
            ScanErrorCode::UnsupportedProvider,
            "only gmail sessions run on the queue",
        )
        .await?;
        return Ok(());
    }

    // Fresh access token for this chunk: nothing stored at all is
    // MISSING_TOKEN; stored material that cannot produce a usable access
    // token is a bootstrap failure
    let Some(tokens) = ctx.tokens.tokens_for(session.id).await else {
        fail_session(
            ctx,
            &session,
            ScanErrorCode::MissingToken,
            "no token available for session",
        )
        .await?;
        return Ok(());
    };
    let Some(access_token) = tokens.usable_access_token() else {
        fail_session(
            ctx,
            &session,
            ScanErrorCode::TokenBootstrapFailed,
            "stored token is expired and not refreshable",
        )
        .await?;
        return Ok(());
    };

    // Budgets are re-applied at execution so a stored session can never
    // outlive a policy tightening
    let options = session.options.clone().enforce_budgets();

    let remaining_list = options.max_list_ids as i64 - session.scanned_total;
    if remaining_list <= 0 {
        finish_session(ctx, &session).await?;
        return Ok(());
    }

    let deadline_at = Instant::now() + Duration::from_millis(options.chunk_ms);
    let driver = GmailDriver::new(access_token.to_string(), &options, ctx.timeouts)
        .with_deadline(deadline_at);

    let directory_entries = ctx.directory.clone().get(ctx.db.clone()).await?;
    let overrides = directory::load_overrides(ctx.db.clone(), &session.user_id).await?;

    let chunk_ctx = ChunkContext {
        options: options.clone(),
        directory: directory_entries,
        overrides,
        cursor: session.cursor.clone(),
        list_budget: (options.page_size as i64 * 3).min(remaining_list) as usize,
        deadline_at,
        query: driver.query().to_string(),
    };

    sessions::renew_lease(&ctx.db, session.id, worker_id).await?;

    let outcome = match run_chunk(&driver, chunk_ctx).await {
        Ok(outcome) => outcome,
        Err(ChunkError::ListFailed(e)) => {
            let (code, message) = map_list_failure(&e);
            fail_session(ctx, &session, code, &message).await?;
            return Ok(());
        }
    };

    sessions::renew_lease(&ctx.db, session.id, worker_id).await?;

    // Only new fingerprints count toward the session's found total
    let found_delta =
        candidates::upsert_candidates(&ctx.db, session.id, &outcome.candidates).await? as i64;

    let stats_json = serde_json::to_value(&outcome.stats)?;
    sessions::update_progress(
        &ctx.db,
        session.id,
        worker_id,
        outcome.stats.scanned as i64,
        found_delta,
        outcome.next_cursor.as_deref(),
        &stats_json,
    )
    .await?;

    let Some(updated) = sessions::load_session(&ctx.db, session.id).await? else {
        return Ok(());
    };

    let cursor_key = updated.cursor.clone().unwrap_or_else(|| "end".to_string());

    events::append_event(
        &ctx.db,
        updated.id,
        &updated.user_id,
        EventType::Progress,
        &json!({
            "phase": "scanning",
            "pages": updated.pages,
            "cursor": updated.cursor,
            "scannedTotal": updated.scanned_total,
            "foundTotal": updated.found_total,
            "stats": stats_json,
        }),
        Some(&format!("progress:{}:{}", updated.pages, cursor_key)),
    )
    .await?;

    if found_delta > 0 {
        events::append_event(
            &ctx.db,
            updated.id,
            &updated.user_id,
            EventType::Candidates,
            &json!({
                "pages": updated.pages,
                "candidates": outcome.candidates,
            }),
            Some(&format!("candidates:{}:{}", updated.pages, cursor_key)),
        )
        .await?;
    }

    // Cancel observed between chunks
    if updated.status == SessionStatus::Canceled {
        emit_done(ctx, &updated, true).await?;
        ctx.queue.clear_session(updated.id);
        return Ok(());
    }

    if updated.should_finish() {
        finish_session(ctx, &updated).await?;
    } else if let Err(e) = ctx
        .queue
        .enqueue_chunk(updated.id, updated.cursor.as_deref())
    {
        fail_session(
            ctx,
            &updated,
            ScanErrorCode::QueueEnqueueFailed,
            &format!("could not enqueue next chunk: {e}"),
        )
        .await?;
    }

    Ok(())
}

/// Map a fatal list failure onto the closed error-code set
fn map_list_failure(error: &DriverError) -> (ScanErrorCode, String) {
    let code = match error {
        DriverError::Auth(_) => ScanErrorCode::AuthFailed,
        DriverError::Network(_) | DriverError::Timeout => ScanErrorCode::NetworkError,
        DriverError::RateLimited | DriverError::Status(_) => ScanErrorCode::GmailListFailed,
        DriverError::Protocol(_) => ScanErrorCode::ChunkError,
    };
    (code, error.to_string())
}

/// Terminal success: mark done, emit the final event, clear the queue
async fn finish_session(ctx: &AppContext, session: &ScanSession) -> Result<()> {
    sessions::mark_done(&ctx.db, session.id).await?;
    emit_done(ctx, session, false).await?;
    ctx.queue.clear_session(session.id);
    ctx.tokens.forget(session.id).await;

    tracing::info!(
        session_id = %session.id,
        pages = session.pages,
        scanned = session.scanned_total,
        found = session.found_total,
        "Scan session finished"
    );
    Ok(())
}

async fn emit_done(ctx: &AppContext, session: &ScanSession, canceled: bool) -> Result<()> {
    let mut payload = json!({
        "pages": session.pages,
        "scannedTotal": session.scanned_total,
        "foundTotal": session.found_total,
    });
    if canceled {
        payload["canceled"] = json!(true);
    }
    events::append_event(
        &ctx.db,
        session.id,
        &session.user_id,
        EventType::Done,
        &payload,
        Some("done"),
    )
    .await?;
    Ok(())
}

/// Terminal failure: mark error, emit the scan_failed event, clear the queue
async fn fail_session(
    ctx: &AppContext,
    session: &ScanSession,
    code: ScanErrorCode,
    message: &str,
) -> Result<()> {
    sessions::mark_error(&ctx.db, session.id, code, message).await?;
    events::append_event(
        &ctx.db,
        session.id,
        &session.user_id,
        EventType::Error,
        &json!({
            "phase": "scan_failed",
            "code": code.as_str(),
            "message": message,
        }),
        Some("error"),
    )
    .await?;
    ctx.queue.clear_session(session.id);

    tracing::warn!(
        session_id = %session.id,
        code = code.as_str(),
        message,
        "Scan session failed"
    );
    Ok(())
}
