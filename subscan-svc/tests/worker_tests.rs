//! Worker lifecycle tests
//!
//! Exercise the orchestrator paths that do not need a live mailbox: token
//! failures, cancel observation, budget exhaustion, and queue idempotence.

mod helpers;

use helpers::test_context;
use std::time::Duration;
use subscan_common::events::EventType;
use subscan_svc::models::{
    Provider, ScanErrorCode, ScanOptions, ScanSession, SessionStatus,
};
use subscan_svc::queue::worker::run_worker;
use subscan_svc::store::{events, sessions};
use subscan_svc::token::{OAuthTokens, TokenProvider};
use subscan_svc::AppContext;

/// Poll the session until it reaches a terminal state or the budget expires
async fn wait_terminal(ctx: &AppContext, session_id: uuid::Uuid) -> ScanSession {
    for _ in 0..100 {
        let session = sessions::load_session(&ctx.db, session_id)
            .await
            .unwrap()
            .expect("session exists");
        if session.is_terminal() {
            return session;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("session never reached a terminal state");
}

async fn wait_for_event(
    ctx: &AppContext,
    session_id: uuid::Uuid,
    event_type: EventType,
) -> subscan_common::events::EventRecord {
    for _ in 0..100 {
        let rows = events::poll_events_after(&ctx.db, session_id, 0, 100)
            .await
            .unwrap();
        if let Some(row) = rows.into_iter().find(|r| r.event_type == event_type) {
            return row;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("event {:?} never appeared", event_type);
}

#[tokio::test]
async fn tc_worker_001_missing_token_fails_session() {
    let (ctx, rx) = test_context().await;
    tokio::spawn(run_worker(ctx.clone(), rx));

    // A gmail session with no stored token
    let session = ScanSession::new("user-1", Provider::Gmail, ScanOptions::default());
    sessions::create_session(&ctx.db, &session).await.unwrap();
    ctx.queue.enqueue_chunk(session.id, None).unwrap();

    let terminal = wait_terminal(&ctx, session.id).await;
    assert_eq!(terminal.status, SessionStatus::Error);
    assert_eq!(terminal.error_code, Some(ScanErrorCode::MissingToken));

    let error_event = wait_for_event(&ctx, session.id, EventType::Error).await;
    assert_eq!(error_event.payload["code"], "MISSING_TOKEN");
    assert_eq!(error_event.payload["phase"], "scan_failed");
}

#[tokio::test]
async fn tc_worker_002_cancel_observed_before_chunk() {
    let (ctx, rx) = test_context().await;
    tokio::spawn(run_worker(ctx.clone(), rx));

    let session = ScanSession::new("user-1", Provider::Gmail, ScanOptions::default());
    sessions::create_session(&ctx.db, &session).await.unwrap();

    // Cancel lands before the worker ever sees the job
    sessions::cancel_session(&ctx.db, session.id).await.unwrap();
    ctx.queue.enqueue_chunk(session.id, None).unwrap();

    let done = wait_for_event(&ctx, session.id, EventType::Done).await;
    assert_eq!(done.payload["canceled"], true);

    let terminal = sessions::load_session(&ctx.db, session.id).await.unwrap().unwrap();
    assert_eq!(terminal.status, SessionStatus::Canceled);
}

#[tokio::test]
async fn tc_worker_003_list_budget_exhaustion_finishes_session() {
    let (ctx, rx) = test_context().await;
    tokio::spawn(run_worker(ctx.clone(), rx));

    // A session that already scanned its entire listing budget
    let mut session = ScanSession::new("user-1", Provider::Gmail, ScanOptions::default());
    session.scanned_total = session.options.clone().enforce_budgets().max_list_ids as i64;
    session.cursor = Some("deep-page".to_string());
    sessions::create_session(&ctx.db, &session).await.unwrap();
    ctx.tokens
        .store(
            session.id,
            OAuthTokens {
                access_token: "token".to_string(),
                refresh_token: None,
                expires_at: None,
            },
        )
        .await;

    ctx.queue.enqueue_chunk(session.id, session.cursor.as_deref()).unwrap();

    let terminal = wait_terminal(&ctx, session.id).await;
    assert_eq!(terminal.status, SessionStatus::Done);

    let done = wait_for_event(&ctx, session.id, EventType::Done).await;
    assert!(done.payload.get("canceled").is_none());
    assert_eq!(done.dedupe_key.as_deref(), Some("done"));
}

#[tokio::test]
async fn tc_worker_008_unusable_token_is_bootstrap_failure() {
    let (ctx, rx) = test_context().await;
    tokio::spawn(run_worker(ctx.clone(), rx));

    let session = ScanSession::new("user-1", Provider::Gmail, ScanOptions::default());
    sessions::create_session(&ctx.db, &session).await.unwrap();

    // Token material exists but expired with no refresh token
    ctx.tokens
        .store(
            session.id,
            OAuthTokens {
                access_token: "stale".to_string(),
                refresh_token: None,
                expires_at: Some(chrono::Utc::now() - chrono::Duration::hours(1)),
            },
        )
        .await;
    ctx.queue.enqueue_chunk(session.id, None).unwrap();

    let terminal = wait_terminal(&ctx, session.id).await;
    assert_eq!(terminal.status, SessionStatus::Error);
    assert_eq!(
        terminal.error_code,
        Some(ScanErrorCode::TokenBootstrapFailed)
    );

    let error_event = wait_for_event(&ctx, session.id, EventType::Error).await;
    assert_eq!(error_event.payload["code"], "TOKEN_BOOTSTRAP_FAILED");
}

#[tokio::test]
async fn tc_worker_004_unsupported_provider_fails_closed() {
    let (ctx, rx) = test_context().await;
    tokio::spawn(run_worker(ctx.clone(), rx));

    let session = ScanSession::new("user-1", Provider::Imap, ScanOptions::default());
    sessions::create_session(&ctx.db, &session).await.unwrap();
    ctx.queue.enqueue_chunk(session.id, None).unwrap();

    let terminal = wait_terminal(&ctx, session.id).await;
    assert_eq!(terminal.status, SessionStatus::Error);
    assert_eq!(terminal.error_code, Some(ScanErrorCode::UnsupportedProvider));
}

#[tokio::test]
async fn tc_worker_005_terminal_session_job_is_noop() {
    let (ctx, rx) = test_context().await;
    tokio::spawn(run_worker(ctx.clone(), rx));

    let session = ScanSession::new("user-1", Provider::Gmail, ScanOptions::default());
    sessions::create_session(&ctx.db, &session).await.unwrap();
    sessions::mark_done(&ctx.db, session.id).await.unwrap();

    ctx.queue.enqueue_chunk(session.id, None).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Status untouched, no error event, no progress event
    let after = sessions::load_session(&ctx.db, session.id).await.unwrap().unwrap();
    assert_eq!(after.status, SessionStatus::Done);
    let rows = events::poll_events_after(&ctx.db, session.id, 0, 100).await.unwrap();
    assert!(rows.iter().all(|r| r.event_type != EventType::Error));
}

#[tokio::test]
async fn tc_worker_006_hello_precedes_progress() {
    let (ctx, rx) = test_context().await;
    tokio::spawn(run_worker(ctx.clone(), rx));

    let session = ScanSession::new("user-1", Provider::Gmail, ScanOptions::default());
    sessions::create_session(&ctx.db, &session).await.unwrap();

    // Hello is written by the start surface before any job runs
    events::append_event(
        &ctx.db,
        session.id,
        &session.user_id,
        EventType::Hello,
        &serde_json::json!({"sessionId": session.id}),
        Some(&format!("hello:{}", session.id)),
    )
    .await
    .unwrap();

    ctx.queue.enqueue_chunk(session.id, None).unwrap();
    // The missing token fails the session, but a starting progress event
    // still lands after hello
    wait_terminal(&ctx, session.id).await;

    let rows = events::poll_events_after(&ctx.db, session.id, 0, 100).await.unwrap();
    let hello_pos = rows.iter().position(|r| r.event_type == EventType::Hello);
    let progress_pos = rows.iter().position(|r| r.event_type == EventType::Progress);
    assert!(hello_pos.is_some());
    assert!(progress_pos.is_some());
    assert!(hello_pos < progress_pos);

    // Terminal event is last
    assert_eq!(rows.last().unwrap().event_type, EventType::Error);
}

#[tokio::test]
async fn tc_worker_007_lease_not_stolen_while_live() {
    let (ctx, _rx) = test_context().await;

    let session = ScanSession::new("user-1", Provider::Gmail, ScanOptions::default());
    sessions::create_session(&ctx.db, &session).await.unwrap();

    assert!(sessions::try_lease(&ctx.db, session.id, "other-worker").await.unwrap());

    // The worker loop (not started here) would skip this job; verify the
    // primitive the worker relies on
    assert!(!sessions::try_lease(&ctx.db, session.id, "this-worker").await.unwrap());
}
