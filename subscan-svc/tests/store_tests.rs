//! Store layer integration tests: idempotence laws and lease discipline

mod helpers;

use helpers::test_context;
use serde_json::json;
use subscan_common::events::EventType;
use subscan_svc::models::{
    BillingEventType, Candidate, ConfidenceLabel, EvidenceSample, EvidenceType, Provider,
    ScanErrorCode, ScanOptions, ScanSession, SessionStatus,
};
use subscan_svc::store::{candidates, directory, events, sessions, UserOverride};

fn sample_candidate(fingerprint: &str, merchant: &str) -> Candidate {
    let evidence = EvidenceSample {
        from: format!("{merchant} <billing@x.com>"),
        subject: "Receipt".to_string(),
        snippet: String::new(),
        sender_email: "billing@x.com".to_string(),
        sender_domain: "x.com".to_string(),
        date_ms: 1_730_000_000_000,
    };
    Candidate {
        fingerprint: fingerprint.to_string(),
        merchant: merchant.to_string(),
        plan: None,
        amount: Some(9.99),
        currency: Some("USD".to_string()),
        cadence_guess: None,
        next_date_guess: None,
        confidence: 70,
        confidence_label: ConfidenceLabel::from_score(70),
        evidence_type: EvidenceType::Transactional,
        reasons: vec![],
        evidence: evidence.clone(),
        evidence_samples: vec![evidence],
        needs_confirm: true,
        event_type: BillingEventType::Receipt,
        exclude_from_spend: false,
    }
}

#[tokio::test]
async fn tc_store_001_session_round_trip() {
    let (ctx, _rx) = test_context().await;

    let session = ScanSession::new("user-1", Provider::Gmail, ScanOptions::default());
    sessions::create_session(&ctx.db, &session).await.unwrap();

    let loaded = sessions::load_session(&ctx.db, session.id)
        .await
        .unwrap()
        .expect("session should exist");

    assert_eq!(loaded.user_id, "user-1");
    assert_eq!(loaded.provider, Provider::Gmail);
    assert_eq!(loaded.status, SessionStatus::Queued);
    assert_eq!(loaded.options, session.options);
    assert_eq!(loaded.pages, 0);
}

#[tokio::test]
async fn tc_store_002_lease_discipline() {
    let (ctx, _rx) = test_context().await;
    let session = ScanSession::new("user-1", Provider::Gmail, ScanOptions::default());
    sessions::create_session(&ctx.db, &session).await.unwrap();

    // First worker takes the lease; a second cannot steal a live one
    assert!(sessions::try_lease(&ctx.db, session.id, "w1").await.unwrap());
    assert!(!sessions::try_lease(&ctx.db, session.id, "w2").await.unwrap());

    // The holder re-acquires and renews freely
    assert!(sessions::try_lease(&ctx.db, session.id, "w1").await.unwrap());
    assert!(sessions::renew_lease(&ctx.db, session.id, "w1").await.unwrap());
    assert!(!sessions::renew_lease(&ctx.db, session.id, "w2").await.unwrap());
}

#[tokio::test]
async fn tc_store_003_progress_is_monotonic_and_lease_guarded() {
    let (ctx, _rx) = test_context().await;
    let session = ScanSession::new("user-1", Provider::Gmail, ScanOptions::default());
    sessions::create_session(&ctx.db, &session).await.unwrap();
    sessions::try_lease(&ctx.db, session.id, "w1").await.unwrap();

    let stats = json!({"listed": 10});
    assert!(sessions::update_progress(&ctx.db, session.id, "w1", 10, 2, Some("c2"), &stats)
        .await
        .unwrap());

    // A non-holder cannot advance the session
    assert!(!sessions::update_progress(&ctx.db, session.id, "w2", 99, 99, None, &stats)
        .await
        .unwrap());

    let after_one = sessions::load_session(&ctx.db, session.id).await.unwrap().unwrap();
    assert_eq!(after_one.pages, 1);
    assert_eq!(after_one.scanned_total, 10);
    assert_eq!(after_one.found_total, 2);
    assert_eq!(after_one.cursor.as_deref(), Some("c2"));

    // Counters only grow
    sessions::update_progress(&ctx.db, session.id, "w1", 5, 1, None, &stats)
        .await
        .unwrap();
    let after_two = sessions::load_session(&ctx.db, session.id).await.unwrap().unwrap();
    assert_eq!(after_two.pages, 2);
    assert_eq!(after_two.scanned_total, 15);
    assert_eq!(after_two.found_total, 3);
}

#[tokio::test]
async fn tc_store_004_terminal_states_sticky() {
    let (ctx, _rx) = test_context().await;
    let session = ScanSession::new("user-1", Provider::Gmail, ScanOptions::default());
    sessions::create_session(&ctx.db, &session).await.unwrap();

    assert!(sessions::mark_done(&ctx.db, session.id).await.unwrap());

    // No transition out of done
    assert!(!sessions::cancel_session(&ctx.db, session.id).await.unwrap());
    assert!(!sessions::mark_error(&ctx.db, session.id, ScanErrorCode::Unknown, "late")
        .await
        .unwrap());

    let loaded = sessions::load_session(&ctx.db, session.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, SessionStatus::Done);
    assert!(loaded.error_code.is_none());
}

#[tokio::test]
async fn tc_store_005_event_dedupe_key_collapses_writes() {
    let (ctx, _rx) = test_context().await;
    let session = ScanSession::new("user-1", Provider::Gmail, ScanOptions::default());
    sessions::create_session(&ctx.db, &session).await.unwrap();

    let payload = json!({"phase": "scanning"});
    let first = events::append_event(
        &ctx.db, session.id, "user-1", EventType::Progress, &payload, Some("progress:1:c"),
    )
    .await
    .unwrap();
    let second = events::append_event(
        &ctx.db, session.id, "user-1", EventType::Progress, &payload, Some("progress:1:c"),
    )
    .await
    .unwrap();

    assert!(first.is_some());
    assert!(second.is_none());

    let rows = events::poll_events_after(&ctx.db, session.id, 0, 10).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn tc_store_006_events_ordered_and_keyless_writes_all_persist() {
    let (ctx, _rx) = test_context().await;
    let session = ScanSession::new("user-1", Provider::Gmail, ScanOptions::default());
    sessions::create_session(&ctx.db, &session).await.unwrap();

    for i in 0..5 {
        events::append_event(
            &ctx.db,
            session.id,
            "user-1",
            EventType::Progress,
            &json!({"i": i}),
            None,
        )
        .await
        .unwrap();
    }

    let rows = events::poll_events_after(&ctx.db, session.id, 0, 10).await.unwrap();
    assert_eq!(rows.len(), 5);
    for pair in rows.windows(2) {
        assert!(pair[0].id < pair[1].id, "ids must strictly increase");
    }

    // Cursor-based polling resumes past what was seen
    let tail = events::poll_events_after(&ctx.db, session.id, rows[2].id, 10)
        .await
        .unwrap();
    assert_eq!(tail.len(), 2);
}

#[tokio::test]
async fn tc_store_007_candidate_fingerprint_unique_per_session() {
    let (ctx, _rx) = test_context().await;
    let session = ScanSession::new("user-1", Provider::Gmail, ScanOptions::default());
    sessions::create_session(&ctx.db, &session).await.unwrap();

    let first = candidates::upsert_candidates(
        &ctx.db,
        session.id,
        &[sample_candidate("fp-1", "Svc"), sample_candidate("fp-2", "Svc")],
    )
    .await
    .unwrap();
    assert_eq!(first, 2);

    // Re-inserting the same fingerprints counts zero new rows
    let second = candidates::upsert_candidates(
        &ctx.db,
        session.id,
        &[sample_candidate("fp-1", "Svc"), sample_candidate("fp-3", "Svc")],
    )
    .await
    .unwrap();
    assert_eq!(second, 1);

    assert_eq!(candidates::count_candidates(&ctx.db, session.id).await.unwrap(), 3);

    // A different session is free to hold the same fingerprint
    let other = ScanSession::new("user-1", Provider::Gmail, ScanOptions::default());
    sessions::create_session(&ctx.db, &other).await.unwrap();
    let cross = candidates::upsert_candidates(&ctx.db, other.id, &[sample_candidate("fp-1", "Svc")])
        .await
        .unwrap();
    assert_eq!(cross, 1);
}

#[tokio::test]
async fn tc_store_008_override_upsert_per_axis() {
    let (ctx, _rx) = test_context().await;

    directory::upsert_override(
        &ctx.db,
        &UserOverride {
            user_id: "user-1".to_string(),
            sender_email: Some("billing@x.com".to_string()),
            sender_domain: None,
            canonical_name: "Acme".to_string(),
        },
    )
    .await
    .unwrap();

    // Same axis, new name: updates in place
    directory::upsert_override(
        &ctx.db,
        &UserOverride {
            user_id: "user-1".to_string(),
            sender_email: Some("billing@x.com".to_string()),
            sender_domain: None,
            canonical_name: "Acme Corp".to_string(),
        },
    )
    .await
    .unwrap();

    let overrides = directory::load_overrides(ctx.db.clone(), "user-1").await.unwrap();
    assert_eq!(overrides.len(), 1);
    assert_eq!(overrides[0].canonical_name, "Acme Corp");

    // Other users see nothing
    assert!(directory::load_overrides(ctx.db.clone(), "user-2").await.unwrap().is_empty());
}

#[tokio::test]
async fn tc_store_009_seeded_directory_served_from_cache() {
    let (ctx, _rx) = test_context().await;

    let first = ctx.directory.clone().get(ctx.db.clone()).await.unwrap();
    assert!(first.iter().any(|e| e.canonical_name == "Netflix"));

    // Cached read returns the same snapshot
    let second = ctx.directory.clone().get(ctx.db.clone()).await.unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn tc_store_010_resumable_sessions_listed() {
    let (ctx, _rx) = test_context().await;

    let stranded = ScanSession::new("user-1", Provider::Gmail, ScanOptions::default());
    sessions::create_session(&ctx.db, &stranded).await.unwrap();

    let finished = ScanSession::new("user-1", Provider::Gmail, ScanOptions::default());
    sessions::create_session(&ctx.db, &finished).await.unwrap();
    sessions::mark_done(&ctx.db, finished.id).await.unwrap();

    let resumable = sessions::list_resumable(&ctx.db).await.unwrap();
    assert!(resumable.contains(&stranded.id));
    assert!(!resumable.contains(&finished.id));
}
