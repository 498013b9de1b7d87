//! HTTP API handlers
//!
//! Thin layer over the store, queue and engine: validate, check ownership,
//! delegate. Every session read verifies the bearer subject owns the
//! session; foreign sessions 404 rather than 403 so ids never leak.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::api::auth::AuthedUser;
use crate::api::error::{ApiError, ApiResult};
use crate::detect::best_per_merchant;
use crate::engine::{run_chunk, ChunkContext, ChunkError};
use crate::mail::gmail::{fetch_profile, GmailDriver};
use crate::mail::imap::{ImapConfig, ImapDriver};
use crate::mail::{DriverError, MailboxDriver};
use crate::models::{Provider, ScanErrorCode, ScanOptions, ScanSession, SessionStatus};
use crate::store::{candidates, directory, events, sessions, UserOverride};
use crate::token::OAuthTokens;
use crate::AppContext;
use subscan_common::events::EventType;

// -- request/response shapes ----------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Epoch milliseconds
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl AuthPayload {
    fn into_tokens(self) -> OAuthTokens {
        OAuthTokens {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self
                .expires_at
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StartScanRequest {
    pub auth: AuthPayload,
    #[serde(default)]
    pub options: ScanOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdBody {
    pub session_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub session_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub provider: String,
    #[serde(default)]
    pub imap: Option<ImapConfig>,
    #[serde(default)]
    pub auth: Option<AuthPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailScanRequest {
    pub provider: String,
    #[serde(default)]
    pub imap: Option<ImapConfig>,
    #[serde(default)]
    pub auth: Option<AuthPayload>,
    #[serde(default)]
    pub options: ScanOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub canonical_name: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub sender_email: Option<String>,
    #[serde(default)]
    pub sender_domain: Option<String>,
}

// -- helpers ----------------------------------------------------------------

/// Load a session the caller owns; anything else is a 404
pub(crate) async fn load_owned_session(
    ctx: &AppContext,
    user: &AuthedUser,
    session_id: Uuid,
) -> ApiResult<ScanSession> {
    let session = sessions::load_session(&ctx.db, session_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    if session.user_id != user.0 {
        return Err(ApiError::NotFound);
    }
    Ok(session)
}

// -- handlers ---------------------------------------------------------------

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

/// POST /v1/gmail/scan/start
pub async fn gmail_scan_start(
    State(ctx): State<AppContext>,
    user: AuthedUser,
    Json(request): Json<StartScanRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if request.auth.access_token.trim().is_empty() {
        return Err(ApiError::BadRequest("auth.accessToken is required".into()));
    }

    let options = request.options.enforce_budgets();
    let cursor = options.cursor.clone();

    let mut session = ScanSession::new(user.0.clone(), Provider::Gmail, options);
    session.cursor = cursor;

    sessions::create_session(&ctx.db, &session)
        .await
        .map_err(|e| ApiError::ScanInit(ScanErrorCode::SessionCreateFailed, e.to_string()))?;
    ctx.tokens
        .store(session.id, request.auth.into_tokens())
        .await;

    events::append_event(
        &ctx.db,
        session.id,
        &session.user_id,
        EventType::Hello,
        &json!({
            "sessionId": session.id,
            "provider": session.provider.as_str(),
            "createdAt": session.created_at.to_rfc3339(),
        }),
        Some(&format!("hello:{}", session.id)),
    )
    .await?;

    if ctx
        .queue
        .enqueue_chunk(session.id, session.cursor.as_deref())
        .is_err()
    {
        // Session stays queued; /run can re-enqueue once the queue is back
        return Err(ApiError::QueueUnavailable(ScanErrorCode::QueueEnqueueFailed));
    }

    tracing::info!(
        session_id = %session.id,
        user_id = %session.user_id,
        "Scan session started"
    );

    Ok(Json(json!({
        "ok": true,
        "sessionId": session.id,
        "status": session.status.as_str(),
    })))
}

/// POST /v1/gmail/scan/run
pub async fn gmail_scan_run(
    State(ctx): State<AppContext>,
    user: AuthedUser,
    Json(body): Json<SessionIdBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = load_owned_session(&ctx, &user, body.session_id).await?;
    if session.is_terminal() {
        return Err(ApiError::BadRequest(format!(
            "session is {}",
            session.status.as_str()
        )));
    }

    if ctx
        .queue
        .enqueue_chunk(session.id, session.cursor.as_deref())
        .is_err()
    {
        return Err(ApiError::QueueUnavailable(ScanErrorCode::QueueEnqueueFailed));
    }

    Ok(Json(json!({ "ok": true })))
}

/// POST /v1/gmail/scan/cancel
pub async fn gmail_scan_cancel(
    State(ctx): State<AppContext>,
    user: AuthedUser,
    Json(body): Json<SessionIdBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = load_owned_session(&ctx, &user, body.session_id).await?;

    let canceled = sessions::cancel_session(&ctx.db, session.id).await?;
    if canceled {
        tracing::info!(session_id = %session.id, "Scan session canceled");
    }

    let status = sessions::load_session(&ctx.db, session.id)
        .await?
        .map(|s| s.status)
        .unwrap_or(SessionStatus::Canceled);

    Ok(Json(json!({ "ok": true, "status": status.as_str() })))
}

/// GET /v1/gmail/scan/status
pub async fn gmail_scan_status(
    State(ctx): State<AppContext>,
    user: AuthedUser,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<ScanSession>> {
    let session = load_owned_session(&ctx, &user, query.session_id).await?;
    Ok(Json(session))
}

/// GET /v1/gmail/scan/diagnostics/:session_id
pub async fn gmail_scan_diagnostics(
    State(ctx): State<AppContext>,
    user: AuthedUser,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = load_owned_session(&ctx, &user, session_id).await?;
    let tail = events::tail_events(&ctx.db, session.id, 50).await?;
    let found = candidates::count_candidates(&ctx.db, session.id).await?;

    Ok(Json(json!({
        "session": session,
        "lastStats": session.last_stats,
        "candidateRows": found,
        "events": tail,
    })))
}

/// POST /v1/email/verify
pub async fn email_verify(
    State(ctx): State<AppContext>,
    _user: AuthedUser,
    Json(request): Json<VerifyRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    match request.provider.as_str() {
        "gmail" => {
            let auth = request
                .auth
                .ok_or_else(|| ApiError::BadRequest("auth is required for gmail".into()))?;
            let profile = fetch_profile(&auth.access_token, ctx.timeouts.meta_ms)
                .await
                .map_err(|e| map_verify_failure("gmail", &e))?;
            Ok(Json(json!({
                "ok": true,
                "provider": "gmail",
                "email": profile.email_address,
                "messagesTotal": profile.messages_total,
                "capabilities": ["list", "metadata", "full"],
            })))
        }
        "imap" => {
            let config = request
                .imap
                .ok_or_else(|| ApiError::BadRequest("imap settings are required".into()))?;
            let is_gmail_host = config.host.contains("gmail");
            let driver = ImapDriver::new(config, 30, 50, ctx.timeouts);
            let info = driver.verify().await.map_err(|e| {
                if is_gmail_host && matches!(e, DriverError::Auth(_)) {
                    ApiError::BadRequest(format!(
                        "{}: gmail imap requires an app password",
                        ScanErrorCode::NeedsAppPassword.as_str()
                    ))
                } else {
                    map_verify_failure("imap", &e)
                }
            })?;
            Ok(Json(json!({
                "ok": true,
                "provider": "imap",
                "mailbox": { "exists": info.mailbox_exists },
                "capabilities": info.capabilities,
            })))
        }
        other => Err(ApiError::BadRequest(format!("unsupported provider: {other}"))),
    }
}

fn map_verify_failure(provider: &str, error: &DriverError) -> ApiError {
    match error {
        DriverError::Auth(msg) => ApiError::BadRequest(format!(
            "{}: {msg}",
            ScanErrorCode::AuthFailed.as_str()
        )),
        DriverError::Network(msg) => ApiError::BadRequest(format!(
            "{}: {msg}",
            ScanErrorCode::NetworkError.as_str()
        )),
        DriverError::Timeout => ApiError::BadRequest(format!(
            "{}: {provider} verification timed out",
            ScanErrorCode::NetworkError.as_str()
        )),
        other => ApiError::Internal(anyhow::anyhow!("verify failed: {other}")),
    }
}

/// POST /v1/email/scan
///
/// Synchronous single-chunk scan, primarily for IMAP mailboxes; the caller
/// resumes by passing back the returned cursor.
pub async fn email_scan(
    State(ctx): State<AppContext>,
    user: AuthedUser,
    Json(request): Json<EmailScanRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let options = request.options.enforce_budgets();
    let deadline_at = Instant::now() + Duration::from_millis(options.chunk_ms);
    let mut gmail_imap_host = false;

    let (driver, query): (Box<dyn MailboxDriver>, String) = match request.provider.as_str() {
        "gmail" => {
            let auth = request
                .auth
                .ok_or_else(|| ApiError::BadRequest("auth is required for gmail".into()))?;
            if auth.access_token.trim().is_empty() {
                return Err(ApiError::BadRequest("auth.accessToken is required".into()));
            }
            let driver = GmailDriver::new(auth.access_token, &options, ctx.timeouts)
                .with_deadline(deadline_at);
            let query = driver.query().to_string();
            (Box::new(driver), query)
        }
        "imap" => {
            let config = request
                .imap
                .ok_or_else(|| ApiError::BadRequest("imap settings are required".into()))?;
            gmail_imap_host = config.host.contains("gmail");
            let query = format!("imap:inbox:since:{}d", options.days_back);
            let driver = ImapDriver::new(config, options.days_back, options.page_size, ctx.timeouts)
                .with_deadline(deadline_at);
            (Box::new(driver), query)
        }
        other => {
            return Err(ApiError::BadRequest(format!("unsupported provider: {other}")));
        }
    };

    let directory_entries = ctx.directory.clone().get(ctx.db.clone()).await?;
    let overrides = directory::load_overrides(ctx.db.clone(), &user.0).await?;

    let chunk_ctx = ChunkContext {
        cursor: options.cursor.clone(),
        list_budget: options.max_list_ids as usize,
        options,
        directory: directory_entries,
        overrides,
        deadline_at,
        query,
    };

    let outcome = run_chunk(driver.as_ref(), chunk_ctx).await.map_err(|e| {
        let ChunkError::ListFailed(inner) = &e;
        match inner {
            DriverError::Auth(_) if gmail_imap_host => ApiError::BadRequest(format!(
                "{}: gmail imap requires an app password",
                ScanErrorCode::NeedsAppPassword.as_str()
            )),
            DriverError::Auth(msg) => ApiError::BadRequest(format!(
                "{}: {msg}",
                ScanErrorCode::AuthFailed.as_str()
            )),
            DriverError::Network(msg) => ApiError::BadRequest(format!(
                "{}: {msg}",
                ScanErrorCode::NetworkError.as_str()
            )),
            _ => ApiError::Internal(anyhow::anyhow!("scan chunk failed: {e}")),
        }
    })?;

    let best = best_per_merchant(outcome.candidates);

    Ok(Json(json!({
        "ok": true,
        "stats": outcome.stats,
        "candidates": best,
        "nextCursor": outcome.next_cursor,
    })))
}

/// POST /v1/merchant/confirm
pub async fn merchant_confirm(
    State(ctx): State<AppContext>,
    user: AuthedUser,
    Json(request): Json<ConfirmRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let canonical_name = request.canonical_name.trim().to_string();
    if canonical_name.len() < 2 {
        return Err(ApiError::BadRequest("canonicalName is required".into()));
    }

    let mut sender_email = request
        .sender_email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| e.contains('@'));
    let mut sender_domain = request
        .sender_domain
        .map(|d| d.trim().to_lowercase())
        .filter(|d| d.contains('.'));

    if sender_email.is_none() && sender_domain.is_none() {
        if let Some(from) = &request.from {
            let (_, email) = crate::mail::normalize::parse_address(from);
            if email.contains('@') {
                sender_domain = crate::resolve::domains::domain_of_email(&email);
                sender_email = Some(email);
            }
        }
    }

    if sender_email.is_none() && sender_domain.is_none() {
        return Err(ApiError::BadRequest(
            "one of from, senderEmail, senderDomain is required".into(),
        ));
    }

    let ovr = UserOverride {
        user_id: user.0.clone(),
        sender_email,
        sender_domain,
        canonical_name,
    };
    directory::upsert_override(&ctx.db, &ovr).await?;

    tracing::info!(user_id = %user.0, merchant = %ovr.canonical_name, "Merchant override confirmed");

    Ok(Json(json!({ "ok": true })))
}
