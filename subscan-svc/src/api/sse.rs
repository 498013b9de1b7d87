//! SSE projection of the event log
//!
//! Long-polls the store for rows past the client's cursor, forwards them in
//! id order, pings on an interval so intermediaries keep the connection
//! open, and stops after forwarding a terminal `done`/`error` event. Client
//! disconnect drops the stream future, which ends polling and releases the
//! connection's store handle.

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::api::auth::AuthedUser;
use crate::api::error::ApiResult;
use crate::store::events;
use crate::AppContext;

/// Rows fetched per poll
const POLL_BATCH: i64 = 200;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    pub session_id: Uuid,
    #[serde(default)]
    pub after_id: Option<i64>,
}

/// GET /v1/gmail/scan/stream
pub async fn scan_stream(
    State(ctx): State<AppContext>,
    user: AuthedUser,
    Query(query): Query<StreamQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    // Ownership check up front; the stream itself never re-authenticates
    let session = super::handlers::load_owned_session(&ctx, &user, query.session_id).await?;

    tracing::info!(session_id = %session.id, "SSE client connected");

    let db = ctx.db.clone();
    let session_id = session.id;
    let poll_interval = Duration::from_millis(ctx.sse_poll_ms);
    let ping_interval = Duration::from_millis(ctx.sse_ping_ms);
    let mut cursor = query.after_id.unwrap_or(0);

    let stream = async_stream::stream! {
        let mut last_ping = Instant::now();

        loop {
            match events::poll_events_after(&db, session_id, cursor, POLL_BATCH).await {
                Ok(rows) => {
                    let mut saw_terminal = false;
                    for row in rows {
                        cursor = row.id;
                        if row.event_type.is_terminal() {
                            saw_terminal = true;
                        }
                        let data = serde_json::to_string(&row.payload)
                            .unwrap_or_else(|_| "{}".to_string());
                        yield Ok(Event::default()
                            .event(row.event_type.as_str())
                            .id(row.id.to_string())
                            .data(data));
                    }
                    if saw_terminal {
                        tracing::debug!(session_id = %session_id, "SSE stream observed terminal event");
                        break;
                    }
                }
                Err(e) => {
                    // Poll failures are transient; the next tick retries
                    tracing::warn!(session_id = %session_id, error = %e, "SSE poll failed");
                }
            }

            if last_ping.elapsed() >= ping_interval {
                last_ping = Instant::now();
                yield Ok(Event::default().event("ping").data("{}"));
            }

            tokio::time::sleep(poll_interval).await;
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    ))
}
