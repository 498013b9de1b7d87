//! Chunk engine
//!
//! Runs one bounded unit of scanning under a hard wall-clock deadline:
//! list → screen → full-fetch → build → cluster → aggregate → enrich.
//! Workers stop issuing new work ~900 ms before the true deadline so partial
//! results always flush; per-message failures are recorded and skipped, and
//! only a failed list call is fatal to the chunk.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::classify::{classify, quick_screen, ScreenReason};
use crate::detect::aggregate::{aggregate_chunk, strict_gate};
use crate::detect::candidate_builder::{build_candidate, BuildOutcome, NearMiss};
use crate::detect::cluster_builder::ClusterBuilder;
use crate::mail::normalize::build_surface;
use crate::mail::{DriverError, EmailBody, EmailMeta, MailboxDriver};
use crate::models::{Candidate, ScanOptions};
use crate::resolve::resolve;
use crate::store::{DirectoryEntry, UserOverride};

/// Flush margin before the hard deadline
const FLUSH_MARGIN_MS: u64 = 900;

/// List pages consumed per chunk at most
const LIST_PAGES_PER_CHUNK: usize = 3;

/// Near-miss samples kept per chunk
const NEAR_MISS_CAP: usize = 25;

/// Enrichment body fetches per chunk
const ENRICH_CAP: usize = 25;

/// Stats attached to every chunk result
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkStats {
    pub engine_version: String,
    pub listed: usize,
    pub scanned: usize,
    pub screened_in: usize,
    pub full_fetched: usize,
    pub raw_matched: usize,
    pub matched: usize,
    pub gated: usize,
    pub deadline_ms: u64,
    pub took_ms: u64,
    pub query: String,
    pub null_reasons: HashMap<String, u32>,
    pub near_misses: Vec<NearMiss>,
}

impl ChunkStats {
    fn bump(&mut self, reason: &str) {
        *self.null_reasons.entry(reason.to_string()).or_insert(0) += 1;
    }

    fn record_near_miss(&mut self, near_miss: NearMiss) {
        if self.near_misses.len() < NEAR_MISS_CAP {
            self.near_misses.push(near_miss);
        }
    }
}

/// Result of one chunk
#[derive(Debug)]
pub struct ChunkOutcome {
    pub candidates: Vec<Candidate>,
    pub next_cursor: Option<String>,
    pub stats: ChunkStats,
}

/// Only the list stage can kill a chunk
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("list call failed: {0}")]
    ListFailed(DriverError),
}

/// Everything a chunk needs besides the driver
pub struct ChunkContext {
    /// Budget-enforced options
    pub options: ScanOptions,
    pub directory: Arc<Vec<DirectoryEntry>>,
    pub overrides: Vec<UserOverride>,
    pub cursor: Option<String>,
    /// Listing budget left in the session (ids)
    pub list_budget: usize,
    /// Hard wall-clock deadline shared with the driver
    pub deadline_at: Instant,
    /// Query string for stats (driver-specific)
    pub query: String,
}

/// Run one chunk against a driver
pub fn run_chunk<'a, D: MailboxDriver + ?Sized>(
    driver: &'a D,
    ctx: ChunkContext,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<ChunkOutcome, ChunkError>> + Send + 'a>> {
    Box::pin(run_chunk_inner(driver, ctx))
}

async fn run_chunk_inner<D: MailboxDriver + ?Sized>(
    driver: &D,
    ctx: ChunkContext,
) -> Result<ChunkOutcome, ChunkError> {
    let started = Instant::now();
    let soft_deadline = ctx
        .deadline_at
        .checked_sub(std::time::Duration::from_millis(FLUSH_MARGIN_MS))
        .unwrap_or(ctx.deadline_at);
    let should_stop = move || Instant::now() >= soft_deadline;

    let now = chrono::Utc::now();
    let concurrency = ctx.options.concurrency.clamp(2, 10) as usize;

    let mut stats = ChunkStats {
        engine_version: "subscan-chunk/2".to_string(),
        deadline_ms: ctx.options.chunk_ms,
        query: ctx.query.clone(),
        ..ChunkStats::default()
    };

    // Stage 1: list message ids (sequential; a failure here is fatal)
    let mut ids: Vec<String> = Vec::new();
    let mut cursor = ctx.cursor.clone();
    let mut pages_listed = 0usize;
    loop {
        if should_stop() || pages_listed >= LIST_PAGES_PER_CHUNK || ids.len() >= ctx.list_budget {
            break;
        }
        let page = driver
            .list_page(cursor.as_deref())
            .await
            .map_err(ChunkError::ListFailed)?;
        pages_listed += 1;
        ids.extend(page.ids);
        cursor = page.next_cursor;
        if cursor.is_none() {
            break;
        }
    }
    ids.truncate(ctx.list_budget);
    stats.listed = ids.len();
    let next_cursor = cursor;

    tracing::debug!(
        listed = stats.listed,
        pages = pages_listed,
        has_next = next_cursor.is_some(),
        "Chunk list stage complete"
    );

    // Stage 2: metadata fetch + quick screen, bounded fan-out
    let metas: Vec<EmailMeta> = stream::iter(ids.iter().cloned())
        .map(|id| async move {
            if Instant::now() >= soft_deadline {
                return None;
            }
            match driver.fetch_metadata(&id).await {
                Ok(meta) => Some(meta),
                Err(e) => {
                    tracing::debug!(message_id = %id, error = %e, "Metadata fetch skipped");
                    None
                }
            }
        })
        .buffer_unordered(concurrency)
        .filter_map(|m| async move { m })
        .collect()
        .await;
    stats.scanned = metas.len();

    let mut screened: Vec<EmailMeta> = Vec::with_capacity(metas.len());
    for meta in metas {
        let verdict = quick_screen(
            &meta.from_email,
            &meta.from_domain,
            &meta.subject,
            &meta.snippet,
            &meta.headers,
        );
        if verdict.ok {
            screened.push(meta);
        } else {
            stats.bump(match verdict.reason {
                ScreenReason::Marketing => "screenMarketing",
                ScreenReason::HardNo => "screenHardNo",
                _ => "screenOther",
            });
        }
    }
    stats.screened_in = screened.len();

    // Cluster observations come from everything screened in, body or not
    let mut clusters = ClusterBuilder::new(ctx.options.cluster_cap as usize);
    for meta in &screened {
        let surface = build_surface(meta, "", "");
        let resolution = resolve(&surface, &ctx.directory, &ctx.overrides);
        let flags = classify(
            &meta.subject,
            &meta.snippet,
            "",
            &meta.headers,
            &meta.from_domain,
        );
        clusters.observe(meta, &resolution, &flags);
    }

    // Stage 3: full fetch for the first `fullFetchCap` screened-in messages
    let fetch_targets: Vec<EmailMeta> = screened
        .iter()
        .take(ctx.options.full_fetch_cap as usize)
        .cloned()
        .collect();
    let bodies: HashMap<String, EmailBody> =
        fetch_bodies(driver, &fetch_targets, concurrency, soft_deadline).await;
    stats.full_fetched = bodies.len();

    // Stage 4: per-message candidates
    let mut raw: Vec<Candidate> = Vec::new();
    let mut fetched_ids: Vec<String> = bodies.keys().cloned().collect();
    for meta in &fetch_targets {
        if raw.len() >= ctx.options.max_candidates as usize {
            break;
        }
        let Some(body) = bodies.get(&meta.id) else {
            stats.bump("bodyUnavailable");
            continue;
        };
        match build_candidate(meta, Some(body), &ctx.directory, &ctx.overrides, now) {
            BuildOutcome::Candidate(candidate) => raw.push(*candidate),
            BuildOutcome::Dropped { reason, near_miss } => {
                stats.bump(reason.as_str());
                stats.record_near_miss(near_miss);
            }
        }
    }

    // Stage 5: merge cluster candidates after body candidates
    raw.extend(clusters.build());
    stats.raw_matched = raw.len();

    // Stage 6: aggregate, gate, then enrich amount-less candidates with a
    // second round of body fetches if the clock allows
    let aggregated = aggregate_chunk(raw);
    let (mut candidates, gated) = strict_gate(aggregated);
    stats.gated = gated;

    if !should_stop() && candidates.iter().any(|c| c.amount.is_none()) {
        let amountless_domains: Vec<String> = candidates
            .iter()
            .filter(|c| c.amount.is_none())
            .map(|c| c.evidence.sender_domain.clone())
            .collect();

        let enrich_targets: Vec<EmailMeta> = screened
            .iter()
            .filter(|m| !fetched_ids.contains(&m.id))
            .filter(|m| amountless_domains.iter().any(|d| m.from_domain == *d))
            .take(ENRICH_CAP)
            .cloned()
            .collect();

        if !enrich_targets.is_empty() {
            let extra_bodies =
                fetch_bodies(driver, &enrich_targets, concurrency, soft_deadline).await;
            stats.full_fetched += extra_bodies.len();
            fetched_ids.extend(extra_bodies.keys().cloned());

            let mut enriched = Vec::new();
            for meta in &enrich_targets {
                let Some(body) = extra_bodies.get(&meta.id) else {
                    continue;
                };
                if let BuildOutcome::Candidate(candidate) =
                    build_candidate(meta, Some(body), &ctx.directory, &ctx.overrides, now)
                {
                    enriched.push(*candidate);
                }
            }

            if !enriched.is_empty() {
                let mut merged = candidates;
                merged.extend(enriched);
                let (gated_again, extra_gated) = {
                    let aggregated = aggregate_chunk(merged);
                    strict_gate(aggregated)
                };
                candidates = gated_again;
                stats.gated += extra_gated;
            }
        }
    }

    stats.matched = candidates.len();
    stats.took_ms = started.elapsed().as_millis() as u64;

    tracing::info!(
        listed = stats.listed,
        scanned = stats.scanned,
        screened_in = stats.screened_in,
        full_fetched = stats.full_fetched,
        matched = stats.matched,
        took_ms = stats.took_ms,
        "Chunk complete"
    );

    Ok(ChunkOutcome {
        candidates,
        next_cursor,
        stats,
    })
}

/// Fetch full bodies with bounded fan-out; failures and deadline expiry
/// surface as absent entries
fn fetch_bodies<'a, D: MailboxDriver + ?Sized>(
    driver: &'a D,
    targets: &'a [EmailMeta],
    concurrency: usize,
    soft_deadline: Instant,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = HashMap<String, EmailBody>> + Send + 'a>> {
    Box::pin(fetch_bodies_inner(driver, targets, concurrency, soft_deadline))
}

async fn fetch_bodies_inner<D: MailboxDriver + ?Sized>(
    driver: &D,
    targets: &[EmailMeta],
    concurrency: usize,
    soft_deadline: Instant,
) -> HashMap<String, EmailBody> {
    let ids: Vec<String> = targets.iter().map(|m: &EmailMeta| m.id.clone()).collect();
    stream::iter(ids)
        .map(|id| async move {
            if Instant::now() >= soft_deadline {
                return None;
            }
            match driver.fetch_full(&id).await {
                Ok(body) => Some((id, body)),
                Err(e) => {
                    tracing::debug!(message_id = %id, error = %e, "Body fetch skipped");
                    None
                }
            }
        })
        .buffer_unordered(concurrency)
        .filter_map(|r| async move { r })
        .collect()
        .await
}
