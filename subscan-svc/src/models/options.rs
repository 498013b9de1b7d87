//! Scan options and SLO budget enforcement
//!
//! Options arrive from the HTTP surface with serde defaults, then pass
//! through `enforce_budgets` twice: once at session creation and again at
//! chunk execution, so a stored session can never smuggle an over-budget
//! value past a redeploy.

use serde::{Deserialize, Serialize};

/// Budget mode selecting the SLO clamp table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    #[default]
    Quick,
    Deep,
}

/// Mailbox query shape for the list stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Transactional-focused query (default)
    #[default]
    Transactions,
    /// Broad recency query
    Broad,
}

/// Scan options (§6 options schema)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanOptions {
    pub mode: ScanMode,
    /// Lookback window in days, [1, 3650]
    pub days_back: u32,
    /// Driver list page size, [50, 500]
    pub page_size: u32,
    /// Chunk wall-clock deadline in ms, [8000, 45000]
    pub chunk_ms: u64,
    /// Messages eligible for full body fetch per chunk, [0, 120]
    pub full_fetch_cap: u32,
    /// Worker fan-out for metadata/full stages, [2, 10]
    pub concurrency: u32,
    /// Chunk cap per session, [1, 400]
    pub max_pages: u32,
    /// Candidate cap per session, [10, 400]
    pub max_candidates: u32,
    /// Listed-id cap per session, [300, 25000]
    pub max_list_ids: u32,
    /// Metadata rows fed to the cluster builder per chunk, [10, 200]
    pub cluster_cap: u32,
    pub query_mode: QueryMode,
    pub include_promotions: bool,
    /// Continuation token for a resumed scan
    pub cursor: Option<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            mode: ScanMode::Quick,
            days_back: 90,
            page_size: 100,
            chunk_ms: 9_000,
            full_fetch_cap: 25,
            concurrency: 6,
            max_pages: 8,
            max_candidates: 80,
            max_list_ids: 1_200,
            cluster_cap: 120,
            query_mode: QueryMode::Transactions,
            include_promotions: false,
            cursor: None,
        }
    }
}

fn clamp_u32(v: u32, lo: u32, hi: u32) -> u32 {
    v.clamp(lo, hi)
}

fn clamp_u64(v: u64, lo: u64, hi: u64) -> u64 {
    v.clamp(lo, hi)
}

impl ScanOptions {
    /// Apply the schema-level clamps (§6), independent of mode
    pub fn clamp_schema(mut self) -> Self {
        self.days_back = clamp_u32(self.days_back, 1, 3_650);
        self.page_size = clamp_u32(self.page_size, 50, 500);
        self.chunk_ms = clamp_u64(self.chunk_ms, 8_000, 45_000);
        self.full_fetch_cap = clamp_u32(self.full_fetch_cap, 0, 120);
        self.concurrency = clamp_u32(self.concurrency, 2, 10);
        self.max_pages = clamp_u32(self.max_pages, 1, 400);
        self.max_candidates = clamp_u32(self.max_candidates, 10, 400);
        self.max_list_ids = clamp_u32(self.max_list_ids, 300, 25_000);
        self.cluster_cap = clamp_u32(self.cluster_cap, 10, 200);
        self
    }

    /// Apply the per-mode SLO budget caps on top of the schema clamps
    ///
    /// Quick mode keeps scans inside interactive latency; deep mode raises
    /// the caps for background sweeps. Quick mode also pins the query shape
    /// to transactional and drops promotions.
    pub fn enforce_budgets(self) -> Self {
        let mut opts = self.clamp_schema();
        match opts.mode {
            ScanMode::Quick => {
                opts.days_back = opts.days_back.min(120);
                opts.max_pages = opts.max_pages.min(8);
                opts.max_list_ids = opts.max_list_ids.min(1_200);
                opts.full_fetch_cap = opts.full_fetch_cap.min(20);
                opts.max_candidates = opts.max_candidates.min(80);
                opts.chunk_ms = opts.chunk_ms.min(12_000);
                opts.query_mode = QueryMode::Transactions;
                opts.include_promotions = false;
            }
            ScanMode::Deep => {
                opts.days_back = opts.days_back.min(3_650);
                opts.max_pages = opts.max_pages.min(400);
                opts.max_list_ids = opts.max_list_ids.min(25_000);
                opts.full_fetch_cap = opts.full_fetch_cap.min(120);
                opts.max_candidates = opts.max_candidates.min(400);
                opts.chunk_ms = opts.chunk_ms.min(45_000);
            }
        }
        opts
    }
}

/// Per-operation timeouts for the mailbox drivers (§5)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverTimeouts {
    /// List call timeout, ms, [3000, 15000]
    pub list_ms: u64,
    /// Metadata fetch timeout, ms, [3000, 15000]
    pub meta_ms: u64,
    /// Full body fetch timeout, ms, [3000, 20000]
    pub full_ms: u64,
    /// Attachment fetch timeout, ms, [3000, 20000]
    pub attach_ms: u64,
}

impl Default for DriverTimeouts {
    fn default() -> Self {
        Self {
            list_ms: 9_000,
            meta_ms: 8_000,
            full_ms: 12_000,
            attach_ms: 12_000,
        }
    }
}

impl DriverTimeouts {
    pub fn clamped(mut self) -> Self {
        self.list_ms = clamp_u64(self.list_ms, 3_000, 15_000);
        self.meta_ms = clamp_u64(self.meta_ms, 3_000, 15_000);
        self.full_ms = clamp_u64(self.full_ms, 3_000, 20_000);
        self.attach_ms = clamp_u64(self.attach_ms, 3_000, 20_000);
        self
    }
}
