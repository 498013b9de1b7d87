//! subscan-svc
//!
//! Recurring-subscription mailbox scanner: resumable chunked scanning over
//! Gmail/IMAP, a multi-signal detection pipeline, and SSE streaming of
//! candidates as they are found.

use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use subscan_svc::config::Config;
use subscan_svc::queue::worker;
use subscan_svc::store;
use subscan_svc::token::MemoryTokenProvider;
use subscan_svc::AppContext;

/// Subscription scanner service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host address to bind to
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// Port to bind to
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Database file path
    #[arg(long, value_name = "FILE")]
    db_path: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("subscan_svc={log_level},subscan_common={log_level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::resolve(
        args.host.as_deref(),
        args.port,
        args.db_path.as_deref(),
    );

    let db = store::init_database(&config.db_path).await?;

    let tokens = Arc::new(MemoryTokenProvider::new());
    let (ctx, queue_rx) = AppContext::new(db, tokens, config.sse_poll_ms, config.sse_ping_ms);

    // Resume sessions stranded by a previous run before accepting traffic
    let resumed = worker::resume_stale_sessions(&ctx).await?;
    if resumed > 0 {
        info!(resumed, "Re-enqueued stale sessions from previous run");
    }

    // The worker loop owns the queue receiver for the life of the process
    let worker_ctx = ctx.clone();
    tokio::spawn(async move {
        worker::run_worker(worker_ctx, queue_rx).await;
    });

    subscan_svc::api::run(ctx, &config.host, config.port).await?;

    Ok(())
}
