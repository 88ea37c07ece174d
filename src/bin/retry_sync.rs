use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use poi_sync::arcgis::ArcGisClient;
use poi_sync::config;
use poi_sync::db;
use poi_sync::outbox;
use poi_sync::realtime::BroadcastPublisher;
use poi_sync::schema::Schema;
use poi_sync::sync::SyncContext;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Push all pending survey edits to the feature service and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Records per sweep (defaults to app.retry_batch_size)
    #[arg(long)]
    batch_size: Option<u32>,

    /// Stop after this many sweeps even if records remain pending
    #[arg(long, default_value = "50")]
    max_sweeps: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;
    let schema = Schema::load()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let ctx = SyncContext::new(
        pool,
        Arc::new(schema),
        Arc::new(ArcGisClient::from_config(&cfg.arcgis)),
        Arc::new(BroadcastPublisher::new(1)),
    );
    let batch = args.batch_size.unwrap_or(cfg.app.retry_batch_size).max(1);

    let remaining = db::count_pending(&ctx.pool).await?;
    info!(remaining, "starting retry run");
    if remaining == 0 {
        info!("nothing pending, exiting");
        return Ok(());
    }

    let mut synced = 0;
    for sweep in 1..=args.max_sweeps {
        let summary = outbox::retry_pending(&ctx, batch).await?;
        synced += summary.succeeded;
        let remaining = db::count_pending(&ctx.pool).await?;
        info!(sweep, synced, remaining, "sweep finished");
        if remaining == 0 {
            info!(synced, "all pending records synced");
            return Ok(());
        }
        if summary.succeeded == 0 {
            // A full sweep without progress means the remote side is still failing.
            warn!(remaining, "no progress in this sweep, leaving the rest for the scheduler");
            return Ok(());
        }
    }
    warn!(max_sweeps = args.max_sweeps, "sweep limit reached with records still pending");
    Ok(())
}
