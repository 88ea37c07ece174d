use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use poi_sync::arcgis::ArcGisClient;
use poi_sync::config;
use poi_sync::db;
use poi_sync::handlers::{build_router, AppState};
use poi_sync::outbox;
use poi_sync::realtime::BroadcastPublisher;
use poi_sync::schema::Schema;
use poi_sync::sync::SyncContext;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
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
    let schema = Schema::load().context("field mapping and rubric tables are inconsistent")?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let ctx = SyncContext::new(
        pool,
        Arc::new(schema),
        Arc::new(ArcGisClient::from_config(&cfg.arcgis)),
        Arc::new(BroadcastPublisher::new(256)),
    );

    // Retry sweeps run sequentially on their own task.
    tokio::spawn(outbox::run_scheduler(
        ctx.clone(),
        cfg.retry_interval(),
        cfg.app.retry_batch_size,
    ));

    let webhook_secret = Some(cfg.webhook.secret.clone()).filter(|s| !s.is_empty());
    if webhook_secret.is_none() {
        warn!("webhook secret is empty; webhook and admin routes are unauthenticated");
    }
    let app = build_router(AppState {
        ctx,
        webhook_secret,
        retry_batch_size: cfg.app.retry_batch_size,
    });

    let addr = cfg.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "starting http server");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;
    Ok(())
}
