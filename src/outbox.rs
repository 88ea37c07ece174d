use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

use crate::db;
use crate::sync::{push_record, SyncContext, SyncMode};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetrySummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// One sweep: up to `batch` pending records, oldest attempt first, one at a time.
/// Each push re-reads the record so later local edits are picked up. Sweeps
/// started from different callers run one after another.
#[instrument(skip_all)]
pub async fn retry_pending(ctx: &SyncContext, batch: u32) -> Result<RetrySummary> {
    let _sweep = ctx.sweep_lock.lock().await;
    let pending = db::pending_batch(&ctx.pool, batch).await?;
    let mut summary = RetrySummary::default();
    if pending.is_empty() {
        return Ok(summary);
    }
    info!(count = pending.len(), "retrying pending syncs");

    for item in pending {
        let Some(record) = db::fetch_response(&ctx.pool, &item.id).await? else {
            warn!(id = %item.id, "pending record disappeared before retry");
            continue;
        };
        summary.attempted += 1;
        let report = push_record(ctx, &record, &[], SyncMode::Retry).await;
        if report.synced {
            summary.succeeded += 1;
        } else {
            summary.failed += 1;
        }
    }

    info!(
        attempted = summary.attempted,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "retry sweep finished"
    );
    Ok(summary)
}

/// Run sweeps forever on a fixed interval. A slow sweep delays the next tick
/// instead of overlapping it.
pub async fn run_scheduler(ctx: SyncContext, every: Duration, batch: u32) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(err) = retry_pending(&ctx, batch).await {
            error!(?err, "retry sweep failed");
        }
    }
}
