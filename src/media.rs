//! On-demand refresh of the local attachment cache from the feature service.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::arcgis::find_object_ids;
use crate::db;
use crate::ingest::attachment_rows;
use crate::sync::SyncContext;

const RESOLVE_LIMIT: u32 = 100;
const RECORD_LIMIT: u32 = 50;
const CHUNK_SIZE: usize = 25;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillSummary {
    pub object_ids_resolved: u64,
    pub records_checked: usize,
    pub attachments_inserted: usize,
}

#[instrument(skip_all)]
pub async fn backfill_attachments(ctx: &SyncContext) -> Result<BackfillSummary> {
    let mut summary = BackfillSummary::default();

    let unresolved = db::responses_missing_object_id(&ctx.pool, RESOLVE_LIMIT).await?;
    if !unresolved.is_empty() {
        let global_ids: Vec<String> = unresolved.iter().map(|(_, gid)| gid.clone()).collect();
        match find_object_ids(ctx.remote.as_ref(), &global_ids).await {
            Ok(found) => {
                for (global_id, object_id) in found {
                    summary.object_ids_resolved +=
                        db::set_object_id_by_global_id(&ctx.pool, &global_id, object_id).await?;
                }
            }
            Err(err) => warn!(error = %err, "object id resolution failed; continuing with known ids"),
        }
    }

    let targets = db::responses_without_attachments(&ctx.pool, RECORD_LIMIT).await?;
    summary.records_checked = targets.len();
    let by_object: HashMap<i64, String> = targets.into_iter().map(|(id, oid)| (oid, id)).collect();
    let object_ids: Vec<i64> = by_object.keys().copied().collect();

    for chunk in object_ids.chunks(CHUNK_SIZE) {
        let groups = ctx
            .remote
            .query_attachments(chunk)
            .await
            .context("attachment query failed")?;
        for group in groups {
            let Some(response_id) = by_object.get(&group.parent_object_id) else {
                continue;
            };
            for row in attachment_rows(response_id, Some(group.parent_object_id), &group.attachment_infos) {
                if db::insert_attachment(&ctx.pool, &row).await? {
                    summary.attachments_inserted += 1;
                }
            }
        }
    }

    info!(
        resolved = summary.object_ids_resolved,
        checked = summary.records_checked,
        inserted = summary.attachments_inserted,
        "attachment backfill finished"
    );
    Ok(summary)
}
