//! Outbound sync: push a record's full current state to the feature service
//! and keep the local pending flag and audit trail in step.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::arcgis::{build_feature, find_object_id, ArcGisError, FeatureService};
use crate::db::{self, Pool, SurveyResponse};
use crate::model::SyncStatus;
use crate::realtime::Publisher;
use crate::schema::Schema;

/// Shared handles every engine operation works against.
#[derive(Clone)]
pub struct SyncContext {
    pub pool: Pool,
    pub schema: Arc<Schema>,
    pub remote: Arc<dyn FeatureService>,
    pub publisher: Arc<dyn Publisher>,
    /// Held for the length of a retry sweep.
    pub sweep_lock: Arc<Mutex<()>>,
}

impl SyncContext {
    pub fn new(
        pool: Pool,
        schema: Arc<Schema>,
        remote: Arc<dyn FeatureService>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            pool,
            schema,
            remote,
            publisher,
            sweep_lock: Arc::new(Mutex::new(())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Directly after a local edit.
    Edit,
    /// Picked up by the retry sweep.
    Retry,
}

/// Outcome reported to edit callers; a failed sync never fails the edit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub synced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncReport {
    fn ok() -> Self {
        Self {
            synced: true,
            error: None,
        }
    }

    fn failed(err: &ArcGisError) -> Self {
        Self {
            synced: false,
            error: Some(err.to_string()),
        }
    }
}

/// Resolve the object id, caching it locally once the service reports it.
async fn resolve_object_id(ctx: &SyncContext, record: &SurveyResponse) -> Result<i64, ArcGisError> {
    if let Some(oid) = record.arcgis_object_id {
        return Ok(oid);
    }
    let Some(global_id) = record.arcgis_global_id.as_deref() else {
        return Err(ArcGisError::ObjectIdNotFound(format!("record {} has no global id", record.id)));
    };
    let oid = find_object_id(ctx.remote.as_ref(), global_id)
        .await?
        .ok_or_else(|| ArcGisError::ObjectIdNotFound(global_id.to_string()))?;
    if let Err(err) = db::set_object_id(&ctx.pool, &record.id, oid).await {
        warn!(?err, id = %record.id, "could not cache resolved object id");
    }
    Ok(oid)
}

async fn submit(ctx: &SyncContext, record: &SurveyResponse) -> Result<i64, ArcGisError> {
    let object_id = resolve_object_id(ctx, record).await?;
    let feature = build_feature(
        &ctx.schema.fields,
        object_id,
        &record.synced_content(),
        record.latitude,
        record.longitude,
    );
    ctx.remote.apply_edits(&[feature]).await?;
    Ok(object_id)
}

/// Push `record` as it is now. Bookkeeping failures are logged, never raised.
#[instrument(skip_all, fields(id = %record.id))]
pub async fn push_record(
    ctx: &SyncContext,
    record: &SurveyResponse,
    changed: &[String],
    mode: SyncMode,
) -> SyncReport {
    let now = Utc::now();
    match submit(ctx, record).await {
        Ok(object_id) => {
            match db::mark_sync_success(&ctx.pool, &record.id, &record.updated_at, now).await {
                Ok(true) => {}
                Ok(false) => warn!("record changed while it was being pushed; left pending"),
                Err(err) => error!(?err, "failed to clear pending flag"),
            }
            let status = match mode {
                SyncMode::Edit => SyncStatus::Success,
                SyncMode::Retry => SyncStatus::RetrySuccess,
            };
            if let Err(err) = db::insert_audit(&ctx.pool, &record.id, status, None, changed).await {
                error!(?err, "failed to write sync audit entry");
            }
            info!(object_id, ?mode, "record synced to feature service");
            SyncReport::ok()
        }
        Err(err) => {
            let message = err.to_string();
            warn!(error = %message, ?mode, "sync to feature service failed; record left pending");
            if let Err(e) = db::mark_sync_failure(&ctx.pool, &record.id, &message, now).await {
                error!(err = ?e, "failed to record sync failure");
            }
            if let Err(e) = db::insert_audit(
                &ctx.pool,
                &record.id,
                SyncStatus::Failed,
                Some(&message),
                changed,
            )
            .await
            {
                error!(err = ?e, "failed to write sync audit entry");
            }
            SyncReport::failed(&err)
        }
    }
}
