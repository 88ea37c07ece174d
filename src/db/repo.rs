use super::model::{
    AuditEntry, MediaAttachment, NewAttachment, NewSurveyResponse, PendingSync, SurveyResponse,
};
use crate::compliance::{Compliance, MediaCounts};
use crate::model::{MediaCategory, SyncDirection, SyncStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow, SqliteSynchronous};
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use tracing::instrument;
use uuid::Uuid;

pub type Pool = SqlitePool;

const RESPONSE_COLUMNS: &str = "id, survey_id, arcgis_object_id, arcgis_global_id, \
    surveyor_username, surveyor_name, surveyor_email, agent_id, fields, latitude, longitude, \
    compliance_score, is_complete, total_fields, filled_fields, missing_fields, sync_pending, \
    last_synced_at, last_sync_error, last_sync_attempt, event_type, submitted_at, created_at, updated_at";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {normalized}"))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = SqlitePool::connect_with(options).await?;
    Ok(pool)
}

/// Expand a leading `~/` in a file-backed SQLite URL and make sure the parent
/// directory exists. In-memory URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{path}?{q}"),
        None => format!("sqlite://{path}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Fixed-width RFC 3339 UTC rendering; lexical order equals time order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

fn json_map(raw: &str) -> Result<Map<String, Value>> {
    let value: Value = serde_json::from_str(raw).context("stored fields are not valid JSON")?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

fn json_list(raw: Option<&str>) -> Result<Vec<String>> {
    match raw {
        None => Ok(Vec::new()),
        Some(raw) => serde_json::from_str(raw).context("stored list is not valid JSON"),
    }
}

fn response_from_row(row: &SqliteRow) -> Result<SurveyResponse> {
    let fields: String = row.try_get("fields")?;
    let missing: String = row.try_get("missing_fields")?;
    Ok(SurveyResponse {
        id: row.try_get("id")?,
        survey_id: row.try_get("survey_id")?,
        arcgis_object_id: row.try_get("arcgis_object_id")?,
        arcgis_global_id: row.try_get("arcgis_global_id")?,
        surveyor_username: row.try_get("surveyor_username")?,
        surveyor_name: row.try_get("surveyor_name")?,
        surveyor_email: row.try_get("surveyor_email")?,
        agent_id: row.try_get("agent_id")?,
        fields: json_map(&fields)?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        compliance_score: row.try_get("compliance_score")?,
        is_complete: row.try_get::<i64, _>("is_complete")? != 0,
        total_fields: row.try_get("total_fields")?,
        filled_fields: row.try_get("filled_fields")?,
        missing_fields: json_list(Some(missing.as_str()))?,
        sync_pending: row.try_get::<i64, _>("sync_pending")? != 0,
        last_synced_at: row.try_get("last_synced_at")?,
        last_sync_error: row.try_get("last_sync_error")?,
        last_sync_attempt: row.try_get("last_sync_attempt")?,
        event_type: row.try_get("event_type")?,
        submitted_at: row.try_get("submitted_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a response unless one with the same global id exists.
/// Returns the new id, or `None` when the insert was absorbed as a duplicate.
#[instrument(skip_all)]
pub async fn insert_response(pool: &Pool, new: &NewSurveyResponse) -> Result<Option<String>> {
    let id = Uuid::new_v4().to_string();
    let now = now_timestamp();
    let inserted = sqlx::query_scalar::<_, String>(
        "INSERT INTO survey_responses (
            id, survey_id, arcgis_object_id, arcgis_global_id,
            surveyor_username, surveyor_name, surveyor_email, agent_id,
            fields, latitude, longitude,
            compliance_score, is_complete, total_fields, filled_fields, missing_fields,
            event_type, submitted_at, raw_payload, attributes, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(arcgis_global_id) DO NOTHING
        RETURNING id",
    )
    .bind(&id)
    .bind(&new.survey_id)
    .bind(new.arcgis_object_id)
    .bind(&new.arcgis_global_id)
    .bind(&new.surveyor_username)
    .bind(&new.surveyor_name)
    .bind(&new.surveyor_email)
    .bind(&new.agent_id)
    .bind(Value::Object(new.fields.clone()).to_string())
    .bind(new.latitude)
    .bind(new.longitude)
    .bind(new.compliance.score)
    .bind(new.compliance.is_complete)
    .bind(i64::from(new.compliance.total_fields))
    .bind(i64::from(new.compliance.filled_fields))
    .bind(serde_json::to_string(&new.compliance.missing_fields)?)
    .bind(&new.event_type)
    .bind(&new.submitted_at)
    .bind(new.raw_payload.to_string())
    .bind(Value::Object(new.attributes.clone()).to_string())
    .bind(&now)
    .bind(&now)
    .fetch_optional(pool)
    .await?;
    Ok(inserted)
}

#[instrument(skip_all)]
pub async fn find_id_by_global_id(pool: &Pool, global_id: &str) -> Result<Option<String>> {
    let id = sqlx::query_scalar::<_, String>(
        "SELECT id FROM survey_responses WHERE arcgis_global_id = ?",
    )
    .bind(global_id)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

async fn fetch_response_with<'e, E>(executor: E, id: &str) -> Result<Option<SurveyResponse>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!(
        "SELECT {RESPONSE_COLUMNS} FROM survey_responses WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;
    row.as_ref().map(response_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn fetch_response(pool: &Pool, id: &str) -> Result<Option<SurveyResponse>> {
    fetch_response_with(pool, id).await
}

/// Partial update of one response. Only the listed keys are touched; `None`
/// on the optional parts leaves that column as it is.
#[derive(Debug, Clone, Default)]
pub struct ContentEdit {
    pub fields: Map<String, Value>,
    pub surveyor_username: Option<Option<String>>,
    pub latitude: Option<Option<f64>>,
    pub longitude: Option<Option<f64>>,
}

/// Merge `edit` into the stored row and persist the compliance `rescore`
/// computes from the merged row, all in one write transaction. Concurrent
/// edits to different keys of the same response both survive.
/// Returns `None` when the response does not exist.
#[instrument(skip_all)]
pub async fn apply_content_edit<F>(
    pool: &Pool,
    id: &str,
    edit: &ContentEdit,
    rescore: F,
) -> Result<Option<Compliance>>
where
    F: FnOnce(&SurveyResponse, MediaCounts) -> Compliance,
{
    let mut tx = pool.begin().await?;

    // Writing first takes the write lock before anything is read.
    let mut sets = vec!["updated_at = ?".to_string()];
    if !edit.fields.is_empty() {
        let pairs = vec!["?, json(?)"; edit.fields.len()].join(", ");
        sets.push(format!("fields = json_set(fields, {pairs})"));
    }
    if edit.surveyor_username.is_some() {
        sets.push("surveyor_username = ?".into());
    }
    if edit.latitude.is_some() {
        sets.push("latitude = ?".into());
    }
    if edit.longitude.is_some() {
        sets.push("longitude = ?".into());
    }
    let sql = format!("UPDATE survey_responses SET {} WHERE id = ?", sets.join(", "));
    let mut query = sqlx::query(&sql).bind(now_timestamp());
    for (key, value) in &edit.fields {
        query = query.bind(format!("$.\"{key}\"")).bind(value.to_string());
    }
    if let Some(username) = &edit.surveyor_username {
        query = query.bind(username.clone());
    }
    if let Some(latitude) = edit.latitude {
        query = query.bind(latitude);
    }
    if let Some(longitude) = edit.longitude {
        query = query.bind(longitude);
    }
    let res = query.bind(id).execute(&mut *tx).await?;
    if res.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(None);
    }

    let merged = fetch_response_with(&mut *tx, id)
        .await?
        .context("edited response vanished inside its transaction")?;
    let media = media_counts(&mut *tx, id).await?;
    let compliance = rescore(&merged, media);
    sqlx::query(
        "UPDATE survey_responses SET
            compliance_score = ?, is_complete = ?, total_fields = ?, filled_fields = ?,
            missing_fields = ?
         WHERE id = ?",
    )
    .bind(compliance.score)
    .bind(compliance.is_complete)
    .bind(i64::from(compliance.total_fields))
    .bind(i64::from(compliance.filled_fields))
    .bind(serde_json::to_string(&compliance.missing_fields)?)
    .bind(id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(Some(compliance))
}

#[instrument(skip_all)]
pub async fn set_object_id(pool: &Pool, id: &str, object_id: i64) -> Result<()> {
    sqlx::query("UPDATE survey_responses SET arcgis_object_id = ? WHERE id = ?")
        .bind(object_id)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_object_id_by_global_id(pool: &Pool, global_id: &str, object_id: i64) -> Result<u64> {
    let res = sqlx::query(
        "UPDATE survey_responses SET arcgis_object_id = ? WHERE arcgis_global_id = ? AND arcgis_object_id IS NULL",
    )
    .bind(object_id)
    .bind(global_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

/// Clear the pending flag after a successful push of the state stamped
/// `pushed_updated_at`. If the row changed since, the push carried a stale
/// snapshot: the attempt is recorded but the row stays pending. Returns
/// whether the flag was cleared.
#[instrument(skip_all)]
pub async fn mark_sync_success(
    pool: &Pool,
    id: &str,
    pushed_updated_at: &str,
    at: DateTime<Utc>,
) -> Result<bool> {
    let ts = format_timestamp(at);
    let res = sqlx::query(
        "UPDATE survey_responses
         SET sync_pending = 0, last_synced_at = ?, last_sync_attempt = ?, last_sync_error = NULL
         WHERE id = ? AND updated_at = ?",
    )
    .bind(&ts)
    .bind(&ts)
    .bind(id)
    .bind(pushed_updated_at)
    .execute(pool)
    .await?;
    if res.rows_affected() > 0 {
        return Ok(true);
    }
    sqlx::query(
        "UPDATE survey_responses
         SET sync_pending = 1, last_synced_at = ?, last_sync_attempt = ?, last_sync_error = NULL
         WHERE id = ?",
    )
    .bind(&ts)
    .bind(&ts)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(false)
}

#[instrument(skip_all)]
pub async fn mark_sync_failure(pool: &Pool, id: &str, error: &str, at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        "UPDATE survey_responses
         SET sync_pending = 1, last_sync_error = ?, last_sync_attempt = ?
         WHERE id = ?",
    )
    .bind(error)
    .bind(format_timestamp(at))
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn insert_audit(
    pool: &Pool,
    response_id: &str,
    status: SyncStatus,
    error: Option<&str>,
    fields_changed: &[String],
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let changed = if fields_changed.is_empty() {
        None
    } else {
        Some(serde_json::to_string(fields_changed)?)
    };
    sqlx::query(
        "INSERT INTO sync_audit_log (id, response_id, direction, status, error_message, fields_changed, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(response_id)
    .bind(SyncDirection::Outgoing.as_str())
    .bind(status.as_str())
    .bind(error)
    .bind(changed)
    .bind(now_timestamp())
    .execute(pool)
    .await?;
    Ok(id)
}

/// Audit history for one response, oldest first.
#[instrument(skip_all)]
pub async fn list_audit(pool: &Pool, response_id: &str) -> Result<Vec<AuditEntry>> {
    let rows = sqlx::query(
        "SELECT id, response_id, status, error_message, fields_changed, created_at
         FROM sync_audit_log WHERE response_id = ? ORDER BY created_at ASC, rowid ASC",
    )
    .bind(response_id)
    .fetch_all(pool)
    .await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let status: String = row.try_get("status")?;
        let changed: Option<String> = row.try_get("fields_changed")?;
        out.push(AuditEntry {
            id: row.try_get("id")?,
            response_id: row.try_get("response_id")?,
            status: SyncStatus::parse_status(&status)
                .with_context(|| format!("unknown audit status {status}"))?,
            error_message: row.try_get("error_message")?,
            fields_changed: json_list(changed.as_deref())?,
            created_at: row.try_get("created_at")?,
        });
    }
    Ok(out)
}

/// Oldest-attempt-first slice of pending records; never-attempted rows lead.
#[instrument(skip_all)]
pub async fn pending_batch(pool: &Pool, limit: u32) -> Result<Vec<PendingSync>> {
    let rows = sqlx::query(
        "SELECT id, arcgis_object_id, arcgis_global_id, last_sync_attempt
         FROM survey_responses
         WHERE sync_pending = 1
         ORDER BY last_sync_attempt ASC NULLS FIRST, created_at ASC
         LIMIT ?",
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| -> Result<PendingSync> {
            Ok(PendingSync {
                id: row.try_get("id")?,
                arcgis_object_id: row.try_get("arcgis_object_id")?,
                arcgis_global_id: row.try_get("arcgis_global_id")?,
                last_sync_attempt: row.try_get("last_sync_attempt")?,
            })
        })
        .collect()
}

#[instrument(skip_all)]
pub async fn count_pending(pool: &Pool) -> Result<i64> {
    let n = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM survey_responses WHERE sync_pending = 1",
    )
    .fetch_one(pool)
    .await?;
    Ok(n)
}

/// Insert an attachment row; returns false if it already existed for the parent.
#[instrument(skip_all)]
pub async fn insert_attachment(pool: &Pool, att: &NewAttachment) -> Result<bool> {
    let res = sqlx::query(
        "INSERT INTO media_attachments (
            id, response_id, arcgis_attachment_id, arcgis_global_id, file_name,
            content_type, media_category, keyword, file_size_bytes, arcgis_url, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(response_id, arcgis_attachment_id) DO NOTHING",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&att.response_id)
    .bind(att.arcgis_attachment_id)
    .bind(&att.arcgis_global_id)
    .bind(&att.file_name)
    .bind(&att.content_type)
    .bind(att.media_category.as_str())
    .bind(&att.keyword)
    .bind(att.file_size_bytes)
    .bind(&att.arcgis_url)
    .bind(now_timestamp())
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn list_attachments(pool: &Pool, response_id: &str) -> Result<Vec<MediaAttachment>> {
    let rows = sqlx::query(
        "SELECT id, response_id, arcgis_attachment_id, arcgis_global_id, file_name, content_type,
                media_category, keyword, file_size_bytes, arcgis_url, created_at
         FROM media_attachments WHERE response_id = ? ORDER BY arcgis_attachment_id",
    )
    .bind(response_id)
    .fetch_all(pool)
    .await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let category: String = row.try_get("media_category")?;
        out.push(MediaAttachment {
            id: row.try_get("id")?,
            response_id: row.try_get("response_id")?,
            arcgis_attachment_id: row.try_get("arcgis_attachment_id")?,
            arcgis_global_id: row.try_get("arcgis_global_id")?,
            file_name: row.try_get("file_name")?,
            content_type: row.try_get("content_type")?,
            media_category: MediaCategory::parse_category(&category)
                .with_context(|| format!("unknown media category {category}"))?,
            keyword: row.try_get("keyword")?,
            file_size_bytes: row.try_get("file_size_bytes")?,
            arcgis_url: row.try_get("arcgis_url")?,
            created_at: row.try_get("created_at")?,
        });
    }
    Ok(out)
}

/// Image and video counts from the locally cached attachment rows.
#[instrument(skip_all)]
pub async fn media_counts<'e, E>(executor: E, response_id: &str) -> Result<MediaCounts>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT
            COALESCE(SUM(CASE WHEN media_category = 'image' THEN 1 ELSE 0 END), 0) AS images,
            COALESCE(SUM(CASE WHEN media_category = 'video' THEN 1 ELSE 0 END), 0) AS videos
         FROM media_attachments WHERE response_id = ?",
    )
    .bind(response_id)
    .fetch_one(executor)
    .await?;
    let images: i64 = row.try_get("images")?;
    let videos: i64 = row.try_get("videos")?;
    Ok(MediaCounts::observed(
        u32::try_from(images).unwrap_or(u32::MAX),
        u32::try_from(videos).unwrap_or(u32::MAX),
    ))
}

/// Register a survey form, returning its local id. Re-registering refreshes the title.
#[instrument(skip_all)]
pub async fn upsert_survey(
    pool: &Pool,
    form_item_id: &str,
    form_title: &str,
    service_item_id: Option<&str>,
    service_url: Option<&str>,
) -> Result<String> {
    let id = sqlx::query_scalar::<_, String>(
        "INSERT INTO surveys (id, form_item_id, form_title, service_item_id, service_url, created_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(form_item_id) DO UPDATE SET
            form_title = excluded.form_title,
            service_item_id = COALESCE(excluded.service_item_id, surveys.service_item_id),
            service_url = COALESCE(excluded.service_url, surveys.service_url)
         RETURNING id",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(form_item_id)
    .bind(form_title)
    .bind(service_item_id)
    .bind(service_url)
    .bind(now_timestamp())
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// `(id, global_id)` of records whose object id has not been resolved yet.
#[instrument(skip_all)]
pub async fn responses_missing_object_id(pool: &Pool, limit: u32) -> Result<Vec<(String, String)>> {
    let rows = sqlx::query_as::<_, (String, String)>(
        "SELECT id, arcgis_global_id FROM survey_responses
         WHERE arcgis_object_id IS NULL AND arcgis_global_id IS NOT NULL
         ORDER BY created_at ASC LIMIT ?",
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// `(id, object_id)` of records with a known object id and no cached attachments.
#[instrument(skip_all)]
pub async fn responses_without_attachments(pool: &Pool, limit: u32) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT sr.id, sr.arcgis_object_id FROM survey_responses sr
         WHERE sr.arcgis_object_id IS NOT NULL
           AND NOT EXISTS (SELECT 1 FROM media_attachments ma WHERE ma.response_id = sr.id)
         ORDER BY sr.created_at ASC LIMIT ?",
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
