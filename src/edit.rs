//! Local corrections from the review UI: validate, normalize, rescore, persist,
//! then mirror to the feature service.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, instrument};

use crate::compliance::{evaluate_record, Compliance};
use crate::db::{self, model::SURVEYOR_USERNAME, ContentEdit, SurveyResponse};
use crate::fields::FieldMap;
use crate::normalize::normalize_field_value;
use crate::realtime::RealtimeEvent;
use crate::sync::{push_record, SyncContext, SyncMode, SyncReport};

#[derive(Debug, Error)]
pub enum EditError {
    #[error("survey response {0} not found")]
    NotFound(String),
    #[error("unknown or read-only fields: {}", .0.join(", "))]
    UnknownFields(Vec<String>),
    #[error("no fields to update")]
    NoFields,
    #[error("{0} must be a number or null")]
    InvalidCoordinate(&'static str),
    #[error("update body must be a JSON object")]
    NotAnObject,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditOutcome {
    pub record: SurveyResponse,
    pub compliance: Compliance,
    pub arcgis_sync: SyncReport,
}

/// Validated update split into the stored parts it touches.
#[derive(Debug, Default)]
struct EditPlan {
    content: ContentEdit,
    changed: Vec<String>,
}

fn coordinate(name: &'static str, value: &Value) -> Result<Option<f64>, EditError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_f64().map(Some).ok_or(EditError::InvalidCoordinate(name)),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| EditError::InvalidCoordinate(name)),
        _ => Err(EditError::InvalidCoordinate(name)),
    }
}

fn plan_edit(fields: &FieldMap, updates: Value) -> Result<EditPlan, EditError> {
    let Value::Object(updates) = updates else {
        return Err(EditError::NotAnObject);
    };
    if updates.is_empty() {
        return Err(EditError::NoFields);
    }
    let unknown: Vec<String> = updates
        .keys()
        .filter(|k| !matches!(k.as_str(), "latitude" | "longitude") && !fields.is_editable(k))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(EditError::UnknownFields(unknown));
    }

    let mut plan = EditPlan::default();
    for (key, value) in updates {
        let content = &mut plan.content;
        match key.as_str() {
            "latitude" => content.latitude = Some(coordinate("latitude", &value)?),
            "longitude" => content.longitude = Some(coordinate("longitude", &value)?),
            SURVEYOR_USERNAME => {
                content.surveyor_username = Some(match normalize_field_value(fields, &key, value) {
                    Value::Null => None,
                    Value::String(s) if s.trim().is_empty() => None,
                    Value::String(s) => Some(s.trim().to_string()),
                    other => Some(other.to_string()),
                })
            }
            _ => {
                let value = normalize_field_value(fields, &key, value);
                content.fields.insert(key.clone(), value);
            }
        }
        plan.changed.push(key);
    }
    Ok(plan)
}

/// Apply a partial update to one record. The local write stands even when the
/// outbound sync fails; the report says which happened.
#[instrument(skip_all, fields(id = %id))]
pub async fn apply_edit(ctx: &SyncContext, id: &str, updates: Value) -> Result<EditOutcome, EditError> {
    let plan = plan_edit(&ctx.schema.fields, updates)?;
    let compliance = db::apply_content_edit(&ctx.pool, id, &plan.content, |merged, media| {
        evaluate_record(&ctx.schema, &merged.projection(), media)
    })
    .await?
    .ok_or_else(|| EditError::NotFound(id.to_string()))?;

    let record = db::fetch_response(&ctx.pool, id)
        .await?
        .ok_or_else(|| EditError::NotFound(id.to_string()))?;
    let arcgis_sync = push_record(ctx, &record, &plan.changed, SyncMode::Edit).await;

    info!(
        changed = ?plan.changed,
        score = compliance.score,
        synced = arcgis_sync.synced,
        "local edit applied"
    );
    ctx.publisher.publish(RealtimeEvent::SurveyUpdated {
        id: id.to_string(),
        score: compliance.score,
    });

    // Sync bookkeeping moved the pending flag; report the row as it is now.
    let record = db::fetch_response(&ctx.pool, id).await?.unwrap_or(record);
    Ok(EditOutcome {
        record,
        compliance,
        arcgis_sync,
    })
}
