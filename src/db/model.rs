//! Row types returned and accepted by the repository functions.
//!
//! Keep these structs focused on what the queries read and write; scoring and
//! sync decisions live in higher layers.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::compliance::Compliance;
use crate::model::{MediaCategory, SyncStatus};

/// One surveyed point of interest as stored locally.
#[derive(Debug, Clone, Serialize)]
pub struct SurveyResponse {
    pub id: String,
    pub survey_id: Option<String>,
    pub arcgis_object_id: Option<i64>,
    pub arcgis_global_id: Option<String>,
    pub surveyor_username: Option<String>,
    pub surveyor_name: Option<String>,
    pub surveyor_email: Option<String>,
    pub agent_id: Option<String>,
    pub fields: Map<String, Value>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub compliance_score: f64,
    pub is_complete: bool,
    pub total_fields: i64,
    pub filled_fields: i64,
    pub missing_fields: Vec<String>,
    pub sync_pending: bool,
    pub last_synced_at: Option<String>,
    pub last_sync_error: Option<String>,
    pub last_sync_attempt: Option<String>,
    pub event_type: String,
    pub submitted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl SurveyResponse {
    /// Descriptive fields plus `latitude`/`longitude`, the shape the scorer reads.
    pub fn projection(&self) -> Map<String, Value> {
        project(&self.fields, self.latitude, self.longitude)
    }

    /// Everything the feature service mirrors: the descriptive fields plus the
    /// surveyor username, which is kept in its own column.
    pub fn synced_content(&self) -> Map<String, Value> {
        let mut content = self.fields.clone();
        content.remove(SURVEYOR_USERNAME);
        if let Some(username) = &self.surveyor_username {
            content.insert(SURVEYOR_USERNAME.into(), Value::from(username.as_str()));
        }
        content
    }
}

/// Local field id stored in the `surveyor_username` column rather than in `fields`.
pub const SURVEYOR_USERNAME: &str = "surveyor_username";

pub fn project(
    fields: &Map<String, Value>,
    latitude: Option<f64>,
    longitude: Option<f64>,
) -> Map<String, Value> {
    let mut record = fields.clone();
    record.insert("latitude".into(), latitude.map_or(Value::Null, Value::from));
    record.insert("longitude".into(), longitude.map_or(Value::Null, Value::from));
    record
}

/// Insert payload for a freshly ingested response.
#[derive(Debug, Clone)]
pub struct NewSurveyResponse {
    pub survey_id: Option<String>,
    pub arcgis_object_id: Option<i64>,
    pub arcgis_global_id: String,
    pub surveyor_username: Option<String>,
    pub surveyor_name: Option<String>,
    pub surveyor_email: Option<String>,
    pub agent_id: Option<String>,
    pub fields: Map<String, Value>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub compliance: Compliance,
    pub event_type: String,
    pub submitted_at: Option<String>,
    pub raw_payload: Value,
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAttachment {
    pub response_id: String,
    pub arcgis_attachment_id: i64,
    pub arcgis_global_id: Option<String>,
    pub file_name: String,
    pub content_type: String,
    pub media_category: MediaCategory,
    pub keyword: Option<String>,
    pub file_size_bytes: Option<i64>,
    pub arcgis_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaAttachment {
    pub id: String,
    pub response_id: String,
    pub arcgis_attachment_id: i64,
    pub arcgis_global_id: Option<String>,
    pub file_name: String,
    pub content_type: String,
    pub media_category: MediaCategory,
    pub keyword: Option<String>,
    pub file_size_bytes: Option<i64>,
    pub arcgis_url: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: String,
    pub response_id: String,
    pub status: SyncStatus,
    pub error_message: Option<String>,
    pub fields_changed: Vec<String>,
    pub created_at: String,
}

/// Slice of a pending record used by the retry sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSync {
    pub id: String,
    pub arcgis_object_id: Option<i64>,
    pub arcgis_global_id: Option<String>,
    pub last_sync_attempt: Option<String>,
}
