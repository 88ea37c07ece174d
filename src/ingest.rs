//! Inbound webhook ingestion: map, fetch media, score, persist.

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::arcgis::AttachmentInfo;
use crate::compliance::{self, MediaCounts};
use crate::db::{self, model::{project, SURVEYOR_USERNAME}, NewAttachment, NewSurveyResponse};
use crate::fields::FieldMap;
use crate::model::MediaCategory;
use crate::normalize::{normalize_category, normalize_field_value};
use crate::realtime::RealtimeEvent;
use crate::sync::SyncContext;

const DEFAULT_EVENT_TYPE: &str = "addData";
const DEFAULT_FORM_TITLE: &str = "POI Survey";

/// Survey webhook body. Every part is optional and decoded leniently: a value
/// of the wrong shape is dropped with a warning instead of failing the event,
/// so malformed events are still persisted on a best-effort basis.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(default, deserialize_with = "lenient")]
    pub event_type: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub feature: Option<EventFeature>,
    #[serde(default, deserialize_with = "lenient")]
    pub server_response: Option<ServerResponse>,
    #[serde(default, deserialize_with = "lenient")]
    pub response: Option<ServerResponse>,
    #[serde(default, deserialize_with = "lenient")]
    pub user_info: Option<UserInfo>,
    #[serde(default, deserialize_with = "lenient")]
    pub survey_info: Option<SurveyInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFeature {
    #[serde(default, deserialize_with = "lenient")]
    pub attributes: Option<Map<String, Value>>,
    #[serde(default, deserialize_with = "lenient")]
    pub geometry: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub attachments: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerResponse {
    #[serde(default, deserialize_with = "lenient")]
    pub add_results: Option<Vec<Acknowledgement>>,
    #[serde(default, deserialize_with = "lenient")]
    pub update_results: Option<Vec<Acknowledgement>>,
}

/// One entry of the platform's own edit acknowledgement.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgement {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub object_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub global_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default, deserialize_with = "lenient")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub full_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub first_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyInfo {
    #[serde(default, deserialize_with = "lenient")]
    pub form_item_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub form_title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub service_item_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub service_url: Option<String>,
}

/// Decode `T`, turning a value of the wrong shape into `None`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    match serde_json::from_value(value) {
        Ok(decoded) => Ok(Some(decoded)),
        Err(err) => {
            warn!(error = %err, "ignoring malformed webhook value");
            Ok(None)
        }
    }
}

/// Integer ids sometimes arrive as numeric strings.
fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let id = match &value {
        Value::Null => None,
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    if id.is_none() && !value.is_null() {
        warn!(%value, "ignoring malformed webhook object id");
    }
    Ok(id)
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub id: String,
    pub global_id: String,
    pub object_id: Option<i64>,
    /// The global id was already known; nothing was written.
    pub duplicate: bool,
    /// `None` for duplicates.
    pub score: Option<f64>,
    pub attachments_stored: usize,
}

/// Which source the attachment list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentSource {
    Remote,
    Event,
    /// Neither source answered; counts are unknown rather than zero.
    Unavailable,
}

impl WebhookEvent {
    /// Decode a webhook body. Never fails: a body that is not an object at all
    /// yields an empty event, which is still stored under a generated id.
    pub fn from_payload(raw: &Value) -> Self {
        match WebhookEvent::deserialize(raw) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "webhook body is not an event object; storing it as is");
                WebhookEvent::default()
            }
        }
    }

    fn attributes(&self) -> Option<&Map<String, Value>> {
        self.feature.as_ref().and_then(|f| f.attributes.as_ref())
    }

    fn acknowledgement(&self) -> Option<&Acknowledgement> {
        let ack = self.server_response.as_ref().or(self.response.as_ref())?;
        ack.add_results
            .as_ref()
            .and_then(|r| r.first())
            .or_else(|| ack.update_results.as_ref().and_then(|r| r.first()))
    }

    /// Object id and global id: server acknowledgement first, then the raw attributes.
    pub fn identifiers(&self) -> (Option<i64>, Option<String>) {
        let ack = self.acknowledgement();
        let empty = Map::new();
        let attrs = self.attributes().unwrap_or(&empty);
        let object_id = ack
            .and_then(|a| a.object_id)
            .or_else(|| attr_i64(attrs, "objectid"));
        let global_id = ack
            .and_then(|a| a.global_id.clone())
            .filter(|g| !g.trim().is_empty())
            .or_else(|| attr_string(attrs, "globalid"));
        (object_id, global_id)
    }

    fn coordinates(&self) -> (Option<f64>, Option<f64>) {
        let geometry = self.feature.as_ref().and_then(|f| f.geometry.as_ref());
        let empty = Map::new();
        let attrs = self.attributes().unwrap_or(&empty);
        let lat = geometry
            .and_then(|g| g.get("y"))
            .and_then(number)
            .or_else(|| attrs.get("latitude").and_then(number));
        let lon = geometry
            .and_then(|g| g.get("x"))
            .and_then(number)
            .or_else(|| attrs.get("longitude").and_then(number));
        (lat, lon)
    }

    fn embedded_attachments(&self) -> Vec<AttachmentInfo> {
        self.feature
            .as_ref()
            .and_then(|f| f.attachments.as_ref())
            .map(|list| {
                list.iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn attr_i64(attrs: &Map<String, Value>, key: &str) -> Option<i64> {
    let value = attrs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)?;
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn attr_string(attrs: &Map<String, Value>, key: &str) -> Option<String> {
    attrs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .and_then(|(_, v)| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Remote attribute names translated to local ids; unmapped names are dropped.
pub fn map_attributes(fields: &FieldMap, attrs: &Map<String, Value>) -> Map<String, Value> {
    attrs
        .iter()
        .filter_map(|(name, value)| fields.to_local(name).map(|local| (local.to_string(), value.clone())))
        .collect()
}

/// Two-tier lookup: the mapped value wins; otherwise the raw attribute under
/// its remote name, then under the local name. Nulls and empty strings do not count.
pub fn resolve(
    fields: &FieldMap,
    mapped: &Map<String, Value>,
    raw: &Map<String, Value>,
    field: &str,
) -> Option<Value> {
    let usable = |v: &&Value| !v.is_null() && v.as_str() != Some("");
    mapped
        .get(field)
        .filter(|v| !v.is_null())
        .or_else(|| fields.to_remote(field).and_then(|r| raw.get(r)).filter(usable))
        .or_else(|| raw.get(field).filter(usable))
        .cloned()
}

/// Pick the attachment list: a non-empty remote answer wins, the event's own
/// list is the fallback, and an empty remote answer still counts as observed.
pub fn choose_attachments(
    remote: Option<Vec<AttachmentInfo>>,
    embedded: Vec<AttachmentInfo>,
) -> (AttachmentSource, Vec<AttachmentInfo>) {
    match remote {
        Some(list) if !list.is_empty() => (AttachmentSource::Remote, list),
        _ if !embedded.is_empty() => (AttachmentSource::Event, embedded),
        Some(list) => (AttachmentSource::Remote, list),
        None => (AttachmentSource::Unavailable, Vec::new()),
    }
}

pub fn count_media(source: AttachmentSource, attachments: &[AttachmentInfo]) -> MediaCounts {
    if source == AttachmentSource::Unavailable {
        return MediaCounts::default();
    }
    let (mut images, mut videos) = (0, 0);
    for att in attachments {
        match MediaCategory::from_content_type(att.content_type.as_deref().unwrap_or("")) {
            MediaCategory::Image => images += 1,
            MediaCategory::Video => videos += 1,
            _ => {}
        }
    }
    MediaCounts::observed(images, videos)
}

/// Attachment rows for a parent; entries without an attachment id are skipped.
pub fn attachment_rows(
    response_id: &str,
    object_id: Option<i64>,
    attachments: &[AttachmentInfo],
) -> Vec<NewAttachment> {
    attachments
        .iter()
        .filter_map(|att| {
            let attachment_id = att.id?;
            let content_type = att.content_type.clone().unwrap_or_default();
            Some(NewAttachment {
                response_id: response_id.to_string(),
                arcgis_attachment_id: attachment_id,
                arcgis_global_id: att.global_id.clone(),
                file_name: att
                    .name
                    .clone()
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| "unknown".into()),
                media_category: MediaCategory::from_content_type(&content_type),
                content_type,
                keyword: att.keywords.clone(),
                file_size_bytes: att.size,
                arcgis_url: object_id.map(|oid| format!("{oid}/attachments/{attachment_id}")),
            })
        })
        .collect()
}

fn submitted_at(attrs: &Map<String, Value>) -> String {
    attrs
        .get("CreationDate")
        .and_then(Value::as_i64)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .map(db::format_timestamp)
        .unwrap_or_else(db::now_timestamp)
}

fn surveyor_name(user: &UserInfo) -> Option<String> {
    if let Some(full) = user.full_name.as_deref().filter(|s| !s.trim().is_empty()) {
        return Some(full.trim().to_string());
    }
    let joined = format!(
        "{} {}",
        user.first_name.as_deref().unwrap_or(""),
        user.last_name.as_deref().unwrap_or("")
    );
    let joined = joined.trim();
    (!joined.is_empty()).then(|| joined.to_string())
}

async fn fetch_remote_attachments(ctx: &SyncContext, object_id: Option<i64>) -> Option<Vec<AttachmentInfo>> {
    let object_id = object_id?;
    match ctx.remote.query_attachments(&[object_id]).await {
        Ok(groups) => Some(
            groups
                .into_iter()
                .find(|g| g.parent_object_id == object_id)
                .map(|g| g.attachment_infos)
                .unwrap_or_default(),
        ),
        Err(err) => {
            warn!(object_id, error = %err, "could not fetch attachments from feature service");
            None
        }
    }
}

async fn register_survey(ctx: &SyncContext, info: Option<&SurveyInfo>) -> Option<String> {
    let info = info?;
    let form_item_id = info.form_item_id.as_deref().filter(|s| !s.is_empty())?;
    let title = info
        .form_title
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_FORM_TITLE);
    match db::upsert_survey(
        &ctx.pool,
        form_item_id,
        title,
        info.service_item_id.as_deref(),
        info.service_url.as_deref(),
    )
    .await
    {
        Ok(id) => Some(id),
        Err(err) => {
            warn!(?err, form_item_id, "survey form upsert failed");
            None
        }
    }
}

/// Ingest one webhook event. Duplicate deliveries of a known global id are
/// absorbed and report the existing record.
#[instrument(skip_all)]
pub async fn ingest_event(
    ctx: &SyncContext,
    event: &WebhookEvent,
    raw_payload: &Value,
) -> Result<IngestOutcome> {
    let fields = &ctx.schema.fields;
    let empty = Map::new();
    let attrs = event.attributes().unwrap_or(&empty);
    let (object_id, global_id) = event.identifiers();
    if attrs.is_empty() {
        warn!("webhook event carries no feature attributes");
    }
    let global_id = global_id.unwrap_or_else(|| {
        let generated = Uuid::new_v4().to_string();
        warn!(%generated, "webhook event has no global id; generated one");
        generated
    });
    if object_id.is_none() {
        warn!(%global_id, "webhook event has no object id");
    }

    if let Some(existing) = db::find_id_by_global_id(&ctx.pool, &global_id).await? {
        info!(id = %existing, %global_id, "duplicate webhook delivery ignored");
        return Ok(duplicate(existing, global_id, object_id));
    }

    let mapped = map_attributes(fields, attrs);
    let mut content = Map::new();
    for def in fields.definitions() {
        if def.local == SURVEYOR_USERNAME {
            continue;
        }
        if let Some(value) = resolve(fields, &mapped, attrs, def.local) {
            content.insert(
                def.local.to_string(),
                normalize_field_value(fields, def.local, value),
            );
        }
    }

    let remote = fetch_remote_attachments(ctx, object_id).await;
    let (source, attachments) = choose_attachments(remote, event.embedded_attachments());
    let media = count_media(source, &attachments);

    let (latitude, longitude) = event.coordinates();
    let category = normalize_category(content.get("category").unwrap_or(&Value::Null));
    let scored = compliance::evaluate(
        &ctx.schema,
        &project(&content, latitude, longitude),
        &category,
        media,
    );

    let survey_id = register_survey(ctx, event.survey_info.as_ref()).await;
    let user = event.user_info.clone().unwrap_or_default();
    let surveyor_username = user
        .username
        .clone()
        .filter(|s| !s.is_empty())
        .or_else(|| resolve(fields, &mapped, attrs, "surveyor_username").and_then(|v| v.as_str().map(str::to_string)))
        .or_else(|| attr_string(attrs, "Creator"));

    let new = NewSurveyResponse {
        survey_id,
        arcgis_object_id: object_id,
        arcgis_global_id: global_id.clone(),
        surveyor_username,
        surveyor_name: surveyor_name(&user),
        surveyor_email: user.email.clone(),
        agent_id: attrs.get("agent_id").and_then(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }),
        fields: content,
        latitude,
        longitude,
        compliance: scored.clone(),
        event_type: event
            .event_type
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
        submitted_at: Some(submitted_at(attrs)),
        raw_payload: raw_payload.clone(),
        attributes: attrs.clone(),
    };

    let Some(id) = db::insert_response(&ctx.pool, &new)
        .await
        .context("failed to persist survey response")?
    else {
        let existing = db::find_id_by_global_id(&ctx.pool, &global_id)
            .await?
            .context("conflicting response vanished")?;
        info!(id = %existing, %global_id, "concurrent duplicate webhook delivery ignored");
        return Ok(duplicate(existing, global_id, object_id));
    };

    let mut stored = 0;
    for row in attachment_rows(&id, object_id, &attachments) {
        if db::insert_attachment(&ctx.pool, &row)
            .await
            .context("failed to persist attachment")?
        {
            stored += 1;
        }
    }

    info!(
        %id,
        %global_id,
        ?object_id,
        score = scored.score,
        complete = scored.is_complete,
        attachments = stored,
        ?source,
        "survey response ingested"
    );
    ctx.publisher.publish(RealtimeEvent::KpiUpdated {
        id: id.clone(),
        global_id: global_id.clone(),
        object_id,
        score: scored.score,
    });

    Ok(IngestOutcome {
        id,
        global_id,
        object_id,
        duplicate: false,
        score: Some(scored.score),
        attachments_stored: stored,
    })
}

fn duplicate(id: String, global_id: String, object_id: Option<i64>) -> IngestOutcome {
    IngestOutcome {
        id,
        global_id,
        object_id,
        duplicate: true,
        score: None,
        attachments_stored: 0,
    }
}
