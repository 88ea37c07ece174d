use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{ArcGis, Timeouts};
use crate::fields::FieldMap;
use crate::normalize::normalize_field_value;

pub mod model;

pub use model::{
    AttachmentGroup, AttachmentInfo, EditResult, Feature, FeatureQuery, FeatureSet, Geometry,
};
use model::{
    ApplyEditsResponse, AttachmentsResponse, CountResponse, RemoteErrorBody, TokenResponse,
};

/// Where clauses longer than this are sent as a form POST.
const MAX_GET_WHERE_LEN: usize = 500;
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum ArcGisError {
    #[error("feature service request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token request failed: {0}")]
    Token(String),
    #[error("feature service error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("feature service rejected {failed} edit(s): {detail}")]
    EditFailed { failed: usize, detail: String },
    #[error("object id not found for global id {0}")]
    ObjectIdNotFound(String),
    #[error("unexpected feature service response: {0}")]
    InvalidResponse(String),
}

/// Operations the sync engine needs from the remote feature service.
#[async_trait]
pub trait FeatureService: Send + Sync {
    async fn query_features(&self, query: &FeatureQuery) -> Result<FeatureSet, ArcGisError>;

    async fn query_attachments(
        &self,
        object_ids: &[i64],
    ) -> Result<Vec<AttachmentGroup>, ArcGisError>;

    /// Submit `updates`. Fails if the service reports any rejected edit.
    async fn apply_edits(&self, updates: &[Feature]) -> Result<Vec<EditResult>, ArcGisError>;

    async fn query_count(&self, where_clause: &str) -> Result<u64, ArcGisError>;
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    valid_until: DateTime<Utc>,
}

pub struct ArcGisClient {
    http: Client,
    service_url: String,
    token_url: String,
    portal_url: String,
    username: String,
    password: String,
    timeouts: Timeouts,
    token: RwLock<Option<CachedToken>>,
}

impl fmt::Debug for ArcGisClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArcGisClient")
            .field("service_url", &self.service_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl ArcGisClient {
    pub fn from_config(cfg: &ArcGis) -> Self {
        let http = Client::builder()
            .user_agent("poi-sync/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            service_url: cfg.service_url.trim_end_matches('/').to_string(),
            token_url: cfg.token_url.clone(),
            portal_url: cfg.portal_url.clone(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            timeouts: cfg.timeouts,
            token: RwLock::new(None),
        }
    }

    /// Return the cached token, requesting a new one when it is missing or
    /// within a minute of expiry. Concurrent refreshes are harmless.
    pub async fn token(&self) -> Result<String, ArcGisError> {
        if let Some(cached) = self.token.read().await.as_ref() {
            if Utc::now() < cached.valid_until {
                return Ok(cached.value.clone());
            }
        }

        let form = [
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
            ("referer", self.portal_url.as_str()),
            ("f", "json"),
        ];
        let res = self
            .http
            .post(&self.token_url)
            .timeout(self.timeouts.token())
            .form(&form)
            .send()
            .await?;
        let body = read_envelope(res).await.map_err(|err| match err {
            ArcGisError::Remote { message, .. } => ArcGisError::Token(message),
            other => other,
        })?;
        let parsed: TokenResponse = decode(body)?;
        let expires = Utc
            .timestamp_millis_opt(parsed.expires)
            .single()
            .ok_or_else(|| ArcGisError::Token(format!("bad expiry {}", parsed.expires)))?;
        let valid_until = expires - ChronoDuration::seconds(TOKEN_REFRESH_MARGIN_SECS);

        *self.token.write().await = Some(CachedToken {
            value: parsed.token.clone(),
            valid_until,
        });
        info!(%valid_until, "obtained feature service token");
        Ok(parsed.token)
    }

    async fn forget_token(&self) {
        *self.token.write().await = None;
    }

    fn endpoint(&self, op: &str) -> String {
        format!("{}/{}", self.service_url, op)
    }

    /// Send a request and drop the cached token if the service says it is invalid.
    async fn execute(&self, request: RequestBuilder) -> Result<Value, ArcGisError> {
        let res = request.send().await?;
        match read_envelope(res).await {
            Err(ArcGisError::Remote { code, message }) => {
                if code == 498 || code == 499 {
                    warn!(code, "feature service token rejected; clearing cache");
                    self.forget_token().await;
                }
                Err(ArcGisError::Remote { code, message })
            }
            other => other,
        }
    }
}

#[async_trait]
impl FeatureService for ArcGisClient {
    async fn query_features(&self, query: &FeatureQuery) -> Result<FeatureSet, ArcGisError> {
        let token = self.token().await?;
        let mut params: Vec<(&str, String)> = vec![
            ("where", query.where_clause.clone()),
            ("outFields", query.out_fields.clone()),
            ("returnGeometry", query.return_geometry.to_string()),
            ("f", "json".into()),
            ("token", token),
        ];
        if let Some(count) = query.result_record_count {
            params.push(("resultRecordCount", count.to_string()));
        }

        let url = self.endpoint("query");
        let request = if query.where_clause.len() > MAX_GET_WHERE_LEN {
            self.http
                .post(url)
                .timeout(self.timeouts.bulk())
                .form(&params)
        } else {
            self.http
                .get(url)
                .timeout(self.timeouts.query())
                .query(&params)
        };
        debug!(where_len = query.where_clause.len(), "querying features");
        decode(self.execute(request).await?)
    }

    async fn query_attachments(
        &self,
        object_ids: &[i64],
    ) -> Result<Vec<AttachmentGroup>, ArcGisError> {
        if object_ids.is_empty() {
            return Ok(Vec::new());
        }
        let token = self.token().await?;
        let ids = object_ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let timeout = if object_ids.len() > 1 {
            self.timeouts.bulk()
        } else {
            self.timeouts.query()
        };
        let request = self
            .http
            .get(self.endpoint("queryAttachments"))
            .timeout(timeout)
            .query(&[("objectIds", ids.as_str()), ("f", "json"), ("token", token.as_str())]);
        let parsed: AttachmentsResponse = decode(self.execute(request).await?)?;
        Ok(parsed.attachment_groups)
    }

    async fn apply_edits(&self, updates: &[Feature]) -> Result<Vec<EditResult>, ArcGisError> {
        let token = self.token().await?;
        let updates_json = serde_json::to_string(updates)
            .map_err(|e| ArcGisError::InvalidResponse(e.to_string()))?;
        let request = self
            .http
            .post(self.endpoint("applyEdits"))
            .timeout(self.timeouts.edit())
            .form(&[
                ("updates", updates_json.as_str()),
                ("f", "json"),
                ("token", token.as_str()),
            ]);
        let parsed: ApplyEditsResponse = decode(self.execute(request).await?)?;
        ensure_edits_succeeded(&parsed.update_results)?;
        Ok(parsed.update_results)
    }

    async fn query_count(&self, where_clause: &str) -> Result<u64, ArcGisError> {
        let token = self.token().await?;
        let request = self
            .http
            .get(self.endpoint("query"))
            .timeout(self.timeouts.query())
            .query(&[
                ("where", where_clause),
                ("returnCountOnly", "true"),
                ("f", "json"),
                ("token", token.as_str()),
            ]);
        let parsed: CountResponse = decode(self.execute(request).await?)?;
        Ok(parsed.count)
    }
}

/// Read a response body, turning HTTP failures and the service's in-band
/// `error` envelope into `ArcGisError::Remote`.
async fn read_envelope(res: reqwest::Response) -> Result<Value, ArcGisError> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        return Err(ArcGisError::Remote {
            code: i64::from(status.as_u16()),
            message: truncate(&text, 500),
        });
    }
    let body: Value = serde_json::from_str(&text)
        .map_err(|e| ArcGisError::InvalidResponse(format!("{e}: {}", truncate(&text, 200))))?;
    if let Some(error) = body.get("error") {
        let parsed: RemoteErrorBody = serde_json::from_value(error.clone()).unwrap_or_default();
        let mut message = parsed.message.unwrap_or_else(|| error.to_string());
        if !parsed.details.is_empty() {
            let details: Vec<String> = parsed
                .details
                .iter()
                .map(|d| d.as_str().map(str::to_string).unwrap_or_else(|| d.to_string()))
                .collect();
            message = format!("{message} ({})", details.join("; "));
        }
        return Err(ArcGisError::Remote {
            code: parsed.code.unwrap_or_default(),
            message,
        });
    }
    Ok(body)
}

fn decode<T: DeserializeOwned>(body: Value) -> Result<T, ArcGisError> {
    serde_json::from_value(body).map_err(|e| ArcGisError::InvalidResponse(e.to_string()))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Fail with the first rejected edit's detail if any edit did not succeed.
pub fn ensure_edits_succeeded(results: &[EditResult]) -> Result<(), ArcGisError> {
    let failed: Vec<&EditResult> = results.iter().filter(|r| !r.success).collect();
    match failed.first() {
        None => Ok(()),
        Some(first) => Err(ArcGisError::EditFailed {
            failed: failed.len(),
            detail: first
                .error
                .as_ref()
                .map(Value::to_string)
                .unwrap_or_else(|| "no detail".into()),
        }),
    }
}

/// `globalid IN (...)` filter with single quotes escaped.
pub fn global_id_filter<S: AsRef<str>>(global_ids: &[S]) -> String {
    let quoted: Vec<String> = global_ids
        .iter()
        .map(|g| format!("'{}'", g.as_ref().replace('\'', "''")))
        .collect();
    if quoted.len() == 1 {
        format!("globalid = {}", quoted[0])
    } else {
        format!("globalid IN ({})", quoted.join(","))
    }
}

/// Look up the object id for one global id.
pub async fn find_object_id(
    service: &dyn FeatureService,
    global_id: &str,
) -> Result<Option<i64>, ArcGisError> {
    let query = FeatureQuery::new(global_id_filter(&[global_id]))
        .out_fields("objectid,globalid")
        .without_geometry();
    let set = service.query_features(&query).await?;
    Ok(set.features.iter().find_map(Feature::object_id))
}

/// Look up object ids for many global ids with one query; absent ids are omitted.
pub async fn find_object_ids(
    service: &dyn FeatureService,
    global_ids: &[String],
) -> Result<HashMap<String, i64>, ArcGisError> {
    if global_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let query = FeatureQuery::new(global_id_filter(global_ids))
        .out_fields("objectid,globalid")
        .without_geometry();
    let set = service.query_features(&query).await?;
    let mut found = HashMap::new();
    for feature in &set.features {
        if let (Some(gid), Some(oid)) = (feature.global_id(), feature.object_id()) {
            let key = global_ids
                .iter()
                .find(|g| g.eq_ignore_ascii_case(gid))
                .cloned()
                .unwrap_or_else(|| gid.to_string());
            found.insert(key, oid);
        }
    }
    Ok(found)
}

/// Build the update feature carrying the record's full current state.
/// Geometry is attached only when both coordinates are known.
pub fn build_feature(
    fields: &FieldMap,
    object_id: i64,
    record: &Map<String, Value>,
    latitude: Option<f64>,
    longitude: Option<f64>,
) -> Feature {
    let mut attributes = Map::new();
    attributes.insert("objectid".into(), Value::from(object_id));
    for (local, remote) in fields.synced_fields() {
        let Some(value) = record.get(local) else {
            continue;
        };
        if value.is_null() && !fields.is_multi_select(local) {
            continue;
        }
        attributes.insert(
            remote.to_string(),
            normalize_field_value(fields, local, value.clone()),
        );
    }

    let geometry = match (latitude, longitude) {
        (Some(lat), Some(lon)) => Some(Geometry::wgs84(lon, lat)),
        _ => None,
    };
    Feature {
        attributes,
        geometry,
    }
}
