//! HTTP surface: webhook intake, record read/edit and admin triggers.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{error, instrument, warn};

use crate::db;
use crate::edit::{apply_edit, EditError};
use crate::ingest::{ingest_event, WebhookEvent};
use crate::media::backfill_attachments;
use crate::outbox::retry_pending;
use crate::sync::SyncContext;

pub const SIGNATURE_HEADER: &str = "x-esri-signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct AppState {
    pub ctx: SyncContext,
    /// `None` disables secret and signature checks.
    pub webhook_secret: Option<String>,
    pub retry_batch_size: u32,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn unauthorized(message: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn internal(err: anyhow::Error) -> Self {
        error!(?err, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
    }
}

impl From<EditError> for ApiError {
    fn from(err: EditError) -> Self {
        match err {
            EditError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            EditError::Store(inner) => Self::internal(inner),
            other => Self::bad_request(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct SecretQuery {
    secret: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/v1/webhook/survey123", post(survey123_webhook))
        .route("/api/v1/surveys/:id", get(get_survey).put(update_survey))
        .route("/api/v1/admin/retry-sync", post(trigger_retry))
        .route("/api/v1/media/sync-attachments", post(trigger_backfill))
        .with_state(state)
}

/// Hex HMAC-SHA256 of `body` under `secret`, compared in constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn check_secret(state: &AppState, query: &SecretQuery) -> ApiResult<()> {
    match state.webhook_secret.as_deref() {
        Some(expected) if query.secret.as_deref() != Some(expected) => {
            warn!("rejected request with missing or wrong secret");
            Err(ApiError::unauthorized("invalid webhook secret"))
        }
        _ => Ok(()),
    }
}

fn check_signature(state: &AppState, headers: &HeaderMap, body: &[u8]) -> ApiResult<()> {
    let (Some(secret), Some(header)) = (state.webhook_secret.as_deref(), headers.get(SIGNATURE_HEADER)) else {
        return Ok(());
    };
    let valid = header
        .to_str()
        .map(|sig| verify_signature(secret, body, sig))
        .unwrap_or(false);
    if valid {
        Ok(())
    } else {
        warn!("rejected webhook with bad signature");
        Err(ApiError::unauthorized("invalid webhook signature"))
    }
}

fn parse_object(body: &[u8]) -> ApiResult<Value> {
    match serde_json::from_slice::<Value>(body) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(ApiError::bad_request("body must be a JSON object")),
        Err(err) => Err(ApiError::bad_request(format!("invalid JSON body: {err}"))),
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "timestamp": db::now_timestamp() }))
}

#[instrument(skip_all)]
async fn survey123_webhook(
    State(state): State<AppState>,
    Query(query): Query<SecretQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    check_secret(&state, &query)?;
    check_signature(&state, &headers, &body)?;
    let raw: Value = serde_json::from_slice(&body)
        .map_err(|err| ApiError::bad_request(format!("invalid JSON body: {err}")))?;
    let event = WebhookEvent::from_payload(&raw);

    let outcome = ingest_event(&state.ctx, &event, &raw)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({
        "status": "ok",
        "id": outcome.id,
        "duplicate": outcome.duplicate,
    })))
}

async fn get_survey(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let record = db::fetch_response(&state.ctx.pool, &id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("survey response {id} not found")))?;
    let attachments = db::list_attachments(&state.ctx.pool, &id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "data": record, "attachments": attachments })))
}

async fn update_survey(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let updates = parse_object(&body)?;
    let outcome = apply_edit(&state.ctx, &id, updates).await?;
    Ok(Json(json!({
        "success": true,
        "data": outcome.record,
        "compliance": outcome.compliance,
        "arcgisSync": outcome.arcgis_sync,
    })))
}

async fn trigger_retry(
    State(state): State<AppState>,
    Query(query): Query<SecretQuery>,
) -> ApiResult<Json<Value>> {
    check_secret(&state, &query)?;
    let summary = retry_pending(&state.ctx, state.retry_batch_size)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "success": true, "data": summary })))
}

async fn trigger_backfill(
    State(state): State<AppState>,
    Query(query): Query<SecretQuery>,
) -> ApiResult<Json<Value>> {
    check_secret(&state, &query)?;
    let summary = backfill_attachments(&state.ctx)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "success": true, "data": summary })))
}
