#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use poi_sync::arcgis::{
    ensure_edits_succeeded, ArcGisError, AttachmentGroup, AttachmentInfo, EditResult, Feature,
    FeatureQuery, FeatureService, FeatureSet,
};
use poi_sync::realtime::{Publisher, RealtimeEvent};
use poi_sync::schema::Schema;
use poi_sync::sync::SyncContext;
use serde_json::{json, Map, Value};
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::Mutex;

pub async fn setup_pool() -> sqlx::SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

type Scripted<T> = Arc<Mutex<VecDeque<Result<T, ArcGisError>>>>;

/// Feature service fake: pops scripted responses, records every call.
/// Empty queues answer with "nothing found" and successful edits.
#[derive(Clone, Default)]
pub struct RecordingService {
    features: Scripted<FeatureSet>,
    attachments: Scripted<Vec<AttachmentGroup>>,
    edits: Scripted<Vec<EditResult>>,
    queries: Arc<Mutex<Vec<FeatureQuery>>>,
    attachment_calls: Arc<Mutex<Vec<Vec<i64>>>>,
    edit_calls: Arc<Mutex<Vec<Vec<Feature>>>>,
}

impl RecordingService {
    pub async fn push_features(&self, response: Result<FeatureSet, ArcGisError>) {
        self.features.lock().await.push_back(response);
    }

    pub async fn push_attachments(&self, response: Result<Vec<AttachmentGroup>, ArcGisError>) {
        self.attachments.lock().await.push_back(response);
    }

    pub async fn push_edits(&self, response: Result<Vec<EditResult>, ArcGisError>) {
        self.edits.lock().await.push_back(response);
    }

    pub async fn queries(&self) -> Vec<FeatureQuery> {
        self.queries.lock().await.clone()
    }

    pub async fn attachment_calls(&self) -> Vec<Vec<i64>> {
        self.attachment_calls.lock().await.clone()
    }

    pub async fn edit_calls(&self) -> Vec<Vec<Feature>> {
        self.edit_calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl FeatureService for RecordingService {
    async fn query_features(&self, query: &FeatureQuery) -> Result<FeatureSet, ArcGisError> {
        self.queries.lock().await.push(query.clone());
        self.features
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(FeatureSet::default()))
    }

    async fn query_attachments(
        &self,
        object_ids: &[i64],
    ) -> Result<Vec<AttachmentGroup>, ArcGisError> {
        self.attachment_calls.lock().await.push(object_ids.to_vec());
        self.attachments
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn apply_edits(&self, updates: &[Feature]) -> Result<Vec<EditResult>, ArcGisError> {
        self.edit_calls.lock().await.push(updates.to_vec());
        let scripted = self.edits.lock().await.pop_front();
        let results = match scripted {
            Some(response) => response?,
            None => updates
                .iter()
                .map(|f| EditResult {
                    object_id: f.object_id(),
                    success: true,
                    ..Default::default()
                })
                .collect(),
        };
        ensure_edits_succeeded(&results)?;
        Ok(results)
    }

    async fn query_count(&self, _where_clause: &str) -> Result<u64, ArcGisError> {
        Ok(0)
    }
}

#[derive(Clone, Default)]
pub struct RecordingPublisher {
    events: Arc<std::sync::Mutex<Vec<RealtimeEvent>>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<RealtimeEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, event: RealtimeEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub async fn context(remote: &RecordingService, publisher: &RecordingPublisher) -> SyncContext {
    SyncContext::new(
        setup_pool().await,
        Arc::new(Schema::load().unwrap()),
        Arc::new(remote.clone()),
        Arc::new(publisher.clone()),
    )
}

pub fn feature_with_ids(object_id: i64, global_id: &str) -> Feature {
    let mut attributes = Map::new();
    attributes.insert("objectid".into(), json!(object_id));
    attributes.insert("globalid".into(), json!(global_id));
    Feature {
        attributes,
        geometry: None,
    }
}

pub fn attachment(id: i64, name: &str, content_type: &str) -> AttachmentInfo {
    AttachmentInfo {
        id: Some(id),
        name: Some(name.into()),
        content_type: Some(content_type.into()),
        size: Some(2048),
        ..Default::default()
    }
}

/// Restaurant submission with identity, phone and working days/hours filled,
/// no coordinates and no photos.
pub fn restaurant_event(global_id: &str, object_id: i64) -> Value {
    json!({
        "eventType": "addData",
        "feature": {
            "attributes": {
                "objectid": object_id,
                "globalid": global_id,
                "name_ar": "مطعم الورد",
                "name_en": "Al Ward Restaurant",
                "category": "Restaurant",
                "phone_number": "+966500000000",
                "working_days": "Sunday,Monday,Tuesday",
                "working_hours_each_day": "09:00-23:00",
                "CreationDate": 1_717_200_000_000i64,
                "Creator": "field.agent"
            }
        },
        "serverResponse": {
            "addResults": [{"objectId": object_id, "globalId": global_id, "success": true}]
        },
        "userInfo": {"username": "surveyor1", "fullName": "Survey Or", "email": "s@example.com"},
        "surveyInfo": {"formItemId": "form-1", "formTitle": "Riyadh POI"}
    })
}
