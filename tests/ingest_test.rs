mod common;

use std::sync::Arc;

use common::{
    attachment, context, restaurant_event, setup_pool, RecordingPublisher, RecordingService,
};
use poi_sync::arcgis::{
    ArcGisError, AttachmentGroup, EditResult, Feature, FeatureQuery, FeatureService, FeatureSet,
};
use poi_sync::compliance::{evaluate_record, MediaCounts};
use poi_sync::db::{self, NewSurveyResponse};
use poi_sync::ingest::{ingest_event, WebhookEvent};
use poi_sync::model::MediaCategory;
use poi_sync::realtime::RealtimeEvent;
use poi_sync::schema::Schema;
use poi_sync::sync::SyncContext;
use serde_json::{json, Map, Value};

fn parse(raw: &Value) -> WebhookEvent {
    serde_json::from_value(raw.clone()).unwrap()
}

async fn response_count(pool: &db::Pool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM survey_responses")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn duplicate_delivery_is_absorbed() {
    let remote = RecordingService::default();
    let publisher = RecordingPublisher::default();
    let ctx = context(&remote, &publisher).await;
    let raw = restaurant_event("{AAAA-1}", 11);

    let first = ingest_event(&ctx, &parse(&raw), &raw).await.unwrap();
    let second = ingest_event(&ctx, &parse(&raw), &raw).await.unwrap();

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(first.id, second.id);
    assert_eq!(second.score, None);
    assert_eq!(response_count(&ctx.pool).await, 1);
    // The duplicate short-circuits before touching the feature service.
    assert_eq!(remote.attachment_calls().await, vec![vec![11]]);
    assert_eq!(publisher.events().len(), 1);
}

#[tokio::test]
async fn restaurant_without_media_or_coordinates_is_incomplete() {
    let remote = RecordingService::default();
    let publisher = RecordingPublisher::default();
    let ctx = context(&remote, &publisher).await;
    let raw = restaurant_event("{BBBB-2}", 21);

    let outcome = ingest_event(&ctx, &parse(&raw), &raw).await.unwrap();
    let record = db::fetch_response(&ctx.pool, &outcome.id)
        .await
        .unwrap()
        .unwrap();

    assert!(!record.is_complete);
    assert!(record.compliance_score > 0.0 && record.compliance_score < 100.0);
    for field in [
        "_coordinates",
        "legal_name",
        "break_time",
        "_business_exterior",
        "_business_interior",
    ] {
        assert!(
            record.missing_fields.iter().any(|f| f == field),
            "{field} should be missing"
        );
    }
    assert!(!record.missing_fields.iter().any(|f| f == "poi_name_en"));

    assert_eq!(record.fields["category"], json!("restaurant"));
    assert_eq!(record.fields["working_hours"], json!("09:00-23:00"));
    assert!(!record.fields.contains_key("surveyor_username"));
    assert_eq!(record.arcgis_object_id, Some(21));
    assert_eq!(record.surveyor_username.as_deref(), Some("surveyor1"));
    assert_eq!(record.surveyor_name.as_deref(), Some("Survey Or"));
    assert_eq!(record.submitted_at.as_deref(), Some("2024-06-01T00:00:00.000000Z"));
    assert!(record.survey_id.is_some());
    assert!(!record.sync_pending);

    match publisher.events().as_slice() {
        [RealtimeEvent::KpiUpdated {
            id,
            global_id,
            object_id,
            score,
        }] => {
            assert_eq!(id, &outcome.id);
            assert_eq!(global_id, "{BBBB-2}");
            assert_eq!(*object_id, Some(21));
            assert_eq!(*score, record.compliance_score);
        }
        other => panic!("unexpected events {other:?}"),
    }
}

#[tokio::test]
async fn remote_attachments_are_stored_and_counted() {
    let remote = RecordingService::default();
    remote
        .push_attachments(Ok(vec![AttachmentGroup {
            parent_object_id: 31,
            parent_global_id: Some("{CCCC-3}".into()),
            attachment_infos: vec![
                attachment(1, "front.jpg", "image/jpeg"),
                attachment(2, "inside.jpg", "image/jpeg"),
                attachment(3, "tour.mp4", "video/mp4"),
            ],
        }]))
        .await;
    let publisher = RecordingPublisher::default();
    let ctx = context(&remote, &publisher).await;
    let raw = restaurant_event("{CCCC-3}", 31);

    let outcome = ingest_event(&ctx, &parse(&raw), &raw).await.unwrap();
    assert_eq!(outcome.attachments_stored, 3);

    let record = db::fetch_response(&ctx.pool, &outcome.id)
        .await
        .unwrap()
        .unwrap();
    assert!(!record.missing_fields.iter().any(|f| f.starts_with("_business")));

    let rows = db::list_attachments(&ctx.pool, &outcome.id).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].arcgis_url.as_deref(), Some("31/attachments/1"));
    assert_eq!(rows[2].media_category, MediaCategory::Video);
}

#[tokio::test]
async fn embedded_attachments_are_used_when_remote_lookup_fails() {
    let remote = RecordingService::default();
    remote
        .push_attachments(Err(ArcGisError::Token("expired".into())))
        .await;
    let publisher = RecordingPublisher::default();
    let ctx = context(&remote, &publisher).await;
    let mut raw = restaurant_event("{DDDD-4}", 41);
    raw["feature"]["attachments"] = json!([
        {"id": 7, "name": "front.jpg", "contentType": "image/jpeg", "keywords": "business_exterior"},
        {"name": "no-id.jpg", "contentType": "image/jpeg"}
    ]);

    let outcome = ingest_event(&ctx, &parse(&raw), &raw).await.unwrap();

    let rows = db::list_attachments(&ctx.pool, &outcome.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].arcgis_attachment_id, 7);
    assert_eq!(rows[0].keyword.as_deref(), Some("business_exterior"));
    assert_eq!(rows[0].arcgis_url.as_deref(), Some("41/attachments/7"));
}

#[tokio::test]
async fn sparse_event_is_still_persisted() {
    let remote = RecordingService::default();
    let publisher = RecordingPublisher::default();
    let ctx = context(&remote, &publisher).await;
    let raw = json!({
        "feature": {
            "attributes": {"name_en": "Corner Shop", "Creator": "walker"},
            "geometry": {"x": 46.7, "y": 24.6},
            "attachments": [{"id": 1, "name": "a.png", "contentType": "image/png"}]
        }
    });

    let outcome = ingest_event(&ctx, &parse(&raw), &raw).await.unwrap();

    assert_eq!(outcome.object_id, None);
    assert!(!outcome.global_id.is_empty());
    // No object id means no remote attachment lookup.
    assert!(remote.attachment_calls().await.is_empty());

    let record = db::fetch_response(&ctx.pool, &outcome.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.event_type, "addData");
    assert_eq!(record.surveyor_username.as_deref(), Some("walker"));
    assert_eq!(record.latitude, Some(24.6));
    assert_eq!(record.longitude, Some(46.7));
    assert!(record.survey_id.is_none());
    assert!(!record.missing_fields.iter().any(|f| f == "_coordinates"));

    let rows = db::list_attachments(&ctx.pool, &outcome.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].arcgis_url, None);
}

#[tokio::test]
async fn mistyped_optional_values_do_not_reject_the_event() {
    let remote = RecordingService::default();
    let publisher = RecordingPublisher::default();
    let ctx = context(&remote, &publisher).await;
    let mut raw = restaurant_event("{KKKK-11}", 12);
    raw["serverResponse"]["addResults"][0]["objectId"] = json!("12");
    raw["userInfo"]["username"] = json!(42);
    raw["surveyInfo"] = json!("not an object");

    let outcome = ingest_event(&ctx, &WebhookEvent::from_payload(&raw), &raw)
        .await
        .unwrap();

    assert_eq!(outcome.object_id, Some(12));
    assert_eq!(outcome.global_id, "{KKKK-11}");
    let record = db::fetch_response(&ctx.pool, &outcome.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.surveyor_username.as_deref(), Some("field.agent"));
    assert_eq!(record.surveyor_name.as_deref(), Some("Survey Or"));
    assert!(record.survey_id.is_none());
    assert_eq!(record.fields["name_en"], json!("Al Ward Restaurant"));
}

#[tokio::test]
async fn body_that_is_not_an_event_is_stored_under_a_generated_id() {
    let remote = RecordingService::default();
    let publisher = RecordingPublisher::default();
    let ctx = context(&remote, &publisher).await;
    let raw = json!([1, 2, 3]);

    let outcome = ingest_event(&ctx, &WebhookEvent::from_payload(&raw), &raw)
        .await
        .unwrap();

    assert!(!outcome.duplicate);
    assert_eq!(outcome.object_id, None);
    assert_eq!(response_count(&ctx.pool).await, 1);
}

fn stored_response(schema: &Schema, global_id: &str) -> NewSurveyResponse {
    NewSurveyResponse {
        survey_id: None,
        arcgis_object_id: None,
        arcgis_global_id: global_id.to_string(),
        surveyor_username: None,
        surveyor_name: None,
        surveyor_email: None,
        agent_id: None,
        fields: Map::new(),
        latitude: None,
        longitude: None,
        compliance: evaluate_record(schema, &Map::new(), MediaCounts::default()),
        event_type: "addData".into(),
        submitted_at: None,
        raw_payload: Value::Null,
        attributes: Map::new(),
    }
}

#[tokio::test]
async fn second_insert_of_a_global_id_is_absorbed() {
    let pool = setup_pool().await;
    let schema = Schema::load().unwrap();
    let row = stored_response(&schema, "{LLLL-12}");

    let first = db::insert_response(&pool, &row).await.unwrap();
    let second = db::insert_response(&pool, &row).await.unwrap();

    assert!(first.is_some());
    assert_eq!(second, None);
    assert_eq!(
        db::find_id_by_global_id(&pool, "{LLLL-12}").await.unwrap(),
        first
    );
}

/// Feature service that stores a competing delivery of the same global id
/// while ingestion waits on the attachment lookup.
struct CompetingDelivery {
    pool: db::Pool,
    schema: Arc<Schema>,
    global_id: String,
}

#[async_trait::async_trait]
impl FeatureService for CompetingDelivery {
    async fn query_features(&self, _query: &FeatureQuery) -> Result<FeatureSet, ArcGisError> {
        Ok(FeatureSet::default())
    }

    async fn query_attachments(
        &self,
        _object_ids: &[i64],
    ) -> Result<Vec<AttachmentGroup>, ArcGisError> {
        db::insert_response(&self.pool, &stored_response(&self.schema, &self.global_id))
            .await
            .unwrap();
        Ok(Vec::new())
    }

    async fn apply_edits(&self, _updates: &[Feature]) -> Result<Vec<EditResult>, ArcGisError> {
        Ok(Vec::new())
    }

    async fn query_count(&self, _where_clause: &str) -> Result<u64, ArcGisError> {
        Ok(0)
    }
}

#[tokio::test]
async fn delivery_racing_another_is_reported_as_duplicate() {
    let pool = setup_pool().await;
    let schema = Arc::new(Schema::load().unwrap());
    let publisher = RecordingPublisher::default();
    let ctx = SyncContext::new(
        pool.clone(),
        schema.clone(),
        Arc::new(CompetingDelivery {
            pool,
            schema,
            global_id: "{MMMM-13}".into(),
        }),
        Arc::new(publisher.clone()),
    );
    let raw = restaurant_event("{MMMM-13}", 13);

    let outcome = ingest_event(&ctx, &parse(&raw), &raw).await.unwrap();

    assert!(outcome.duplicate);
    assert_eq!(outcome.score, None);
    assert_eq!(
        db::find_id_by_global_id(&ctx.pool, "{MMMM-13}").await.unwrap(),
        Some(outcome.id.clone())
    );
    assert_eq!(response_count(&ctx.pool).await, 1);
    assert!(publisher.events().is_empty());
}
