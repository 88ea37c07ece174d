mod common;

use common::{
    attachment, context, feature_with_ids, restaurant_event, RecordingPublisher, RecordingService,
};
use poi_sync::arcgis::{AttachmentGroup, FeatureSet};
use poi_sync::db;
use poi_sync::ingest::{ingest_event, WebhookEvent};
use poi_sync::media::{backfill_attachments, BackfillSummary};
use poi_sync::sync::SyncContext;
use serde_json::{json, Value};

async fn ingest(ctx: &SyncContext, raw: Value) -> String {
    let event: WebhookEvent = serde_json::from_value(raw.clone()).unwrap();
    ingest_event(ctx, &event, &raw).await.unwrap().id
}

#[tokio::test]
async fn backfill_resolves_ids_and_fills_missing_attachments() {
    let remote = RecordingService::default();
    let publisher = RecordingPublisher::default();
    let ctx = context(&remote, &publisher).await;

    let unresolved = ingest(
        &ctx,
        json!({"feature": {"attributes": {"globalid": "{M-1}", "name_en": "Bakery"}}}),
    )
    .await;
    let known = ingest(&ctx, restaurant_event("{M-2}", 102)).await;

    remote
        .push_features(Ok(FeatureSet {
            features: vec![feature_with_ids(101, "{M-1}")],
        }))
        .await;
    remote
        .push_attachments(Ok(vec![
            AttachmentGroup {
                parent_object_id: 101,
                parent_global_id: None,
                attachment_infos: vec![
                    attachment(1, "front.jpg", "image/jpeg"),
                    attachment(2, "menu.pdf", "application/pdf"),
                ],
            },
            AttachmentGroup {
                parent_object_id: 102,
                parent_global_id: None,
                attachment_infos: vec![attachment(5, "walkthrough.mp4", "video/mp4")],
            },
        ]))
        .await;

    let summary = backfill_attachments(&ctx).await.unwrap();
    assert_eq!(
        summary,
        BackfillSummary {
            object_ids_resolved: 1,
            records_checked: 2,
            attachments_inserted: 3,
        }
    );

    let record = db::fetch_response(&ctx.pool, &unresolved).await.unwrap().unwrap();
    assert_eq!(record.arcgis_object_id, Some(101));
    let rows = db::list_attachments(&ctx.pool, &unresolved).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].arcgis_url.as_deref(), Some("101/attachments/2"));
    assert_eq!(db::list_attachments(&ctx.pool, &known).await.unwrap().len(), 1);

    let queries = remote.queries().await;
    assert_eq!(queries[0].where_clause, "globalid = '{M-1}'");
    let mut batched = remote.attachment_calls().await.pop().unwrap();
    batched.sort();
    assert_eq!(batched, vec![101, 102]);

    let again = backfill_attachments(&ctx).await.unwrap();
    assert_eq!(again, BackfillSummary::default());
}
