//! Publish sink for downstream viewers. The core only pushes; fan-out to
//! clients happens elsewhere.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum RealtimeEvent {
    /// A response was ingested; summary metrics may have moved.
    #[serde(rename = "kpi:updated")]
    KpiUpdated {
        id: String,
        #[serde(rename = "globalId")]
        global_id: String,
        #[serde(rename = "objectId")]
        object_id: Option<i64>,
        score: f64,
    },
    /// A response was edited locally.
    #[serde(rename = "survey:updated")]
    SurveyUpdated { id: String, score: f64 },
}

impl RealtimeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RealtimeEvent::KpiUpdated { .. } => "kpi:updated",
            RealtimeEvent::SurveyUpdated { .. } => "survey:updated",
        }
    }
}

pub trait Publisher: Send + Sync {
    fn publish(&self, event: RealtimeEvent);
}

/// In-process broadcast; events are dropped when nobody is subscribed.
#[derive(Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<RealtimeEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.tx.subscribe()
    }
}

impl Publisher for BroadcastPublisher {
    fn publish(&self, event: RealtimeEvent) {
        let name = event.name();
        match self.tx.send(event) {
            Ok(receivers) => debug!(event = name, receivers, "published"),
            Err(_) => debug!(event = name, "no subscribers"),
        }
    }
}
