//! Wire types of the feature service REST API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const WGS84_WKID: u32 = 4326;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
}

impl Feature {
    /// Attribute lookup that tolerates the service's upper-case system fields.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name).or_else(|| {
            self.attributes
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
    }

    pub fn object_id(&self) -> Option<i64> {
        self.attribute("objectid").and_then(Value::as_i64)
    }

    pub fn global_id(&self) -> Option<&str> {
        self.attribute("globalid").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(
        rename = "spatialReference",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub spatial_reference: Option<SpatialReference>,
}

impl Geometry {
    pub fn wgs84(longitude: f64, latitude: f64) -> Self {
        Self {
            x: Some(longitude),
            y: Some(latitude),
            spatial_reference: Some(SpatialReference { wkid: WGS84_WKID }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialReference {
    pub wkid: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeatureSet {
    #[serde(default)]
    pub features: Vec<Feature>,
}

/// Parameters of a `query` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureQuery {
    pub where_clause: String,
    pub out_fields: String,
    pub return_geometry: bool,
    pub result_record_count: Option<u32>,
}

impl FeatureQuery {
    pub fn new(where_clause: impl Into<String>) -> Self {
        Self {
            where_clause: where_clause.into(),
            out_fields: "*".into(),
            return_geometry: true,
            result_record_count: None,
        }
    }

    pub fn out_fields(mut self, fields: &str) -> Self {
        self.out_fields = fields.to_string();
        self
    }

    pub fn without_geometry(mut self) -> Self {
        self.return_geometry = false;
        self
    }

    pub fn limit(mut self, count: u32) -> Self {
        self.result_record_count = Some(count);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachmentInfo {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(rename = "globalId", default)]
    pub global_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "contentType", default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub keywords: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AttachmentGroup {
    #[serde(rename = "parentObjectId")]
    pub parent_object_id: i64,
    #[serde(rename = "parentGlobalId", default)]
    pub parent_global_id: Option<String>,
    #[serde(rename = "attachmentInfos", default)]
    pub attachment_infos: Vec<AttachmentInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct AttachmentsResponse {
    #[serde(rename = "attachmentGroups", default)]
    pub attachment_groups: Vec<AttachmentGroup>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EditResult {
    #[serde(rename = "objectId", default)]
    pub object_id: Option<i64>,
    #[serde(rename = "globalId", default)]
    pub global_id: Option<String>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ApplyEditsResponse {
    #[serde(rename = "updateResults", default)]
    pub update_results: Vec<EditResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CountResponse {
    pub count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    pub token: String,
    /// Epoch milliseconds.
    pub expires: i64,
}

/// `{"error": {"code": .., "message": ..}}` envelope returned with HTTP 200.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RemoteErrorBody {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Vec<Value>,
}
