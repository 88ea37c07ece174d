use serde::{Deserialize, Serialize};

/// Outcome recorded for one outbound sync attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Failed,
    RetrySuccess,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
            SyncStatus::RetrySuccess => "retry_success",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "success" => Some(SyncStatus::Success),
            "failed" => Some(SyncStatus::Failed),
            "retry_success" => Some(SyncStatus::RetrySuccess),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    Outgoing,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Outgoing => "outgoing",
        }
    }
}

/// Attachment category derived from the content-type prefix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaCategory {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaCategory {
    pub fn from_content_type(content_type: &str) -> Self {
        let ct = content_type.trim().to_ascii_lowercase();
        if ct.starts_with("image/") {
            MediaCategory::Image
        } else if ct.starts_with("video/") {
            MediaCategory::Video
        } else if ct.starts_with("audio/") {
            MediaCategory::Audio
        } else {
            MediaCategory::Document
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaCategory::Image => "image",
            MediaCategory::Video => "video",
            MediaCategory::Audio => "audio",
            MediaCategory::Document => "document",
        }
    }

    pub fn parse_category(s: &str) -> Option<Self> {
        match s {
            "image" => Some(MediaCategory::Image),
            "video" => Some(MediaCategory::Video),
            "audio" => Some(MediaCategory::Audio),
            "document" => Some(MediaCategory::Document),
            _ => None,
        }
    }
}
