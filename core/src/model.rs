use chrono::{DateTime, TimeZone, Utc};
use room_api::MessageContent;
use serde::{Deserialize, Serialize};

/// Public author record attached to feed items.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Author {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub avatar: String,
    #[serde(rename = "_matrix_profile", skip_serializing_if = "Option::is_none")]
    pub profile: Option<MatrixProfile>,
}

/// Chat identity behind an author, with the avatar still as a content URI.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct MatrixProfile {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// File attached to a message. `url` is still a content URI here and is only
/// mapped to a download URL when rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub mime_type: String,
    pub title: Option<String>,
    pub size: Option<u64>,
    pub duration_ms: Option<u64>,
}

/// One buffered feed entry, derived from a message and possibly edited since.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub id: String,
    pub sender: String,
    pub body: String,
    pub html: Option<String>,
    pub attachment: Option<Attachment>,
    pub published: DateTime<Utc>,
    pub edited: Option<DateTime<Utc>>,
    pub last_edit_id: Option<String>,
}

impl FeedEntry {
    pub fn new(id: &str, sender: &str, ts_ms: i64, content: &MessageContent) -> Self {
        Self {
            id: id.to_string(),
            sender: sender.to_string(),
            body: String::new(),
            html: None,
            attachment: None,
            published: timestamp(ts_ms),
            edited: None,
            last_edit_id: None,
        }
        .with_content(content)
    }

    fn with_content(mut self, content: &MessageContent) -> Self {
        self.set_content(content);
        self
    }

    /// Replace body, HTML and attachment with `content`.
    pub fn set_content(&mut self, content: &MessageContent) {
        self.body = content.body.clone();
        self.html = content
            .formatted_body
            .clone()
            .filter(|html| !html.is_empty());
        self.attachment = content
            .url
            .as_ref()
            .filter(|url| !url.is_empty())
            .map(|url| {
                let info = content.info.clone().unwrap_or_default();
                Attachment {
                    url: url.clone(),
                    mime_type: info
                        .mimetype
                        .unwrap_or_else(|| "application/octet-stream".into()),
                    title: content.filename.clone().or_else(|| Some(content.body.clone())),
                    size: info.size,
                    duration_ms: info.duration,
                }
            });
    }

    /// Apply an edit made by event `edit_id` at `ts_ms`.
    pub fn apply_edit(&mut self, edit_id: &str, ts_ms: i64, content: &MessageContent) {
        self.set_content(content);
        self.edited = Some(timestamp(ts_ms));
        self.last_edit_id = Some(edit_id.to_string());
    }
}

/// Convert a millisecond unix timestamp, clamping out of range values to the epoch.
pub fn timestamp(ts_ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts_ms)
        .single()
        .unwrap_or_default()
}
