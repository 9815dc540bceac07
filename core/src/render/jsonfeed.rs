use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FeedView, RenderedItem};
use crate::model::Author;

pub const JSON_FEED_VERSION: &str = "https://jsonfeed.org/version/1.1";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct JsonFeed {
    pub version: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_page_url: Option<String>,
    pub feed_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<Author>,
    pub items: Vec<JsonFeedItem>,
    #[serde(rename = "_matrix_icon", default)]
    pub matrix_icon: MatrixIcon,
}

/// Room avatar as a content URI, next to the HTTP `icon`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct MatrixIcon {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct JsonFeedItem {
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_html: Option<String>,
    pub date_published: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<Author>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<JsonFeedAttachment>,
    #[serde(rename = "_matrix")]
    pub matrix: MatrixExtension,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct JsonFeedAttachment {
    pub url: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_in_seconds: Option<u64>,
}

/// Room specific data carried next to each item.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MatrixExtension {
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_edit_id: Option<String>,
}

impl From<&RenderedItem<'_>> for JsonFeedItem {
    fn from(item: &RenderedItem<'_>) -> Self {
        let entry = item.entry;
        Self {
            id: entry.id.clone(),
            url: item.url.clone(),
            content_text: entry.body.clone(),
            content_html: entry.html.clone(),
            date_published: entry.published,
            date_modified: entry.edited,
            authors: item.author.cloned().into_iter().collect(),
            attachments: item
                .attachment
                .iter()
                .map(|att| JsonFeedAttachment {
                    url: att.url.clone(),
                    mime_type: att.mime_type.clone(),
                    title: att.title.clone(),
                    size_in_bytes: att.size,
                    duration_in_seconds: att.duration_secs,
                })
                .collect(),
            matrix: MatrixExtension {
                sender: entry.sender.clone(),
                last_edit_id: entry.last_edit_id.clone(),
            },
        }
    }
}

pub(super) fn write(view: &FeedView<'_>) -> Result<Vec<u8>, serde_json::Error> {
    let meta = view.metadata;
    let feed = JsonFeed {
        version: JSON_FEED_VERSION.into(),
        title: meta.title.clone(),
        description: meta.description.clone(),
        icon: meta.icon.clone(),
        home_page_url: Some(view.homepage().to_string()),
        feed_url: view.feed_url.clone(),
        language: meta.language.clone(),
        authors: meta.authors.values().cloned().collect(),
        items: view.items.iter().map(JsonFeedItem::from).collect(),
        matrix_icon: MatrixIcon {
            uri: meta.icon_uri.clone(),
        },
    };
    serde_json::to_vec(&feed)
}
