//! Serialization of a feed snapshot into JSON Feed, RSS and Atom.
//!
//! Every format is rendered from the same [`FeedView`] so the three outputs
//! always describe one consistent snapshot. Rendering never consults the
//! wall clock, so identical snapshots produce identical bytes and validators.

mod atom;
mod jsonfeed;
mod rss;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::metadata::{FeedMetadata, MemberProfile};
use crate::model::{Author, FeedEntry, MatrixProfile};

pub use jsonfeed::{JsonFeed, JsonFeedItem, JSON_FEED_VERSION};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to encode JSON feed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to encode RSS feed: {0}")]
    Rss(#[from] ::rss::Error),
    #[error("failed to encode Atom feed: {0}")]
    Atom(#[from] ::atom_syndication::Error),
}

/// Output formats served for every feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Json,
    Rss,
    Atom,
}

impl Format {
    pub const ALL: [Format; 3] = [Format::Json, Format::Rss, Format::Atom];

    pub fn mime(self) -> &'static str {
        match self {
            Format::Json => "application/feed+json",
            Format::Rss => "application/rss+xml",
            Format::Atom => "application/atom+xml",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Format::Json => ".json",
            Format::Rss => ".rss",
            Format::Atom => ".atom",
        }
    }

    /// Map a request path extension (including the dot) to a format. An
    /// empty extension selects JSON Feed.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "" | ".json" => Some(Format::Json),
            ".rss" => Some(Format::Rss),
            ".atom" => Some(Format::Atom),
            _ => None,
        }
    }
}

/// Serialized bytes of one format plus their cache validator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload {
    pub bytes: Bytes,
    pub etag: String,
}

impl Payload {
    pub fn new(bytes: Vec<u8>) -> Self {
        let etag = validator(&bytes);
        Self {
            bytes: Bytes::from(bytes),
            etag,
        }
    }
}

/// Quoted hex SHA-256 of `bytes`, usable verbatim as an `ETag`.
pub fn validator(bytes: &[u8]) -> String {
    format!("\"{:x}\"", Sha256::digest(bytes))
}

/// Result of one regeneration. JSON is mandatory; RSS and Atom may fail
/// independently.
#[derive(Debug)]
pub struct Rendered {
    pub json: Payload,
    pub rss: Result<Payload, RenderError>,
    pub atom: Result<Payload, RenderError>,
}

/// Everything about the deployment that rendering needs besides the feed
/// itself.
#[derive(Debug, Clone)]
pub struct Renderer {
    public_url: String,
    media_url: String,
    homeserver_domain: String,
}

impl Renderer {
    pub fn new(public_url: &str, media_url: &str, homeserver_domain: &str) -> Self {
        Self {
            public_url: public_url.trim_end_matches('/').to_string(),
            media_url: media_url.trim_end_matches('/').to_string(),
            homeserver_domain: homeserver_domain.to_string(),
        }
    }

    /// Public URL of a feed, optionally in a specific format.
    pub fn feed_url(&self, feed_id: &str, format: Option<Format>) -> String {
        let ext = format.map(Format::extension).unwrap_or_default();
        format!("{}/{}{}", self.public_url, feed_id, ext)
    }

    /// Map a content URI (`mxc://server/media`) to a public download URL.
    /// Plain http(s) URLs pass through; anything else maps to an empty string.
    pub fn download_url(&self, uri: &str) -> String {
        if let Some(rest) = uri.strip_prefix("mxc://") {
            match rest.split_once('/') {
                Some((server, media)) if !server.is_empty() && !media.is_empty() => format!(
                    "{}/_matrix/media/v3/download/{}/{}",
                    self.media_url, server, media
                ),
                _ => String::new(),
            }
        } else if uri.starts_with("https://") || uri.starts_with("http://") {
            uri.to_string()
        } else {
            String::new()
        }
    }

    pub fn user_url(&self, user_id: &str) -> String {
        format!("https://matrix.to/#/{}", user_id)
    }

    pub fn event_url(&self, room_id: &str, event_id: &str) -> String {
        format!(
            "https://matrix.to/#/{}/{}?via={}",
            room_id, event_id, self.homeserver_domain
        )
    }

    pub fn author(&self, user_id: &str, profile: &MemberProfile) -> Author {
        Author {
            name: profile.displayname.clone().unwrap_or_default(),
            url: self.user_url(user_id),
            avatar: profile
                .avatar_url
                .as_deref()
                .map(|uri| self.download_url(uri))
                .unwrap_or_default(),
            profile: Some(MatrixProfile {
                user_id: user_id.to_string(),
                avatar_url: profile.avatar_url.clone().filter(|uri| !uri.is_empty()),
            }),
        }
    }

    /// Resolve authors, permalinks and attachments for a snapshot.
    pub fn view<'a, I>(&self, room_id: &str, metadata: &'a FeedMetadata, entries: I) -> FeedView<'a>
    where
        I: IntoIterator<Item = &'a FeedEntry>,
    {
        let items = entries
            .into_iter()
            .map(|entry| RenderedItem {
                entry,
                url: self.event_url(room_id, &entry.id),
                author: metadata.author(&entry.sender),
                attachment: entry.attachment.as_ref().map(|att| RenderedAttachment {
                    url: self.download_url(&att.url),
                    mime_type: att.mime_type.clone(),
                    title: att.title.clone(),
                    size: att.size,
                    duration_secs: att.duration_ms.map(|ms| ms / 1000),
                }),
            })
            .collect();
        FeedView {
            metadata,
            feed_url: self.feed_url(&metadata.feed_id, Some(Format::Json)),
            base_url: self.feed_url(&metadata.feed_id, None),
            atom_url: self.feed_url(&metadata.feed_id, Some(Format::Atom)),
            items,
        }
    }

    /// Serialize a snapshot into all three formats. A JSON failure aborts
    /// the whole regeneration.
    pub fn render(&self, view: &FeedView<'_>) -> Result<Rendered, RenderError> {
        let json = Payload::new(jsonfeed::write(view)?);
        let rss = rss::write(view).map(Payload::new);
        let atom = atom::write(view).map(Payload::new);
        Ok(Rendered { json, rss, atom })
    }
}

/// A feed snapshot with per-entry data resolved.
#[derive(Debug)]
pub struct FeedView<'a> {
    pub metadata: &'a FeedMetadata,
    pub feed_url: String,
    pub base_url: String,
    pub atom_url: String,
    pub items: Vec<RenderedItem<'a>>,
}

impl FeedView<'_> {
    /// Newest publish or edit time among the items.
    pub fn updated(&self) -> Option<DateTime<Utc>> {
        self.items
            .iter()
            .map(|item| item.entry.edited.unwrap_or(item.entry.published))
            .max()
    }

    pub fn homepage(&self) -> &str {
        self.metadata
            .homepage
            .as_deref()
            .filter(|home| !home.is_empty())
            .unwrap_or(&self.base_url)
    }
}

#[derive(Debug)]
pub struct RenderedItem<'a> {
    pub entry: &'a FeedEntry,
    pub url: String,
    pub author: Option<&'a Author>,
    pub attachment: Option<RenderedAttachment>,
}

impl RenderedItem<'_> {
    /// HTML body, falling back to the escaped plain body.
    pub fn html(&self) -> String {
        match &self.entry.html {
            Some(html) => html.clone(),
            None => escape_html(&self.entry.body),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderedAttachment {
    pub url: String,
    pub mime_type: String,
    pub title: Option<String>,
    pub size: Option<u64>,
    pub duration_secs: Option<u64>,
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
