use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use room_api::{EventContent, RoomEvent, RoomStateSnapshot};
use tracing::{debug, error, info, warn};

use crate::buffer::EventBuffer;
use crate::metadata::FeedMetadata;
use crate::model::FeedEntry;
use crate::render::{Format, Payload, Renderer};

/// Lifecycle of a feed. `Initializing -> Live` happens exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    Live,
}

/// Why an event left the feed untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ignored {
    /// The edited event was never seen or has been evicted.
    MissingEditTarget(String),
    /// The edit was sent by someone other than the original author.
    ForeignEditor { original_sender: String },
    /// A state event whose state key does not apply to this feed.
    UnrelatedState,
}

/// What applying one room event did to the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Mutated and republished.
    Published,
    /// Mutated while initializing; published once the feed goes live.
    Deferred,
    /// Mutated, but the JSON feed failed to encode so the previous output
    /// is still being served.
    Stale,
    Ignored(Ignored),
}

/// Cached representation of one format as handed to the HTTP layer.
#[derive(Debug, Clone)]
pub struct Served {
    pub format: Format,
    pub bytes: Bytes,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct CachedOutput {
    json: Option<Payload>,
    rss: Option<Payload>,
    atom: Option<Payload>,
    last_modified: Option<DateTime<Utc>>,
}

impl CachedOutput {
    fn get(&self, format: Format) -> Option<&Payload> {
        match format {
            Format::Json => self.json.as_ref(),
            Format::Rss => self.rss.as_ref(),
            Format::Atom => self.atom.as_ref(),
        }
    }
}

#[derive(Debug)]
struct FeedState {
    phase: Phase,
    metadata: FeedMetadata,
    entries: EventBuffer<FeedEntry>,
    output: CachedOutput,
}

/// One room mirrored as a feed.
///
/// Metadata, buffered entries and cached output form a single consistency
/// unit behind one lock: writers mutate and regenerate inside the same
/// critical section, readers only copy cached output out.
#[derive(Debug)]
pub struct Feed {
    id: String,
    room_id: String,
    state: RwLock<FeedState>,
}

impl Feed {
    pub fn new(
        id: &str,
        room_id: &str,
        max_entries: usize,
        homepage: Option<String>,
        language: Option<String>,
    ) -> Self {
        Self {
            id: id.to_string(),
            room_id: room_id.to_string(),
            state: RwLock::new(FeedState {
                phase: Phase::Initializing,
                metadata: FeedMetadata::new(id, homepage, language),
                entries: EventBuffer::new(max_entries),
                output: CachedOutput::default(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn capacity(&self) -> usize {
        self.state.read().entries.capacity()
    }

    /// Buffered entry ids, oldest first.
    pub fn entry_ids(&self) -> Vec<String> {
        self.state
            .read()
            .entries
            .iter()
            .map(|(id, _)| id.to_string())
            .collect()
    }

    /// Load the initial room state and backfilled history, oldest first.
    /// Nothing is rendered until [`Feed::go_live`].
    pub fn seed(&self, snapshot: &RoomStateSnapshot, history: &[RoomEvent], renderer: &Renderer) {
        let mut state = self.state.write();
        state.metadata.load_snapshot(snapshot, renderer);
        for event in history {
            if let Err(reason) = state.mutate(event, renderer) {
                debug!(
                    feed_id = %self.id,
                    event_id = %event.event_id,
                    ?reason,
                    "skipped history event"
                );
            }
        }
    }

    /// Run the first regeneration and start serving.
    pub fn go_live(&self, renderer: &Renderer) -> Outcome {
        let mut state = self.state.write();
        state.phase = Phase::Live;
        if state.regenerate(&self.id, &self.room_id, renderer) {
            Outcome::Published
        } else {
            Outcome::Stale
        }
    }

    /// Apply one room event and, when live, republish in the same critical
    /// section.
    pub fn apply(&self, event: &RoomEvent, renderer: &Renderer) -> Outcome {
        let mut state = self.state.write();
        if let Err(reason) = state.mutate(event, renderer) {
            return Outcome::Ignored(reason);
        }
        if state.phase == Phase::Initializing {
            Outcome::Deferred
        } else if state.regenerate(&self.id, &self.room_id, renderer) {
            Outcome::Published
        } else {
            Outcome::Stale
        }
    }

    /// Copy out the cached output of one format. `None` until the feed has
    /// been rendered at least once.
    pub fn cached(&self, format: Format) -> Option<Served> {
        let state = self.state.read();
        if state.phase != Phase::Live {
            return None;
        }
        let payload = state.output.get(format)?;
        Some(Served {
            format,
            bytes: payload.bytes.clone(),
            etag: payload.etag.clone(),
            last_modified: state.output.last_modified?,
        })
    }

    /// Canonical public URLs of this feed, for cache invalidation.
    pub fn purge_urls(&self, renderer: &Renderer) -> Vec<String> {
        std::iter::once(None)
            .chain(Format::ALL.into_iter().map(Some))
            .map(|format| renderer.feed_url(&self.id, format))
            .collect()
    }
}

impl FeedState {
    fn mutate(&mut self, event: &RoomEvent, renderer: &Renderer) -> Result<(), Ignored> {
        match &event.content {
            EventContent::Message(content) => {
                // A redelivered original must not undo an accepted edit.
                if matches!(self.entries.get(&event.event_id), Some(entry) if entry.last_edit_id.is_some()) {
                    return Ok(());
                }
                let entry = FeedEntry::new(
                    &event.event_id,
                    &event.sender,
                    event.origin_server_ts,
                    content,
                );
                self.entries.push(event.event_id.clone(), entry);
            }
            EventContent::Edit {
                relates_to,
                new_content,
            } => {
                let original_sender = match self.entries.get(relates_to) {
                    Some(original) => original.sender.clone(),
                    None => return Err(Ignored::MissingEditTarget(relates_to.clone())),
                };
                if original_sender != event.sender {
                    return Err(Ignored::ForeignEditor { original_sender });
                }
                self.entries.replace(relates_to, |entry| {
                    entry.apply_edit(&event.event_id, event.origin_server_ts, new_content)
                });
            }
            EventContent::Name { name } => {
                room_state_key(event)?;
                self.metadata.set_title(name);
            }
            EventContent::Topic { topic } => {
                room_state_key(event)?;
                self.metadata.set_description(topic);
            }
            EventContent::Avatar { url } => {
                room_state_key(event)?;
                self.metadata.set_icon(url.as_deref(), renderer);
            }
            EventContent::PowerLevels(powers) => {
                room_state_key(event)?;
                self.metadata.set_permissions(powers.clone());
                self.metadata.reevaluate_authors(renderer);
            }
            EventContent::Member(content) => {
                let user_id = match event.state_key.as_deref() {
                    Some(key) if !key.is_empty() => key,
                    _ => return Err(Ignored::UnrelatedState),
                };
                self.metadata.observe_member(user_id, content, renderer);
            }
        }
        Ok(())
    }

    /// Re-serialize all formats. Returns false when the JSON feed failed, in
    /// which case nothing was replaced.
    fn regenerate(&mut self, feed_id: &str, room_id: &str, renderer: &Renderer) -> bool {
        debug!(feed_id, "regenerating feed");
        let start = Instant::now();
        let view = renderer.view(room_id, &self.metadata, self.entries.values());
        let rendered = match renderer.render(&view) {
            Ok(rendered) => rendered,
            Err(err) => {
                error!(feed_id, error = %err, "failed to generate JSON feed");
                return false;
            }
        };
        let old_json_hash = self
            .output
            .json
            .as_ref()
            .map(|payload| payload.etag.clone())
            .unwrap_or_default();
        let new_json_hash = rendered.json.etag.clone();
        self.output.json = Some(rendered.json);
        match rendered.rss {
            Ok(payload) => self.output.rss = Some(payload),
            Err(err) => warn!(feed_id, error = %err, "failed to generate RSS feed"),
        }
        match rendered.atom {
            Ok(payload) => self.output.atom = Some(payload),
            Err(err) => warn!(feed_id, error = %err, "failed to generate Atom feed"),
        }
        self.output.last_modified = Some(Utc::now());
        info!(
            feed_id,
            old_json_hash = %old_json_hash,
            new_json_hash = %new_json_hash,
            item_count = self.entries.len(),
            duration = ?start.elapsed(),
            "feed updated"
        );
        true
    }
}

fn room_state_key(event: &RoomEvent) -> Result<(), Ignored> {
    match event.state_key.as_deref() {
        Some("") => Ok(()),
        _ => Err(Ignored::UnrelatedState),
    }
}
