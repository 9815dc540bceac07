use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::feed::Feed;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("feed {0} is configured twice")]
    DuplicateFeed(String),
    #[error("room {room_id} is already mirrored by feed {feed_id}")]
    DuplicateRoom { room_id: String, feed_id: String },
}

/// Immutable routing table from feed ids and room ids to feeds.
///
/// Built once at startup, before any concurrent work, then shared read-only.
#[derive(Debug, Default)]
pub struct FeedStore {
    by_id: HashMap<String, Arc<Feed>>,
    by_room: HashMap<String, Arc<Feed>>,
}

impl FeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, feed: Feed) -> Result<Arc<Feed>, StoreError> {
        let key = feed.id().to_lowercase();
        if self.by_id.contains_key(&key) {
            return Err(StoreError::DuplicateFeed(feed.id().to_string()));
        }
        if let Some(existing) = self.by_room.get(feed.room_id()) {
            return Err(StoreError::DuplicateRoom {
                room_id: feed.room_id().to_string(),
                feed_id: existing.id().to_string(),
            });
        }
        let feed = Arc::new(feed);
        self.by_id.insert(key, feed.clone());
        self.by_room.insert(feed.room_id().to_string(), feed.clone());
        Ok(feed)
    }

    /// Case-insensitive lookup by feed id.
    pub fn by_id(&self, feed_id: &str) -> Option<Arc<Feed>> {
        self.by_id.get(&feed_id.to_lowercase()).cloned()
    }

    pub fn by_room(&self, room_id: &str) -> Option<Arc<Feed>> {
        self.by_room.get(room_id).cloned()
    }

    pub fn feeds(&self) -> impl Iterator<Item = &Arc<Feed>> {
        self.by_id.values()
    }

    pub fn room_ids(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.by_room.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(id: &str, room: &str) -> Feed {
        Feed::new(id, room, 10, None, None)
    }

    #[test]
    fn lookups() {
        let mut store = FeedStore::new();
        store.insert(feed("News", "!a:x")).unwrap();
        store.insert(feed("blog", "!b:x")).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.by_id("news").unwrap().room_id(), "!a:x");
        assert_eq!(store.by_room("!b:x").unwrap().id(), "blog");
        assert!(store.by_id("missing").is_none());
        assert_eq!(store.room_ids(), vec!["!a:x", "!b:x"]);
    }

    #[test]
    fn rejects_duplicates() {
        let mut store = FeedStore::new();
        store.insert(feed("news", "!a:x")).unwrap();
        assert_eq!(
            store.insert(feed("NEWS", "!c:x")).unwrap_err(),
            StoreError::DuplicateFeed("NEWS".into())
        );
        assert_eq!(
            store.insert(feed("other", "!a:x")).unwrap_err(),
            StoreError::DuplicateRoom {
                room_id: "!a:x".into(),
                feed_id: "news".into()
            }
        );
    }
}
