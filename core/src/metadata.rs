use std::collections::BTreeMap;

use room_api::{MemberContent, Membership, PowerLevels, RoomStateSnapshot};

use crate::model::Author;
use crate::render::Renderer;

/// Last known profile of a joined room member.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemberProfile {
    pub displayname: Option<String>,
    pub avatar_url: Option<String>,
}

/// Room level metadata a feed is rendered against.
///
/// Not synchronized on its own; every setter runs under the owning feed's
/// write lock.
#[derive(Debug, Clone, Default)]
pub struct FeedMetadata {
    pub feed_id: String,
    pub title: String,
    pub description: String,
    pub icon: String,
    pub icon_uri: Option<String>,
    pub homepage: Option<String>,
    pub language: Option<String>,
    /// Eligible authors keyed by user id; ordered so rendering is stable.
    pub authors: BTreeMap<String, Author>,
    pub powers: PowerLevels,
    members: BTreeMap<String, MemberProfile>,
}

impl FeedMetadata {
    pub fn new(feed_id: &str, homepage: Option<String>, language: Option<String>) -> Self {
        Self {
            feed_id: feed_id.to_string(),
            homepage,
            language,
            ..Default::default()
        }
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }

    pub fn set_description(&mut self, description: &str) {
        self.description = description.to_string();
    }

    pub fn set_icon(&mut self, icon_uri: Option<&str>, renderer: &Renderer) {
        self.icon_uri = icon_uri.filter(|uri| !uri.is_empty()).map(str::to_string);
        self.icon = self
            .icon_uri
            .as_deref()
            .map(|uri| renderer.download_url(uri))
            .unwrap_or_default();
    }

    /// Replace the permission snapshot. Authors are left untouched; see
    /// [`FeedMetadata::reevaluate_authors`].
    pub fn set_permissions(&mut self, powers: PowerLevels) {
        self.powers = powers;
    }

    pub fn upsert_author(&mut self, user_id: &str, author: Author) {
        self.authors.insert(user_id.to_string(), author);
    }

    pub fn remove_author(&mut self, user_id: &str) -> Option<Author> {
        self.authors.remove(user_id)
    }

    pub fn author(&self, user_id: &str) -> Option<&Author> {
        self.authors.get(user_id)
    }

    pub fn member(&self, user_id: &str) -> Option<&MemberProfile> {
        self.members.get(user_id)
    }

    /// Record a membership change and update the member's author record
    /// against the current permission snapshot. Returns whether the member
    /// is an eligible author afterwards.
    pub fn observe_member(
        &mut self,
        user_id: &str,
        content: &MemberContent,
        renderer: &Renderer,
    ) -> bool {
        if content.membership == Membership::Join {
            self.members.insert(
                user_id.to_string(),
                MemberProfile {
                    displayname: content.displayname.clone(),
                    avatar_url: content.avatar_url.clone(),
                },
            );
        } else {
            self.members.remove(user_id);
        }
        self.evaluate(user_id, renderer)
    }

    /// Re-check every known member against the current permission snapshot.
    pub fn reevaluate_authors(&mut self, renderer: &Renderer) {
        let mut known: Vec<String> = self.members.keys().cloned().collect();
        known.extend(
            self.authors
                .keys()
                .filter(|id| !self.members.contains_key(*id))
                .cloned(),
        );
        for user_id in known {
            self.evaluate(&user_id, renderer);
        }
    }

    fn evaluate(&mut self, user_id: &str, renderer: &Renderer) -> bool {
        let author = self
            .members
            .get(user_id)
            .filter(|_| self.powers.can_post(user_id))
            .map(|profile| renderer.author(user_id, profile));
        match author {
            Some(author) => {
                self.upsert_author(user_id, author);
                true
            }
            None => {
                self.remove_author(user_id);
                false
            }
        }
    }

    /// Replace everything with a freshly fetched room state.
    pub fn load_snapshot(&mut self, state: &RoomStateSnapshot, renderer: &Renderer) {
        self.set_title(state.name.as_deref().unwrap_or_default());
        self.set_description(state.topic.as_deref().unwrap_or_default());
        self.set_icon(state.avatar_url.as_deref(), renderer);
        self.set_permissions(state.power_levels.clone());
        self.members.clear();
        self.authors.clear();
        for (user_id, content) in &state.members {
            self.observe_member(user_id, content, renderer);
        }
    }
}
