use std::sync::Arc;

use anyhow::{Context, Result};
use room_api::{EventContent, Membership, RoomEvent};
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::feed::{Feed, Outcome};
use crate::purge::CachePurger;
use crate::render::Renderer;
use crate::source::RoomSource;
use crate::store::FeedStore;

/// Routes room events to their feeds.
#[derive(Clone)]
pub struct Handler {
    store: Arc<FeedStore>,
    renderer: Arc<Renderer>,
    source: Arc<dyn RoomSource>,
    purger: Option<CachePurger>,
    user_id: String,
}

impl Handler {
    pub fn new(
        store: Arc<FeedStore>,
        renderer: Arc<Renderer>,
        source: Arc<dyn RoomSource>,
        purger: Option<CachePurger>,
        user_id: &str,
    ) -> Self {
        Self {
            store,
            renderer,
            source,
            purger,
            user_id: user_id.to_string(),
        }
    }

    pub fn store(&self) -> &Arc<FeedStore> {
        &self.store
    }

    /// Seed every feed from its room and put it live. Feeds sync
    /// concurrently; the first failure aborts the rest.
    pub async fn initial_sync(&self) -> Result<()> {
        let mut tasks = JoinSet::new();
        for feed in self.store.feeds() {
            let feed = feed.clone();
            let source = self.source.clone();
            let renderer = self.renderer.clone();
            tasks.spawn(async move { sync_feed(&feed, source.as_ref(), &renderer).await });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.context("feed sync task failed")??;
        }
        Ok(())
    }

    /// Consume live events until the stream ends or `cancel` fires.
    pub async fn run_events(&self, mut events: mpsc::Receiver<RoomEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("event loop cancelled");
                    break;
                }
                next = events.recv() => match next {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("room event stream ended");
                        break;
                    }
                },
            }
        }
    }

    pub async fn handle_event(&self, event: RoomEvent) {
        let feed = self.store.by_room(&event.room_id);
        if self.is_own_invite(&event) {
            self.answer_invite(&event, feed.is_some()).await;
            return;
        }
        let Some(feed) = feed else {
            debug!(room_id = %event.room_id, event_id = %event.event_id, "event for unmirrored room");
            return;
        };
        let action = action(&event.content);
        match feed.apply(&event, &self.renderer) {
            Outcome::Published => {
                info!(
                    feed_id = feed.id(),
                    event_id = %event.event_id,
                    sender = %event.sender,
                    action,
                    "feed republished"
                );
                self.spawn_purge(&feed);
            }
            Outcome::Deferred => debug!(feed_id = feed.id(), event_id = %event.event_id, action, "buffered before going live"),
            Outcome::Stale => warn!(
                feed_id = feed.id(),
                event_id = %event.event_id,
                action,
                "feed mutated but still serving previous output"
            ),
            Outcome::Ignored(reason) => info!(
                feed_id = feed.id(),
                event_id = %event.event_id,
                sender = %event.sender,
                action,
                ?reason,
                "event ignored"
            ),
        }
    }

    fn is_own_invite(&self, event: &RoomEvent) -> bool {
        matches!(
            &event.content,
            EventContent::Member(member) if member.membership == Membership::Invite
        ) && event.state_key.as_deref() == Some(self.user_id.as_str())
    }

    async fn answer_invite(&self, event: &RoomEvent, mirrored: bool) {
        let room_id = &event.room_id;
        let result = if mirrored {
            info!(room_id = %room_id, sender = %event.sender, "accepting invite");
            self.source.join_room(room_id).await
        } else {
            info!(room_id = %room_id, sender = %event.sender, "rejecting invite for unconfigured room");
            self.source.leave_room(room_id).await
        };
        if let Err(err) = result {
            error!(room_id = %room_id, error = %err, "failed to answer invite");
        }
    }

    fn spawn_purge(&self, feed: &Feed) {
        let Some(purger) = self.purger.clone() else {
            return;
        };
        let feed_id = feed.id().to_string();
        let urls = feed.purge_urls(&self.renderer);
        tokio::spawn(async move { purger.purge_logged(&feed_id, urls).await });
    }
}

async fn sync_feed(feed: &Feed, source: &dyn RoomSource, renderer: &Renderer) -> Result<()> {
    let room_id = feed.room_id();
    let state = source
        .room_state(room_id)
        .await
        .with_context(|| format!("fetching state of {room_id} for feed {}", feed.id()))?;
    let history = source
        .recent_messages(room_id, feed.capacity())
        .await
        .with_context(|| format!("fetching history of {room_id} for feed {}", feed.id()))?;
    feed.seed(&state, &history, renderer);
    let outcome = feed.go_live(renderer);
    info!(
        feed_id = feed.id(),
        room_id,
        entries = feed.entry_ids().len(),
        ?outcome,
        "feed is live"
    );
    Ok(())
}

fn action(content: &EventContent) -> &'static str {
    match content {
        EventContent::Message(_) => "message",
        EventContent::Edit { .. } => "edit",
        EventContent::Name { .. } => "name",
        EventContent::Topic { .. } => "topic",
        EventContent::Avatar { .. } => "avatar",
        EventContent::PowerLevels(_) => "power_levels",
        EventContent::Member(_) => "member",
    }
}
