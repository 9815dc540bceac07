pub mod api;
pub mod bridge;
pub mod buffer;
pub mod cli;
pub mod config;
pub mod feed;
pub mod handler;
pub mod ipc;
pub mod metadata;
pub mod model;
pub mod purge;
pub mod render;
pub mod source;
pub mod store;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub use bridge::BridgeSource;
pub use config::Config;
pub use feed::Feed;
pub use handler::Handler;
pub use render::{Format, Renderer};
pub use source::RoomSource;
pub use store::FeedStore;

use config::RoomRef;
use purge::CachePurger;

/// Resolve every configured room and assemble the feed store and handler.
pub async fn build_handler(cfg: &Config, source: Arc<dyn RoomSource>) -> Result<Handler> {
    let renderer = Arc::new(Renderer::new(
        &cfg.public_url,
        &cfg.media_url,
        cfg.homeserver_domain(),
    ));
    let mut store = FeedStore::new();
    for feed in &cfg.feeds {
        let room_id = match &feed.room {
            RoomRef::Id(room_id) => room_id.clone(),
            RoomRef::Alias(alias) => source
                .resolve_alias(alias)
                .await
                .with_context(|| format!("resolving {alias} for feed {}", feed.id))?,
        };
        info!(feed_id = %feed.id, room_id = %room_id, max_entries = feed.max_entries, "configured feed");
        store.insert(Feed::new(
            &feed.id,
            &room_id,
            feed.max_entries,
            feed.homepage.clone(),
            feed.language.clone(),
        ))?;
    }
    let purger = cfg.cloudflare.as_ref().map(CachePurger::new).transpose()?;
    if purger.is_none() {
        info!("cache purging disabled");
    }
    Ok(Handler::new(
        Arc::new(store),
        renderer,
        source,
        purger,
        &cfg.user_id,
    ))
}

/// Sync all feeds, then process live events and serve HTTP until `cancel`
/// fires or either side stops.
pub async fn run(cfg: Config, source: Arc<dyn RoomSource>, cancel: CancellationToken) -> Result<()> {
    let handler = build_handler(&cfg, source.clone()).await?;
    let store = handler.store().clone();
    // Subscribe first so nothing sent during the initial sync is lost.
    let events = source
        .subscribe(&store.room_ids())
        .await
        .context("subscribing to room events")?;
    handler.initial_sync().await?;
    info!(feeds = store.len(), "all feeds live");

    let events_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            handler.run_events(events, cancel.clone()).await;
            cancel.cancel();
        })
    };
    let served = api::serve(&cfg.listen_address, store, cancel.clone()).await;
    cancel.cancel();
    if let Err(err) = events_task.await {
        error!(error = %err, "event loop task failed");
    }
    served
}
