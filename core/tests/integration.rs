use std::{
    collections::HashMap,
    net::TcpListener,
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use feedserv::{
    api::{build_router, AppState},
    build_handler,
    config::{BridgeConfig, FeedConfig, RoomRef},
    Config, FeedStore, Format, RoomSource,
};
use parking_lot::Mutex;
use reqwest::{header, StatusCode};
use room_api::{
    EventContent, MemberContent, Membership, MessageContent, RoomEvent, RoomStateSnapshot,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const ROOM: &str = "!news:example.com";

#[derive(Default)]
struct MemorySource {
    aliases: HashMap<String, String>,
    states: HashMap<String, RoomStateSnapshot>,
    history: HashMap<String, Vec<RoomEvent>>,
    joined: Mutex<Vec<String>>,
    left: Mutex<Vec<String>>,
    events: Mutex<Option<mpsc::Receiver<RoomEvent>>>,
}

#[async_trait]
impl RoomSource for MemorySource {
    async fn resolve_alias(&self, alias: &str) -> Result<String> {
        self.aliases
            .get(alias)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown alias {alias}"))
    }

    async fn room_state(&self, room_id: &str) -> Result<RoomStateSnapshot> {
        self.states
            .get(room_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("not in room {room_id}"))
    }

    async fn recent_messages(&self, room_id: &str, limit: usize) -> Result<Vec<RoomEvent>> {
        let history = self.history.get(room_id).cloned().unwrap_or_default();
        let skip = history.len().saturating_sub(limit);
        Ok(history.into_iter().skip(skip).collect())
    }

    async fn join_room(&self, room_id: &str) -> Result<()> {
        self.joined.lock().push(room_id.to_string());
        Ok(())
    }

    async fn leave_room(&self, room_id: &str) -> Result<()> {
        self.left.lock().push(room_id.to_string());
        Ok(())
    }

    async fn subscribe(&self, _rooms: &[String]) -> Result<mpsc::Receiver<RoomEvent>> {
        self.events
            .lock()
            .take()
            .ok_or_else(|| anyhow::anyhow!("already subscribed"))
    }
}

fn config(max_entries: usize) -> Config {
    Config {
        listen_address: "127.0.0.1:0".into(),
        public_url: "https://feeds.example.com".into(),
        media_url: "https://matrix.example.com".into(),
        homeserver_url: "https://matrix.example.com".into(),
        user_id: "@feeds:example.com".into(),
        bridge: BridgeConfig::default(),
        cloudflare: None,
        logging_enabled: false,
        feeds: vec![FeedConfig {
            id: "news".into(),
            room: RoomRef::Alias("#news:example.com".into()),
            max_entries,
            homepage: None,
            language: Some("en".into()),
        }],
    }
}

fn message(id: &str, sender: &str, ts: i64, body: &str) -> RoomEvent {
    RoomEvent {
        event_id: id.into(),
        room_id: ROOM.into(),
        sender: sender.into(),
        origin_server_ts: ts,
        state_key: None,
        content: EventContent::Message(MessageContent {
            body: body.into(),
            ..Default::default()
        }),
    }
}

fn edit(id: &str, target: &str, sender: &str, ts: i64, body: &str) -> RoomEvent {
    RoomEvent {
        content: EventContent::Edit {
            relates_to: target.into(),
            new_content: MessageContent {
                body: body.into(),
                ..Default::default()
            },
        },
        ..message(id, sender, ts, "")
    }
}

fn invite(room_id: &str, user_id: &str) -> RoomEvent {
    RoomEvent {
        event_id: "$invite".into(),
        room_id: room_id.into(),
        sender: "@admin:example.com".into(),
        origin_server_ts: 0,
        state_key: Some(user_id.into()),
        content: EventContent::Member(MemberContent {
            membership: Membership::Invite,
            displayname: None,
            avatar_url: None,
        }),
    }
}

fn source(history: Vec<RoomEvent>) -> (MemorySource, mpsc::Sender<RoomEvent>) {
    let mut state = RoomStateSnapshot {
        name: Some("News".into()),
        topic: Some("Announcements".into()),
        ..Default::default()
    };
    state.members.insert(
        "@alice:example.com".into(),
        MemberContent {
            membership: Membership::Join,
            displayname: Some("Alice".into()),
            avatar_url: None,
        },
    );
    let (tx, rx) = mpsc::channel(16);
    let mut source = MemorySource {
        events: Mutex::new(Some(rx)),
        ..Default::default()
    };
    source
        .aliases
        .insert("#news:example.com".into(), ROOM.into());
    source.states.insert(ROOM.into(), state);
    source.history.insert(ROOM.into(), history);
    (source, tx)
}

async fn spawn_server(store: Arc<FeedStore>) -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(AppState { store });
    let server = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    (format!("http://{}", addr), server)
}

fn json_of(store: &FeedStore) -> Value {
    let served = store.by_id("news").unwrap().cached(Format::Json).unwrap();
    serde_json::from_slice(&served.bytes).unwrap()
}

#[tokio::test]
async fn initial_sync_keeps_latest_entries() {
    let history = vec![
        message("$1", "@alice:example.com", 1_000, "one"),
        message("$2", "@alice:example.com", 2_000, "two"),
        message("$3", "@bob:example.com", 3_000, "three"),
    ];
    let (source, _tx) = source(history);
    let handler = build_handler(&config(2), Arc::new(source)).await.unwrap();
    handler.initial_sync().await.unwrap();

    let doc = json_of(handler.store());
    assert_eq!(doc["title"], "News");
    assert_eq!(doc["description"], "Announcements");
    let items = doc["items"].as_array().unwrap();
    let ids: Vec<_> = items.iter().map(|i| i["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["$2", "$3"]);
    assert_eq!(items[0]["authors"][0]["name"], "Alice");
    assert!(items[1].get("authors").is_none());
}

#[tokio::test]
async fn run_events_applies_in_order_until_stream_ends() {
    let (source, tx) = source(vec![]);
    let source = Arc::new(source);
    let handler = build_handler(&config(5), source.clone()).await.unwrap();
    let events = source.subscribe(&[ROOM.to_string()]).await.unwrap();
    handler.initial_sync().await.unwrap();

    tx.send(message("$m", "@alice:example.com", 1_000, "draft"))
        .await
        .unwrap();
    tx.send(edit("$x", "$m", "@bob:example.com", 1_500, "hijacked"))
        .await
        .unwrap();
    tx.send(edit("$e", "$m", "@alice:example.com", 2_000, "final"))
        .await
        .unwrap();
    drop(tx);

    handler.run_events(events, CancellationToken::new()).await;

    let doc = json_of(handler.store());
    let items = doc["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["content_text"], "final");
    assert!(!items[0]["date_modified"].is_null());
}

#[tokio::test]
async fn run_events_stops_on_cancel() {
    let (source, _tx) = source(vec![]);
    let source = Arc::new(source);
    let handler = build_handler(&config(5), source.clone()).await.unwrap();
    let events = source.subscribe(&[]).await.unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handler.run_events(events, cancel))
        .await
        .unwrap();
}

#[tokio::test]
async fn invites_are_answered() {
    let (source, _tx) = source(vec![]);
    let source = Arc::new(source);
    let handler = build_handler(&config(5), source.clone()).await.unwrap();
    handler.initial_sync().await.unwrap();

    handler.handle_event(invite(ROOM, "@feeds:example.com")).await;
    handler
        .handle_event(invite("!spam:example.com", "@feeds:example.com"))
        .await;
    handler
        .handle_event(invite(ROOM, "@someone:example.com"))
        .await;

    assert_eq!(*source.joined.lock(), vec![ROOM.to_string()]);
    assert_eq!(*source.left.lock(), vec!["!spam:example.com".to_string()]);
}

#[tokio::test]
async fn initial_sync_failure_is_fatal() {
    let (mut source, _tx) = source(vec![]);
    source.states.clear();
    let handler = build_handler(&config(5), Arc::new(source)).await.unwrap();
    assert!(handler.initial_sync().await.is_err());
}

#[tokio::test]
async fn unknown_alias_fails_startup() {
    let (mut source, _tx) = source(vec![]);
    source.aliases.clear();
    assert!(build_handler(&config(5), Arc::new(source)).await.is_err());
}

#[tokio::test]
async fn http_serving_and_conditional_get() {
    let (source, _tx) = source(vec![message("$1", "@alice:example.com", 1_000, "hello")]);
    let handler = build_handler(&config(5), Arc::new(source)).await.unwrap();
    handler.initial_sync().await.unwrap();
    let (base, server) = spawn_server(handler.store().clone()).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base}/news")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/feed+json");
    let etag = resp.headers()[header::ETAG].to_str().unwrap().to_string();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["items"][0]["content_text"], "hello");

    let resp = client
        .get(format!("{base}/NEWS.json"))
        .header(header::IF_NONE_MATCH, &etag)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
    assert!(resp.bytes().await.unwrap().is_empty());

    for (path, mime) in [
        ("news.rss", "application/rss+xml"),
        ("news.atom", "application/atom+xml"),
    ] {
        let resp = client.get(format!("{base}/{path}")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], mime);
    }

    let resp = client.head(format!("{base}/news")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key(header::LAST_MODIFIED));
    assert!(resp.bytes().await.unwrap().is_empty());

    let resp = client.get(format!("{base}/nope")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "feed_not_found");

    let resp = client.get(format!("{base}/news.xml")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    server.abort();
}

#[tokio::test]
async fn run_shuts_down_on_cancel() {
    let (source, _tx) = source(vec![]);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(feedserv::run(config(5), Arc::new(source), cancel.clone()));
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
