//! Room source backed by an external bridge process.
//!
//! The bridge speaks line-delimited JSON [`Envelope`]s over its stdio:
//! feedserv sends requests and the bridge answers with responses carrying
//! the same id. Live room events arrive unsolicited as `room.event` events.

use std::{collections::HashMap, process::Stdio, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use room_api::{Envelope, Kind, RoomEvent, RoomStateSnapshot};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite, BufReader, BufWriter},
    process::{Child, Command},
    sync::{mpsc, oneshot},
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::ipc::{read_envelope, write_envelope};
use crate::source::RoomSource;

pub const ROOM_EVENT_TOPIC: &str = "room.event";

const EVENT_QUEUE: usize = 1024;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to spawn bridge {exec}: {source}")]
    Spawn {
        exec: String,
        #[source]
        source: std::io::Error,
    },
    #[error("bridge closed the pipe")]
    Closed,
    #[error("bridge returned error {code}: {message}")]
    Remote { code: i32, message: String },
    #[error("malformed bridge message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("bridge i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("live events were already subscribed")]
    AlreadySubscribed,
}

type Writer = Arc<tokio::sync::Mutex<BufWriter<Box<dyn AsyncWrite + Send + Unpin>>>>;

/// In-flight requests. `None` once the bridge has gone away.
type Pending = Arc<Mutex<Option<HashMap<String, oneshot::Sender<Envelope>>>>>;

pub struct BridgeSource {
    writer: Writer,
    pending: Pending,
    events: Mutex<Option<mpsc::Receiver<RoomEvent>>>,
    child: Mutex<Option<Child>>,
}

impl BridgeSource {
    /// Spawn the bridge executable and talk to it over its stdio.
    pub fn spawn(exec: &str, args: &[String]) -> Result<Self, BridgeError> {
        let mut child = Command::new(exec)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BridgeError::Spawn {
                exec: exec.to_string(),
                source,
            })?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(BridgeError::Closed);
        };
        let bridge = Self::from_io(stdout, stdin);
        *bridge.child.lock() = Some(child);
        Ok(bridge)
    }

    /// Talk to a bridge over an arbitrary reader and writer pair.
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        let writer: Writer = Arc::new(tokio::sync::Mutex::new(BufWriter::new(writer)));
        let pending: Pending = Arc::new(Mutex::new(Some(HashMap::new())));
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        tokio::spawn(read_loop(BufReader::new(reader), writer.clone(), pending.clone(), raw_tx));
        tokio::spawn(forward_events(raw_rx, tx));
        Self {
            writer,
            pending,
            events: Mutex::new(Some(rx)),
            child: Mutex::new(None),
        }
    }

    /// Send a request and wait for the matching response.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, BridgeError> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        match self.pending.lock().as_mut() {
            Some(pending) => pending.insert(id.clone(), tx),
            None => return Err(BridgeError::Closed),
        };
        let env = Envelope::request(id.clone(), method, params);
        let written = {
            let mut w = self.writer.lock().await;
            write_envelope(&mut *w, &env).await
        };
        if let Err(err) = written {
            if let Some(pending) = self.pending.lock().as_mut() {
                pending.remove(&id);
            }
            return Err(err);
        }
        let resp = rx.await.map_err(|_| BridgeError::Closed)?;
        if let Some(err) = resp.error {
            return Err(BridgeError::Remote {
                code: err.code,
                message: err.message,
            });
        }
        Ok(resp.result.unwrap_or(Value::Null))
    }

    async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, BridgeError> {
        let value = self.call(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }
}

async fn read_loop<R>(
    mut reader: BufReader<R>,
    writer: Writer,
    pending: Pending,
    events: mpsc::UnboundedSender<RoomEvent>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let env = match read_envelope(&mut reader).await {
            Ok(env) => env,
            Err(BridgeError::Decode(err)) => {
                warn!(error = %err, "skipping malformed bridge message");
                continue;
            }
            Err(err) => {
                error!(error = %err, "bridge connection lost");
                break;
            }
        };
        match env.kind {
            Kind::Response => {
                let waiter = env
                    .id
                    .as_ref()
                    .and_then(|id| pending.lock().as_mut().and_then(|p| p.remove(id)));
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(env);
                    }
                    None => debug!(id = ?env.id, "response without a waiting request"),
                }
            }
            Kind::Event if env.topic.as_deref() == Some(ROOM_EVENT_TOPIC) => {
                let payload = env.payload.unwrap_or(Value::Null);
                match serde_json::from_value::<RoomEvent>(payload) {
                    Ok(event) => {
                        if events.send(event).is_err() {
                            debug!("room event dropped, nobody is listening");
                        }
                    }
                    Err(err) => warn!(error = %err, "skipping malformed room event"),
                }
            }
            Kind::Event => debug!(topic = ?env.topic, "ignoring bridge event"),
            Kind::Request => {
                let method = env.method.unwrap_or_default();
                let resp = Envelope::failure(env.id, -32601, format!("unknown method {}", method));
                let mut w = writer.lock().await;
                let _ = write_envelope(&mut *w, &resp).await;
            }
        }
    }
    // Dropping the waiters fails every in-flight call.
    pending.lock().take();
}

/// Move events from the reader into the subscriber's bounded queue. Only
/// this task waits on a full queue; the reader keeps answering calls.
async fn forward_events(
    mut incoming: mpsc::UnboundedReceiver<RoomEvent>,
    outgoing: mpsc::Sender<RoomEvent>,
) {
    while let Some(event) = incoming.recv().await {
        if outgoing.send(event).await.is_err() {
            debug!("event subscriber went away");
            break;
        }
    }
}

#[async_trait]
impl RoomSource for BridgeSource {
    async fn resolve_alias(&self, alias: &str) -> Result<String> {
        #[derive(serde::Deserialize)]
        struct Resolved {
            room_id: String,
        }
        let resolved: Resolved = self
            .call_as("room.resolve_alias", json!({ "alias": alias }))
            .await?;
        Ok(resolved.room_id)
    }

    async fn room_state(&self, room_id: &str) -> Result<RoomStateSnapshot> {
        Ok(self
            .call_as("room.state", json!({ "room_id": room_id }))
            .await?)
    }

    async fn recent_messages(&self, room_id: &str, limit: usize) -> Result<Vec<RoomEvent>> {
        Ok(self
            .call_as("room.messages", json!({ "room_id": room_id, "limit": limit }))
            .await?)
    }

    async fn join_room(&self, room_id: &str) -> Result<()> {
        self.call("room.join", json!({ "room_id": room_id })).await?;
        Ok(())
    }

    async fn leave_room(&self, room_id: &str) -> Result<()> {
        self.call("room.leave", json!({ "room_id": room_id })).await?;
        Ok(())
    }

    async fn subscribe(&self, rooms: &[String]) -> Result<mpsc::Receiver<RoomEvent>> {
        let rx = self
            .events
            .lock()
            .take()
            .ok_or(BridgeError::AlreadySubscribed)?;
        self.call("room.subscribe", json!({ "rooms": rooms })).await?;
        Ok(rx)
    }
}
