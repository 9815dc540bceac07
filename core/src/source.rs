use anyhow::Result;
use async_trait::async_trait;
use room_api::{RoomEvent, RoomStateSnapshot};
use tokio::sync::mpsc;

/// Access to the chat network the feeds mirror.
#[async_trait]
pub trait RoomSource: Send + Sync {
    /// Resolve a room alias such as `#news:example.com` to a room id.
    async fn resolve_alias(&self, alias: &str) -> Result<String>;

    /// Current name, topic, avatar, power levels and members of a room.
    async fn room_state(&self, room_id: &str) -> Result<RoomStateSnapshot>;

    /// Up to `limit` of the most recent message and edit events, oldest first.
    async fn recent_messages(&self, room_id: &str, limit: usize) -> Result<Vec<RoomEvent>>;

    async fn join_room(&self, room_id: &str) -> Result<()>;

    async fn leave_room(&self, room_id: &str) -> Result<()>;

    /// Start streaming live events. Events for a room arrive in order.
    async fn subscribe(&self, rooms: &[String]) -> Result<mpsc::Receiver<RoomEvent>>;
}
