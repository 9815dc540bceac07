use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event type whose power level gates who may post feed entries.
pub const MESSAGE_EVENT_TYPE: &str = "m.room.message";

/// Kind of envelope used in the bridge protocol.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Request,
    Response,
    #[default]
    Event,
}

/// Standard RPC style error object.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

/// Top level envelope exchanged between feedserv and the room bridge.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub kind: Kind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: Some(id.into()),
            kind: Kind::Request,
            method: Some(method.into()),
            params: Some(params),
            ..Default::default()
        }
    }

    pub fn response(id: Option<String>, result: Value) -> Self {
        Self {
            id,
            kind: Kind::Response,
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn failure(id: Option<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            kind: Kind::Response,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
            ..Default::default()
        }
    }

    pub fn event(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: Kind::Event,
            topic: Some(topic.into()),
            payload: Some(payload),
            ..Default::default()
        }
    }
}

/// One event from a room timeline or its state, as relayed by the bridge.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RoomEvent {
    pub event_id: String,
    pub room_id: String,
    pub sender: String,
    /// Milliseconds since the unix epoch.
    pub origin_server_ts: i64,
    /// Present on state events only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    pub content: EventContent,
}

/// The closed set of event payloads feedserv reacts to.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventContent {
    Message(MessageContent),
    Edit {
        relates_to: String,
        new_content: MessageContent,
    },
    Name {
        #[serde(default)]
        name: String,
    },
    Topic {
        #[serde(default)]
        topic: String,
    },
    Avatar {
        #[serde(default)]
        url: Option<String>,
    },
    PowerLevels(PowerLevels),
    Member(MemberContent),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct MessageContent {
    #[serde(default = "default_msgtype")]
    pub msgtype: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_body: Option<String>,
    /// Content URI of an attached file, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<FileInfo>,
}

fn default_msgtype() -> String {
    "m.text".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct FileInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Playback length in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Membership {
    Join,
    Invite,
    Leave,
    Ban,
    Knock,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MemberContent {
    pub membership: Membership,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub displayname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Permission snapshot of a room.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct PowerLevels {
    #[serde(default)]
    pub users: BTreeMap<String, i64>,
    #[serde(default)]
    pub users_default: i64,
    #[serde(default)]
    pub events: BTreeMap<String, i64>,
    #[serde(default)]
    pub events_default: i64,
}

impl PowerLevels {
    pub fn user_level(&self, user_id: &str) -> i64 {
        self.users
            .get(user_id)
            .copied()
            .unwrap_or(self.users_default)
    }

    pub fn event_level(&self, event_type: &str) -> i64 {
        self.events
            .get(event_type)
            .copied()
            .unwrap_or(self.events_default)
    }

    /// Whether `user_id` may send regular messages.
    pub fn can_post(&self, user_id: &str) -> bool {
        self.user_level(user_id) >= self.event_level(MESSAGE_EVENT_TYPE)
    }
}

/// Current state of a room as fetched during the initial sync.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct RoomStateSnapshot {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub power_levels: PowerLevels,
    #[serde(default)]
    pub members: BTreeMap<String, MemberContent>,
}
