// WebSocket message types for the drawbridge session protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Messages the server sends to session members.
///
/// The `type` tag and field sets are part of the wire contract; clients
/// on the legacy plain-text path receive `Chat` frames built server-side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A user joined or left the session.
    Presence {
        action: PresenceAction,
        username: String,
        timestamp: DateTime<Utc>,
    },

    /// A chat message, echoed to every member including the sender.
    Chat {
        text: String,
        username: String,
        timestamp: DateTime<Utc>,
    },

    /// The canvas was cleared. Outbound counterpart of the inbound
    /// `clear` command; never persisted.
    ClearCanvas { username: String },

    /// Snapshot of active usernames, sent once to a new chat connection.
    UsersList { users: Vec<String> },

    /// A file was uploaded and shared with the session.
    FileShared {
        file_info: FileInfo,
        username: String,
        timestamp: DateTime<Utc>,
    },
}

/// Structured messages clients send on the chat channel.
///
/// Anything that is not valid JSON falls back to the legacy plain-text
/// chat path; valid JSON with an unrecognized `type` is ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Chat {
        #[serde(default)]
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    Clear,
}

/// Presence event action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresenceAction {
    Joined,
    Left,
}

/// Metadata for a shared file, returned by the upload endpoint and
/// embedded in `file_shared` events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileInfo {
    pub original_name: String,
    pub secure_name: String,
    pub size: u64,
    pub content_type: String,
    pub download_url: String,
    pub uploaded_at: DateTime<Utc>,
}
