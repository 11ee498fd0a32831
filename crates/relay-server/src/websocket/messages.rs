//! WebSocket frame shapes.
//!
//! Every server frame is `{"type": "...", "data": ...}`. Clients send
//! `{"type": "heartbeat"}` or `{"type": "disconnect"}`.

use relay_events::WorkspaceEvent;
use relay_presence::StatusChange;
use serde::{Deserialize, Serialize};

/// Server → client frame.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Sent once after the handshake.
    #[serde(rename = "connection.established")]
    ConnectionEstablished {
        /// Live connection ID; send it with HTTP heartbeats.
        connection_id: String,
        /// Presence record ID.
        session_id: String,
        /// Highest sequence allocated in the workspace, for catch-up.
        latest_sequence: i64,
    },
    /// Reply to a client heartbeat.
    #[serde(rename = "heartbeat.ack")]
    HeartbeatAck,
    /// Live push of one event; same shape as a catch-up row.
    #[serde(rename = "workspace.event")]
    WorkspaceEvent(WorkspaceEvent),
    /// Another device in the workspace changed status.
    #[serde(rename = "presence.status")]
    PresenceStatus(StatusChange),
    /// This connection is OFFLINE; reconnect.
    #[serde(rename = "session.expired")]
    SessionExpired {
        /// The expired connection.
        connection_id: String,
    },
    /// A client frame could not be handled.
    #[serde(rename = "error")]
    Error {
        /// Machine-readable code.
        code: String,
        /// Human-readable message.
        message: String,
    },
}

/// Client → server frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Presence heartbeat for this connection.
    Heartbeat,
    /// Explicit disconnect; the socket closes afterwards.
    Disconnect,
}

impl ServerMessage {
    /// Serialize to a text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
