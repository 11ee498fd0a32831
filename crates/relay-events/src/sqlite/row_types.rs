//! Database row types for mapping between `SQLite` rows and Rust structs.
//!
//! Raw row shapes, converted to the public types at the store boundary.
//! Conversion to [`WorkspaceEvent`] and [`DeviceSession`] decodes the
//! text-encoded columns and is where corrupt rows are detected.

use serde::{Deserialize, Serialize};

use crate::errors::{EventStoreError, Result};
use crate::types::{DeviceSession, DeviceStatus, EventType, WorkspaceEvent};

/// Raw event row from the `workspace_events` table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventRow {
    /// Event ID.
    pub id: String,
    /// Workspace ID.
    pub workspace_id: String,
    /// Sequence number within the workspace.
    pub sequence_number: i64,
    /// Event type wire name.
    pub event_type: String,
    /// Entity tag.
    pub entity_type: String,
    /// Entity ID.
    pub entity_id: String,
    /// JSON-encoded payload.
    pub payload: String,
    /// Originating user.
    pub origin_user_id: String,
    /// Originating device.
    pub origin_device_id: String,
    /// 0 or 1.
    pub consumed: i64,
    /// Creation timestamp.
    pub created_at: String,
}

impl EventRow {
    /// Decode into the public event type.
    pub fn into_event(self) -> Result<WorkspaceEvent> {
        let event_type: EventType = self
            .event_type
            .parse()
            .map_err(|e: crate::types::UnknownEventType| EventStoreError::Internal(e.to_string()))?;
        Ok(WorkspaceEvent {
            id: self.id,
            workspace_id: self.workspace_id,
            sequence_number: self.sequence_number,
            event_type,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            payload: serde_json::from_str(&self.payload)?,
            origin_user_id: self.origin_user_id,
            origin_device_id: self.origin_device_id,
            consumed: self.consumed != 0,
            created_at: self.created_at,
        })
    }
}

/// Raw presence row from the `device_sessions` table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRow {
    /// Record ID.
    pub id: String,
    /// Connection ID.
    pub connection_id: String,
    /// Workspace ID.
    pub workspace_id: String,
    /// User ID.
    pub user_id: String,
    /// Device ID.
    pub device_id: String,
    /// Device label.
    pub device_name: Option<String>,
    /// Raw user agent.
    pub user_agent: Option<String>,
    /// Status text.
    pub status: String,
    /// Last heartbeat.
    pub last_heartbeat: String,
    /// Connect time.
    pub connected_at: String,
    /// Disconnect time.
    pub disconnected_at: Option<String>,
}

impl SessionRow {
    /// Decode into the public session type.
    pub fn into_session(self) -> Result<DeviceSession> {
        let status: DeviceStatus = self.status.parse().map_err(EventStoreError::Internal)?;
        Ok(DeviceSession {
            id: self.id,
            connection_id: self.connection_id,
            workspace_id: self.workspace_id,
            user_id: self.user_id,
            device_id: self.device_id,
            device_name: self.device_name,
            user_agent: self.user_agent,
            status,
            last_heartbeat: self.last_heartbeat,
            connected_at: self.connected_at,
            disconnected_at: self.disconnected_at,
        })
    }
}

/// Decode a batch of rows, failing on the first corrupt one.
pub(crate) fn into_sessions(rows: Vec<SessionRow>) -> Result<Vec<DeviceSession>> {
    rows.into_iter().map(SessionRow::into_session).collect()
}
