//! Workspace event types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::event_type::EventType;
use crate::errors::{EventStoreError, Result};

/// An immutable, sequenced fact about one entity in one workspace.
///
/// Serialized in camelCase; this is both the catch-up row and the live push
/// body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceEvent {
    /// Event ID (`evt_…`).
    pub id: String,
    /// Owning workspace.
    pub workspace_id: String,
    /// Position in the workspace log. Unique and strictly increasing.
    pub sequence_number: i64,
    /// Kind of change.
    pub event_type: EventType,
    /// Entity tag (`customer`, `order`, …).
    pub entity_type: String,
    /// Entity identifier.
    pub entity_id: String,
    /// Opaque document supplied by the writer.
    pub payload: Value,
    /// User who made the change.
    pub origin_user_id: String,
    /// Device that made the change.
    pub origin_device_id: String,
    /// Retention bookkeeping only.
    pub consumed: bool,
    /// Creation timestamp (RFC 3339, UTC).
    pub created_at: String,
}

impl WorkspaceEvent {
    /// Whether this event was produced by `device_id`.
    pub fn is_from_device(&self, device_id: &str) -> bool {
        self.origin_device_id == device_id
    }
}

/// Input to [`crate::EventStore::append`].
#[derive(Clone, Copy, Debug)]
pub struct NewEvent<'a> {
    /// Workspace to append to.
    pub workspace_id: &'a str,
    /// Kind of change.
    pub event_type: EventType,
    /// Entity tag.
    pub entity_type: &'a str,
    /// Entity identifier.
    pub entity_id: &'a str,
    /// Opaque payload.
    pub payload: &'a Value,
    /// User who made the change.
    pub origin_user_id: &'a str,
    /// Device that made the change.
    pub origin_device_id: &'a str,
}

impl NewEvent<'_> {
    /// Reject events missing the keys catch-up and fan-out depend on.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("workspaceId", self.workspace_id),
            ("entityType", self.entity_type),
            ("entityId", self.entity_id),
            ("originUserId", self.origin_user_id),
            ("originDeviceId", self.origin_device_id),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(EventStoreError::InvalidOperation(format!(
                    "{field} must not be empty"
                )));
            }
        }
        Ok(())
    }
}

/// Query for [`crate::EventStore::fetch_since`].
#[derive(Clone, Copy, Debug)]
pub struct FetchOptions<'a> {
    /// Workspace to read.
    pub workspace_id: &'a str,
    /// Return events with `sequence_number > since`.
    pub since: i64,
    /// Skip events produced by this device.
    pub exclude_device: Option<&'a str>,
    /// Maximum rows to return.
    pub limit: u32,
}
