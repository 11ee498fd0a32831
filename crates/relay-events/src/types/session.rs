//! Device presence types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Presence status of one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    /// Heartbeating.
    Online,
    /// Missed heartbeats for longer than the idle threshold.
    Away,
    /// Disconnected or stale. Terminal for the connection.
    Offline,
}

impl DeviceStatus {
    /// Stored / wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "ONLINE",
            Self::Away => "AWAY",
            Self::Offline => "OFFLINE",
        }
    }

    /// ONLINE and AWAY connections are fan-out targets.
    pub fn is_reachable(self) -> bool {
        !matches!(self, Self::Offline)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ONLINE" => Ok(Self::Online),
            "AWAY" => Ok(Self::Away),
            "OFFLINE" => Ok(Self::Offline),
            other => Err(format!("unknown device status: {other}")),
        }
    }
}

/// One presence record: a single connection of one device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSession {
    /// Record ID (`dev_…`).
    pub id: String,
    /// Live connection ID (`conn_…`). New on every connect.
    pub connection_id: String,
    /// Workspace.
    pub workspace_id: String,
    /// User.
    pub user_id: String,
    /// Stable device ID, shared across reconnects.
    pub device_id: String,
    /// Optional human label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    /// Raw `User-Agent` seen at handshake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Current status.
    pub status: DeviceStatus,
    /// Last heartbeat (RFC 3339, UTC).
    pub last_heartbeat: String,
    /// Connect time.
    pub connected_at: String,
    /// Set when the record went OFFLINE.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disconnected_at: Option<String>,
}

/// Input to [`crate::SessionStore::connect`].
#[derive(Clone, Copy, Debug)]
pub struct NewSession<'a> {
    /// Workspace.
    pub workspace_id: &'a str,
    /// User.
    pub user_id: &'a str,
    /// Stable device ID.
    pub device_id: &'a str,
    /// Optional human label.
    pub device_name: Option<&'a str>,
    /// Raw `User-Agent`.
    pub user_agent: Option<&'a str>,
}

/// Result of a connect: the new record plus any records it superseded.
#[derive(Clone, Debug)]
pub struct ConnectOutcome {
    /// The new ONLINE record.
    pub session: DeviceSession,
    /// Previously live records of the same device, now OFFLINE.
    pub superseded: Vec<DeviceSession>,
}

/// Result of a heartbeat.
#[derive(Clone, Debug)]
pub struct HeartbeatOutcome {
    /// Updated record (always ONLINE).
    pub session: DeviceSession,
    /// Status before the heartbeat.
    pub previous_status: DeviceStatus,
}

impl HeartbeatOutcome {
    /// The heartbeat brought an AWAY device back.
    pub fn recovered(&self) -> bool {
        self.previous_status == DeviceStatus::Away
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for s in [DeviceStatus::Online, DeviceStatus::Away, DeviceStatus::Offline] {
            assert_eq!(s.as_str().parse::<DeviceStatus>().unwrap(), s);
            assert_eq!(serde_json::to_string(&s).unwrap(), format!("\"{s}\""));
        }
    }

    #[test]
    fn unknown_status_rejected() {
        assert!("IDLE".parse::<DeviceStatus>().is_err());
    }

    #[test]
    fn reachability() {
        assert!(DeviceStatus::Online.is_reachable());
        assert!(DeviceStatus::Away.is_reachable());
        assert!(!DeviceStatus::Offline.is_reachable());
    }

    #[test]
    fn session_omits_empty_optionals() {
        let session = DeviceSession {
            id: "dev_1".into(),
            connection_id: "conn_1".into(),
            workspace_id: "W".into(),
            user_id: "u".into(),
            device_id: "d".into(),
            device_name: None,
            user_agent: None,
            status: DeviceStatus::Online,
            last_heartbeat: "t".into(),
            connected_at: "t".into(),
            disconnected_at: None,
        };
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["connectionId"], "conn_1");
        assert_eq!(value["status"], "ONLINE");
        assert!(value.get("deviceName").is_none());
        assert!(value.get("disconnectedAt").is_none());
    }
}
