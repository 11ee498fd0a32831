//! Presence registry.
//!
//! Wraps [`SessionStore`] with the presence policy and publishes a
//! [`StatusChange`] for every transition it performs. Methods are blocking
//! (they hit the pool); async callers go through `spawn_blocking`.

use chrono::{DateTime, Utc};
use relay_events::{
    ConnectOutcome, DeviceSession, DeviceStatus, HeartbeatOutcome, NewSession, Result,
    SessionStore,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::policy::PresencePolicy;
use crate::user_agent::device_name;

/// Capacity of the status-change channel. Slow subscribers lag, they never
/// block the registry.
const STATUS_CHANNEL_CAPACITY: usize = 1024;

/// One presence transition, as pushed to other devices of the workspace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    /// Workspace.
    pub workspace_id: String,
    /// User.
    pub user_id: String,
    /// Device.
    pub device_id: String,
    /// Connection that changed.
    pub connection_id: String,
    /// New status.
    pub status: DeviceStatus,
    /// Device label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

impl From<&DeviceSession> for StatusChange {
    fn from(session: &DeviceSession) -> Self {
        Self {
            workspace_id: session.workspace_id.clone(),
            user_id: session.user_id.clone(),
            device_id: session.device_id.clone(),
            connection_id: session.connection_id.clone(),
            status: session.status,
            device_name: session.device_name.clone(),
        }
    }
}

/// Presence registry: the state machine over the session table.
#[derive(Clone)]
pub struct PresenceRegistry {
    store: SessionStore,
    policy: PresencePolicy,
    changes: broadcast::Sender<StatusChange>,
}

impl PresenceRegistry {
    /// Create a registry over `store`.
    pub fn new(store: SessionStore, policy: PresencePolicy) -> Self {
        let (changes, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            store,
            policy,
            changes,
        }
    }

    /// Active thresholds.
    pub fn policy(&self) -> PresencePolicy {
        self.policy
    }

    /// Underlying session store.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Receive every status change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.changes.subscribe()
    }

    fn notify(&self, session: &DeviceSession) {
        // No subscribers is fine.
        let _ = self.changes.send(StatusChange::from(session));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Register a connection. See [`Self::connect_at`].
    pub fn connect(&self, new: &NewSession<'_>) -> Result<ConnectOutcome> {
        self.connect_at(new, Utc::now())
    }

    /// Register a connection at `now`, superseding any live connection of
    /// the same device. A missing device name is derived from the user agent.
    pub fn connect_at(&self, new: &NewSession<'_>, now: DateTime<Utc>) -> Result<ConnectOutcome> {
        let new = NewSession {
            device_name: new.device_name.or_else(|| Some(device_name(new.user_agent))),
            ..*new
        };

        let outcome = self.store.connect(&new, now)?;
        for old in &outcome.superseded {
            debug!(
                workspace_id = %old.workspace_id,
                device_id = %old.device_id,
                connection_id = %old.connection_id,
                "connection superseded"
            );
            self.notify(old);
        }
        info!(
            workspace_id = %outcome.session.workspace_id,
            user_id = %outcome.session.user_id,
            device_id = %outcome.session.device_id,
            connection_id = %outcome.session.connection_id,
            "device connected"
        );
        self.notify(&outcome.session);
        Ok(outcome)
    }

    /// Record a heartbeat. See [`Self::heartbeat_at`].
    pub fn heartbeat(&self, connection_id: &str) -> Result<HeartbeatOutcome> {
        self.heartbeat_at(connection_id, Utc::now())
    }

    /// Record a heartbeat at `now`. An AWAY device comes back ONLINE.
    ///
    /// `SessionNotFound` means the connection is gone and the client must
    /// reconnect.
    pub fn heartbeat_at(
        &self,
        connection_id: &str,
        now: DateTime<Utc>,
    ) -> Result<HeartbeatOutcome> {
        let outcome = self.store.heartbeat(connection_id, now)?;
        if outcome.recovered() {
            debug!(connection_id, "device back online");
            self.notify(&outcome.session);
        }
        Ok(outcome)
    }

    /// Explicit disconnect. See [`Self::disconnect_at`].
    pub fn disconnect(&self, connection_id: &str) -> Result<DeviceSession> {
        self.disconnect_at(connection_id, Utc::now())
    }

    /// Mark a connection OFFLINE at `now`.
    pub fn disconnect_at(&self, connection_id: &str, now: DateTime<Utc>) -> Result<DeviceSession> {
        let session = self.store.disconnect(connection_id, now)?;
        info!(
            workspace_id = %session.workspace_id,
            device_id = %session.device_id,
            connection_id,
            "device disconnected"
        );
        self.notify(&session);
        Ok(session)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sweeper transitions
    // ─────────────────────────────────────────────────────────────────────

    /// Move every live connection silent for at least the stale threshold
    /// to OFFLINE.
    pub fn expire_stale_at(&self, now: DateTime<Utc>) -> Result<Vec<DeviceSession>> {
        let expired = self
            .store
            .mark_stale_before(self.policy.stale_cutoff(now), now)?;
        for session in &expired {
            self.notify(session);
        }
        Ok(expired)
    }

    /// Move every ONLINE connection silent for longer than the idle
    /// threshold to AWAY.
    pub fn mark_idle_at(&self, now: DateTime<Utc>) -> Result<Vec<DeviceSession>> {
        let idle = self.store.mark_idle_before(self.policy.idle_cutoff(now))?;
        for session in &idle {
            self.notify(session);
        }
        Ok(idle)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────

    /// Latest record of a connection.
    pub fn get_by_connection(&self, connection_id: &str) -> Result<Option<DeviceSession>> {
        self.store.get_by_connection(connection_id)
    }

    /// ONLINE and AWAY connections of a workspace.
    pub fn active_sessions(&self, workspace_id: &str) -> Result<Vec<DeviceSession>> {
        self.store.active_sessions(workspace_id)
    }

    /// ONLINE and AWAY connections of one user.
    pub fn active_sessions_by_user(
        &self,
        workspace_id: &str,
        user_id: &str,
    ) -> Result<Vec<DeviceSession>> {
        self.store.active_sessions_by_user(workspace_id, user_id)
    }

    /// Number of ONLINE and AWAY connections in a workspace.
    pub fn count_active(&self, workspace_id: &str) -> Result<i64> {
        self.store.count_active(workspace_id)
    }

    /// Fan-out targets for an event from `origin_device`.
    pub fn reachable_sessions(
        &self,
        workspace_id: &str,
        origin_device: &str,
    ) -> Result<Vec<DeviceSession>> {
        self.store.reachable_sessions(workspace_id, origin_device)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
