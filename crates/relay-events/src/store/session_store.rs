//! Transactional presence table API.
//!
//! Every method takes the caller's `now` so the presence state machine can
//! be driven deterministically; the registry passes the wall clock.

use chrono::{DateTime, Utc};
use relay_core::time::to_rfc3339;
use relay_core::{ConnectionId, SessionId};
use rusqlite::TransactionBehavior;

use crate::errors::{EventStoreError, Result};
use crate::sqlite::connection::{ConnectionPool, PooledConnection};
use crate::sqlite::repositories::session::{InsertSession, SessionRepo};
use crate::sqlite::row_types::{SessionRow, into_sessions};
use crate::types::{ConnectOutcome, DeviceSession, HeartbeatOutcome, NewSession};

/// Persistence side of device presence.
#[derive(Clone)]
pub struct SessionStore {
    pool: ConnectionPool,
}

impl SessionStore {
    /// Create a new `SessionStore` with the given connection pool.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Register a new connection for a device.
    ///
    /// Atomic: every live row of the same `(workspace, user, device)` goes
    /// OFFLINE and the new ONLINE row is inserted in one transaction.
    pub fn connect(&self, new: &NewSession<'_>, now: DateTime<Utc>) -> Result<ConnectOutcome> {
        for (field, value) in [
            ("workspaceId", new.workspace_id),
            ("userId", new.user_id),
            ("deviceId", new.device_id),
        ] {
            if value.trim().is_empty() {
                return Err(EventStoreError::InvalidOperation(format!(
                    "{field} must not be empty"
                )));
            }
        }

        let now = to_rfc3339(now);
        let id = SessionId::new();
        let connection_id = ConnectionId::new();

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let superseded = SessionRepo::supersede_device(
            &tx,
            new.workspace_id,
            new.user_id,
            new.device_id,
            &now,
        )?;
        SessionRepo::insert(
            &tx,
            &InsertSession {
                id: &id,
                connection_id: &connection_id,
                workspace_id: new.workspace_id,
                user_id: new.user_id,
                device_id: new.device_id,
                device_name: new.device_name,
                user_agent: new.user_agent,
                now: &now,
            },
        )?;
        let session = SessionRepo::get_live_by_connection(&tx, &connection_id)?
            .ok_or_else(|| EventStoreError::SessionNotFound(connection_id.to_string()))?;

        tx.commit()?;

        Ok(ConnectOutcome {
            session: session.into_session()?,
            superseded: into_sessions(superseded)?,
        })
    }

    /// Record a heartbeat: refresh `last_heartbeat` and force ONLINE.
    ///
    /// Fails with [`EventStoreError::SessionNotFound`] when the connection is
    /// unknown or already OFFLINE; the client must reconnect.
    pub fn heartbeat(&self, connection_id: &str, now: DateTime<Utc>) -> Result<HeartbeatOutcome> {
        let now = to_rfc3339(now);
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let previous = SessionRepo::get_live_by_connection(&tx, connection_id)?
            .ok_or_else(|| EventStoreError::SessionNotFound(connection_id.to_string()))?
            .into_session()?;
        let updated = SessionRepo::touch(&tx, connection_id, &now)?
            .ok_or_else(|| EventStoreError::SessionNotFound(connection_id.to_string()))?;

        tx.commit()?;

        Ok(HeartbeatOutcome {
            session: updated.into_session()?,
            previous_status: previous.status,
        })
    }

    /// Mark a connection OFFLINE.
    pub fn disconnect(&self, connection_id: &str, now: DateTime<Utc>) -> Result<DeviceSession> {
        let conn = self.conn()?;
        SessionRepo::mark_offline(&conn, connection_id, &to_rfc3339(now))?
            .ok_or_else(|| EventStoreError::SessionNotFound(connection_id.to_string()))?
            .into_session()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────

    /// Latest record of a connection, live or not.
    pub fn get_by_connection(&self, connection_id: &str) -> Result<Option<DeviceSession>> {
        let conn = self.conn()?;
        SessionRepo::get_by_connection(&conn, connection_id)?
            .map(SessionRow::into_session)
            .transpose()
    }

    /// ONLINE and AWAY records of a workspace.
    pub fn active_sessions(&self, workspace_id: &str) -> Result<Vec<DeviceSession>> {
        let conn = self.conn()?;
        into_sessions(SessionRepo::list_live(&conn, workspace_id, None)?)
    }

    /// ONLINE and AWAY records of one user in a workspace.
    pub fn active_sessions_by_user(
        &self,
        workspace_id: &str,
        user_id: &str,
    ) -> Result<Vec<DeviceSession>> {
        let conn = self.conn()?;
        into_sessions(SessionRepo::list_live(&conn, workspace_id, Some(user_id))?)
    }

    /// Number of ONLINE and AWAY records in a workspace.
    pub fn count_active(&self, workspace_id: &str) -> Result<i64> {
        let conn = self.conn()?;
        SessionRepo::count_live(&conn, workspace_id)
    }

    /// Fan-out targets: live records of a workspace not on `exclude_device`.
    pub fn reachable_sessions(
        &self,
        workspace_id: &str,
        exclude_device: &str,
    ) -> Result<Vec<DeviceSession>> {
        let conn = self.conn()?;
        into_sessions(SessionRepo::list_reachable(&conn, workspace_id, exclude_device)?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sweeper
    // ─────────────────────────────────────────────────────────────────────

    /// ONLINE → AWAY for heartbeats strictly older than `idle_cutoff`.
    pub fn mark_idle_before(&self, idle_cutoff: DateTime<Utc>) -> Result<Vec<DeviceSession>> {
        let conn = self.conn()?;
        into_sessions(SessionRepo::mark_away_before(&conn, &to_rfc3339(idle_cutoff))?)
    }

    /// ONLINE/AWAY → OFFLINE for heartbeats at or before `stale_cutoff`.
    pub fn mark_stale_before(
        &self,
        stale_cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeviceSession>> {
        let conn = self.conn()?;
        into_sessions(SessionRepo::mark_offline_at_or_before(
            &conn,
            &to_rfc3339(stale_cutoff),
            &to_rfc3339(now),
        )?)
    }

    /// Delete OFFLINE records disconnected before `cutoff`.
    pub fn purge_offline_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        SessionRepo::delete_offline_before(&conn, &to_rfc3339(cutoff))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
