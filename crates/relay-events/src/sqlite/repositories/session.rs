//! Device presence rows.
//!
//! A row is live while its status is ONLINE or AWAY. Two partial unique
//! indexes keep at most one live row per connection and per
//! `(workspace, user, device)`. Status transitions are conditional
//! `UPDATE … RETURNING` statements, so a transition only applies to rows
//! still in the expected state when the statement runs.

use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::sqlite::row_types::SessionRow;
use crate::types::DeviceStatus;

const SESSION_COLUMNS: &str = "id, connection_id, workspace_id, user_id, device_id, device_name,
     user_agent, status, last_heartbeat, connected_at, disconnected_at";

/// Options for inserting a new live row.
pub struct InsertSession<'a> {
    /// Record ID.
    pub id: &'a str,
    /// Connection ID.
    pub connection_id: &'a str,
    /// Workspace.
    pub workspace_id: &'a str,
    /// User.
    pub user_id: &'a str,
    /// Device.
    pub device_id: &'a str,
    /// Label.
    pub device_name: Option<&'a str>,
    /// Raw user agent.
    pub user_agent: Option<&'a str>,
    /// Connect time; also the first heartbeat.
    pub now: &'a str,
}

/// Stateless; every method takes `&Connection`.
pub struct SessionRepo;

impl SessionRepo {
    /// Insert a new ONLINE row.
    pub fn insert(conn: &Connection, opts: &InsertSession<'_>) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO device_sessions (id, connection_id, workspace_id, user_id, device_id,
             device_name, user_agent, status, last_heartbeat, connected_at, disconnected_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'ONLINE', ?8, ?8, NULL)",
            params![
                opts.id,
                opts.connection_id,
                opts.workspace_id,
                opts.user_id,
                opts.device_id,
                opts.device_name,
                opts.user_agent,
                opts.now,
            ],
        )?;
        Ok(())
    }

    /// Get the most recent row for a connection, live or not.
    pub fn get_by_connection(conn: &Connection, connection_id: &str) -> Result<Option<SessionRow>> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM device_sessions
                     WHERE connection_id = ?1 ORDER BY connected_at DESC LIMIT 1"
                ),
                params![connection_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Get the live row for a connection.
    pub fn get_live_by_connection(
        conn: &Connection,
        connection_id: &str,
    ) -> Result<Option<SessionRow>> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM device_sessions
                     WHERE connection_id = ?1 AND status <> 'OFFLINE'"
                ),
                params![connection_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Mark every live row of a device OFFLINE. Returns the updated rows.
    pub fn supersede_device(
        conn: &Connection,
        workspace_id: &str,
        user_id: &str,
        device_id: &str,
        now: &str,
    ) -> Result<Vec<SessionRow>> {
        let mut stmt = conn.prepare(&format!(
            "UPDATE device_sessions SET status = 'OFFLINE', disconnected_at = ?4
             WHERE workspace_id = ?1 AND user_id = ?2 AND device_id = ?3 AND status <> 'OFFLINE'
             RETURNING {SESSION_COLUMNS}"
        ))?;
        let rows = stmt
            .query_map(params![workspace_id, user_id, device_id, now], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Record a heartbeat on a live row and force it ONLINE.
    pub fn touch(conn: &Connection, connection_id: &str, now: &str) -> Result<Option<SessionRow>> {
        let row = conn
            .query_row(
                &format!(
                    "UPDATE device_sessions SET last_heartbeat = ?2, status = 'ONLINE'
                     WHERE connection_id = ?1 AND status <> 'OFFLINE'
                     RETURNING {SESSION_COLUMNS}"
                ),
                params![connection_id, now],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Mark a live row OFFLINE.
    pub fn mark_offline(
        conn: &Connection,
        connection_id: &str,
        now: &str,
    ) -> Result<Option<SessionRow>> {
        let row = conn
            .query_row(
                &format!(
                    "UPDATE device_sessions SET status = 'OFFLINE', disconnected_at = ?2
                     WHERE connection_id = ?1 AND status <> 'OFFLINE'
                     RETURNING {SESSION_COLUMNS}"
                ),
                params![connection_id, now],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// ONLINE rows whose last heartbeat is strictly before `idle_cutoff`
    /// become AWAY.
    pub fn mark_away_before(conn: &Connection, idle_cutoff: &str) -> Result<Vec<SessionRow>> {
        let mut stmt = conn.prepare(&format!(
            "UPDATE device_sessions SET status = 'AWAY'
             WHERE status = 'ONLINE' AND last_heartbeat < ?1
             RETURNING {SESSION_COLUMNS}"
        ))?;
        let rows = stmt
            .query_map(params![idle_cutoff], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Live rows whose last heartbeat is at or before `stale_cutoff` become
    /// OFFLINE.
    pub fn mark_offline_at_or_before(
        conn: &Connection,
        stale_cutoff: &str,
        now: &str,
    ) -> Result<Vec<SessionRow>> {
        let mut stmt = conn.prepare(&format!(
            "UPDATE device_sessions SET status = 'OFFLINE', disconnected_at = ?2
             WHERE status <> 'OFFLINE' AND last_heartbeat <= ?1
             RETURNING {SESSION_COLUMNS}"
        ))?;
        let rows = stmt
            .query_map(params![stale_cutoff, now], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Live rows of a workspace, optionally narrowed to one user.
    pub fn list_live(
        conn: &Connection,
        workspace_id: &str,
        user_id: Option<&str>,
    ) -> Result<Vec<SessionRow>> {
        let mut sql = format!(
            "SELECT {SESSION_COLUMNS} FROM device_sessions
             WHERE workspace_id = ?1 AND status <> 'OFFLINE'"
        );
        if user_id.is_some() {
            sql.push_str(" AND user_id = ?2");
        }
        sql.push_str(" ORDER BY connected_at ASC");

        let mut stmt = conn.prepare(&sql)?;
        let rows = match user_id {
            Some(user) => stmt
                .query_map(params![workspace_id, user], Self::map_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?,
            None => stmt
                .query_map(params![workspace_id], Self::map_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }

    /// Live rows of a workspace whose device is not `exclude_device`.
    pub fn list_reachable(
        conn: &Connection,
        workspace_id: &str,
        exclude_device: &str,
    ) -> Result<Vec<SessionRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM device_sessions
             WHERE workspace_id = ?1 AND status <> 'OFFLINE' AND device_id <> ?2
             ORDER BY connected_at ASC"
        ))?;
        let rows = stmt
            .query_map(params![workspace_id, exclude_device], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Count live rows in a workspace.
    pub fn count_live(conn: &Connection, workspace_id: &str) -> Result<i64> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM device_sessions WHERE workspace_id = ?1 AND status <> 'OFFLINE'",
            params![workspace_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Count rows of a device with the given status.
    pub fn count_device_status(
        conn: &Connection,
        workspace_id: &str,
        user_id: &str,
        device_id: &str,
        status: DeviceStatus,
    ) -> Result<i64> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM device_sessions
             WHERE workspace_id = ?1 AND user_id = ?2 AND device_id = ?3 AND status = ?4",
            params![workspace_id, user_id, device_id, status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Delete OFFLINE rows disconnected before `cutoff`.
    pub fn delete_offline_before(conn: &Connection, cutoff: &str) -> Result<usize> {
        let deleted = conn.execute(
            "DELETE FROM device_sessions WHERE status = 'OFFLINE' AND disconnected_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
        Ok(SessionRow {
            id: row.get(0)?,
            connection_id: row.get(1)?,
            workspace_id: row.get(2)?,
            user_id: row.get(3)?,
            device_id: row.get(4)?,
            device_name: row.get(5)?,
            user_agent: row.get(6)?,
            status: row.get(7)?,
            last_heartbeat: row.get(8)?,
            connected_at: row.get(9)?,
            disconnected_at: row.get(10)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
