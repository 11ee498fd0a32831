//! Workspace event log rows.
//!
//! Events are immutable and append-only; the only mutation is the
//! `consumed` flag. Reads are always ordered by `sequence_number`.

use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::sqlite::row_types::EventRow;
use crate::types::{FetchOptions, WorkspaceEvent};

const EVENT_COLUMNS: &str = "id, workspace_id, sequence_number, event_type, entity_type, entity_id,
     payload, origin_user_id, origin_device_id, consumed, created_at";

/// Stateless; every method takes `&Connection`.
pub struct EventRepo;

impl EventRepo {
    /// Insert a single event row.
    pub fn insert(conn: &Connection, event: &WorkspaceEvent) -> Result<()> {
        let payload = serde_json::to_string(&event.payload)?;
        let _ = conn.execute(
            "INSERT INTO workspace_events (id, workspace_id, sequence_number, event_type,
             entity_type, entity_id, payload, origin_user_id, origin_device_id, consumed,
             created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                event.id,
                event.workspace_id,
                event.sequence_number,
                event.event_type.as_str(),
                event.entity_type,
                event.entity_id,
                payload,
                event.origin_user_id,
                event.origin_device_id,
                i64::from(event.consumed),
                event.created_at,
            ],
        )?;
        Ok(())
    }

    /// Get an event by ID.
    pub fn get_by_id(conn: &Connection, event_id: &str) -> Result<Option<EventRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM workspace_events WHERE id = ?1"),
                params![event_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Events after `opts.since`, ascending by sequence, at most `opts.limit`.
    pub fn fetch_since(conn: &Connection, opts: &FetchOptions<'_>) -> Result<Vec<EventRow>> {
        let mut sql = format!(
            "SELECT {EVENT_COLUMNS} FROM workspace_events
             WHERE workspace_id = ?1 AND sequence_number > ?2"
        );
        if opts.exclude_device.is_some() {
            sql.push_str(" AND origin_device_id <> ?4");
        }
        sql.push_str(" ORDER BY sequence_number ASC LIMIT ?3");

        let mut stmt = conn.prepare(&sql)?;
        let rows = match opts.exclude_device {
            Some(device) => stmt
                .query_map(
                    params![opts.workspace_id, opts.since, opts.limit, device],
                    Self::map_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?,
            None => stmt
                .query_map(params![opts.workspace_id, opts.since, opts.limit], Self::map_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }

    /// Set `consumed` on one event. Returns whether a row changed.
    pub fn mark_consumed(conn: &Connection, event_id: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE workspace_events SET consumed = 1 WHERE id = ?1 AND consumed = 0",
            params![event_id],
        )?;
        Ok(changed > 0)
    }

    /// Set `consumed` on every event of a workspace up to and including
    /// `through_sequence`. Returns the number of rows changed.
    pub fn mark_consumed_through(
        conn: &Connection,
        workspace_id: &str,
        through_sequence: i64,
    ) -> Result<usize> {
        let changed = conn.execute(
            "UPDATE workspace_events SET consumed = 1
             WHERE workspace_id = ?1 AND sequence_number <= ?2 AND consumed = 0",
            params![workspace_id, through_sequence],
        )?;
        Ok(changed)
    }

    /// Delete consumed events created before `cutoff` (RFC 3339).
    pub fn delete_consumed_before(conn: &Connection, cutoff: &str) -> Result<usize> {
        let deleted = conn.execute(
            "DELETE FROM workspace_events WHERE consumed = 1 AND created_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
        Ok(EventRow {
            id: row.get(0)?,
            workspace_id: row.get(1)?,
            sequence_number: row.get(2)?,
            event_type: row.get(3)?,
            entity_type: row.get(4)?,
            entity_id: row.get(5)?,
            payload: row.get(6)?,
            origin_user_id: row.get(7)?,
            origin_device_id: row.get(8)?,
            consumed: row.get(9)?,
            created_at: row.get(10)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
