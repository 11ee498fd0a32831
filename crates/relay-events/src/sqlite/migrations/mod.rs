//! Versioned schema for the event log and presence tables.
//!
//! SQL files are embedded with [`include_str!`] and applied in order, one
//! transaction each. `schema_version` records what has run, so calling
//! [`run_migrations`] on an up-to-date database does nothing.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::{EventStoreError, Result};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Workspace event log and sequence counters",
        sql: include_str!("v001_event_log.sql"),
    },
    Migration {
        version: 2,
        description: "Device presence sessions",
        sql: include_str!("v002_device_sessions.sql"),
    },
];

/// Apply every pending migration and return how many ran.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    ensure_version_table(conn)?;
    let current = current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );
        apply_migration(conn, migration)?;
        applied += 1;
    }
    debug!(applied, version = current + applied, "schema up to date");
    Ok(applied)
}

/// Highest applied version, 0 on a fresh database.
pub fn current_version(conn: &Connection) -> Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(failed("reading schema_version"))
}

/// Newest version compiled into this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

fn failed(context: impl std::fmt::Display) -> impl FnOnce(rusqlite::Error) -> EventStoreError {
    move |e| EventStoreError::Migration {
        message: format!("{context}: {e}"),
    }
}

fn ensure_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
           version     INTEGER PRIMARY KEY,
           applied_at  TEXT    NOT NULL,
           description TEXT
         );",
    )
    .map_err(failed("creating schema_version"))
}

/// Schema change and version row commit together.
fn apply_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    let v = migration.version;
    let tx = conn
        .unchecked_transaction()
        .map_err(failed(format!("v{v}: begin")))?;
    tx.execute_batch(migration.sql)
        .map_err(failed(format!("v{v} ({})", migration.description)))?;
    let _ = tx
        .execute(
            "INSERT INTO schema_version (version, applied_at, description) VALUES (?1, ?2, ?3)",
            rusqlite::params![v, relay_core::time::now_rfc3339(), migration.description],
        )
        .map_err(failed(format!("v{v}: record version")))?;
    tx.commit().map_err(failed(format!("v{v}: commit")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;

    fn open_memory() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            == 1
    }

    #[test]
    fn fresh_database_applies_all() {
        let conn = open_memory();
        let applied = run_migrations(&conn).unwrap();
        assert_eq!(applied, latest_version());
        assert_eq!(current_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn creates_expected_tables() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();
        assert!(table_exists(&conn, "workspace_events"));
        assert!(table_exists(&conn, "workspace_sequences"));
        assert!(table_exists(&conn, "device_sessions"));
    }

    #[test]
    fn idempotent() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();
        assert_eq!(run_migrations(&conn).unwrap(), 0);
    }

    #[test]
    fn sequence_is_unique_per_workspace() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();
        let insert = "INSERT INTO workspace_events (id, workspace_id, sequence_number, event_type,
                      entity_type, entity_id, payload, origin_user_id, origin_device_id, created_at)
                      VALUES (?1, ?2, 1, 'ORDER_CREATED', 'order', 'o1', '{}', 'u', 'd', 'now')";
        conn.execute(insert, ["e1", "W1"]).unwrap();
        conn.execute(insert, ["e2", "W2"]).unwrap();
        assert!(conn.execute(insert, ["e3", "W1"]).is_err());
    }

    #[test]
    fn one_live_session_per_device() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();
        let insert = "INSERT INTO device_sessions (id, connection_id, workspace_id, user_id,
                      device_id, status, last_heartbeat, connected_at)
                      VALUES (?1, ?2, 'W', 'u', 'd', ?3, 't', 't')";
        conn.execute(insert, ["s1", "c1", "OFFLINE"]).unwrap();
        conn.execute(insert, ["s2", "c2", "ONLINE"]).unwrap();
        assert!(conn.execute(insert, ["s3", "c3", "AWAY"]).is_err());
    }

    #[test]
    fn rejects_unknown_status() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO device_sessions (id, connection_id, workspace_id, user_id, device_id,
             status, last_heartbeat, connected_at)
             VALUES ('s', 'c', 'W', 'u', 'd', 'IDLE', 't', 't')",
            [],
        );
        assert!(result.is_err());
    }
}
