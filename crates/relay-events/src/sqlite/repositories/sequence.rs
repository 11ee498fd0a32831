//! Per-workspace sequence counters.
//!
//! One row per workspace in `workspace_sequences`. [`SequenceRepo::next`]
//! increments it with a single upsert, which takes the database write lock;
//! concurrent appenders to the same workspace therefore serialize on it.
//! Must be called inside the transaction that inserts the event: a rollback
//! then undoes the increment together with the insert, and no reader ever
//! sees a sequence number without its event.

use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;

/// Stateless counter operations.
pub struct SequenceRepo;

impl SequenceRepo {
    /// Allocate the next sequence number for `workspace_id`. Starts at 1.
    pub fn next(conn: &Connection, workspace_id: &str) -> Result<i64> {
        let sequence = conn.query_row(
            "INSERT INTO workspace_sequences (workspace_id, last_sequence) VALUES (?1, 1)
             ON CONFLICT (workspace_id) DO UPDATE SET last_sequence = last_sequence + 1
             RETURNING last_sequence",
            params![workspace_id],
            |row| row.get(0),
        )?;
        Ok(sequence)
    }

    /// The last allocated sequence number, or 0 for an unknown workspace.
    pub fn current(conn: &Connection, workspace_id: &str) -> Result<i64> {
        let sequence = conn
            .query_row(
                "SELECT last_sequence FROM workspace_sequences WHERE workspace_id = ?1",
                params![workspace_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(sequence.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::migrations::run_migrations;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        let _ = run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn starts_at_one() {
        let conn = setup();
        assert_eq!(SequenceRepo::current(&conn, "W1").unwrap(), 0);
        assert_eq!(SequenceRepo::next(&conn, "W1").unwrap(), 1);
        assert_eq!(SequenceRepo::current(&conn, "W1").unwrap(), 1);
    }

    #[test]
    fn increments() {
        let conn = setup();
        let seqs: Vec<i64> = (0..5).map(|_| SequenceRepo::next(&conn, "W1").unwrap()).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn workspaces_are_independent() {
        let conn = setup();
        assert_eq!(SequenceRepo::next(&conn, "W1").unwrap(), 1);
        assert_eq!(SequenceRepo::next(&conn, "W1").unwrap(), 2);
        assert_eq!(SequenceRepo::next(&conn, "W2").unwrap(), 1);
    }

    #[test]
    fn rollback_does_not_reuse_numbers_visibly() {
        let conn = setup();
        assert_eq!(SequenceRepo::next(&conn, "W1").unwrap(), 1);
        {
            let tx = conn.unchecked_transaction().unwrap();
            assert_eq!(SequenceRepo::next(&tx, "W1").unwrap(), 2);
            // dropped without commit
        }
        // The counter rolled back with the transaction, so 2 is handed out
        // again; no event with 2 was ever visible.
        assert_eq!(SequenceRepo::next(&conn, "W1").unwrap(), 2);
    }
}
