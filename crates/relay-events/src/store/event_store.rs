//! Transactional event log API.
//!
//! `append` is the one consistency-critical write path: sequence allocation
//! and the row insert commit together or not at all.

use chrono::{DateTime, Utc};
use relay_core::EventId;
use relay_core::time::{now_rfc3339, to_rfc3339};
use tracing::{debug, info};

use crate::errors::{EventStoreError, Result};
use crate::sqlite::connection::{ConnectionPool, PooledConnection};
use crate::sqlite::repositories::event::EventRepo;
use crate::sqlite::repositories::sequence::SequenceRepo;
use crate::sqlite::row_types::EventRow;
use crate::types::{FetchOptions, NewEvent, WorkspaceEvent};

/// Durable, sequenced workspace event log.
#[derive(Clone)]
pub struct EventStore {
    pool: ConnectionPool,
}

impl EventStore {
    /// Create a new `EventStore` with the given connection pool.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    /// Append an event, assigning the next sequence number of its workspace.
    ///
    /// Lock contention and sequence collisions are reported as
    /// [`EventStoreError::SequenceAllocationConflict`]; any other database
    /// or pool failure as [`EventStoreError::StoreUnavailable`].
    pub fn append(&self, new: &NewEvent<'_>) -> Result<WorkspaceEvent> {
        new.validate()?;
        let event = self
            .append_in_tx(new)
            .map_err(|e| e.on_append(new.workspace_id))?;
        debug!(
            workspace_id = %event.workspace_id,
            sequence = event.sequence_number,
            event_type = %event.event_type,
            "event appended"
        );
        Ok(event)
    }

    fn append_in_tx(&self, new: &NewEvent<'_>) -> Result<WorkspaceEvent> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let sequence = SequenceRepo::next(&tx, new.workspace_id)?;
        let event = WorkspaceEvent {
            id: EventId::new().into_inner(),
            workspace_id: new.workspace_id.to_string(),
            sequence_number: sequence,
            event_type: new.event_type,
            entity_type: new.entity_type.to_string(),
            entity_id: new.entity_id.to_string(),
            payload: new.payload.clone(),
            origin_user_id: new.origin_user_id.to_string(),
            origin_device_id: new.origin_device_id.to_string(),
            consumed: false,
            created_at: now_rfc3339(),
        };
        EventRepo::insert(&tx, &event)?;

        tx.commit()?;
        Ok(event)
    }

    /// Events after `opts.since`, ascending by sequence.
    pub fn fetch_since(&self, opts: &FetchOptions<'_>) -> Result<Vec<WorkspaceEvent>> {
        let conn = self.conn()?;
        EventRepo::fetch_since(&conn, opts)?
            .into_iter()
            .map(EventRow::into_event)
            .collect()
    }

    /// Highest sequence number ever allocated in a workspace (0 if none).
    ///
    /// Unaffected by retention pruning.
    pub fn latest_sequence(&self, workspace_id: &str) -> Result<i64> {
        let conn = self.conn()?;
        SequenceRepo::current(&conn, workspace_id)
    }

    /// Fetch a single event.
    pub fn get_event(&self, event_id: &str) -> Result<WorkspaceEvent> {
        let conn = self.conn()?;
        EventRepo::get_by_id(&conn, event_id)?
            .ok_or_else(|| EventStoreError::EventNotFound(event_id.to_string()))?
            .into_event()
    }

    /// Flag one event as consumed. Returns `false` if it already was.
    pub fn mark_consumed(&self, event_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = EventRepo::mark_consumed(&conn, event_id)?;
        if !changed && EventRepo::get_by_id(&conn, event_id)?.is_none() {
            return Err(EventStoreError::EventNotFound(event_id.to_string()));
        }
        Ok(changed)
    }

    /// Flag every event of a workspace up to `through_sequence` as consumed.
    pub fn mark_consumed_through(
        &self,
        workspace_id: &str,
        through_sequence: i64,
    ) -> Result<usize> {
        if through_sequence < 0 {
            return Err(EventStoreError::InvalidOperation(
                "throughSequence must not be negative".into(),
            ));
        }
        let conn = self.conn()?;
        EventRepo::mark_consumed_through(&conn, workspace_id, through_sequence)
    }

    /// Delete consumed events created before `cutoff`.
    pub fn prune_consumed_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = EventRepo::delete_consumed_before(&conn, &to_rfc3339(cutoff))?;
        if deleted > 0 {
            info!(deleted, cutoff = %cutoff, "pruned consumed events");
        }
        Ok(deleted)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::connection::{ConnectionConfig, new_in_memory};
    use crate::sqlite::migrations::run_migrations;
    use crate::types::EventType;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use serde_json::{Value, json};

    fn setup() -> EventStore {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        {
            let conn = pool.get().unwrap();
            let _ = run_migrations(&conn).unwrap();
        }
        EventStore::new(pool)
    }

    fn new_event<'a>(ws: &'a str, device: &'a str, payload: &'a Value) -> NewEvent<'a> {
        NewEvent {
            workspace_id: ws,
            event_type: EventType::OrderCreated,
            entity_type: "order",
            entity_id: "o-1",
            payload,
            origin_user_id: "u-1",
            origin_device_id: device,
        }
    }

    fn fetch<'a>(ws: &'a str, since: i64, exclude: Option<&'a str>) -> FetchOptions<'a> {
        FetchOptions {
            workspace_id: ws,
            since,
            exclude_device: exclude,
            limit: 100,
        }
    }

    #[test]
    fn append_assigns_consecutive_sequences() {
        let store = setup();
        let payload = json!({"total": 10});
        let first = store.append(&new_event("W1", "A", &payload)).unwrap();
        let second = store.append(&new_event("W1", "A", &payload)).unwrap();
        assert_eq!(first.sequence_number, 1);
        assert_eq!(second.sequence_number, 2);
        assert!(first.id.starts_with("evt_"));
        assert!(!first.consumed);
        assert_eq!(store.latest_sequence("W1").unwrap(), 2);
    }

    #[test]
    fn sequences_are_per_workspace() {
        let store = setup();
        let payload = json!({});
        let _ = store.append(&new_event("W1", "A", &payload)).unwrap();
        let _ = store.append(&new_event("W1", "A", &payload)).unwrap();
        let other = store.append(&new_event("W2", "A", &payload)).unwrap();
        assert_eq!(other.sequence_number, 1);
        assert_eq!(store.latest_sequence("W3").unwrap(), 0);
    }

    #[test]
    fn append_rejects_blank_fields() {
        let store = setup();
        let payload = json!({});
        let err = store.append(&new_event("W1", "", &payload)).unwrap_err();
        assert_matches!(err, EventStoreError::InvalidOperation(_));
        assert_eq!(store.latest_sequence("W1").unwrap(), 0);
    }

    #[test]
    fn stored_event_roundtrips() {
        let store = setup();
        let payload = json!({"lines": [1, 2, 3]});
        let appended = store.append(&new_event("W1", "A", &payload)).unwrap();
        let fetched = store.get_event(&appended.id).unwrap();
        assert_eq!(fetched, appended);
        assert_matches!(store.get_event("evt_missing"), Err(EventStoreError::EventNotFound(_)));
    }

    #[test]
    fn catch_up_scenario() {
        // A writes, B is live, C reconnects with since = n - 1.
        let store = setup();
        let payload = json!({});
        let _ = store.append(&new_event("W1", "B", &payload)).unwrap();
        let event = store.append(&new_event("W1", "A", &payload)).unwrap();
        let n = event.sequence_number;

        let page = store.fetch_since(&fetch("W1", n - 1, Some("C"))).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, event.id);

        let own = store.fetch_since(&fetch("W1", n - 1, Some("A"))).unwrap();
        assert!(own.is_empty());
    }

    #[test]
    fn mark_consumed_reports_missing() {
        let store = setup();
        let payload = json!({});
        let event = store.append(&new_event("W1", "A", &payload)).unwrap();
        assert!(store.mark_consumed(&event.id).unwrap());
        assert!(!store.mark_consumed(&event.id).unwrap());
        assert_matches!(store.mark_consumed("evt_x"), Err(EventStoreError::EventNotFound(_)));
    }

    #[test]
    fn mark_consumed_through_rejects_negative() {
        let store = setup();
        assert_matches!(
            store.mark_consumed_through("W1", -1),
            Err(EventStoreError::InvalidOperation(_))
        );
    }

    #[test]
    fn prune_keeps_unconsumed_and_recent() {
        let store = setup();
        let payload = json!({});
        for _ in 0..3 {
            let _ = store.append(&new_event("W1", "A", &payload)).unwrap();
        }
        let _ = store.mark_consumed_through("W1", 2).unwrap();

        // Everything was created just now, so a cutoff in the past prunes nothing.
        assert_eq!(store.prune_consumed_before(Utc::now() - Duration::days(30)).unwrap(), 0);
        // A cutoff in the future removes only the consumed rows.
        assert_eq!(store.prune_consumed_before(Utc::now() + Duration::days(1)).unwrap(), 2);
        let left = store.fetch_since(&fetch("W1", 0, None)).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].sequence_number, 3);
        // The high-water mark survives pruning.
        assert_eq!(store.latest_sequence("W1").unwrap(), 3);
        let next = store.append(&new_event("W1", "A", &payload)).unwrap();
        assert_eq!(next.sequence_number, 4);
    }
}
