//! Catch-up pages for reconnecting and polling clients.

use relay_core::constants::{DEFAULT_CATCH_UP_LIMIT, MAX_CATCH_UP_LIMIT};
use relay_events::{EventStore, EventStoreError, FetchOptions, Result, WorkspaceEvent};
use serde::{Deserialize, Serialize};

/// `GET /events` query.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatchUpQuery {
    /// Workspace to read.
    pub workspace_id: String,
    /// Client high-water mark; events after it are returned.
    #[serde(default)]
    pub since: i64,
    /// The caller's own device, whose events are skipped.
    #[serde(default)]
    pub exclude_device: Option<String>,
    /// Page size.
    #[serde(default)]
    pub limit: Option<u32>,
}

/// One page of events in sequence order.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatchUpPage {
    /// Events, ascending by sequence number.
    pub events: Vec<WorkspaceEvent>,
    /// Last returned sequence, or `since` when the page is empty. The next
    /// request's `since`.
    pub highest_sequence: i64,
    /// Whether more events follow this page.
    pub has_more: bool,
}

/// Clamp a requested page size into `[1, MAX_CATCH_UP_LIMIT]`.
pub fn clamp_limit(requested: Option<u32>) -> u32 {
    requested
        .unwrap_or(DEFAULT_CATCH_UP_LIMIT)
        .clamp(1, MAX_CATCH_UP_LIMIT)
}

/// Stateless reader over the event store.
#[derive(Clone)]
pub struct CatchUpService {
    events: EventStore,
}

impl CatchUpService {
    /// Create the service.
    pub fn new(events: EventStore) -> Self {
        Self { events }
    }

    /// Read one page. Blocking.
    pub fn fetch(&self, query: &CatchUpQuery) -> Result<CatchUpPage> {
        if query.workspace_id.trim().is_empty() {
            return Err(EventStoreError::InvalidOperation(
                "workspaceId must not be empty".into(),
            ));
        }
        if query.since < 0 {
            return Err(EventStoreError::InvalidOperation(
                "since must not be negative".into(),
            ));
        }
        let limit = clamp_limit(query.limit);

        let mut events = self.events.fetch_since(&FetchOptions {
            workspace_id: &query.workspace_id,
            since: query.since,
            exclude_device: query.exclude_device.as_deref().filter(|d| !d.is_empty()),
            limit: limit + 1,
        })?;

        let has_more = events.len() > limit as usize;
        events.truncate(limit as usize);
        let highest_sequence = events.last().map_or(query.since, |e| e.sequence_number);

        Ok(CatchUpPage {
            events,
            highest_sequence,
            has_more,
        })
    }
}
