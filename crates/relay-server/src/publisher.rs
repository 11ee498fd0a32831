//! Publish path: validate, append with retry, hand off to fan-out.
//!
//! The append is the only consistency-critical step and is awaited; fan-out
//! is enqueued and never awaited, so a slow device cannot add latency to a
//! writer and a failed push can never fail a publish.
//!
//! Append and enqueue for one workspace run under that workspace's lock, so
//! the dispatcher receives each workspace's events in sequence order.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use relay_core::retry::RetryConfig;
use relay_events::{EventStore, EventStoreError, EventType, NewEvent, WorkspaceEvent};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::metrics::{EVENTS_PUBLISHED_TOTAL, PUBLISH_CONFLICTS_TOTAL};

/// Errors surfaced to the writer.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The request is missing required fields.
    #[error("invalid event: {0}")]
    Invalid(String),
    /// The event could not be made durable. The triggering write must fail.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    /// Sequence allocation kept losing races; the caller may retry.
    #[error("sequence allocation conflict in workspace {workspace_id} after {attempts} attempts")]
    Conflict {
        /// Contended workspace.
        workspace_id: String,
        /// Attempts made, including the first.
        attempts: u32,
    },
    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PublishError {
    fn from_store(err: EventStoreError, workspace_id: &str, attempts: u32) -> Self {
        match err {
            EventStoreError::InvalidOperation(msg) => Self::Invalid(msg),
            e if e.is_retryable() => Self::Conflict {
                workspace_id: workspace_id.to_string(),
                attempts,
            },
            e if e.is_unavailable() => Self::StoreUnavailable(e.to_string()),
            e => Self::Internal(e.to_string()),
        }
    }
}

/// A change reported by the CRUD layer.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    /// Workspace the entity lives in.
    pub workspace_id: String,
    /// Kind of change.
    pub event_type: EventType,
    /// Entity tag; defaults from the event type when it names one.
    #[serde(default)]
    pub entity_type: Option<String>,
    /// Entity identifier.
    pub entity_id: String,
    /// Opaque payload.
    #[serde(default)]
    pub payload: Value,
    /// User who made the change.
    pub origin_user_id: String,
    /// Device that made the change.
    pub origin_device_id: String,
}

impl PublishRequest {
    fn resolve_entity_type(&mut self) -> Result<(), PublishError> {
        if self.entity_type.is_none() {
            self.entity_type = self.event_type.default_entity_type().map(str::to_owned);
        }
        match &self.entity_type {
            Some(_) => Ok(()),
            None => Err(PublishError::Invalid(format!(
                "entityType is required for {}",
                self.event_type
            ))),
        }
    }

    fn as_new_event(&self) -> NewEvent<'_> {
        NewEvent {
            workspace_id: &self.workspace_id,
            event_type: self.event_type,
            entity_type: self.entity_type.as_deref().unwrap_or_default(),
            entity_id: &self.entity_id,
            payload: &self.payload,
            origin_user_id: &self.origin_user_id,
            origin_device_id: &self.origin_device_id,
        }
    }
}

/// Per-workspace publish locks. An entry lives while a publish holds or
/// waits on it.
#[derive(Default)]
struct WorkspaceLocks {
    inner: parking_lot::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl WorkspaceLocks {
    fn acquire(&self, workspace_id: &str) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.inner.lock().entry(workspace_id.to_owned()).or_default())
    }

    fn release(&self, workspace_id: &str, lock: Arc<AsyncMutex<()>>) {
        let mut map = self.inner.lock();
        drop(lock);
        if map
            .get(workspace_id)
            .is_some_and(|held| Arc::strong_count(held) == 1)
        {
            let _ = map.remove(workspace_id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Entry point for writers.
#[derive(Clone)]
pub struct Publisher {
    events: EventStore,
    dispatcher: Dispatcher,
    retry: RetryConfig,
    locks: Arc<WorkspaceLocks>,
}

impl Publisher {
    /// Create a publisher.
    pub fn new(events: EventStore, dispatcher: Dispatcher, retry: RetryConfig) -> Self {
        Self {
            events,
            dispatcher,
            retry,
            locks: Arc::new(WorkspaceLocks::default()),
        }
    }

    /// Append an event and schedule its fan-out.
    ///
    /// Retryable allocation conflicts are retried with backoff up to
    /// `max_retries` times. Returns once the event is durable; delivery
    /// happens afterwards.
    pub async fn publish(
        &self,
        mut request: PublishRequest,
    ) -> Result<WorkspaceEvent, PublishError> {
        request.resolve_entity_type()?;
        let request = Arc::new(request);

        let lock = self.locks.acquire(&request.workspace_id);
        let result = {
            let _guard = lock.lock().await;
            let result = self.append_with_retry(&request).await;
            if let Ok(event) = &result {
                let _ = self.dispatcher.dispatch(event.clone());
            }
            result
        };
        self.locks.release(&request.workspace_id, lock);

        let event = result?;
        counter!(EVENTS_PUBLISHED_TOTAL).increment(1);
        info!(
            workspace_id = %event.workspace_id,
            sequence = event.sequence_number,
            event_type = %event.event_type,
            origin_device_id = %event.origin_device_id,
            "event published"
        );
        Ok(event)
    }

    async fn append_with_retry(
        &self,
        request: &Arc<PublishRequest>,
    ) -> Result<WorkspaceEvent, PublishError> {
        let mut attempt: u32 = 0;
        loop {
            let events = self.events.clone();
            let req = Arc::clone(request);
            let result = tokio::task::spawn_blocking(move || events.append(&req.as_new_event()))
                .await
                .map_err(|e| PublishError::Internal(format!("append task failed: {e}")))?;

            match result {
                Ok(event) => return Ok(event),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    counter!(PUBLISH_CONFLICTS_TOTAL).increment(1);
                    let delay = self.retry.delay_for(attempt);
                    debug!(
                        workspace_id = %request.workspace_id,
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "append conflict, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(workspace_id = %request.workspace_id, error = %e, "publish failed");
                    return Err(PublishError::from_store(
                        e,
                        &request.workspace_id,
                        attempt + 1,
                    ));
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DispatcherConfig;
    use crate::websocket::registry::ConnectionRegistry;
    use assert_matches::assert_matches;
    use relay_events::{
        ConnectionConfig, FetchOptions, SessionStore, new_in_memory, run_migrations,
    };
    use relay_presence::{PresencePolicy, PresenceRegistry};
    use serde_json::json;

    fn setup(queue_capacity: usize) -> (Publisher, EventStore) {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        {
            let conn = pool.get().unwrap();
            let _ = run_migrations(&conn).unwrap();
        }
        let events = EventStore::new(pool.clone());
        let presence = PresenceRegistry::new(SessionStore::new(pool), PresencePolicy::default());
        let (dispatcher, _worker) = Dispatcher::channel(
            DispatcherConfig {
                queue_capacity,
                ..DispatcherConfig::default()
            },
            presence,
            Arc::new(ConnectionRegistry::new()),
        );
        (
            Publisher::new(events.clone(), dispatcher, RetryConfig::default()),
            events,
        )
    }

    fn stored(events: &EventStore) -> usize {
        events
            .fetch_since(&FetchOptions {
                workspace_id: "W1",
                since: 0,
                exclude_device: None,
                limit: 100,
            })
            .unwrap()
            .len()
    }

    fn request(event_type: EventType, entity_type: Option<&str>) -> PublishRequest {
        PublishRequest {
            workspace_id: "W1".into(),
            event_type,
            entity_type: entity_type.map(str::to_owned),
            entity_id: "o-1".into(),
            payload: json!({"total": 42}),
            origin_user_id: "u1".into(),
            origin_device_id: "A".into(),
        }
    }

    #[tokio::test]
    async fn publish_assigns_increasing_sequences() {
        let (publisher, _) = setup(16);
        let first = publisher.publish(request(EventType::OrderCreated, None)).await.unwrap();
        let second = publisher.publish(request(EventType::OrderUpdated, None)).await.unwrap();
        assert_eq!(first.sequence_number, 1);
        assert_eq!(second.sequence_number, 2);
        assert_eq!(first.entity_type, "order");
    }

    #[tokio::test]
    async fn generic_types_need_entity_type() {
        let (publisher, events) = setup(16);
        let err = publisher
            .publish(request(EventType::EntityCreated, None))
            .await
            .unwrap_err();
        assert_matches!(err, PublishError::Invalid(_));
        assert_eq!(stored(&events), 0);

        let event = publisher
            .publish(request(EventType::EntityCreated, Some("supplier")))
            .await
            .unwrap();
        assert_eq!(event.entity_type, "supplier");
    }

    #[tokio::test]
    async fn empty_origin_is_rejected() {
        let (publisher, _) = setup(16);
        let mut req = request(EventType::OrderCreated, None);
        req.origin_device_id = String::new();
        assert_matches!(publisher.publish(req).await, Err(PublishError::Invalid(_)));
    }

    #[tokio::test]
    async fn dropped_fan_out_never_fails_the_writer() {
        // The worker was dropped with `setup`, so every fan-out is dropped.
        let (publisher, events) = setup(1);
        for _ in 0..5 {
            let _ = publisher.publish(request(EventType::OrderCreated, None)).await.unwrap();
        }
        assert_eq!(stored(&events), 5);
    }

    #[tokio::test]
    async fn workspace_locks_are_released() {
        let (publisher, _) = setup(16);
        let _ = publisher.publish(request(EventType::OrderCreated, None)).await.unwrap();
        assert_eq!(publisher.locks.len(), 0);
    }

    #[tokio::test]
    async fn missing_schema_is_store_unavailable() {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        let events = EventStore::new(pool.clone());
        let presence = PresenceRegistry::new(SessionStore::new(pool), PresencePolicy::default());
        let (dispatcher, _worker) = Dispatcher::channel(
            DispatcherConfig::default(),
            presence,
            Arc::new(ConnectionRegistry::new()),
        );
        let publisher = Publisher::new(events, dispatcher, RetryConfig::default());
        assert_matches!(
            publisher.publish(request(EventType::OrderCreated, None)).await,
            Err(PublishError::StoreUnavailable(_))
        );
        assert_eq!(publisher.locks.len(), 0);
    }

    #[test]
    fn request_deserializes_camel_case() {
        let req: PublishRequest = serde_json::from_value(json!({
            "workspaceId": "W1",
            "eventType": "INVOICE_PAID",
            "entityId": "inv-9",
            "originUserId": "u1",
            "originDeviceId": "A"
        }))
        .unwrap();
        assert_eq!(req.event_type, EventType::InvoicePaid);
        assert!(req.entity_type.is_none());
        assert_eq!(req.payload, Value::Null);
    }
}
