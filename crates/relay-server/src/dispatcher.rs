//! Fan-out of stored events to live connections.
//!
//! [`Dispatcher::dispatch`] only enqueues. A [`DispatchWorker`] routes each
//! event to a lane owned by its workspace; a lane pushes its events one at a
//! time, so a workspace's pushes leave in the order they were enqueued while
//! a slow device in one workspace never holds up another. Delivery is
//! best-effort: a missing, closed or slow channel counts as a failure and is
//! never retried. Catch-up covers the gap.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use metrics::counter;
use relay_events::{DeviceStatus, WorkspaceEvent};
use relay_presence::{PresenceRegistry, StatusChange};
use relay_settings::DispatchSettings;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics::{DISPATCH_DELIVERIES_TOTAL, DISPATCH_DROPPED_TOTAL, DISPATCH_FAILURES_TOTAL};
use crate::websocket::messages::ServerMessage;
use crate::websocket::registry::ConnectionRegistry;

/// A lane with nothing queued or in flight is retired after this long.
const LANE_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Why a live push did not reach a device. Never surfaced to writers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The device has a presence record but no socket on this server.
    NotConnected,
    /// The socket's writer is gone.
    ChannelClosed,
    /// The outbound buffer stayed full for the whole send timeout.
    Timeout,
}

impl DeliveryFailure {
    /// Metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::ChannelClosed => "channel_closed",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatcher tuning.
#[derive(Clone, Copy, Debug)]
pub struct DispatcherConfig {
    /// Events waiting for fan-out before new ones are dropped. Applies to
    /// the shared queue and to each workspace lane.
    pub queue_capacity: usize,
    /// Longest wait for space in one device's buffer.
    pub send_timeout: Duration,
    /// Forward presence changes to the workspace's other connections.
    pub status_broadcasts: bool,
}

impl DispatcherConfig {
    /// Build from validated settings.
    pub fn from_settings(settings: &DispatchSettings) -> Self {
        Self {
            queue_capacity: settings.queue_capacity,
            send_timeout: settings.send_timeout(),
            status_broadcasts: settings.status_broadcasts,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from_settings(&DispatchSettings::default())
    }
}

/// Result of fanning out one event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct DeliveryReport {
    /// Reachable sessions, origin device excluded.
    pub targets: usize,
    /// Pushes enqueued.
    pub delivered: usize,
    /// Failed pushes by connection ID.
    pub failures: Vec<(String, DeliveryFailure)>,
}

/// Handle used by the publisher. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<WorkspaceEvent>,
}

impl Dispatcher {
    /// Create the queue and its worker.
    ///
    /// The worker subscribes to presence changes here, so none are missed
    /// between construction and [`DispatchWorker::run`].
    pub fn channel(
        config: DispatcherConfig,
        presence: PresenceRegistry,
        connections: Arc<ConnectionRegistry>,
    ) -> (Self, DispatchWorker) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let status_rx = presence.subscribe();
        let worker = DispatchWorker {
            rx,
            status_rx,
            fanout: Fanout {
                presence,
                connections,
                config,
            },
        };
        (Self { tx }, worker)
    }

    /// Enqueue a stored event for fan-out. Never waits.
    ///
    /// Returns `false` if the event was dropped (queue full or worker gone).
    pub fn dispatch(&self, event: WorkspaceEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                dropped(&e.into_inner(), "dispatch queue unavailable");
                false
            }
        }
    }
}

fn dropped(event: &WorkspaceEvent, reason: &'static str) {
    counter!(DISPATCH_DROPPED_TOTAL).increment(1);
    warn!(
        workspace_id = %event.workspace_id,
        sequence = event.sequence_number,
        reason,
        "event left to catch-up"
    );
}

/// Consumer side of the dispatch queue.
pub struct DispatchWorker {
    rx: mpsc::Receiver<WorkspaceEvent>,
    status_rx: broadcast::Receiver<StatusChange>,
    fanout: Fanout,
}

/// Sending half of one workspace's lane.
struct Lane {
    tx: mpsc::Sender<WorkspaceEvent>,
    /// Events queued on or being delivered by the lane.
    pending: Arc<AtomicUsize>,
    last_used: Instant,
}

impl DispatchWorker {
    /// Spawn [`Self::run`] on the runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Route events and presence changes until `cancel` fires or every
    /// [`Dispatcher`] handle is dropped.
    #[tracing::instrument(skip_all, name = "dispatcher")]
    pub async fn run(mut self, cancel: CancellationToken) {
        let config = self.fanout.config;
        info!(
            send_timeout_ms = config.send_timeout.as_millis(),
            status_broadcasts = config.status_broadcasts,
            "dispatcher started"
        );
        let mut lanes: HashMap<String, Lane> = HashMap::new();
        let mut tasks = JoinSet::new();
        let mut reap = tokio::time::interval(LANE_IDLE_TIMEOUT);
        reap.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut status_open = true;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = self.rx.recv() => match event {
                    Some(event) => self.route(event, &mut lanes, &mut tasks, &cancel),
                    None => break,
                },
                change = self.status_rx.recv(), if status_open => match change {
                    Ok(change) => self.fanout.on_status(&change).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "dispatcher lagged behind presence changes");
                    }
                    Err(RecvError::Closed) => status_open = false,
                },
                _ = reap.tick() => {
                    retire_idle_lanes(&mut lanes);
                    while tasks.try_join_next().is_some() {}
                }
            }
        }

        // Dropping the senders lets each lane finish what it already holds.
        lanes.clear();
        while tasks.join_next().await.is_some() {}
        info!("dispatcher stopped");
    }

    fn route(
        &self,
        event: WorkspaceEvent,
        lanes: &mut HashMap<String, Lane>,
        tasks: &mut JoinSet<()>,
        cancel: &CancellationToken,
    ) {
        let lane = lanes
            .entry(event.workspace_id.clone())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(self.fanout.config.queue_capacity.max(1));
                let pending = Arc::new(AtomicUsize::new(0));
                let _ = tasks.spawn(run_lane(
                    self.fanout.clone(),
                    rx,
                    Arc::clone(&pending),
                    cancel.child_token(),
                ));
                debug!(workspace_id = %event.workspace_id, "lane opened");
                Lane {
                    tx,
                    pending,
                    last_used: Instant::now(),
                }
            });
        lane.last_used = Instant::now();

        let _ = lane.pending.fetch_add(1, Ordering::AcqRel);
        if let Err(e) = lane.tx.try_send(event) {
            let _ = lane.pending.fetch_sub(1, Ordering::AcqRel);
            let event = match e {
                TrySendError::Full(event) | TrySendError::Closed(event) => event,
            };
            dropped(&event, "workspace lane full");
        }
    }
}

/// Drop lanes with nothing pending that have not been used for a while.
/// Only the router adds work to a lane, so a zero count cannot race.
fn retire_idle_lanes(lanes: &mut HashMap<String, Lane>) {
    lanes.retain(|workspace_id, lane| {
        let keep = lane.pending.load(Ordering::Acquire) > 0
            || lane.last_used.elapsed() < LANE_IDLE_TIMEOUT;
        if !keep {
            debug!(workspace_id = %workspace_id, "lane retired");
        }
        keep
    });
}

async fn run_lane(
    fanout: Fanout,
    mut rx: mpsc::Receiver<WorkspaceEvent>,
    pending: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let _ = fanout.deliver(&event).await;
        let _ = pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Everything a lane needs to push to devices.
#[derive(Clone)]
struct Fanout {
    presence: PresenceRegistry,
    connections: Arc<ConnectionRegistry>,
    config: DispatcherConfig,
}

impl Fanout {
    /// Push one event to every reachable device of its workspace except the
    /// origin device.
    async fn deliver(&self, event: &WorkspaceEvent) -> DeliveryReport {
        let presence = self.presence.clone();
        let workspace_id = event.workspace_id.clone();
        let origin = event.origin_device_id.clone();
        let targets = match tokio::task::spawn_blocking(move || {
            presence.reachable_sessions(&workspace_id, &origin)
        })
        .await
        {
            Ok(Ok(targets)) => targets,
            Ok(Err(e)) => {
                warn!(
                    workspace_id = %event.workspace_id,
                    error = %e,
                    "failed to resolve fan-out targets"
                );
                return DeliveryReport::default();
            }
            Err(e) => {
                error!(error = %e, "fan-out target lookup panicked");
                return DeliveryReport::default();
            }
        };

        let json = match ServerMessage::WorkspaceEvent(event.clone()).to_json() {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "failed to serialize event");
                return DeliveryReport::default();
            }
        };

        let sends = targets.iter().map(|session| {
            let json = Arc::clone(&json);
            async move {
                let result = match self.connections.get(&session.connection_id).await {
                    Some(conn) if conn.device_id != event.origin_device_id => {
                        conn.send_timeout(json, self.config.send_timeout).await
                    }
                    Some(_) | None => Err(DeliveryFailure::NotConnected),
                };
                (session.connection_id.as_str(), result)
            }
        });

        let mut report = DeliveryReport {
            targets: targets.len(),
            ..DeliveryReport::default()
        };
        for (connection_id, result) in join_all(sends).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(failure) => {
                    counter!(DISPATCH_FAILURES_TOTAL, "reason" => failure.as_str()).increment(1);
                    debug!(
                        connection_id,
                        sequence = event.sequence_number,
                        reason = %failure,
                        "live push failed"
                    );
                    report.failures.push((connection_id.to_string(), failure));
                }
            }
        }
        counter!(DISPATCH_DELIVERIES_TOTAL).increment(report.delivered as u64);
        debug!(
            workspace_id = %event.workspace_id,
            sequence = event.sequence_number,
            targets = report.targets,
            delivered = report.delivered,
            "event fanned out"
        );
        report
    }

    async fn on_status(&self, change: &StatusChange) {
        if change.status == DeviceStatus::Offline {
            if let Some(conn) = self.connections.get(&change.connection_id).await {
                let _ = conn.send_json(&ServerMessage::SessionExpired {
                    connection_id: change.connection_id.clone(),
                });
                conn.close();
                debug!(connection_id = %change.connection_id, "closed expired connection");
            }
        }

        if !self.config.status_broadcasts {
            return;
        }
        let Ok(json) = ServerMessage::PresenceStatus(change.clone()).to_json() else {
            return;
        };
        let json = Arc::new(json);
        for conn in self.connections.workspace_connections(&change.workspace_id).await {
            if conn.id != change.connection_id && !conn.is_closing() {
                let _ = conn.send(Arc::clone(&json));
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
    use crate::websocket::connection::ClientConnection;
    use relay_events::{
        ConnectionConfig, EventType, NewSession, SessionStore, new_in_memory, run_migrations,
    };
    use chrono::{TimeDelta, Utc};
    use relay_presence::PresencePolicy;
    use serde_json::{Value, json};

    struct Harness {
        presence: PresenceRegistry,
        connections: Arc<ConnectionRegistry>,
        worker: DispatchWorker,
        dispatcher: Dispatcher,
    }

    fn harness(config: DispatcherConfig) -> Harness {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        {
            let conn = pool.get().unwrap();
            let _ = run_migrations(&conn).unwrap();
        }
        let presence = PresenceRegistry::new(SessionStore::new(pool), PresencePolicy::default());
        let connections = Arc::new(ConnectionRegistry::new());
        let (dispatcher, worker) =
            Dispatcher::channel(config, presence.clone(), Arc::clone(&connections));
        Harness {
            presence,
            connections,
            worker,
            dispatcher,
        }
    }

    type Socket = (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>);

    /// Connect a device in W1 and open a socket for it.
    async fn open(h: &Harness, device: &str, capacity: usize) -> Socket {
        open_in(h, "W1", device, capacity).await
    }

    async fn open_in(h: &Harness, workspace: &str, device: &str, capacity: usize) -> Socket {
        let outcome = h
            .presence
            .connect(&NewSession {
                workspace_id: workspace,
                user_id: "u1",
                device_id: device,
                device_name: None,
                user_agent: None,
            })
            .unwrap();
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Arc::new(ClientConnection::new(
            outcome.session.connection_id,
            workspace.into(),
            "u1".into(),
            device.into(),
            tx,
        ));
        h.connections.add(Arc::clone(&conn)).await;
        (conn, rx)
    }

    fn event(origin: &str, sequence: i64) -> WorkspaceEvent {
        event_in("W1", origin, sequence)
    }

    fn event_in(workspace: &str, origin: &str, sequence: i64) -> WorkspaceEvent {
        WorkspaceEvent {
            id: format!("evt_{workspace}_{sequence}"),
            workspace_id: workspace.into(),
            sequence_number: sequence,
            event_type: EventType::OrderCreated,
            entity_type: "order".into(),
            entity_id: "o-1".into(),
            payload: json!({}),
            origin_user_id: "u1".into(),
            origin_device_id: origin.into(),
            consumed: false,
            created_at: "2024-01-01T00:00:00.000Z".into(),
        }
    }

    fn frame(rx: &mut mpsc::Receiver<Arc<String>>) -> Option<Value> {
        rx.try_recv().ok().map(|s| serde_json::from_str(&s).unwrap())
    }

    /// Wait for the next `workspace.event` frame, skipping presence frames.
    async fn next_event(rx: &mut mpsc::Receiver<Arc<String>>) -> Value {
        loop {
            let text = rx.recv().await.unwrap();
            let value: Value = serde_json::from_str(&text).unwrap();
            if value["type"] == "workspace.event" {
                return value;
            }
        }
    }

    #[tokio::test]
    async fn origin_device_never_receives_its_event() {
        let h = harness(DispatcherConfig::default());
        let (_a, mut rx_a) = open(&h, "A", 8).await;
        let (_b, mut rx_b) = open(&h, "B", 8).await;

        let report = h.worker.fanout.deliver(&event("A", 1)).await;
        assert_eq!(report.targets, 1);
        assert_eq!(report.delivered, 1);

        let pushed = frame(&mut rx_b).unwrap();
        assert_eq!(pushed["type"], "workspace.event");
        assert_eq!(pushed["data"]["sequenceNumber"], 1);
        assert!(frame(&mut rx_a).is_none());
    }

    #[tokio::test]
    async fn device_without_socket_is_not_connected() {
        let h = harness(DispatcherConfig::default());
        let _ = h
            .presence
            .connect(&NewSession {
                workspace_id: "W1",
                user_id: "u2",
                device_id: "poller",
                device_name: None,
                user_agent: None,
            })
            .unwrap();

        let report = h.worker.fanout.deliver(&event("A", 1)).await;
        assert_eq!(report.targets, 1);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.failures[0].1, DeliveryFailure::NotConnected);
    }

    #[tokio::test(start_paused = true)]
    async fn full_buffer_times_out_without_blocking_others() {
        let h = harness(DispatcherConfig {
            send_timeout: Duration::from_millis(100),
            ..DispatcherConfig::default()
        });
        let (slow, _rx_slow) = open(&h, "slow", 1).await;
        assert!(slow.send(Arc::new("filler".into())));
        let (_fast, mut rx_fast) = open(&h, "fast", 8).await;

        let report = h.worker.fanout.deliver(&event("A", 1)).await;
        assert_eq!(report.targets, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].1, DeliveryFailure::Timeout);
        assert!(frame(&mut rx_fast).is_some());
    }

    #[tokio::test]
    async fn offline_device_is_not_a_target() {
        let h = harness(DispatcherConfig::default());
        let (b, _rx_b) = open(&h, "B", 8).await;
        let _ = h.presence.disconnect(&b.id).unwrap();

        let report = h.worker.fanout.deliver(&event("A", 1)).await;
        assert_eq!(report, DeliveryReport::default());
    }

    #[tokio::test]
    async fn away_device_is_a_target_until_offline() {
        let h = harness(DispatcherConfig::default());
        let (_b, mut rx_b) = open(&h, "B", 8).await;

        let idle = h.presence.mark_idle_at(Utc::now() + TimeDelta::seconds(31)).unwrap();
        assert_eq!(idle[0].status, DeviceStatus::Away);
        let report = h.worker.fanout.deliver(&event("A", 1)).await;
        assert_eq!(report.targets, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(frame(&mut rx_b).unwrap()["data"]["sequenceNumber"], 1);

        let expired = h
            .presence
            .expire_stale_at(Utc::now() + TimeDelta::seconds(121))
            .unwrap();
        assert_eq!(expired[0].status, DeviceStatus::Offline);
        let report = h.worker.fanout.deliver(&event("A", 2)).await;
        assert_eq!(report.targets, 0);
        assert!(frame(&mut rx_b).is_none());
    }

    #[tokio::test]
    async fn full_queue_drops_event() {
        let h = harness(DispatcherConfig {
            queue_capacity: 1,
            ..DispatcherConfig::default()
        });
        assert!(h.dispatcher.dispatch(event("A", 1)));
        assert!(!h.dispatcher.dispatch(event("A", 2)));
    }

    #[tokio::test]
    async fn worker_preserves_append_order() {
        let h = harness(DispatcherConfig::default());
        let (_b, mut rx_b) = open(&h, "B", 64).await;
        let cancel = CancellationToken::new();
        let Harness {
            worker, dispatcher, ..
        } = h;
        let handle = worker.spawn(cancel.clone());

        for seq in 1..=20 {
            assert!(dispatcher.dispatch(event("A", seq)));
        }
        let mut seen = Vec::new();
        while seen.len() < 20 {
            let value = next_event(&mut rx_b).await;
            seen.push(value["data"]["sequenceNumber"].as_i64().unwrap());
        }
        assert_eq!(seen, (1..=20).collect::<Vec<_>>());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stuck_workspace_does_not_delay_others() {
        let send_timeout = Duration::from_millis(500);
        let h = harness(DispatcherConfig {
            send_timeout,
            ..DispatcherConfig::default()
        });
        let (stuck, _rx_stuck) = open_in(&h, "W1", "stuck", 1).await;
        assert!(stuck.send(Arc::new("filler".into())));
        let (_healthy, mut rx_healthy) = open_in(&h, "W2", "healthy", 8).await;

        let cancel = CancellationToken::new();
        let Harness {
            worker, dispatcher, ..
        } = h;
        let handle = worker.spawn(cancel.clone());

        for seq in 1..=10 {
            assert!(dispatcher.dispatch(event_in("W1", "A", seq)));
        }
        let started = std::time::Instant::now();
        assert!(dispatcher.dispatch(event_in("W2", "A", 1)));

        let pushed = tokio::time::timeout(send_timeout, next_event(&mut rx_healthy))
            .await
            .expect("W2 push waited behind W1");
        assert_eq!(pushed["data"]["workspaceId"], "W2");
        assert!(started.elapsed() < send_timeout);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn idle_lane_is_reopened_on_demand() {
        let h = harness(DispatcherConfig::default());
        let (_b, mut rx_b) = open(&h, "B", 8).await;
        let cancel = CancellationToken::new();
        let Harness {
            worker, dispatcher, ..
        } = h;
        let handle = worker.spawn(cancel.clone());

        assert!(dispatcher.dispatch(event("A", 1)));
        assert_eq!(next_event(&mut rx_b).await["data"]["sequenceNumber"], 1);
        tokio::time::sleep(LANE_IDLE_TIMEOUT * 3).await;
        assert!(dispatcher.dispatch(event("A", 2)));
        assert_eq!(next_event(&mut rx_b).await["data"]["sequenceNumber"], 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn superseded_connection_is_closed() {
        let h = harness(DispatcherConfig::default());
        let (old, mut rx_old) = open(&h, "A", 8).await;
        let (_new, _rx_new) = open(&h, "A", 8).await;

        // The second connect emitted OFFLINE for the first connection.
        let Harness { mut worker, .. } = h;
        loop {
            let change = worker.status_rx.try_recv().unwrap();
            if change.connection_id == old.id && change.status == DeviceStatus::Offline {
                worker.fanout.on_status(&change).await;
                break;
            }
        }
        assert!(old.is_closing());
        let mut frames = Vec::new();
        while let Some(value) = frame(&mut rx_old) {
            frames.push(value["type"].as_str().unwrap().to_string());
        }
        assert!(frames.contains(&"session.expired".to_string()));
    }

    #[tokio::test]
    async fn presence_changes_reach_other_connections() {
        let h = harness(DispatcherConfig::default());
        let (_b, mut rx_b) = open(&h, "B", 8).await;
        let change = StatusChange {
            workspace_id: "W1".into(),
            user_id: "u1".into(),
            device_id: "C".into(),
            connection_id: "conn_other".into(),
            status: DeviceStatus::Away,
            device_name: None,
        };
        h.worker.fanout.on_status(&change).await;
        let pushed = frame(&mut rx_b).unwrap();
        assert_eq!(pushed["type"], "presence.status");
        assert_eq!(pushed["data"]["status"], "AWAY");
    }

    #[test]
    fn failure_labels() {
        assert_eq!(DeliveryFailure::NotConnected.as_str(), "not_connected");
        assert_eq!(DeliveryFailure::ChannelClosed.to_string(), "channel_closed");
        assert_eq!(DeliveryFailure::Timeout.as_str(), "timeout");
    }
}
