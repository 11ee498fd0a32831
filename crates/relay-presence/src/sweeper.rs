//! Staleness sweeper.
//!
//! Background task with two cadences: every sweep interval it expires stale
//! connections and then marks idle ones AWAY; every prune interval it runs
//! retention (consumed events, old OFFLINE history). Each pass is a set of
//! conditional updates, so running it again, or concurrently with
//! heartbeats, is harmless: a heartbeat that lands first simply leaves the
//! row outside the cutoff.

use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use relay_core::time::days_before;
use relay_events::{EventStore, Result};
use relay_settings::RetentionSettings;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::registry::PresenceRegistry;

/// How long consumed events and OFFLINE history are kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Consumed events older than this many days are deleted.
    pub event_retention_days: u32,
    /// OFFLINE records disconnected more than this many days ago are deleted.
    pub session_history_days: u32,
}

impl RetentionPolicy {
    /// Build from validated settings.
    pub fn from_settings(settings: &RetentionSettings) -> Self {
        Self {
            event_retention_days: settings.event_retention_days,
            session_history_days: settings.session_history_days,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from_settings(&RetentionSettings::default())
    }
}

/// Transitions applied by one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// ONLINE → AWAY.
    pub away: usize,
    /// ONLINE/AWAY → OFFLINE.
    pub offline: usize,
}

/// Rows removed by one retention pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Consumed events deleted.
    pub events_pruned: usize,
    /// OFFLINE session records deleted.
    pub sessions_purged: usize,
}

/// Periodic presence sweeper and retention runner.
#[derive(Clone)]
pub struct Sweeper {
    registry: PresenceRegistry,
    events: EventStore,
    retention: RetentionPolicy,
    sweep_interval: Duration,
    prune_interval: Duration,
}

impl Sweeper {
    /// Create a sweeper.
    pub fn new(
        registry: PresenceRegistry,
        events: EventStore,
        retention: RetentionPolicy,
        sweep_interval: Duration,
        prune_interval: Duration,
    ) -> Self {
        Self {
            registry,
            events,
            retention,
            sweep_interval,
            prune_interval,
        }
    }

    /// One sweep at `now`. Stale connections go first, so a connection
    /// past both thresholds goes straight to OFFLINE.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let offline = self.registry.expire_stale_at(now)?.len();
        let away = self.registry.mark_idle_at(now)?.len();
        Ok(SweepReport { away, offline })
    }

    /// One retention pass at `now`.
    pub fn retention_at(&self, now: DateTime<Utc>) -> Result<RetentionReport> {
        let events_pruned = self
            .events
            .prune_consumed_before(days_before(now, self.retention.event_retention_days))?;
        let sessions_purged = self
            .registry
            .store()
            .purge_offline_before(days_before(now, self.retention.session_history_days))?;
        Ok(RetentionReport {
            events_pruned,
            sessions_purged,
        })
    }

    /// Spawn [`Self::run`] on the runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Run until `cancel` fires. Store failures are logged; the loop keeps
    /// going.
    #[tracing::instrument(skip_all, name = "sweeper")]
    pub async fn run(self, cancel: CancellationToken) {
        let mut sweep = time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut prune = time::interval(self.prune_interval);
        prune.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let policy = self.registry.policy();
        info!(
            sweep_secs = self.sweep_interval.as_secs(),
            prune_secs = self.prune_interval.as_secs(),
            idle_secs = policy.idle_threshold.as_secs(),
            stale_secs = policy.stale_threshold.as_secs(),
            "sweeper started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("sweeper stopped");
                    return;
                }
                _ = sweep.tick() => self.sweep_once().await,
                _ = prune.tick() => self.retention_once().await,
            }
        }
    }

    async fn sweep_once(&self) {
        let this = self.clone();
        match tokio::task::spawn_blocking(move || this.sweep_at(Utc::now())).await {
            Ok(Ok(report)) => {
                if report.away > 0 || report.offline > 0 {
                    debug!(away = report.away, offline = report.offline, "sweep applied");
                }
                counter!("relay_sweeper_transitions_total", "status" => "AWAY")
                    .increment(report.away as u64);
                counter!("relay_sweeper_transitions_total", "status" => "OFFLINE")
                    .increment(report.offline as u64);
            }
            Ok(Err(e)) => warn!(error = %e, "sweep failed"),
            Err(e) => error!(error = %e, "sweep task panicked"),
        }
    }

    async fn retention_once(&self) {
        let this = self.clone();
        match tokio::task::spawn_blocking(move || this.retention_at(Utc::now())).await {
            Ok(Ok(report)) => {
                info!(
                    events_pruned = report.events_pruned,
                    sessions_purged = report.sessions_purged,
                    "retention pass complete"
                );
                counter!("relay_retention_pruned_total")
                    .increment((report.events_pruned + report.sessions_purged) as u64);
            }
            Ok(Err(e)) => warn!(error = %e, "retention pass failed"),
            Err(e) => error!(error = %e, "retention task panicked"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
