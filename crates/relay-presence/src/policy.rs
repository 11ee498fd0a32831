//! Presence thresholds.

use std::time::Duration;

use chrono::{DateTime, Utc};
use relay_core::constants::{DEFAULT_IDLE_THRESHOLD_SECS, DEFAULT_STALE_THRESHOLD_SECS};
use relay_core::time::before;
use relay_settings::PresenceSettings;

/// Idle and stale thresholds, measured from the last heartbeat.
///
/// Silence longer than `idle_threshold` makes an ONLINE device AWAY; silence
/// of at least `stale_threshold` makes it OFFLINE.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresencePolicy {
    /// ONLINE → AWAY after this much silence.
    pub idle_threshold: Duration,
    /// ONLINE/AWAY → OFFLINE after this much silence.
    pub stale_threshold: Duration,
}

impl Default for PresencePolicy {
    fn default() -> Self {
        Self {
            idle_threshold: Duration::from_secs(DEFAULT_IDLE_THRESHOLD_SECS),
            stale_threshold: Duration::from_secs(DEFAULT_STALE_THRESHOLD_SECS),
        }
    }
}

impl PresencePolicy {
    /// Build from validated settings.
    pub fn from_settings(settings: &PresenceSettings) -> Self {
        Self {
            idle_threshold: settings.idle_threshold(),
            stale_threshold: settings.stale_threshold(),
        }
    }

    /// Heartbeats strictly before this instant are idle.
    pub fn idle_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        before(now, self.idle_threshold)
    }

    /// Heartbeats at or before this instant are stale.
    pub fn stale_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        before(now, self.stale_threshold)
    }
}
