//! Settings types.
//!
//! Every section deserializes with per-field defaults, so a settings file
//! only needs the keys it overrides.

use std::path::PathBuf;
use std::time::Duration;

use relay_core::constants::{
    DEFAULT_IDLE_THRESHOLD_SECS, DEFAULT_PRUNE_INTERVAL_SECS, DEFAULT_RETENTION_DAYS,
    DEFAULT_SESSION_HISTORY_DAYS, DEFAULT_STALE_THRESHOLD_SECS, DEFAULT_SWEEP_INTERVAL_SECS,
};
use relay_core::logging::LogFormat;
use relay_core::retry::RetryConfig;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// HTTP / WebSocket listener.
    pub server: ServerSettings,
    /// Presence thresholds and sweep cadence.
    pub presence: PresenceSettings,
    /// Event and session retention.
    pub retention: RetentionSettings,
    /// Live fan-out.
    pub dispatch: DispatchSettings,
    /// Publish retry policy.
    pub publish: PublishSettings,
    /// Event database.
    pub database: DatabaseSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject combinations the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        let p = &self.presence;
        if p.idle_threshold_secs == 0 {
            return Err(invalid("presence.idle_threshold_secs must be > 0"));
        }
        if p.idle_threshold_secs >= p.stale_threshold_secs {
            return Err(invalid(
                "presence.idle_threshold_secs must be below presence.stale_threshold_secs",
            ));
        }
        if p.sweep_interval_secs == 0 {
            return Err(invalid("presence.sweep_interval_secs must be > 0"));
        }
        if self.retention.prune_interval_secs == 0 {
            return Err(invalid("retention.prune_interval_secs must be > 0"));
        }
        if self.retention.event_retention_days == 0 {
            return Err(invalid("retention.event_retention_days must be > 0"));
        }
        if self.dispatch.queue_capacity == 0 || self.dispatch.channel_capacity == 0 {
            return Err(invalid("dispatch capacities must be > 0"));
        }
        if self.database.pool_size == 0 {
            return Err(invalid("database.pool_size must be > 0"));
        }
        if self.server.keepalive_interval_secs == 0
            || self.server.keepalive_timeout_secs < self.server.keepalive_interval_secs
        {
            return Err(invalid(
                "server.keepalive_timeout_secs must be >= server.keepalive_interval_secs > 0",
            ));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> SettingsError {
    SettingsError::InvalidValue(msg.to_string())
}

// ── Server ──────────────────────────────────────────────────────────────────

/// Server network settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (0 = auto-assign).
    pub port: u16,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Interval between protocol-level Ping frames.
    pub keepalive_interval_secs: u64,
    /// Close a socket that has not answered a Ping for this long.
    pub keepalive_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9850,
            max_message_size: 128 * 1024,
            keepalive_interval_secs: 30,
            keepalive_timeout_secs: 60,
        }
    }
}

// ── Presence ────────────────────────────────────────────────────────────────

/// Presence thresholds. Shared by the registry and the sweeper.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceSettings {
    /// Seconds without heartbeat before ONLINE becomes AWAY.
    pub idle_threshold_secs: u64,
    /// Seconds without heartbeat before a device becomes OFFLINE.
    pub stale_threshold_secs: u64,
    /// Seconds between sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            idle_threshold_secs: DEFAULT_IDLE_THRESHOLD_SECS,
            stale_threshold_secs: DEFAULT_STALE_THRESHOLD_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl PresenceSettings {
    /// Idle threshold as a `Duration`.
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    /// Stale threshold as a `Duration`.
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }

    /// Sweep interval as a `Duration`.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

// ── Retention ───────────────────────────────────────────────────────────────

/// Retention windows for consumed events and OFFLINE presence history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    /// Consumed events older than this many days are pruned.
    pub event_retention_days: u32,
    /// OFFLINE presence records older than this many days are purged.
    pub session_history_days: u32,
    /// Seconds between retention passes.
    pub prune_interval_secs: u64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            event_retention_days: DEFAULT_RETENTION_DAYS,
            session_history_days: DEFAULT_SESSION_HISTORY_DAYS,
            prune_interval_secs: DEFAULT_PRUNE_INTERVAL_SECS,
        }
    }
}

// ── Dispatch ────────────────────────────────────────────────────────────────

/// Live fan-out settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Events waiting for fan-out before new ones are dropped.
    pub queue_capacity: usize,
    /// Per-connection outbound buffer.
    pub channel_capacity: usize,
    /// How long a push may wait for buffer space.
    pub send_timeout_ms: u64,
    /// Forward presence changes to the workspace's live connections.
    pub status_broadcasts: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            channel_capacity: 256,
            send_timeout_ms: 250,
            status_broadcasts: true,
        }
    }
}

impl DispatchSettings {
    /// Send timeout as a `Duration`.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

// ── Publish ─────────────────────────────────────────────────────────────────

/// Retry policy for sequence allocation conflicts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSettings {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base backoff in milliseconds.
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for PublishSettings {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            max_retries: retry.max_retries,
            base_delay_ms: retry.base_delay_ms,
            max_delay_ms: retry.max_delay_ms,
        }
    }
}

impl PublishSettings {
    /// Retry configuration for the publisher.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
            ..RetryConfig::default()
        }
    }
}

// ── Database ────────────────────────────────────────────────────────────────

/// Event database settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Database file. `None` means `~/.relay/relay.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Connection pool size.
    pub pool_size: u32,
    /// `SQLite` busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: None,
            pool_size: 16,
            busy_timeout_ms: 5000,
        }
    }
}

// ── Logging ─────────────────────────────────────────────────────────────────

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive. `RUST_LOG` overrides it.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
