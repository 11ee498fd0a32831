//! Package-level constants and policy defaults.

/// Current version of the relay (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "relay";

/// Seconds without a heartbeat before an ONLINE device is marked AWAY.
pub const DEFAULT_IDLE_THRESHOLD_SECS: u64 = 30;

/// Seconds without a heartbeat before a device is marked OFFLINE.
pub const DEFAULT_STALE_THRESHOLD_SECS: u64 = 120;

/// Interval between staleness sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 15;

/// Consumed events older than this are pruned.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// OFFLINE presence records older than this are purged.
pub const DEFAULT_SESSION_HISTORY_DAYS: u32 = 7;

/// Interval between retention passes (daily).
pub const DEFAULT_PRUNE_INTERVAL_SECS: u64 = 86_400;

/// Catch-up page size when the client does not ask for one.
pub const DEFAULT_CATCH_UP_LIMIT: u32 = 100;

/// Largest catch-up page a client may request.
pub const MAX_CATCH_UP_LIMIT: u32 = 1000;
