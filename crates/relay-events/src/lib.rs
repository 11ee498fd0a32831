//! # relay-events
//!
//! Durable state for workspace change propagation, on `SQLite`.
//!
//! - **Sequencer**: per-workspace counter row incremented atomically inside
//!   the append transaction, so every event gets a strictly increasing
//!   sequence number and an aborted append leaves at most a gap
//! - **Event store**: append, ordered catch-up reads, consumed bookkeeping
//!   and retention pruning
//! - **Session store**: the presence table (one row per live connection),
//!   with atomic supersession, heartbeats and sweeper transitions
//! - **`SQLite` backend**: `r2d2` pool, version-tracked migrations and
//!   stateless repositories

#![deny(unsafe_code)]

pub mod errors;
pub mod sqlite;
pub mod store;
pub mod types;

pub use errors::{EventStoreError, Result};
pub use sqlite::{ConnectionConfig, ConnectionPool, new_file, new_in_memory, run_migrations};
pub use store::{EventStore, SessionStore};
pub use types::*;
