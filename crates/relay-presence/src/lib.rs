//! # relay-presence
//!
//! Who is reachable right now, per workspace.
//!
//! - **Registry**: connect (with supersession), heartbeat and disconnect on
//!   top of the session table, plus status-change notifications
//! - **Policy**: the idle and stale thresholds that drive ONLINE → AWAY →
//!   OFFLINE
//! - **Sweeper**: background task applying the thresholds and running the
//!   retention prune
//! - **User agent**: default device labels derived from `User-Agent`

#![deny(unsafe_code)]

pub mod policy;
pub mod registry;
pub mod sweeper;
pub mod user_agent;

pub use policy::PresencePolicy;
pub use registry::{PresenceRegistry, StatusChange};
pub use sweeper::{RetentionPolicy, RetentionReport, SweepReport, Sweeper};
