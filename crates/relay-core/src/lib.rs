//! # relay-core
//!
//! Foundation types and utilities shared by every relay crate.
//!
//! - **Branded IDs**: `EventId`, `SessionId`, `ConnectionId` as prefixed newtypes
//! - **Constants**: presence thresholds, retention windows and catch-up limits
//! - **Logging**: `tracing` subscriber setup (compact or JSON)
//! - **Retry**: exponential backoff math for retryable write conflicts
//! - **Time**: canonical UTC timestamp formatting for persisted rows

#![deny(unsafe_code)]

pub mod constants;
pub mod ids;
pub mod logging;
pub mod retry;
pub mod time;

pub use ids::{ConnectionId, EventId, SessionId};
