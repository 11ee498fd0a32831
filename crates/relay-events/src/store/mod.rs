//! High-level store API.
//!
//! [`EventStore`] owns the workspace event log and its sequencer;
//! [`SessionStore`] owns the presence table. Both wrap the same connection
//! pool and compose repository calls into single `SQLite` transactions, so
//! callers never see partial state.

mod event_store;
mod session_store;

pub use event_store::*;
pub use session_store::*;
