//! WebSocket live channel: connection state, keepalive, frames and the
//! per-socket session loop.

pub mod connection;
pub mod keepalive;
pub mod messages;
pub mod registry;
pub mod session;
