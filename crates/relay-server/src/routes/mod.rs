//! HTTP handlers.

pub mod events;
pub mod sessions;
pub mod ws;
