//! # relay-server
//!
//! Axum HTTP + `WebSocket` server for workspace change propagation.
//!
//! - **Publish**: validate, append with conflict retry, enqueue fan-out
//! - **Dispatcher**: single worker pushing each event to the workspace's
//!   reachable devices, origin excluded, with a bounded send timeout
//! - **Catch-up**: ordered pages after a client's high-water mark
//! - **`WebSocket` gateway**: handshake, heartbeats, live pushes, presence
//!   notifications, Ping/Pong keepalive
//! - **Ops**: `/health`, Prometheus `/metrics`, graceful shutdown

#![deny(unsafe_code)]

pub mod catch_up;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod publisher;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use catch_up::{CatchUpPage, CatchUpQuery, CatchUpService};
pub use config::ServerConfig;
pub use dispatcher::{DeliveryFailure, Dispatcher, DispatcherConfig};
pub use errors::ApiError;
pub use publisher::{PublishError, PublishRequest, Publisher};
pub use server::{AppState, RelayServer};
pub use shutdown::ShutdownCoordinator;
