//! `RelayServer`: Axum HTTP + WebSocket server.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use relay_core::retry::RetryConfig;
use relay_events::EventStore;
use relay_presence::PresenceRegistry;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::catch_up::CatchUpService;
use crate::config::ServerConfig;
use crate::dispatcher::{DispatchWorker, Dispatcher, DispatcherConfig};
use crate::health::{self, HealthResponse};
use crate::metrics;
use crate::publisher::Publisher;
use crate::routes::{events, sessions, ws};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::registry::ConnectionRegistry;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Event log.
    pub events: EventStore,
    /// Presence state machine.
    pub presence: PresenceRegistry,
    /// Write path.
    pub publisher: Publisher,
    /// Catch-up reads.
    pub catch_up: CatchUpService,
    /// Open sockets.
    pub connections: Arc<ConnectionRegistry>,
    /// Listener and socket settings.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The relay server.
pub struct RelayServer {
    state: AppState,
    worker: Mutex<Option<DispatchWorker>>,
}

impl RelayServer {
    /// Wire publisher, dispatcher and catch-up over the given stores.
    pub fn new(
        config: ServerConfig,
        events: EventStore,
        presence: PresenceRegistry,
        dispatch: DispatcherConfig,
        retry: RetryConfig,
    ) -> Self {
        let connections = Arc::new(ConnectionRegistry::new());
        let (dispatcher, worker) =
            Dispatcher::channel(dispatch, presence.clone(), Arc::clone(&connections));
        let state = AppState {
            publisher: Publisher::new(events.clone(), dispatcher, retry),
            catch_up: CatchUpService::new(events.clone()),
            events,
            presence,
            connections,
            config: Arc::new(config),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        };
        Self {
            state,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Serve `/metrics` from this handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws::ws_handler))
            .route("/events", get(events::catch_up).post(events::publish))
            .route("/events/ack", post(events::ack))
            .route("/sessions", get(sessions::list))
            .route("/sessions/connect", post(sessions::connect))
            .route("/sessions/heartbeat", post(sessions::heartbeat))
            .route("/sessions/disconnect", post(sessions::disconnect))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Start the dispatch worker. Only the first call spawns anything.
    pub fn spawn_dispatcher(&self) -> Option<JoinHandle<()>> {
        let worker = self.worker.lock().take()?;
        Some(worker.spawn(self.state.shutdown.token()))
    }

    /// Bind, start the dispatch worker and serve until shutdown.
    ///
    /// The returned handle completes once the listener and the dispatcher
    /// have both stopped.
    pub async fn listen(&self) -> io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener =
            TcpListener::bind((self.state.config.host.as_str(), self.state.config.port)).await?;
        let addr = listener.local_addr()?;
        let dispatcher = self.spawn_dispatcher();
        let app = self.router();
        let token = self.state.shutdown.token();
        info!(%addr, "relay server listening");

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
            if let Some(dispatcher) = dispatcher {
                let _ = dispatcher.await;
            }
            info!("relay server stopped");
        });
        Ok((addr, handle))
    }

    /// Handler state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Write path, for in-process writers.
    pub fn publisher(&self) -> &Publisher {
        &self.state.publisher
    }

    /// Open sockets.
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.state.connections
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.connections.count().await;
    Json(health::health_check(state.start_time, connections))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
