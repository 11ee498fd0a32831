//! WebSocket session lifecycle: one device from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use relay_events::NewSession;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::keepalive::{KeepaliveResult, run_keepalive};
use super::messages::{ClientMessage, ServerMessage};
use crate::errors::{ApiError, INVALID_PARAMS, blocking};
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL};
use crate::server::AppState;

/// How long the writer gets to flush queued frames and the Close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Handshake inputs, from the query string or gateway headers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectParams {
    /// Workspace to join.
    pub workspace_id: String,
    /// Connecting user.
    pub user_id: String,
    /// Stable device identifier.
    pub device_id: String,
    /// Optional label.
    pub device_name: Option<String>,
    /// Raw `User-Agent`, for deriving a label.
    pub user_agent: Option<String>,
}

impl ConnectParams {
    fn as_new_session(&self) -> NewSession<'_> {
        NewSession {
            workspace_id: &self.workspace_id,
            user_id: &self.user_id,
            device_id: &self.device_id,
            device_name: self.device_name.as_deref(),
            user_agent: self.user_agent.as_deref(),
        }
    }
}

fn error_frame(err: &ApiError) -> ServerMessage {
    ServerMessage::Error {
        code: err.code().to_string(),
        message: err.to_string(),
    }
}

/// Run a WebSocket session for a connected device.
///
/// 1. Performs Connect (superseding the device's previous connection)
/// 2. Registers the live channel, then sends `connection.established` with
///    the workspace's latest sequence
/// 3. Handles `heartbeat` / `disconnect` frames
/// 4. Forwards queued pushes, sends Pings, closes unresponsive sockets
/// 5. Disconnects the presence record on the way out
#[instrument(skip_all, fields(workspace_id = %params.workspace_id, device_id = %params.device_id))]
pub async fn run_ws_session(ws: WebSocket, params: ConnectParams, state: AppState) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let presence = state.presence.clone();
    let connect_params = params.clone();
    let outcome = match blocking(move || presence.connect(&connect_params.as_new_session())).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "connect failed");
            if let Ok(json) = error_frame(&e).to_json() {
                let _ = ws_tx.send(Message::Text(json.into())).await;
            }
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };
    let session = outcome.session;
    let connection_id = session.connection_id.clone();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(state.config.channel_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(
        connection_id.clone(),
        params.workspace_id.clone(),
        params.user_id.clone(),
        params.device_id.clone(),
        send_tx,
    ));
    // Registered before reading the latest sequence: anything appended after
    // the read is pushed into the buffer, anything before is covered by it.
    state.connections.add(Arc::clone(&connection)).await;
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    info!(connection_id, superseded = outcome.superseded.len(), "device connected");

    let events = state.events.clone();
    let workspace_id = params.workspace_id.clone();
    let latest_sequence = match blocking(move || events.latest_sequence(&workspace_id)).await {
        Ok(latest) => latest,
        Err(e) => {
            warn!(error = %e, "failed to read latest sequence");
            0
        }
    };
    let established = ServerMessage::ConnectionEstablished {
        connection_id: connection_id.clone(),
        session_id: session.id.clone(),
        latest_sequence,
    };
    if let Ok(json) = established.to_json() {
        let _ = ws_tx.send(Message::Text(json.into())).await;
    }

    let close = connection.close_token();
    let shutdown = state.shutdown.token();

    let keepalive = {
        let conn = Arc::clone(&connection);
        let interval = state.config.keepalive_interval();
        let timeout = state.config.keepalive_timeout();
        let cancel = close.clone();
        tokio::spawn(async move {
            if run_keepalive(Arc::clone(&conn), interval, timeout, cancel).await
                == KeepaliveResult::TimedOut
            {
                warn!(connection_id = %conn.id, "client unresponsive, closing");
                conn.close();
            }
        })
    };

    let mut outbound = {
        let close = close.clone();
        let ping_every = state.config.keepalive_interval();
        tokio::spawn(async move {
            let mut ping = time::interval(ping_every);
            let _ = ping.tick().await;
            loop {
                tokio::select! {
                    msg = send_rx.recv() => match msg {
                        Some(text) => {
                            if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = ping.tick() => {
                        if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                            break;
                        }
                    }
                    () = close.cancelled() => {
                        while let Ok(text) = send_rx.try_recv() {
                            if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                                break;
                            }
                        }
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        })
    };

    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            () = close.cancelled() => break,
            () = shutdown.cancelled() => break,
        };
        let Some(Ok(msg)) = frame else { break };
        connection.mark_alive();

        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => {
                    debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Heartbeat) => {
                let presence = state.presence.clone();
                let id = connection_id.clone();
                match blocking(move || presence.heartbeat(&id)).await {
                    Ok(_) => {
                        let _ = connection.send_json(&ServerMessage::HeartbeatAck);
                    }
                    Err(ApiError::SessionNotFound(_)) => {
                        let _ = connection.send_json(&ServerMessage::SessionExpired {
                            connection_id: connection_id.clone(),
                        });
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "heartbeat failed");
                        let _ = connection.send_json(&error_frame(&e));
                    }
                }
            }
            Ok(ClientMessage::Disconnect) => {
                debug!(connection_id, "client requested disconnect");
                break;
            }
            Err(e) => {
                let _ = connection.send_json(&ServerMessage::Error {
                    code: INVALID_PARAMS.into(),
                    message: format!("unrecognized frame: {e}"),
                });
            }
        }
    }

    // Clean up
    connection.close();
    if time::timeout(CLOSE_GRACE, &mut outbound).await.is_err() {
        outbound.abort();
    }
    keepalive.abort();
    let _ = state.connections.remove(&connection_id).await;

    let presence = state.presence.clone();
    let id = connection_id.clone();
    match blocking(move || presence.disconnect(&id)).await {
        Ok(_) | Err(ApiError::SessionNotFound(_)) => {}
        Err(e) => warn!(error = %e, "disconnect failed"),
    }
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    info!(
        connection_id,
        age_secs = connection.age().as_secs(),
        dropped = connection.drop_count(),
        "device disconnected"
    );
}
