//! Presence over HTTP, for polling clients without a socket.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, StatusCode};
use relay_events::{DeviceSession, NewSession};
use serde::{Deserialize, Serialize};

use crate::errors::{ApiError, blocking};
use crate::server::AppState;

/// `POST /sessions/connect` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectBody {
    /// Workspace to join.
    pub workspace_id: String,
    /// Connecting user.
    pub user_id: String,
    /// Stable device identifier.
    pub device_id: String,
    /// Optional label.
    #[serde(default)]
    pub device_name: Option<String>,
}

/// `POST /sessions/connect` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    /// New connection ID.
    pub connection_id: String,
    /// The presence record.
    pub session: DeviceSession,
}

/// Body of heartbeat and disconnect.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionBody {
    /// Connection to act on.
    pub connection_id: String,
}

/// `GET /sessions` query.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsQuery {
    /// Workspace to list.
    pub workspace_id: String,
    /// Restrict to one user.
    #[serde(default)]
    pub user_id: Option<String>,
}

/// `GET /sessions` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsResponse {
    /// ONLINE and AWAY sessions.
    pub sessions: Vec<DeviceSession>,
    /// Number of sessions.
    pub count: usize,
}

/// POST /sessions/connect
pub async fn connect(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ConnectBody>, JsonRejection>,
) -> Result<Json<ConnectResponse>, ApiError> {
    let Json(body) = body?;
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let presence = state.presence.clone();
    let outcome = blocking(move || {
        presence.connect(&NewSession {
            workspace_id: &body.workspace_id,
            user_id: &body.user_id,
            device_id: &body.device_id,
            device_name: body.device_name.as_deref(),
            user_agent: user_agent.as_deref(),
        })
    })
    .await?;
    Ok(Json(ConnectResponse {
        connection_id: outcome.session.connection_id.clone(),
        session: outcome.session,
    }))
}

/// POST /sessions/heartbeat
pub async fn heartbeat(
    State(state): State<AppState>,
    body: Result<Json<ConnectionBody>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(body) = body?;
    let presence = state.presence.clone();
    let _ = blocking(move || presence.heartbeat(&body.connection_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /sessions/disconnect
pub async fn disconnect(
    State(state): State<AppState>,
    body: Result<Json<ConnectionBody>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(body) = body?;
    let presence = state.presence.clone();
    let _ = blocking(move || presence.disconnect(&body.connection_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /sessions
pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<SessionsQuery>, QueryRejection>,
) -> Result<Json<SessionsResponse>, ApiError> {
    let Query(query) = query?;
    let presence = state.presence.clone();
    let sessions = blocking(move || match query.user_id.as_deref() {
        Some(user_id) => presence.active_sessions_by_user(&query.workspace_id, user_id),
        None => presence.active_sessions(&query.workspace_id),
    })
    .await?;
    Ok(Json(SessionsResponse {
        count: sessions.len(),
        sessions,
    }))
}
