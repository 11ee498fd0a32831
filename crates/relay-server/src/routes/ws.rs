//! `GET /ws` upgrade.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;
use axum::response::Response;
use serde::Deserialize;

use crate::errors::ApiError;
use crate::server::AppState;
use crate::websocket::session::{ConnectParams, run_ws_session};

/// Workspace header set by the upstream gateway.
pub const WORKSPACE_HEADER: &str = "x-workspace-id";
/// User header set by the upstream gateway.
pub const USER_HEADER: &str = "x-user-id";
/// Device header.
pub const DEVICE_HEADER: &str = "x-device-id";

/// Handshake query string.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    workspace_id: Option<String>,
    user_id: Option<String>,
    device_id: Option<String>,
    device_name: Option<String>,
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

fn required(
    value: Option<String>,
    headers: &HeaderMap,
    header_name: &str,
    field: &str,
) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .or_else(|| header(headers, header_name))
        .ok_or_else(|| ApiError::InvalidParams(format!("{field} is required")))
}

/// Merge query parameters with gateway headers. The query wins.
pub fn resolve_params(query: WsQuery, headers: &HeaderMap) -> Result<ConnectParams, ApiError> {
    Ok(ConnectParams {
        workspace_id: required(query.workspace_id, headers, WORKSPACE_HEADER, "workspaceId")?,
        user_id: required(query.user_id, headers, USER_HEADER, "userId")?,
        device_id: required(query.device_id, headers, DEVICE_HEADER, "deviceId")?,
        device_name: query.device_name.filter(|n| !n.trim().is_empty()),
        user_agent: header(headers, USER_AGENT.as_str()),
    })
}

/// GET /ws
pub async fn ws_handler(
    State(state): State<AppState>,
    query: Result<Query<WsQuery>, QueryRejection>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let params = resolve_params(query, &headers)?;
    Ok(ws
        .max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, params, state)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::http::HeaderValue;

    fn query(workspace: Option<&str>, user: Option<&str>, device: Option<&str>) -> WsQuery {
        WsQuery {
            workspace_id: workspace.map(str::to_owned),
            user_id: user.map(str::to_owned),
            device_id: device.map(str::to_owned),
            device_name: None,
        }
    }

    #[test]
    fn query_parameters_resolve() {
        let params =
            resolve_params(query(Some("W1"), Some("u1"), Some("A")), &HeaderMap::new()).unwrap();
        assert_eq!(params.workspace_id, "W1");
        assert_eq!(params.user_id, "u1");
        assert_eq!(params.device_id, "A");
        assert!(params.user_agent.is_none());
    }

    #[test]
    fn headers_fill_missing_parameters() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(WORKSPACE_HEADER, HeaderValue::from_static("W2"));
        let _ = headers.insert(USER_HEADER, HeaderValue::from_static("u2"));
        let _ = headers.insert(USER_AGENT, HeaderValue::from_static("Mozilla/5.0 Chrome/120"));
        let params = resolve_params(query(None, None, Some("B")), &headers).unwrap();
        assert_eq!(params.workspace_id, "W2");
        assert_eq!(params.user_id, "u2");
        assert_eq!(params.user_agent.as_deref(), Some("Mozilla/5.0 Chrome/120"));
    }

    #[test]
    fn query_wins_over_headers() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(WORKSPACE_HEADER, HeaderValue::from_static("W2"));
        let params = resolve_params(query(Some("W1"), Some("u1"), Some("A")), &headers).unwrap();
        assert_eq!(params.workspace_id, "W1");
    }

    #[test]
    fn missing_device_is_rejected() {
        assert_matches!(
            resolve_params(query(Some("W1"), Some("u1"), Some(" ")), &HeaderMap::new()),
            Err(ApiError::InvalidParams(msg)) if msg.contains("deviceId")
        );
    }
}
