//! Publish, catch-up and acknowledgement over HTTP.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use metrics::counter;
use relay_events::WorkspaceEvent;
use serde::{Deserialize, Serialize};

use crate::catch_up::{CatchUpPage, CatchUpQuery};
use crate::errors::{ApiError, blocking};
use crate::metrics::CATCH_UP_REQUESTS_TOTAL;
use crate::publisher::PublishRequest;
use crate::server::AppState;

/// `POST /events/ack` body. Either one event or a workspace prefix.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckBody {
    /// Workspace whose prefix is acknowledged.
    #[serde(default)]
    pub workspace_id: Option<String>,
    /// Acknowledge every event up to and including this sequence.
    #[serde(default)]
    pub through_sequence: Option<i64>,
    /// Acknowledge a single event.
    #[serde(default)]
    pub event_id: Option<String>,
}

/// `POST /events/ack` response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckResponse {
    /// Events newly flagged consumed.
    pub consumed: usize,
}

/// GET /events
pub async fn catch_up(
    State(state): State<AppState>,
    query: Result<Query<CatchUpQuery>, QueryRejection>,
) -> Result<Json<CatchUpPage>, ApiError> {
    let Query(query) = query?;
    counter!(CATCH_UP_REQUESTS_TOTAL).increment(1);
    let service = state.catch_up.clone();
    let page = blocking(move || service.fetch(&query)).await?;
    Ok(Json(page))
}

/// POST /events
pub async fn publish(
    State(state): State<AppState>,
    body: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<WorkspaceEvent>), ApiError> {
    let Json(request) = body?;
    let event = state.publisher.publish(request).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// POST /events/ack
pub async fn ack(
    State(state): State<AppState>,
    body: Result<Json<AckBody>, JsonRejection>,
) -> Result<Json<AckResponse>, ApiError> {
    let Json(body) = body?;
    let events = state.events.clone();
    let consumed = match body {
        AckBody {
            event_id: Some(event_id),
            ..
        } => usize::from(blocking(move || events.mark_consumed(&event_id)).await?),
        AckBody {
            workspace_id: Some(workspace_id),
            through_sequence: Some(through),
            ..
        } => blocking(move || events.mark_consumed_through(&workspace_id, through)).await?,
        _ => {
            return Err(ApiError::InvalidParams(
                "eventId or workspaceId with throughSequence is required".into(),
            ));
        }
    };
    Ok(Json(AckResponse { consumed }))
}
