use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::Value;
use server_api::groups::INVALID_GROUP_DATA;
use shared::{
    domain::{Event, EventId, Group, GroupId, GroupPatch},
    error::ApiError,
    protocol::{
        DeletedResponse, ErrorBody, EventListQuery, GroupPayload, UpdatedEventResponse,
        UpdatedGroupResponse,
    },
};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::error;

use crate::app_state::AppState;

type HttpError = (StatusCode, Json<ErrorBody>);

const PAYLOAD_TOO_LARGE: &str = "Request body too large";

pub(crate) fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.body_limit_bytes;
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/groups", get(http_list_groups).post(http_create_group))
        .route(
            "/api/groups/:id",
            get(http_get_group)
                .patch(http_update_group)
                .put(http_update_group)
                .delete(http_delete_group),
        )
        .route("/api/events", get(http_list_events).post(http_create_event))
        .route(
            "/api/events/:id",
            get(http_get_event)
                .patch(http_update_event)
                .put(http_update_event)
                .delete(http_delete_event),
        )
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(middleware::map_response(json_payload_too_large))
        .with_state(state)
}

fn reject(err: ApiError) -> HttpError {
    let status = StatusCode::from_u16(err.code.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ErrorBody {
            message: err.message,
        }),
    )
}

fn bad_request(message: impl Into<String>) -> HttpError {
    reject(ApiError::validation(message))
}

fn too_large() -> HttpError {
    (
        StatusCode::PAYLOAD_TOO_LARGE,
        Json(ErrorBody {
            message: PAYLOAD_TOO_LARGE.to_string(),
        }),
    )
}

/// Bodies cut off while streaming keep their 413; anything else is a 400.
fn json_rejection(
    rejection: JsonRejection,
    message: impl FnOnce(&JsonRejection) -> String,
) -> HttpError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        too_large()
    } else {
        bad_request(message(&rejection))
    }
}

/// The limit layer answers oversized `Content-Length` requests with plain text.
async fn json_payload_too_large(response: Response) -> Response {
    if response.status() == StatusCode::PAYLOAD_TOO_LARGE {
        too_large().into_response()
    } else {
        response
    }
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(err) => {
            error!(error = %format!("{err:#}"), "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}

async fn http_list_groups(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Group>>, HttpError> {
    let groups = server_api::list_groups(&state.api).await.map_err(reject)?;
    Ok(Json(groups))
}

async fn http_get_group(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Group>, HttpError> {
    let group = server_api::get_group(&state.api, &GroupId(id))
        .await
        .map_err(reject)?;
    Ok(Json(group))
}

async fn http_create_group(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GroupPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<Group>), HttpError> {
    let Json(payload) =
        payload.map_err(|e| json_rejection(e, |_| INVALID_GROUP_DATA.to_string()))?;
    let group = server_api::create_group(&state.api, payload)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(group)))
}

async fn http_update_group(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    patch: Result<Json<GroupPatch>, JsonRejection>,
) -> Result<Json<UpdatedGroupResponse>, HttpError> {
    let Json(patch) =
        patch.map_err(|e| json_rejection(e, |_| INVALID_GROUP_DATA.to_string()))?;
    let response = server_api::update_group(&state.api, &GroupId(id), patch)
        .await
        .map_err(reject)?;
    Ok(Json(response))
}

async fn http_delete_group(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>, HttpError> {
    let response = server_api::delete_group(&state.api, &GroupId(id))
        .await
        .map_err(reject)?;
    Ok(Json(response))
}

async fn http_list_events(
    State(state): State<Arc<AppState>>,
    Query(q): Query<EventListQuery>,
) -> Result<Json<Vec<Event>>, HttpError> {
    let group_id = q.group_id.map(GroupId);
    let events = server_api::list_events(&state.api, group_id.as_ref())
        .await
        .map_err(reject)?;
    Ok(Json(events))
}

async fn http_get_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Event>, HttpError> {
    let event = server_api::get_event(&state.api, &EventId(id))
        .await
        .map_err(reject)?;
    Ok(Json(event))
}

async fn http_create_event(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<Event>), HttpError> {
    let Json(payload) = payload.map_err(|e| json_rejection(e, JsonRejection::body_text))?;
    let event = server_api::create_event(&state.api, &payload)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn http_update_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<UpdatedEventResponse>, HttpError> {
    let Json(payload) = payload.map_err(|e| json_rejection(e, JsonRejection::body_text))?;
    let response = server_api::update_event(&state.api, &EventId(id), &payload)
        .await
        .map_err(reject)?;
    Ok(Json(response))
}

async fn http_delete_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>, HttpError> {
    let response = server_api::delete_event(&state.api, &EventId(id))
        .await
        .map_err(reject)?;
    Ok(Json(response))
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
