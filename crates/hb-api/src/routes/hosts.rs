use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use hb_db::Host;
use hb_lifecycle::DeleteOutcome;
use uuid::Uuid;

use crate::auth::UserId;
use crate::dto::{CreateHostRequest, HostResponse, StatusResponse};
use crate::error::ApiError;
use crate::state::AppState;

fn respond(state: &AppState, host: Host) -> HostResponse {
    HostResponse::new(host, &state.config.public_host, &state.ssh_user)
}

pub async fn create_host(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Json(req): Json<CreateHostRequest>,
) -> Result<(StatusCode, Json<HostResponse>), ApiError> {
    let accepted = state.lifecycle.create_host(user_id.0, &req.name).await?;

    // The pipeline reports through the record; the handle is only for callers
    // that want to wait.
    drop(accepted.pipeline);

    tracing::info!(host_id = %accepted.host.id, name = %accepted.host.name, "host creation accepted");
    Ok((StatusCode::ACCEPTED, Json(respond(&state, accepted.host))))
}

pub async fn list_hosts(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
) -> Result<Json<Vec<HostResponse>>, ApiError> {
    let hosts = state.lifecycle.list_hosts(user_id.0).await?;
    Ok(Json(hosts.into_iter().map(|h| respond(&state, h)).collect()))
}

pub async fn get_host(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Path(id): Path<Uuid>,
) -> Result<Json<HostResponse>, ApiError> {
    let host = state.lifecycle.get_host(user_id.0, id).await?;
    Ok(Json(respond(&state, host)))
}

pub async fn host_status(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    let status = state.lifecycle.host_status(user_id.0, id).await?;
    Ok(Json(StatusResponse { id, status }))
}

pub async fn start_host(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Path(id): Path<Uuid>,
) -> Result<Json<HostResponse>, ApiError> {
    let host = state.lifecycle.start_host(user_id.0, id).await?;
    Ok(Json(respond(&state, host)))
}

pub async fn stop_host(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Path(id): Path<Uuid>,
) -> Result<Json<HostResponse>, ApiError> {
    let host = state.lifecycle.stop_host(user_id.0, id).await?;
    Ok(Json(respond(&state, host)))
}

pub async fn delete_host(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let outcome = state.lifecycle.delete_host(user_id.0, id).join().await??;
    if outcome == DeleteOutcome::AlreadyAbsent {
        tracing::debug!(host_id = %id, "delete of absent host");
    }
    Ok(StatusCode::NO_CONTENT)
}
