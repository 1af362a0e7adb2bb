//! One POST route per workspace service method.

use std::future::Future;

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use ide_operator::{
    messages::{EmptyResponse, PodSpaceStatus, QueryOption, WorkspaceInfo, WorkspaceRunningInfo},
    ServiceError,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

pub const PREFIX: &str = "/api/v1/CloudIdeService";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(&format!("{PREFIX}/CreateSpace"), post(create_space))
        .route(&format!("{PREFIX}/StartSpace"), post(start_space))
        .route(&format!("{PREFIX}/StopSpace"), post(stop_space))
        .route(&format!("{PREFIX}/DeleteSpace"), post(delete_space))
        .route(&format!("{PREFIX}/GetPodSpaceStatus"), post(get_pod_space_status))
        .route(&format!("{PREFIX}/GetPodSpaceInfo"), post(get_pod_space_info))
        .route(&format!("{PREFIX}/{{method}}"), post(unimplemented))
}

/// Runs a start-type call on its own task. If the client disconnects, the
/// handler future is dropped, the token fires, and the call still gets to
/// roll the workspace back.
async fn detached<T, Fut>(call: impl FnOnce(CancellationToken) -> Fut) -> ApiResult<T>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T, ServiceError>> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    match tokio::spawn(call(cancel)).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => {
            warn!(error = %e, "service task failed");
            Err(ServiceError::Unknown(e.to_string()).into())
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/CloudIdeService/CreateSpace",
    request_body = WorkspaceInfo,
    responses(
        (status = 200, description = "Workspace created and running", body = WorkspaceRunningInfo),
        (status = 409, description = "Workspace already exists"),
        (status = 500, description = "Workspace could not be created or did not start")
    ),
    tag = "ide-api"
)]
pub async fn create_space(
    State(state): State<AppState>,
    Json(info): Json<WorkspaceInfo>,
) -> ApiResult<Json<WorkspaceRunningInfo>> {
    let service = state.service.clone();
    let running = detached(move |cancel| async move { service.create_space(&info, &cancel).await }).await?;
    Ok(Json(running))
}

#[utoipa::path(
    post,
    path = "/api/v1/CloudIdeService/StartSpace",
    request_body = WorkspaceInfo,
    responses(
        (status = 200, description = "Workspace running", body = WorkspaceRunningInfo),
        (status = 500, description = "Workspace did not start")
    ),
    tag = "ide-api"
)]
pub async fn start_space(
    State(state): State<AppState>,
    Json(info): Json<WorkspaceInfo>,
) -> ApiResult<Json<WorkspaceRunningInfo>> {
    let service = state.service.clone();
    let running = detached(move |cancel| async move { service.start_space(&info, &cancel).await }).await?;
    Ok(Json(running))
}

#[utoipa::path(
    post,
    path = "/api/v1/CloudIdeService/StopSpace",
    request_body = QueryOption,
    responses(
        (status = 200, description = "Workspace set to stop", body = EmptyResponse),
        (status = 404, description = "Workspace not found"),
        (status = 500, description = "Update kept conflicting")
    ),
    tag = "ide-api"
)]
pub async fn stop_space(
    State(state): State<AppState>,
    Json(query): Json<QueryOption>,
) -> ApiResult<Json<EmptyResponse>> {
    Ok(Json(state.service.stop_space(&query).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/CloudIdeService/DeleteSpace",
    request_body = QueryOption,
    responses(
        (status = 200, description = "Workspace deleted or already gone", body = EmptyResponse),
        (status = 500, description = "Delete failed")
    ),
    tag = "ide-api"
)]
pub async fn delete_space(
    State(state): State<AppState>,
    Json(query): Json<QueryOption>,
) -> ApiResult<Json<EmptyResponse>> {
    Ok(Json(state.service.delete_space(&query).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/CloudIdeService/GetPodSpaceStatus",
    request_body = QueryOption,
    responses(
        (status = 200, description = "Pod status", body = PodSpaceStatus),
        (status = 500, description = "Pod could not be read")
    ),
    tag = "ide-api"
)]
pub async fn get_pod_space_status(
    State(state): State<AppState>,
    Json(query): Json<QueryOption>,
) -> ApiResult<Json<PodSpaceStatus>> {
    Ok(Json(state.service.get_pod_space_status(&query).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/CloudIdeService/GetPodSpaceInfo",
    request_body = QueryOption,
    responses(
        (status = 200, description = "Pod endpoint", body = WorkspaceRunningInfo),
        (status = 404, description = "No pod for this workspace")
    ),
    tag = "ide-api"
)]
pub async fn get_pod_space_info(
    State(state): State<AppState>,
    Json(query): Json<QueryOption>,
) -> ApiResult<Json<WorkspaceRunningInfo>> {
    Ok(Json(state.service.get_pod_space_info(&query).await?))
}

async fn unimplemented(Path(method): Path<String>) -> ApiError {
    ServiceError::Unimplemented(method).into()
}
