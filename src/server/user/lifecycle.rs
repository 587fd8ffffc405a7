use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};

use crate::auth::RequireUser;
use crate::lifecycle;
use crate::server::AppState;
use crate::server::dto::{
    AcceptDefectRequest, CloseDefectRequest, DeleteDefectResponse, RejectDefectRequest,
};
use crate::server::response::{ApiError, ApiResponse};
use crate::types::SoftDelete;

pub async fn start_defect(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let defect =
        lifecycle::start(state.store.as_ref(), &auth.actor, &id).map_err(ApiError::from)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(defect)))
}

pub async fn complete_defect(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let defect =
        lifecycle::complete(state.store.as_ref(), &auth.actor, &id).map_err(ApiError::from)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(defect)))
}

pub async fn accept_defect(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AcceptDefectRequest>,
) -> impl IntoResponse {
    let defect = lifecycle::accept(state.store.as_ref(), &auth.actor, &id, req.comment)
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(defect)))
}

pub async fn reject_defect(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<RejectDefectRequest>,
) -> impl IntoResponse {
    let defect = lifecycle::reject(state.store.as_ref(), &auth.actor, &id, &req.comment)
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(defect)))
}

pub async fn close_defect(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CloseDefectRequest>,
) -> impl IntoResponse {
    let defect = lifecycle::close(state.store.as_ref(), &auth.actor, &id, &req.evidence)
        .map_err(ApiError::from)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(defect)))
}

pub async fn reopen_defect(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let defect =
        lifecycle::reopen(state.store.as_ref(), &auth.actor, &id).map_err(ApiError::from)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(defect)))
}

pub async fn resume_defect(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let defect =
        lifecycle::resume(state.store.as_ref(), &auth.actor, &id).map_err(ApiError::from)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(defect)))
}

pub async fn delete_defect(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let outcome =
        lifecycle::soft_delete(state.store.as_ref(), &auth.actor, &id).map_err(ApiError::from)?;

    let response = match outcome {
        SoftDelete::Deleted(defect) => DeleteDefectResponse {
            status: "deleted",
            defect: Some(defect),
        },
        SoftDelete::AlreadyDeleted => DeleteDefectResponse {
            status: "already_deleted",
            defect: None,
        },
    };

    Ok::<_, ApiError>(Json(ApiResponse::success(response)))
}

pub async fn restore_defect(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let defect =
        lifecycle::restore(state.store.as_ref(), &auth.actor, &id).map_err(ApiError::from)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(defect)))
}
