use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::RequireUser;
use crate::server::AppState;
use crate::server::dto::CreateCommentRequest;
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};
use crate::types::{DefectComment, NewAuditEntry, Permission};

use super::access::require_permission;

pub async fn list_comments(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    require_permission(&auth.actor, Permission::DEFECT_READ)?;

    let defect = state
        .store
        .get_defect(&id)
        .api_err("Failed to get defect")?
        .or_not_found("Defect not found")?;

    if defect.is_deleted() {
        return Err(ApiError::not_found("Defect not found"));
    }

    let comments = state
        .store
        .list_comments(&defect.id)
        .api_err("Failed to list comments")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(comments)))
}

pub async fn create_comment(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CreateCommentRequest>,
) -> impl IntoResponse {
    require_permission(&auth.actor, Permission::DEFECT_WRITE)?;

    let body = req.body.trim();
    if body.is_empty() {
        return Err(ApiError::bad_request("Comment body cannot be empty"));
    }

    let defect = state
        .store
        .get_defect(&id)
        .api_err("Failed to get defect")?
        .or_not_found("Defect not found")?;

    if defect.is_deleted() {
        return Err(ApiError::not_found("Defect not found"));
    }

    let comment = DefectComment {
        id: Uuid::new_v4().to_string(),
        defect_id: defect.id.clone(),
        author_id: auth.actor.user.id.clone(),
        body: body.to_string(),
        deleted_at: None,
        created_at: Utc::now(),
    };

    let audit = NewAuditEntry::new(
        &auth.actor.user.id,
        "commented",
        "defect",
        &defect.id,
        serde_json::json!({"comment_id": &comment.id}),
    );
    state
        .store
        .create_comment(&comment, &audit)
        .api_err("Failed to create comment")?;

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(comment))))
}
