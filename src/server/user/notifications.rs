use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use chrono::Utc;

use crate::auth::RequireUser;
use crate::server::AppState;
use crate::server::dto::ListNotificationsParams;
use crate::server::response::{ApiError, ApiResponse, StoreResultExt};

pub async fn list_notifications(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListNotificationsParams>,
) -> impl IntoResponse {
    let notifications = state
        .store
        .list_user_notifications(&auth.actor.user.id, params.unread.unwrap_or(false))
        .api_err("Failed to list notifications")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(notifications)))
}

pub async fn mark_notification_read(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let marked = state
        .store
        .mark_notification_read(id, &auth.actor.user.id, Utc::now())
        .api_err("Failed to mark notification read")?;

    if !marked {
        return Err(ApiError::not_found("Notification not found"));
    }

    Ok::<_, ApiError>(Json(ApiResponse::success(serde_json::json!({"read": true}))))
}
