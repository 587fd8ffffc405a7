use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};

use crate::auth::RequireAdmin;
use crate::server::AppState;
use crate::server::dto::AuditCursorParams;
use crate::server::response::{
    ApiError, DEFAULT_PAGE_SIZE, PaginatedResponse, StoreResultExt, paginate,
};

pub async fn list_audit(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditCursorParams>,
) -> impl IntoResponse {
    let cursor = params.cursor.unwrap_or(0);

    let entries = state
        .store
        .list_audit(cursor, DEFAULT_PAGE_SIZE + 1)
        .api_err("Failed to list audit entries")?;

    let (entries, next_cursor, has_more) =
        paginate(entries, DEFAULT_PAGE_SIZE as usize, |e| e.id.to_string());

    Ok::<_, ApiError>(Json(PaginatedResponse::new(entries, next_cursor, has_more)))
}
