use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::RequireUser;
use crate::server::AppState;
use crate::server::dto::{CreateFloorPlanRequest, PaginationParams};
use crate::server::response::{
    ApiError, ApiResponse, DEFAULT_PAGE_SIZE, PaginatedResponse, StoreOptionExt, StoreResultExt,
    paginate,
};
use crate::server::validation::validate_plan_name;
use crate::types::{FloorPlan, NewAuditEntry, Permission};

use super::access::require_permission;

pub async fn list_floor_plans(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    Query(params): Query<PaginationParams>,
) -> impl IntoResponse {
    require_permission(&auth.actor, Permission::PROJECT_READ)?;

    state
        .store
        .get_project(&project_id)
        .api_err("Failed to get project")?
        .or_not_found("Project not found")?;

    let cursor = params.cursor.as_deref().unwrap_or("");
    let plans = state
        .store
        .list_floor_plans(&project_id, cursor, DEFAULT_PAGE_SIZE + 1)
        .api_err("Failed to list floor plans")?;

    let (plans, next_cursor, has_more) =
        paginate(plans, DEFAULT_PAGE_SIZE as usize, |p| p.id.clone());

    Ok::<_, ApiError>(Json(PaginatedResponse::new(plans, next_cursor, has_more)))
}

pub async fn create_floor_plan(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    Json(req): Json<CreateFloorPlanRequest>,
) -> impl IntoResponse {
    require_permission(&auth.actor, Permission::PROJECT_WRITE)?;

    validate_plan_name(&req.name)?;

    let project = state
        .store
        .get_project(&project_id)
        .api_err("Failed to get project")?
        .or_not_found("Project not found")?;

    if project.archived {
        return Err(ApiError::bad_request(
            "Cannot add floor plans to an archived project",
        ));
    }

    let now = Utc::now();
    let plan = FloorPlan {
        id: Uuid::new_v4().to_string(),
        project_id: project.id.clone(),
        name: req.name,
        image_ref: req.image_ref,
        deleted_at: None,
        deleted_by: None,
        created_at: now,
        updated_at: now,
    };

    state
        .store
        .create_floor_plan(&plan)
        .map_err(|e| match e {
            crate::error::Error::Database(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                ApiError::conflict("Floor plan already exists in this project")
            }
            _ => ApiError::internal("Failed to create floor plan"),
        })?;

    let audit = NewAuditEntry::new(
        &auth.actor.user.id,
        "created",
        "floor_plan",
        &plan.id,
        serde_json::json!({"project_id": &plan.project_id, "name": &plan.name}),
    );
    state
        .store
        .append_audit(&audit)
        .api_err("Failed to record audit entry")?;

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(plan))))
}

pub async fn get_floor_plan(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    require_permission(&auth.actor, Permission::PROJECT_READ)?;

    let plan = state
        .store
        .get_floor_plan(&id)
        .api_err("Failed to get floor plan")?
        .or_not_found("Floor plan not found")?;

    if plan.deleted_at.is_some() {
        return Err(ApiError::not_found("Floor plan not found"));
    }

    Ok::<_, ApiError>(Json(ApiResponse::success(plan)))
}

/// Soft-deletes the plan and cascades soft deletion of its defects and their
/// comments in one transaction.
pub async fn delete_floor_plan(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    require_permission(&auth.actor, Permission::PROJECT_ADMIN)?;

    let plan = state
        .store
        .get_floor_plan(&id)
        .api_err("Failed to get floor plan")?
        .or_not_found("Floor plan not found")?;

    let audit = NewAuditEntry::new(
        &auth.actor.user.id,
        "deleted",
        "floor_plan",
        &plan.id,
        serde_json::json!({"project_id": &plan.project_id, "cascade": true}),
    );

    let deleted = state
        .store
        .delete_floor_plan(&plan.id, &auth.actor.user.id, Utc::now(), &audit)
        .api_err("Failed to delete floor plan")?;

    if !deleted {
        return Err(ApiError::not_found("Floor plan not found"));
    }

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}
