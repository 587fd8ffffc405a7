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
use crate::server::dto::{CreateDefectRequest, ListDefectsParams, UpdateDefectRequest};
use crate::server::response::{
    ApiError, ApiResponse, DEFAULT_PAGE_SIZE, PaginatedResponse, StoreOptionExt, StoreResultExt,
    paginate,
};
use crate::server::validation::{validate_defect_title, validate_pin};
use crate::store::{DefectFilter, Store};
use crate::types::{Defect, DefectStatus, NewAuditEntry, Permission, Priority};

use super::access::require_permission;

fn check_assignee(store: &dyn Store, assignee_id: &str) -> Result<(), ApiError> {
    let user = store
        .get_user(assignee_id)
        .api_err("Failed to check assignee")?
        .ok_or_else(|| ApiError::bad_request("Assignee does not exist"))?;
    if user.deleted_at.is_some() {
        return Err(ApiError::bad_request("Assignee does not exist"));
    }
    Ok(())
}

pub async fn create_defect(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateDefectRequest>,
) -> impl IntoResponse {
    require_permission(&auth.actor, Permission::DEFECT_WRITE)?;

    validate_defect_title(&req.title)?;

    let project = state
        .store
        .get_project(&req.project_id)
        .api_err("Failed to get project")?
        .or_not_found("Project not found")?;

    if project.archived {
        return Err(ApiError::bad_request(
            "Cannot report defects against an archived project",
        ));
    }

    if let Some(plan_id) = &req.floor_plan_id {
        let plan = state
            .store
            .get_floor_plan(plan_id)
            .api_err("Failed to get floor plan")?
            .or_not_found("Floor plan not found")?;
        if plan.deleted_at.is_some() {
            return Err(ApiError::not_found("Floor plan not found"));
        }
        if plan.project_id != project.id {
            return Err(ApiError::bad_request(
                "Floor plan belongs to a different project",
            ));
        }
    }

    validate_pin(req.pin_x, req.pin_y, req.floor_plan_id.is_some())?;

    if let Some(assignee_id) = &req.assignee_id {
        check_assignee(state.store.as_ref(), assignee_id)?;
    }

    let now = Utc::now();
    let defect = Defect {
        id: Uuid::new_v4().to_string(),
        project_id: project.id,
        floor_plan_id: req.floor_plan_id,
        title: req.title,
        description: req.description,
        pin_x: req.pin_x,
        pin_y: req.pin_y,
        priority: req.priority.unwrap_or(Priority::Medium),
        status: DefectStatus::Open,
        assignee_id: req.assignee_id,
        reporter_id: auth.actor.user.id.clone(),
        acceptance_comment: None,
        rejection_comment: None,
        closure_evidence: None,
        accepted_by: None,
        accepted_at: None,
        deleted_at: None,
        deleted_by: None,
        created_at: now,
        updated_at: now,
        updated_by: Some(auth.actor.user.id.clone()),
    };

    let audit = NewAuditEntry::new(
        &auth.actor.user.id,
        "created",
        "defect",
        &defect.id,
        serde_json::json!({
            "title": &defect.title,
            "status": defect.status,
            "priority": defect.priority,
        }),
    );
    state
        .store
        .create_defect(&defect, &audit)
        .api_err("Failed to create defect")?;

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(defect))))
}

pub async fn list_defects(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListDefectsParams>,
) -> impl IntoResponse {
    require_permission(&auth.actor, Permission::DEFECT_READ)?;

    let status = match params.status.as_deref() {
        Some(raw) => Some(
            DefectStatus::parse(raw)
                .ok_or_else(|| ApiError::bad_request(format!("Unknown status '{raw}'")))?,
        ),
        None => None,
    };

    let filter = DefectFilter {
        project_id: params.project,
        floor_plan_id: params.plan,
        status,
        assignee_id: params.assignee,
    };

    let cursor = params.cursor.as_deref().unwrap_or("");
    let defects = state
        .store
        .list_defects(&filter, cursor, DEFAULT_PAGE_SIZE + 1)
        .api_err("Failed to list defects")?;

    let (defects, next_cursor, has_more) =
        paginate(defects, DEFAULT_PAGE_SIZE as usize, |d| d.id.clone());

    Ok::<_, ApiError>(Json(PaginatedResponse::new(defects, next_cursor, has_more)))
}

pub async fn get_defect(
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

    Ok::<_, ApiError>(Json(ApiResponse::success(defect)))
}

pub async fn update_defect(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateDefectRequest>,
) -> impl IntoResponse {
    require_permission(&auth.actor, Permission::DEFECT_WRITE)?;

    let mut defect = state
        .store
        .get_defect(&id)
        .api_err("Failed to get defect")?
        .or_not_found("Defect not found")?;

    if defect.is_deleted() {
        return Err(ApiError::not_found("Defect not found"));
    }
    if defect.status.is_terminal() {
        return Err(ApiError::bad_request("An accepted defect cannot be edited"));
    }

    let mut changed = Vec::new();
    if let Some(title) = req.title {
        validate_defect_title(&title)?;
        defect.title = title;
        changed.push("title");
    }
    if let Some(description) = req.description {
        defect.description = Some(description);
        changed.push("description");
    }
    if req.pin_x.is_some() || req.pin_y.is_some() {
        let pin_x = req.pin_x.or(defect.pin_x);
        let pin_y = req.pin_y.or(defect.pin_y);
        validate_pin(pin_x, pin_y, defect.floor_plan_id.is_some())?;
        defect.pin_x = pin_x;
        defect.pin_y = pin_y;
        changed.push("pin");
    }
    if let Some(priority) = req.priority {
        defect.priority = priority;
        changed.push("priority");
    }
    if let Some(assignee_id) = req.assignee_id {
        check_assignee(state.store.as_ref(), &assignee_id)?;
        defect.assignee_id = Some(assignee_id);
        changed.push("assignee");
    }

    if changed.is_empty() {
        return Ok(Json(ApiResponse::success(defect)));
    }

    defect.updated_at = Utc::now();
    defect.updated_by = Some(auth.actor.user.id.clone());

    let audit = NewAuditEntry::new(
        &auth.actor.user.id,
        "updated",
        "defect",
        &defect.id,
        serde_json::json!({"changed": changed}),
    );
    state
        .store
        .update_defect_details(&defect, &audit)
        .map_err(ApiError::from)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(defect)))
}

pub async fn list_defect_audit(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    require_permission(&auth.actor, Permission::DEFECT_READ)?;

    // The audit trail stays readable for soft-deleted defects.
    state
        .store
        .get_defect(&id)
        .api_err("Failed to get defect")?
        .or_not_found("Defect not found")?;

    let entries = state
        .store
        .list_defect_audit(&id)
        .api_err("Failed to list audit entries")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(entries)))
}
