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
use crate::server::dto::{CreateProjectRequest, PaginationParams, UpdateProjectRequest};
use crate::server::response::{
    ApiError, ApiResponse, DEFAULT_PAGE_SIZE, PaginatedResponse, StoreOptionExt, StoreResultExt,
    paginate,
};
use crate::server::validation::validate_project_name;
use crate::types::{NewAuditEntry, Permission, Project};

use super::access::require_permission;

pub async fn list_projects(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> impl IntoResponse {
    require_permission(&auth.actor, Permission::PROJECT_READ)?;

    let cursor = params.cursor.as_deref().unwrap_or("");
    let projects = state
        .store
        .list_projects(cursor, DEFAULT_PAGE_SIZE + 1)
        .api_err("Failed to list projects")?;

    let (projects, next_cursor, has_more) =
        paginate(projects, DEFAULT_PAGE_SIZE as usize, |p| p.id.clone());

    Ok::<_, ApiError>(Json(PaginatedResponse::new(projects, next_cursor, has_more)))
}

pub async fn create_project(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateProjectRequest>,
) -> impl IntoResponse {
    require_permission(&auth.actor, Permission::PROJECT_WRITE)?;

    validate_project_name(&req.name)?;

    if state
        .store
        .get_project_by_name(&req.name)
        .api_err("Failed to check project")?
        .is_some()
    {
        return Err(ApiError::conflict("Project already exists"));
    }

    let now = Utc::now();
    let project = Project {
        id: Uuid::new_v4().to_string(),
        name: req.name,
        description: req.description,
        archived: false,
        created_by: Some(auth.actor.user.id.clone()),
        created_at: now,
        updated_at: now,
    };

    state
        .store
        .create_project(&project)
        .api_err("Failed to create project")?;

    let audit = NewAuditEntry::new(
        &auth.actor.user.id,
        "created",
        "project",
        &project.id,
        serde_json::json!({"name": &project.name}),
    );
    state
        .store
        .append_audit(&audit)
        .api_err("Failed to record audit entry")?;

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(project))))
}

pub async fn get_project(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    require_permission(&auth.actor, Permission::PROJECT_READ)?;

    let project = state
        .store
        .get_project(&id)
        .api_err("Failed to get project")?
        .or_not_found("Project not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(project)))
}

pub async fn update_project(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateProjectRequest>,
) -> impl IntoResponse {
    require_permission(&auth.actor, Permission::PROJECT_WRITE)?;

    let mut project = state
        .store
        .get_project(&id)
        .api_err("Failed to get project")?
        .or_not_found("Project not found")?;

    let mut changed = Vec::new();
    if let Some(name) = req.name {
        validate_project_name(&name)?;
        if name != project.name
            && state
                .store
                .get_project_by_name(&name)
                .api_err("Failed to check project name")?
                .is_some()
        {
            return Err(ApiError::conflict("Project name already exists"));
        }
        project.name = name;
        changed.push("name");
    }
    if let Some(description) = req.description {
        project.description = Some(description);
        changed.push("description");
    }
    if let Some(archived) = req.archived {
        require_permission(&auth.actor, Permission::PROJECT_ADMIN)?;
        project.archived = archived;
        changed.push("archived");
    }
    project.updated_at = Utc::now();

    state
        .store
        .update_project(&project)
        .api_err("Failed to update project")?;

    let audit = NewAuditEntry::new(
        &auth.actor.user.id,
        "updated",
        "project",
        &project.id,
        serde_json::json!({"changed": changed}),
    );
    state
        .store
        .append_audit(&audit)
        .api_err("Failed to record audit entry")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(project)))
}

pub async fn archive_project(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    require_permission(&auth.actor, Permission::PROJECT_ADMIN)?;

    let mut project = state
        .store
        .get_project(&id)
        .api_err("Failed to get project")?
        .or_not_found("Project not found")?;

    if !project.archived {
        project.archived = true;
        project.updated_at = Utc::now();
        state
            .store
            .update_project(&project)
            .api_err("Failed to archive project")?;

        let audit = NewAuditEntry::new(
            &auth.actor.user.id,
            "archived",
            "project",
            &project.id,
            serde_json::json!({"name": project.name}),
        );
        state
            .store
            .append_audit(&audit)
            .api_err("Failed to record audit entry")?;
    }

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}
