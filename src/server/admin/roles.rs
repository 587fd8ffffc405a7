use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::RequireAdmin;
use crate::server::AppState;
use crate::server::dto::{
    CreateRoleRequest, PaginationParams, RoleResponse, SetUserRolesRequest, UpdateRoleRequest,
};
use crate::server::response::{
    ApiError, ApiResponse, DEFAULT_PAGE_SIZE, PaginatedResponse, StoreOptionExt, StoreResultExt,
    paginate,
};
use crate::server::validation::validate_role_name;
use crate::types::{NewAuditEntry, Permission, Role};

pub(super) fn parse_permissions(perms: &[String]) -> Result<Permission, ApiError> {
    let mut result = Permission::default();
    for p in perms {
        let parsed = Permission::parse(p)
            .ok_or_else(|| ApiError::bad_request(format!("Invalid permission: {p}")))?;
        result = result.union(parsed);
    }
    Ok(result)
}

pub async fn create_role(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRoleRequest>,
) -> impl IntoResponse {
    validate_role_name(&req.name)?;

    if state
        .store
        .get_role_by_name(&req.name)
        .api_err("Failed to check role")?
        .is_some()
    {
        return Err(ApiError::conflict("Role already exists"));
    }

    let permission_bits = parse_permissions(&req.permissions)?;

    let now = Utc::now();
    let role = Role {
        id: Uuid::new_v4().to_string(),
        name: req.name,
        permission_bits,
        created_at: now,
        updated_at: now,
    };

    state
        .store
        .create_role(&role)
        .api_err("Failed to create role")?;

    let audit = NewAuditEntry::system(
        "role_created",
        "role",
        &role.id,
        serde_json::json!({"name": &role.name, "permissions": role.permission_bits.to_strings()}),
    );
    state
        .store
        .append_audit(&audit)
        .api_err("Failed to record audit entry")?;

    Ok::<_, ApiError>((
        StatusCode::CREATED,
        Json(ApiResponse::success(RoleResponse::from(role))),
    ))
}

pub async fn list_roles(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> impl IntoResponse {
    let cursor = params.cursor.as_deref().unwrap_or("");

    let roles = state
        .store
        .list_roles(cursor, DEFAULT_PAGE_SIZE + 1)
        .api_err("Failed to list roles")?;

    let (roles, next_cursor, has_more) =
        paginate(roles, DEFAULT_PAGE_SIZE as usize, |r| r.id.clone());

    let responses: Vec<RoleResponse> = roles.into_iter().map(RoleResponse::from).collect();

    Ok::<_, ApiError>(Json(PaginatedResponse::new(
        responses,
        next_cursor,
        has_more,
    )))
}

pub async fn get_role(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let role = state
        .store
        .get_role(&id)
        .api_err("Failed to get role")?
        .or_not_found("Role not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(RoleResponse::from(role))))
}

pub async fn update_role(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateRoleRequest>,
) -> impl IntoResponse {
    let mut role = state
        .store
        .get_role(&id)
        .api_err("Failed to get role")?
        .or_not_found("Role not found")?;

    if let Some(name) = req.name {
        validate_role_name(&name)?;
        if name != role.name
            && state
                .store
                .get_role_by_name(&name)
                .api_err("Failed to check role name")?
                .is_some()
        {
            return Err(ApiError::conflict("Role name already exists"));
        }
        role.name = name;
    }
    if let Some(permissions) = req.permissions {
        role.permission_bits = parse_permissions(&permissions)?;
    }
    role.updated_at = Utc::now();

    state
        .store
        .update_role(&role)
        .api_err("Failed to update role")?;

    let audit = NewAuditEntry::system(
        "role_updated",
        "role",
        &role.id,
        serde_json::json!({"name": &role.name, "permissions": role.permission_bits.to_strings()}),
    );
    state
        .store
        .append_audit(&audit)
        .api_err("Failed to record audit entry")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(RoleResponse::from(role))))
}

pub async fn delete_role(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let role = state
        .store
        .get_role(&id)
        .api_err("Failed to get role")?
        .or_not_found("Role not found")?;

    state
        .store
        .delete_role(&role.id)
        .api_err("Failed to delete role")?;

    let audit = NewAuditEntry::system(
        "role_deleted",
        "role",
        &role.id,
        serde_json::json!({"name": role.name}),
    );
    state
        .store
        .append_audit(&audit)
        .api_err("Failed to record audit entry")?;

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

/// Replaces the user's active role set: memberships not in the new set are
/// soft-deleted, new ones are assigned (reactivating any revoked row).
pub async fn set_user_roles(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SetUserRolesRequest>,
) -> impl IntoResponse {
    let user = state
        .store
        .get_user(&id)
        .api_err("Failed to get user")?
        .or_not_found("User not found")?;

    let mut new_roles = Vec::new();
    for role_id in &req.role_ids {
        let role = state
            .store
            .get_role(role_id)
            .api_err("Failed to get role")?
            .ok_or_else(|| ApiError::bad_request(format!("Unknown role id '{role_id}'")))?;
        new_roles.push(role);
    }

    let current = state
        .store
        .list_user_roles(&user.id)
        .api_err("Failed to list user roles")?;

    let now = Utc::now();
    for role in &current {
        if !req.role_ids.contains(&role.id) {
            state
                .store
                .revoke_role(&user.id, &role.id, now)
                .api_err("Failed to revoke role")?;
        }
    }
    for role in &new_roles {
        state
            .store
            .assign_role(&user.id, &role.id)
            .api_err("Failed to assign role")?;
    }

    let audit = NewAuditEntry::system(
        "roles_assigned",
        "user",
        &user.id,
        serde_json::json!({
            "roles": new_roles.iter().map(|r| r.name.clone()).collect::<Vec<_>>(),
        }),
    );
    state
        .store
        .append_audit(&audit)
        .api_err("Failed to record audit entry")?;

    let responses: Vec<RoleResponse> = new_roles.into_iter().map(RoleResponse::from).collect();

    Ok::<_, ApiError>(Json(ApiResponse::success(responses)))
}

#[derive(serde::Deserialize)]
pub struct UserRolePath {
    id: String,
    role_id: String,
}

pub async fn revoke_user_role(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(path): Path<UserRolePath>,
) -> impl IntoResponse {
    let user = state
        .store
        .get_user(&path.id)
        .api_err("Failed to get user")?
        .or_not_found("User not found")?;

    let role = state
        .store
        .get_role(&path.role_id)
        .api_err("Failed to get role")?
        .or_not_found("Role not found")?;

    let revoked = state
        .store
        .revoke_role(&user.id, &role.id, Utc::now())
        .api_err("Failed to revoke role")?;

    if !revoked {
        return Err(ApiError::not_found("Role membership not found"));
    }

    let audit = NewAuditEntry::system(
        "role_revoked",
        "user",
        &user.id,
        serde_json::json!({"role": role.name}),
    );
    state
        .store
        .append_audit(&audit)
        .api_err("Failed to record audit entry")?;

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}
