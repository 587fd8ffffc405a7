use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::auth::{RequireAdmin, TokenGenerator, resolve_effective};
use crate::server::AppState;
use crate::server::dto::{
    CreateTokenResponse, CreateUserRequest, CreateUserTokenRequest, EffectivePermissionsResponse,
    PaginationParams, RoleResponse, TokenResponse, UserResponse,
};
use crate::server::response::{
    ApiError, ApiResponse, DEFAULT_PAGE_SIZE, PaginatedResponse, StoreOptionExt, StoreResultExt,
    paginate,
};
use crate::server::validation::validate_username;
use crate::types::{NewAuditEntry, Token, User};

use super::tokens::token_to_response;

pub async fn create_user(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateUserRequest>,
) -> impl IntoResponse {
    validate_username(&req.username)?;

    if state
        .store
        .get_user_by_username(&req.username)
        .api_err("Failed to check username")?
        .is_some()
    {
        return Err(ApiError::conflict("Username already exists"));
    }

    // Resolve role names before creating anything.
    let mut roles = Vec::new();
    for name in &req.roles {
        let role = state
            .store
            .get_role_by_name(name)
            .api_err("Failed to look up role")?
            .ok_or_else(|| ApiError::bad_request(format!("Unknown role '{name}'")))?;
        roles.push(role);
    }

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        username: req.username,
        display_name: req.display_name,
        deleted_at: None,
        created_at: now,
        updated_at: now,
    };

    state
        .store
        .create_user(&user)
        .api_err("Failed to create user")?;

    for role in &roles {
        state
            .store
            .assign_role(&user.id, &role.id)
            .api_err("Failed to assign role")?;
    }

    let audit = NewAuditEntry::system(
        "user_created",
        "user",
        &user.id,
        serde_json::json!({
            "username": &user.username,
            "roles": roles.iter().map(|r| r.name.clone()).collect::<Vec<_>>(),
        }),
    );
    state
        .store
        .append_audit(&audit)
        .api_err("Failed to record audit entry")?;

    let response = UserResponse {
        user,
        roles: roles.into_iter().map(RoleResponse::from).collect(),
    };

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(response))))
}

pub async fn list_users(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> impl IntoResponse {
    let cursor = params.cursor.as_deref().unwrap_or("");

    let users = state
        .store
        .list_users(cursor, DEFAULT_PAGE_SIZE + 1)
        .api_err("Failed to list users")?;

    let (users, next_cursor, has_more) =
        paginate(users, DEFAULT_PAGE_SIZE as usize, |u| u.id.clone());

    Ok::<_, ApiError>(Json(PaginatedResponse::new(users, next_cursor, has_more)))
}

pub async fn get_user(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let user = state
        .store
        .get_user(&id)
        .api_err("Failed to get user")?
        .or_not_found("User not found")?;

    let roles = state
        .store
        .list_user_roles(&user.id)
        .api_err("Failed to list user roles")?;

    let response = UserResponse {
        user,
        roles: roles.into_iter().map(RoleResponse::from).collect(),
    };

    Ok::<_, ApiError>(Json(ApiResponse::success(response)))
}

pub async fn delete_user(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let user = state
        .store
        .get_user(&id)
        .api_err("Failed to get user")?
        .or_not_found("User not found")?;

    let deleted = state
        .store
        .soft_delete_user(&user.id, Utc::now())
        .api_err("Failed to delete user")?;

    if deleted {
        let audit = NewAuditEntry::system(
            "user_deleted",
            "user",
            &user.id,
            serde_json::json!({"username": user.username}),
        );
        state
            .store
            .append_audit(&audit)
            .api_err("Failed to record audit entry")?;
    }

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn get_user_permissions(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let user = state
        .store
        .get_user(&id)
        .api_err("Failed to get user")?
        .or_not_found("User not found")?;

    let permissions = resolve_effective(state.store.as_ref(), &user.id)
        .api_err("Failed to resolve permissions")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(EffectivePermissionsResponse {
        user_id: user.id,
        permissions: permissions.to_strings(),
    })))
}

pub async fn list_user_tokens(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let user = state
        .store
        .get_user(&id)
        .api_err("Failed to get user")?
        .or_not_found("User not found")?;

    let tokens = state
        .store
        .list_user_tokens(&user.id)
        .api_err("Failed to list user tokens")?;

    let responses: Vec<TokenResponse> = tokens.into_iter().map(token_to_response).collect();

    Ok::<_, ApiError>(Json(ApiResponse::success(responses)))
}

pub async fn create_user_token(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CreateUserTokenRequest>,
) -> impl IntoResponse {
    let user = state
        .store
        .get_user(&id)
        .api_err("Failed to get user")?
        .or_not_found("User not found")?;

    if user.deleted_at.is_some() {
        return Err(ApiError::bad_request("Cannot create tokens for a deleted user"));
    }

    if let Some(seconds) = req.expires_in_seconds {
        if seconds < 0 {
            return Err(ApiError::bad_request(
                "expires_in_seconds cannot be negative",
            ));
        }
    }

    let expires_at = req
        .expires_in_seconds
        .map(|s| Utc::now() + Duration::seconds(s));

    let generator = TokenGenerator::new();

    const MAX_RETRIES: u32 = 3;
    for _ in 0..MAX_RETRIES {
        let (raw_token, lookup, hash) = generator
            .generate()
            .map_err(|_| ApiError::internal("Failed to generate token"))?;

        let now = Utc::now();
        let token = Token {
            id: Uuid::new_v4().to_string(),
            token_hash: hash,
            token_lookup: lookup,
            is_admin: false,
            user_id: Some(user.id.clone()),
            created_at: now,
            expires_at,
            last_used_at: None,
        };

        match state.store.create_token(&token) {
            Ok(()) => {
                let audit = NewAuditEntry::system(
                    "token_created",
                    "token",
                    &token.id,
                    serde_json::json!({"user_id": &user.id}),
                );
                state
                    .store
                    .append_audit(&audit)
                    .api_err("Failed to record audit entry")?;

                return Ok((
                    StatusCode::CREATED,
                    Json(ApiResponse::success(CreateTokenResponse {
                        token: raw_token,
                        metadata: token_to_response(token),
                    })),
                ));
            }
            Err(crate::error::Error::TokenLookupCollision) => continue,
            Err(_) => return Err(ApiError::internal("Failed to create token")),
        }
    }

    Err(ApiError::internal("Failed to create token after retries"))
}
