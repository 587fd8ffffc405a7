use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;

use crate::auth::RequireAdmin;
use crate::server::AppState;
use crate::server::dto::{UserGrantRequest, UserGrantResponse};
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};
use crate::types::{NewAuditEntry, UserGrant};

use super::roles::parse_permissions;

pub async fn put_user_grant(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UserGrantRequest>,
) -> impl IntoResponse {
    let user = state
        .store
        .get_user(&id)
        .api_err("Failed to get user")?
        .or_not_found("User not found")?;

    let allow_bits = parse_permissions(&req.allow)?;
    let deny_bits = parse_permissions(&req.deny)?;

    let now = Utc::now();
    let grant = UserGrant {
        user_id: user.id.clone(),
        allow_bits,
        deny_bits,
        created_at: now,
        updated_at: now,
    };

    state
        .store
        .upsert_user_grant(&grant)
        .api_err("Failed to store grant")?;

    let audit = NewAuditEntry::system(
        "grant_updated",
        "user",
        &user.id,
        serde_json::json!({
            "allow": grant.allow_bits.to_strings(),
            "deny": grant.deny_bits.to_strings(),
        }),
    );
    state
        .store
        .append_audit(&audit)
        .api_err("Failed to record audit entry")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(UserGrantResponse {
        user_id: grant.user_id,
        allow: grant.allow_bits.to_strings(),
        deny: grant.deny_bits.to_strings(),
    })))
}

pub async fn get_user_grant(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let user = state
        .store
        .get_user(&id)
        .api_err("Failed to get user")?
        .or_not_found("User not found")?;

    let grant = state
        .store
        .get_user_grant(&user.id)
        .api_err("Failed to get grant")?
        .or_not_found("Grant not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(UserGrantResponse {
        user_id: grant.user_id,
        allow: grant.allow_bits.to_strings(),
        deny: grant.deny_bits.to_strings(),
    })))
}

pub async fn delete_user_grant(
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
        .delete_user_grant(&user.id)
        .api_err("Failed to delete grant")?;

    if !deleted {
        return Err(ApiError::not_found("Grant not found"));
    }

    let audit = NewAuditEntry::system(
        "grant_deleted",
        "user",
        &user.id,
        serde_json::json!({}),
    );
    state
        .store
        .append_audit(&audit)
        .api_err("Failed to record audit entry")?;

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}
