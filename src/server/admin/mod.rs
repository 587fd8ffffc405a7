mod audit;
mod grants;
mod roles;
mod tokens;
mod users;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post, put},
};

use crate::server::AppState;

pub fn admin_router() -> Router<Arc<AppState>> {
    Router::new()
        // User routes
        .route("/users", post(users::create_user))
        .route("/users", get(users::list_users))
        .route("/users/{id}", get(users::get_user))
        .route("/users/{id}", delete(users::delete_user))
        .route("/users/{id}/tokens", get(users::list_user_tokens))
        .route("/users/{id}/tokens", post(users::create_user_token))
        .route("/users/{id}/permissions", get(users::get_user_permissions))
        // Role routes
        .route("/roles", post(roles::create_role))
        .route("/roles", get(roles::list_roles))
        .route("/roles/{id}", get(roles::get_role))
        .route("/roles/{id}", put(roles::update_role))
        .route("/roles/{id}", delete(roles::delete_role))
        // Role membership routes
        .route("/users/{id}/roles", put(roles::set_user_roles))
        .route("/users/{id}/roles/{role_id}", delete(roles::revoke_user_role))
        // Direct grant routes
        .route("/users/{id}/grant", put(grants::put_user_grant))
        .route("/users/{id}/grant", get(grants::get_user_grant))
        .route("/users/{id}/grant", delete(grants::delete_user_grant))
        // Token routes
        .route("/tokens", get(tokens::list_tokens))
        .route("/tokens/{id}", get(tokens::get_token))
        .route("/tokens/{id}", delete(tokens::delete_token))
        // Audit log
        .route("/audit", get(audit::list_audit))
}
