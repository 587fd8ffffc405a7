pub mod access;
mod comments;
mod defects;
mod lifecycle;
mod notifications;
mod plans;
mod projects;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, patch, post},
};

use crate::server::AppState;

pub fn user_router() -> Router<Arc<AppState>> {
    Router::new()
        // Projects
        .route("/projects", get(projects::list_projects))
        .route("/projects", post(projects::create_project))
        .route("/projects/{id}", get(projects::get_project))
        .route("/projects/{id}", patch(projects::update_project))
        .route("/projects/{id}", delete(projects::archive_project))
        // Floor plans
        .route("/projects/{id}/plans", get(plans::list_floor_plans))
        .route("/projects/{id}/plans", post(plans::create_floor_plan))
        .route("/plans/{id}", get(plans::get_floor_plan))
        .route("/plans/{id}", delete(plans::delete_floor_plan))
        // Defects
        .route("/defects", get(defects::list_defects))
        .route("/defects", post(defects::create_defect))
        .route("/defects/{id}", get(defects::get_defect))
        .route("/defects/{id}", patch(defects::update_defect))
        .route("/defects/{id}", delete(lifecycle::delete_defect))
        // Lifecycle transitions
        .route("/defects/{id}/start", post(lifecycle::start_defect))
        .route("/defects/{id}/complete", post(lifecycle::complete_defect))
        .route("/defects/{id}/accept", post(lifecycle::accept_defect))
        .route("/defects/{id}/reject", post(lifecycle::reject_defect))
        .route("/defects/{id}/close", post(lifecycle::close_defect))
        .route("/defects/{id}/reopen", post(lifecycle::reopen_defect))
        .route("/defects/{id}/resume", post(lifecycle::resume_defect))
        .route("/defects/{id}/restore", post(lifecycle::restore_defect))
        // Comments and audit trail
        .route("/defects/{id}/comments", get(comments::list_comments))
        .route("/defects/{id}/comments", post(comments::create_comment))
        .route("/defects/{id}/audit", get(defects::list_defect_audit))
        // Notifications
        .route("/notifications", get(notifications::list_notifications))
        .route(
            "/notifications/{id}/read",
            post(notifications::mark_notification_read),
        )
}
