mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::types::*;

/// Filter for defect list queries. `None` fields match everything.
#[derive(Debug, Default, Clone)]
pub struct DefectFilter {
    pub project_id: Option<String>,
    pub floor_plan_id: Option<String>,
    pub status: Option<DefectStatus>,
    pub assignee_id: Option<String>,
}

/// Store defines the database interface.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // Project operations
    fn create_project(&self, project: &Project) -> Result<()>;
    fn get_project(&self, id: &str) -> Result<Option<Project>>;
    fn get_project_by_name(&self, name: &str) -> Result<Option<Project>>;
    fn list_projects(&self, cursor: &str, limit: i32) -> Result<Vec<Project>>;
    fn update_project(&self, project: &Project) -> Result<()>;

    // Floor plan operations
    fn create_floor_plan(&self, plan: &FloorPlan) -> Result<()>;
    fn get_floor_plan(&self, id: &str) -> Result<Option<FloorPlan>>;
    fn list_floor_plans(&self, project_id: &str, cursor: &str, limit: i32)
    -> Result<Vec<FloorPlan>>;
    /// Soft-deletes a plan and cascades soft deletion of its active defects
    /// and their comments in one transaction, with the audit row.
    fn delete_floor_plan(
        &self,
        id: &str,
        actor_id: &str,
        at: chrono::DateTime<chrono::Utc>,
        audit: &NewAuditEntry,
    ) -> Result<bool>;

    // Defect operations
    fn create_defect(&self, defect: &Defect, audit: &NewAuditEntry) -> Result<()>;
    /// Returns the row regardless of soft-delete state; callers decide.
    fn get_defect(&self, id: &str) -> Result<Option<Defect>>;
    fn list_defects(&self, filter: &DefectFilter, cursor: &str, limit: i32) -> Result<Vec<Defect>>;
    /// Updates mutable detail fields (not status) of an active defect.
    fn update_defect_details(&self, defect: &Defect, audit: &NewAuditEntry) -> Result<()>;
    /// Applies a status transition with the audit row in one transaction.
    /// The UPDATE is guarded on the expected status; a guard miss surfaces
    /// as `InvalidTransition`.
    fn apply_transition(&self, update: &TransitionUpdate, audit: &NewAuditEntry) -> Result<Defect>;
    fn soft_delete_defect(
        &self,
        id: &str,
        actor_id: &str,
        at: chrono::DateTime<chrono::Utc>,
        audit: &NewAuditEntry,
    ) -> Result<SoftDelete>;
    fn restore_defect(
        &self,
        id: &str,
        actor_id: &str,
        at: chrono::DateTime<chrono::Utc>,
        audit: &NewAuditEntry,
    ) -> Result<Defect>;

    // Comment operations
    fn create_comment(&self, comment: &DefectComment, audit: &NewAuditEntry) -> Result<()>;
    fn list_comments(&self, defect_id: &str) -> Result<Vec<DefectComment>>;

    // User operations
    fn create_user(&self, user: &User) -> Result<()>;
    fn get_user(&self, id: &str) -> Result<Option<User>>;
    fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;
    fn list_users(&self, cursor: &str, limit: i32) -> Result<Vec<User>>;
    fn soft_delete_user(&self, id: &str, at: chrono::DateTime<chrono::Utc>) -> Result<bool>;

    // Role operations
    fn create_role(&self, role: &Role) -> Result<()>;
    fn get_role(&self, id: &str) -> Result<Option<Role>>;
    fn get_role_by_name(&self, name: &str) -> Result<Option<Role>>;
    fn list_roles(&self, cursor: &str, limit: i32) -> Result<Vec<Role>>;
    fn update_role(&self, role: &Role) -> Result<()>;
    fn delete_role(&self, id: &str) -> Result<bool>;

    // Role membership operations (many-to-many, soft-deletable)
    fn assign_role(&self, user_id: &str, role_id: &str) -> Result<()>;
    /// Soft-deletes the membership row.
    fn revoke_role(
        &self,
        user_id: &str,
        role_id: &str,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<bool>;
    /// Roles of a user's active (not soft-deleted) memberships.
    fn list_user_roles(&self, user_id: &str) -> Result<Vec<Role>>;

    // Direct grant operations
    fn upsert_user_grant(&self, grant: &UserGrant) -> Result<()>;
    fn get_user_grant(&self, user_id: &str) -> Result<Option<UserGrant>>;
    fn delete_user_grant(&self, user_id: &str) -> Result<bool>;

    // Token operations
    fn create_token(&self, token: &Token) -> Result<()>;
    fn get_token_by_id(&self, id: &str) -> Result<Option<Token>>;
    fn get_token_by_lookup(&self, lookup: &str) -> Result<Option<Token>>;
    fn list_tokens(&self, cursor: &str, limit: i32) -> Result<Vec<Token>>;
    fn list_user_tokens(&self, user_id: &str) -> Result<Vec<Token>>;
    fn delete_token(&self, id: &str) -> Result<bool>;
    fn update_token_last_used(&self, id: &str) -> Result<()>;

    // Audit operations (append-only; no update or delete exists)
    fn append_audit(&self, entry: &NewAuditEntry) -> Result<i64>;
    fn list_defect_audit(&self, defect_id: &str) -> Result<Vec<AuditEntry>>;
    fn list_audit(&self, cursor: i64, limit: i32) -> Result<Vec<AuditEntry>>;

    // Notification operations
    fn create_notification(&self, notification: &NewNotification) -> Result<i64>;
    fn list_user_notifications(&self, user_id: &str, unread_only: bool)
    -> Result<Vec<Notification>>;
    fn mark_notification_read(
        &self,
        id: i64,
        user_id: &str,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<bool>;

    // Admin token check
    fn has_admin_token(&self) -> Result<bool>;
}
