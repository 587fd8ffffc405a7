use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DefectStatus, Permission, Priority};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub archived: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloorPlan {
    pub id: String,
    pub project_id: String,
    pub name: String,
    /// Reference to the rendered plan image (conversion happens out of band).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defect {
    pub id: String,
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub floor_plan_id: Option<String>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Normalized pin coordinates on the floor plan, each in [0, 1].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin_x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin_y: Option<f64>,
    pub priority: Priority,
    pub status: DefectStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    pub reporter_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceptance_comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closure_evidence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

impl Defect {
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefectComment {
    pub id: String,
    pub defect_id: String,
    pub author_id: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub permission_bits: Permission,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Direct per-user permission grant, applied on top of role-derived bits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserGrant {
    pub user_id: String,
    pub allow_bits: Permission,
    pub deny_bits: Permission,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    #[serde(skip)]
    pub token_hash: String,
    #[serde(skip)]
    pub token_lookup: String,
    pub is_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

/// A row of the append-only audit log.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Audit row about to be written. The id and timestamp are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub actor_id: Option<String>,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub details: Option<serde_json::Value>,
}

impl NewAuditEntry {
    pub fn new(
        actor_id: &str,
        action: &str,
        target_type: &str,
        target_id: &str,
        details: serde_json::Value,
    ) -> Self {
        Self {
            actor_id: Some(actor_id.to_string()),
            action: action.to_string(),
            target_type: target_type.to_string(),
            target_id: target_id.to_string(),
            details: Some(details),
        }
    }

    /// Entry for actions performed with an admin token, which has no user.
    pub fn system(
        action: &str,
        target_type: &str,
        target_id: &str,
        details: serde_json::Value,
    ) -> Self {
        Self {
            actor_id: None,
            action: action.to_string(),
            target_type: target_type.to_string(),
            target_id: target_id.to_string(),
            details: Some(details),
        }
    }
}

/// Describes one status transition write. The store applies it transactionally:
/// the row is re-read and the status guard re-checked inside the transaction,
/// and the audit row commits together with the mutation.
#[derive(Debug, Clone)]
pub struct TransitionUpdate {
    pub defect_id: String,
    /// Status the caller observed; the UPDATE is guarded on it.
    pub expected: DefectStatus,
    pub new_status: DefectStatus,
    pub acceptance_comment: Option<String>,
    pub rejection_comment: Option<String>,
    pub closure_evidence: Option<String>,
    pub accepted_by: Option<String>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub actor_id: String,
    pub occurred_at: DateTime<Utc>,
}

/// Outcome of a soft delete; deleting an already-deleted defect is a no-op.
#[derive(Debug, Clone)]
pub enum SoftDelete {
    Deleted(Defect),
    AlreadyDeleted,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defect_id: Option<String>,
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: String,
    pub defect_id: Option<String>,
    pub kind: String,
    pub message: String,
}
