//! Defect status lifecycle.
//!
//! Every transition follows the same contract: the actor's pre-resolved
//! permission set is checked first, the request payload is validated, and the
//! store then applies the mutation and its audit row in one transaction with
//! the state re-validated under a status guard. Notification records are
//! written after commit and never fail the parent operation.

use chrono::Utc;
use serde_json::json;

use crate::auth::Actor;
use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{
    Defect, DefectStatus, NewAuditEntry, NewNotification, Permission, SoftDelete, TransitionUpdate,
};

const TARGET_DEFECT: &str = "defect";

fn require(actor: &Actor, permission: Permission) -> Result<()> {
    if !actor.can(permission) {
        return Err(Error::Forbidden);
    }
    Ok(())
}

/// Loads a defect that is visible to lifecycle operations.
/// Soft-deleted rows are reported as absent.
fn load_active(store: &dyn Store, defect_id: &str) -> Result<Defect> {
    let defect = store.get_defect(defect_id)?.ok_or(Error::NotFound)?;
    if defect.is_deleted() {
        return Err(Error::NotFound);
    }
    Ok(defect)
}

fn ensure_edge(from: DefectStatus, to: DefectStatus) -> Result<()> {
    if !DefectStatus::can_transition(from, to) {
        return Err(Error::InvalidTransition { from, to });
    }
    Ok(())
}

fn base_update(defect: &Defect, actor: &Actor, to: DefectStatus) -> TransitionUpdate {
    TransitionUpdate {
        defect_id: defect.id.clone(),
        expected: defect.status,
        new_status: to,
        acceptance_comment: None,
        rejection_comment: None,
        closure_evidence: None,
        accepted_by: None,
        accepted_at: None,
        actor_id: actor.user.id.clone(),
        occurred_at: Utc::now(),
    }
}

/// Writes notification records for the defect's reporter and assignee,
/// skipping the actor. Failures are logged and swallowed.
fn notify_participants(store: &dyn Store, defect: &Defect, actor: &Actor, action: &str) {
    let mut recipients = vec![defect.reporter_id.clone()];
    if let Some(assignee) = &defect.assignee_id {
        if !recipients.contains(assignee) {
            recipients.push(assignee.clone());
        }
    }
    recipients.retain(|id| id != &actor.user.id);

    for user_id in recipients {
        let notification = NewNotification {
            user_id,
            defect_id: Some(defect.id.clone()),
            kind: action.to_string(),
            message: format!("Defect '{}' was {}", defect.title, action),
        };
        if let Err(e) = store.create_notification(&notification) {
            tracing::warn!("Failed to write notification for defect {}: {e}", defect.id);
        }
    }
}

/// `open -> in_progress`. Requires `defect:write`.
pub fn start(store: &dyn Store, actor: &Actor, defect_id: &str) -> Result<Defect> {
    require(actor, Permission::DEFECT_WRITE)?;
    let defect = load_active(store, defect_id)?;
    ensure_edge(defect.status, DefectStatus::InProgress)?;

    let update = base_update(&defect, actor, DefectStatus::InProgress);
    let audit = NewAuditEntry::new(
        &actor.user.id,
        "started",
        TARGET_DEFECT,
        &defect.id,
        json!({"from": defect.status, "to": DefectStatus::InProgress}),
    );
    let updated = store.apply_transition(&update, &audit)?;
    notify_participants(store, &updated, actor, "started");
    Ok(updated)
}

/// `in_progress -> completed`. Requires `defect:write`.
pub fn complete(store: &dyn Store, actor: &Actor, defect_id: &str) -> Result<Defect> {
    require(actor, Permission::DEFECT_WRITE)?;
    let defect = load_active(store, defect_id)?;
    ensure_edge(defect.status, DefectStatus::Completed)?;

    let update = base_update(&defect, actor, DefectStatus::Completed);
    let audit = NewAuditEntry::new(
        &actor.user.id,
        "completed",
        TARGET_DEFECT,
        &defect.id,
        json!({"from": defect.status, "to": DefectStatus::Completed}),
    );
    let updated = store.apply_transition(&update, &audit)?;
    notify_participants(store, &updated, actor, "completed");
    Ok(updated)
}

/// `completed -> accepted`. Requires `defect:review`. The optional comment is
/// stored as the acceptance comment; `accepted_by`/`accepted_at` are recorded.
pub fn accept(
    store: &dyn Store,
    actor: &Actor,
    defect_id: &str,
    comment: Option<String>,
) -> Result<Defect> {
    require(actor, Permission::DEFECT_REVIEW)?;
    let defect = load_active(store, defect_id)?;
    ensure_edge(defect.status, DefectStatus::Accepted)?;

    let comment = comment
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    let now = Utc::now();

    let mut update = base_update(&defect, actor, DefectStatus::Accepted);
    update.acceptance_comment = comment.clone();
    update.accepted_by = Some(actor.user.id.clone());
    update.accepted_at = Some(now);
    update.occurred_at = now;

    let audit = NewAuditEntry::new(
        &actor.user.id,
        "accepted",
        TARGET_DEFECT,
        &defect.id,
        json!({"from": defect.status, "to": DefectStatus::Accepted, "comment": comment}),
    );
    let updated = store.apply_transition(&update, &audit)?;
    notify_participants(store, &updated, actor, "accepted");
    Ok(updated)
}

/// `open | completed | closed -> rejected`. Requires `defect:review` and a
/// non-empty rejection comment.
pub fn reject(
    store: &dyn Store,
    actor: &Actor,
    defect_id: &str,
    rejection_comment: &str,
) -> Result<Defect> {
    require(actor, Permission::DEFECT_REVIEW)?;

    let comment = rejection_comment.trim();
    if comment.is_empty() {
        return Err(Error::Validation(
            "rejection comment must not be empty".to_string(),
        ));
    }

    let defect = load_active(store, defect_id)?;
    ensure_edge(defect.status, DefectStatus::Rejected)?;

    let mut update = base_update(&defect, actor, DefectStatus::Rejected);
    update.rejection_comment = Some(comment.to_string());

    let audit = NewAuditEntry::new(
        &actor.user.id,
        "rejected",
        TARGET_DEFECT,
        &defect.id,
        json!({"from": defect.status, "to": DefectStatus::Rejected, "comment": comment}),
    );
    let updated = store.apply_transition(&update, &audit)?;
    notify_participants(store, &updated, actor, "rejected");
    Ok(updated)
}

/// `open -> closed`. Requires `defect:write` and an evidence reference.
pub fn close(
    store: &dyn Store,
    actor: &Actor,
    defect_id: &str,
    closure_evidence: &str,
) -> Result<Defect> {
    require(actor, Permission::DEFECT_WRITE)?;

    let evidence = closure_evidence.trim();
    if evidence.is_empty() {
        return Err(Error::Validation(
            "closure evidence reference is required".to_string(),
        ));
    }

    let defect = load_active(store, defect_id)?;
    ensure_edge(defect.status, DefectStatus::Closed)?;

    let mut update = base_update(&defect, actor, DefectStatus::Closed);
    update.closure_evidence = Some(evidence.to_string());

    let audit = NewAuditEntry::new(
        &actor.user.id,
        "closed",
        TARGET_DEFECT,
        &defect.id,
        json!({"from": defect.status, "to": DefectStatus::Closed, "evidence": evidence}),
    );
    let updated = store.apply_transition(&update, &audit)?;
    notify_participants(store, &updated, actor, "closed");
    Ok(updated)
}

/// `rejected | closed -> reopened`. Requires `defect:review`.
pub fn reopen(store: &dyn Store, actor: &Actor, defect_id: &str) -> Result<Defect> {
    require(actor, Permission::DEFECT_REVIEW)?;
    let defect = load_active(store, defect_id)?;
    ensure_edge(defect.status, DefectStatus::Reopened)?;

    let update = base_update(&defect, actor, DefectStatus::Reopened);
    let audit = NewAuditEntry::new(
        &actor.user.id,
        "reopened",
        TARGET_DEFECT,
        &defect.id,
        json!({"from": defect.status, "to": DefectStatus::Reopened}),
    );
    let updated = store.apply_transition(&update, &audit)?;
    notify_participants(store, &updated, actor, "reopened");
    Ok(updated)
}

/// `reopened -> open`: puts a reopened defect back into circulation.
/// Requires `defect:write`.
pub fn resume(store: &dyn Store, actor: &Actor, defect_id: &str) -> Result<Defect> {
    require(actor, Permission::DEFECT_WRITE)?;
    let defect = load_active(store, defect_id)?;
    ensure_edge(defect.status, DefectStatus::Open)?;

    let update = base_update(&defect, actor, DefectStatus::Open);
    let audit = NewAuditEntry::new(
        &actor.user.id,
        "resumed",
        TARGET_DEFECT,
        &defect.id,
        json!({"from": defect.status, "to": DefectStatus::Open}),
    );
    let updated = store.apply_transition(&update, &audit)?;
    notify_participants(store, &updated, actor, "resumed");
    Ok(updated)
}

/// Soft-deletes a defect and cascades soft deletion of its comments.
/// Requires the `admin` permission. Idempotent: an already-deleted defect
/// yields `SoftDelete::AlreadyDeleted` and writes nothing.
pub fn soft_delete(store: &dyn Store, actor: &Actor, defect_id: &str) -> Result<SoftDelete> {
    require(actor, Permission::ADMIN)?;

    // Existence (including already-deleted) is checked inside the transaction.
    let now = Utc::now();
    let audit = NewAuditEntry::new(
        &actor.user.id,
        "deleted",
        TARGET_DEFECT,
        defect_id,
        json!({"deleted_by": &actor.user.id}),
    );
    let outcome = store.soft_delete_defect(defect_id, &actor.user.id, now, &audit)?;

    if let SoftDelete::Deleted(defect) = &outcome {
        notify_participants(store, defect, actor, "deleted");
    }
    Ok(outcome)
}

/// Restores a soft-deleted defect and the comments swept by its deletion.
/// Requires the `admin` permission.
pub fn restore(store: &dyn Store, actor: &Actor, defect_id: &str) -> Result<Defect> {
    require(actor, Permission::ADMIN)?;

    let now = Utc::now();
    let audit = NewAuditEntry::new(
        &actor.user.id,
        "restored",
        TARGET_DEFECT,
        defect_id,
        json!({"restored_by": &actor.user.id}),
    );
    let defect = store.restore_defect(defect_id, &actor.user.id, now, &audit)?;
    notify_participants(store, &defect, actor, "restored");
    Ok(defect)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rusqlite::params;
    use uuid::Uuid;

    use super::*;
    use crate::store::{DefectFilter, SqliteStore};
    use crate::types::{DefectComment, Priority, Project, User};

    fn test_store() -> SqliteStore {
        let store = SqliteStore::new(":memory:").unwrap();
        store.initialize().unwrap();
        store
    }

    fn seed_user(store: &SqliteStore, username: &str) -> User {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            display_name: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        store.create_user(&user).unwrap();
        user
    }

    fn actor_with(store: &SqliteStore, username: &str, bits: Permission) -> Actor {
        Actor {
            user: seed_user(store, username),
            permissions: bits.expand_implied(),
        }
    }

    fn seed_defect(store: &SqliteStore, reporter: &User, status: DefectStatus) -> Defect {
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4().to_string(),
            name: format!("project-{}", Uuid::new_v4()),
            description: None,
            archived: false,
            created_by: Some(reporter.id.clone()),
            created_at: now,
            updated_at: now,
        };
        store.create_project(&project).unwrap();

        let defect = Defect {
            id: Uuid::new_v4().to_string(),
            project_id: project.id,
            floor_plan_id: None,
            title: "Leaking pipe".to_string(),
            description: None,
            pin_x: None,
            pin_y: None,
            priority: Priority::High,
            status: DefectStatus::Open,
            assignee_id: None,
            reporter_id: reporter.id.clone(),
            acceptance_comment: None,
            rejection_comment: None,
            closure_evidence: None,
            accepted_by: None,
            accepted_at: None,
            deleted_at: None,
            deleted_by: None,
            created_at: now,
            updated_at: now,
            updated_by: Some(reporter.id.clone()),
        };
        let audit = NewAuditEntry::new(
            &reporter.id,
            "created",
            "defect",
            &defect.id,
            serde_json::json!({"status": "open"}),
        );
        store.create_defect(&defect, &audit).unwrap();
        if status != DefectStatus::Open {
            store
                .connection()
                .execute(
                    "UPDATE defects SET status = ?1 WHERE id = ?2",
                    params![status.as_str(), defect.id],
                )
                .unwrap();
        }
        defect
    }

    fn audit_actions(store: &SqliteStore, defect_id: &str) -> Vec<String> {
        store
            .list_defect_audit(defect_id)
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect()
    }

    #[test]
    fn test_accept_from_completed() {
        let store = test_store();
        let reporter = seed_user(&store, "reporter");
        let manager = actor_with(&store, "manager", Permission::DEFECT_REVIEW);
        let defect = seed_defect(&store, &reporter, DefectStatus::Completed);

        let updated = accept(&store, &manager, &defect.id, Some("looks good".to_string())).unwrap();

        assert_eq!(updated.status, DefectStatus::Accepted);
        assert_eq!(updated.accepted_by.as_deref(), Some(manager.user.id.as_str()));
        assert!(updated.accepted_at.is_some());
        assert_eq!(updated.acceptance_comment.as_deref(), Some("looks good"));

        // Exactly one audit row whose details round-trip the persisted values.
        let entries = store.list_defect_audit(&defect.id).unwrap();
        let accepted: Vec<_> = entries.iter().filter(|e| e.action == "accepted").collect();
        assert_eq!(accepted.len(), 1);
        let details = accepted[0].details.as_ref().unwrap();
        assert_eq!(details["from"], "completed");
        assert_eq!(details["to"], "accepted");
        assert_eq!(details["comment"], "looks good");
    }

    #[test]
    fn test_accept_twice_fails_without_duplicate_audit() {
        let store = test_store();
        let reporter = seed_user(&store, "reporter");
        let manager = actor_with(&store, "manager", Permission::DEFECT_REVIEW);
        let defect = seed_defect(&store, &reporter, DefectStatus::Completed);

        accept(&store, &manager, &defect.id, None).unwrap();
        let err = accept(&store, &manager, &defect.id, None).unwrap_err();

        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: DefectStatus::Accepted,
                to: DefectStatus::Accepted,
            }
        ));
        let actions = audit_actions(&store, &defect.id);
        assert_eq!(actions.iter().filter(|a| *a == "accepted").count(), 1);

        let fetched = store.get_defect(&defect.id).unwrap().unwrap();
        assert_eq!(fetched.status, DefectStatus::Accepted);
    }

    #[test]
    fn test_accept_from_open_is_invalid() {
        let store = test_store();
        let reporter = seed_user(&store, "reporter");
        let manager = actor_with(&store, "manager", Permission::DEFECT_REVIEW);
        let defect = seed_defect(&store, &reporter, DefectStatus::Open);

        let err = accept(&store, &manager, &defect.id, None).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        let fetched = store.get_defect(&defect.id).unwrap().unwrap();
        assert_eq!(fetched.status, DefectStatus::Open);
        assert!(!audit_actions(&store, &defect.id).contains(&"accepted".to_string()));
    }

    #[test]
    fn test_accept_requires_review_permission() {
        let store = test_store();
        let reporter = seed_user(&store, "reporter");
        let contractor = actor_with(&store, "contractor", Permission::DEFECT_WRITE);
        let defect = seed_defect(&store, &reporter, DefectStatus::Completed);

        let err = accept(&store, &contractor, &defect.id, None).unwrap_err();
        assert!(matches!(err, Error::Forbidden));
        assert!(!audit_actions(&store, &defect.id).contains(&"accepted".to_string()));
    }

    #[test]
    fn test_accept_missing_defect() {
        let store = test_store();
        let manager = actor_with(&store, "manager", Permission::DEFECT_REVIEW);

        let err = accept(&store, &manager, "no-such-id", None).unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[test]
    fn test_reject_requires_nonempty_comment() {
        let store = test_store();
        let reporter = seed_user(&store, "reporter");
        let manager = actor_with(&store, "manager", Permission::DEFECT_REVIEW);
        let defect = seed_defect(&store, &reporter, DefectStatus::Open);

        let err = reject(&store, &manager, &defect.id, "   ").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!audit_actions(&store, &defect.id).contains(&"rejected".to_string()));

        let updated = reject(&store, &manager, &defect.id, "wrong location").unwrap();
        assert_eq!(updated.status, DefectStatus::Rejected);
        assert_eq!(updated.rejection_comment.as_deref(), Some("wrong location"));
    }

    #[test]
    fn test_close_requires_evidence() {
        let store = test_store();
        let reporter = seed_user(&store, "reporter");
        let contractor = actor_with(&store, "contractor", Permission::DEFECT_WRITE);
        let defect = seed_defect(&store, &reporter, DefectStatus::Open);

        let err = close(&store, &contractor, &defect.id, "").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        // Nothing written.
        assert!(!audit_actions(&store, &defect.id).contains(&"closed".to_string()));

        let updated = close(&store, &contractor, &defect.id, "uploads/evidence-42.jpg").unwrap();
        assert_eq!(updated.status, DefectStatus::Closed);
        assert_eq!(
            updated.closure_evidence.as_deref(),
            Some("uploads/evidence-42.jpg")
        );
    }

    #[test]
    fn test_close_only_from_open() {
        let store = test_store();
        let reporter = seed_user(&store, "reporter");
        let contractor = actor_with(&store, "contractor", Permission::DEFECT_WRITE);
        let defect = seed_defect(&store, &reporter, DefectStatus::InProgress);

        let err = close(&store, &contractor, &defect.id, "uploads/x.jpg").unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn test_reopen_and_resume_cycle() {
        let store = test_store();
        let reporter = seed_user(&store, "reporter");
        let manager = actor_with(&store, "manager", Permission::DEFECT_REVIEW);
        let contractor = actor_with(&store, "contractor", Permission::DEFECT_WRITE);
        let defect = seed_defect(&store, &reporter, DefectStatus::Rejected);

        let reopened = reopen(&store, &manager, &defect.id).unwrap();
        assert_eq!(reopened.status, DefectStatus::Reopened);

        let resumed = resume(&store, &contractor, &defect.id).unwrap();
        assert_eq!(resumed.status, DefectStatus::Open);

        let actions = audit_actions(&store, &defect.id);
        assert!(actions.contains(&"reopened".to_string()));
        assert!(actions.contains(&"resumed".to_string()));
    }

    #[test]
    fn test_full_lifecycle_happy_path() {
        let store = test_store();
        let reporter = seed_user(&store, "reporter");
        let contractor = actor_with(&store, "contractor", Permission::DEFECT_WRITE);
        let manager = actor_with(&store, "manager", Permission::DEFECT_REVIEW);
        let defect = seed_defect(&store, &reporter, DefectStatus::Open);

        start(&store, &contractor, &defect.id).unwrap();
        complete(&store, &contractor, &defect.id).unwrap();
        let accepted = accept(&store, &manager, &defect.id, None).unwrap();
        assert_eq!(accepted.status, DefectStatus::Accepted);

        assert_eq!(
            audit_actions(&store, &defect.id),
            vec!["created", "started", "completed", "accepted"]
        );
    }

    #[test]
    fn test_soft_delete_requires_admin_and_is_idempotent() {
        let store = test_store();
        let reporter = seed_user(&store, "reporter");
        let manager = actor_with(&store, "manager", Permission::DEFECT_REVIEW);
        let admin = actor_with(&store, "admin", Permission::ADMIN);
        let defect = seed_defect(&store, &reporter, DefectStatus::Open);

        let err = soft_delete(&store, &manager, &defect.id).unwrap_err();
        assert!(matches!(err, Error::Forbidden));

        let first = soft_delete(&store, &admin, &defect.id).unwrap();
        assert!(matches!(first, SoftDelete::Deleted(_)));
        let second = soft_delete(&store, &admin, &defect.id).unwrap();
        assert!(matches!(second, SoftDelete::AlreadyDeleted));

        let active = store
            .list_defects(&DefectFilter::default(), "", 50)
            .unwrap();
        assert!(active.iter().all(|d| d.id != defect.id));

        // A deleted defect is immutable for other transitions.
        let err = start(&store, &admin, &defect.id).unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[test]
    fn test_restore_brings_back_defect_and_comments() {
        let store = test_store();
        let reporter = seed_user(&store, "reporter");
        let admin = actor_with(&store, "admin", Permission::ADMIN);
        let defect = seed_defect(&store, &reporter, DefectStatus::Open);

        let now = Utc::now();
        let comment = DefectComment {
            id: Uuid::new_v4().to_string(),
            defect_id: defect.id.clone(),
            author_id: reporter.id.clone(),
            body: "needs a second look".to_string(),
            deleted_at: None,
            created_at: now,
        };
        let comment_audit = NewAuditEntry::new(
            &reporter.id,
            "commented",
            "defect",
            &defect.id,
            serde_json::json!({"comment_id": comment.id}),
        );
        store.create_comment(&comment, &comment_audit).unwrap();

        soft_delete(&store, &admin, &defect.id).unwrap();
        assert!(store.list_comments(&defect.id).unwrap().is_empty());

        let restored = restore(&store, &admin, &defect.id).unwrap();
        assert!(restored.deleted_at.is_none());
        assert_eq!(store.list_comments(&defect.id).unwrap().len(), 1);

        // Restoring an active defect is a validation error.
        let err = restore(&store, &admin, &defect.id).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_transition_notifies_reporter_and_assignee() {
        let store = test_store();
        let reporter = seed_user(&store, "reporter");
        let assignee = seed_user(&store, "assignee");
        let manager = actor_with(&store, "manager", Permission::DEFECT_REVIEW);
        let defect = seed_defect(&store, &reporter, DefectStatus::Completed);
        store
            .connection()
            .execute(
                "UPDATE defects SET assignee_id = ?1 WHERE id = ?2",
                params![assignee.id, defect.id],
            )
            .unwrap();

        accept(&store, &manager, &defect.id, None).unwrap();

        let for_reporter = store.list_user_notifications(&reporter.id, true).unwrap();
        assert_eq!(for_reporter.len(), 1);
        assert_eq!(for_reporter[0].kind, "accepted");

        let for_assignee = store.list_user_notifications(&assignee.id, true).unwrap();
        assert_eq!(for_assignee.len(), 1);
    }
}
