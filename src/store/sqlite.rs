use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use super::{DefectFilter, Store};
use super::schema::SCHEMA;
use crate::error::{Error, Result};
use crate::types::*;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    /// This allows consuming applications to execute custom SQL.
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn()
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_opt_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|s| parse_datetime(&s))
}

fn invalid_text(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unexpected value '{value}'").into(),
    )
}

const DEFECT_COLS: &str = "id, project_id, floor_plan_id, title, description, pin_x, pin_y, \
     priority, status, assignee_id, reporter_id, acceptance_comment, rejection_comment, \
     closure_evidence, accepted_by, accepted_at, deleted_at, deleted_by, created_at, \
     updated_at, updated_by";

fn defect_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Defect> {
    let priority_raw: String = row.get(7)?;
    let priority = Priority::parse(&priority_raw).ok_or_else(|| invalid_text(7, &priority_raw))?;
    let status_raw: String = row.get(8)?;
    let status = DefectStatus::parse(&status_raw).ok_or_else(|| invalid_text(8, &status_raw))?;

    Ok(Defect {
        id: row.get(0)?,
        project_id: row.get(1)?,
        floor_plan_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        pin_x: row.get(5)?,
        pin_y: row.get(6)?,
        priority,
        status,
        assignee_id: row.get(9)?,
        reporter_id: row.get(10)?,
        acceptance_comment: row.get(11)?,
        rejection_comment: row.get(12)?,
        closure_evidence: row.get(13)?,
        accepted_by: row.get(14)?,
        accepted_at: parse_opt_datetime(row.get(15)?),
        deleted_at: parse_opt_datetime(row.get(16)?),
        deleted_by: row.get(17)?,
        created_at: parse_datetime(&row.get::<_, String>(18)?),
        updated_at: parse_datetime(&row.get::<_, String>(19)?),
        updated_by: row.get(20)?,
    })
}

fn project_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        archived: row.get(3)?,
        created_by: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
        updated_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn floor_plan_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FloorPlan> {
    Ok(FloorPlan {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        image_ref: row.get(3)?,
        deleted_at: parse_opt_datetime(row.get(4)?),
        deleted_by: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
        updated_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        deleted_at: parse_opt_datetime(row.get(3)?),
        created_at: parse_datetime(&row.get::<_, String>(4)?),
        updated_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn role_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Role> {
    Ok(Role {
        id: row.get(0)?,
        name: row.get(1)?,
        permission_bits: Permission::from(row.get::<_, i64>(2)?),
        created_at: parse_datetime(&row.get::<_, String>(3)?),
        updated_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn token_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Token> {
    Ok(Token {
        id: row.get(0)?,
        token_hash: row.get(1)?,
        token_lookup: row.get(2)?,
        is_admin: row.get(3)?,
        user_id: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
        expires_at: parse_opt_datetime(row.get(6)?),
        last_used_at: parse_opt_datetime(row.get(7)?),
    })
}

fn audit_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    let details: Option<String> = row.get(5)?;
    Ok(AuditEntry {
        id: row.get(0)?,
        actor_id: row.get(1)?,
        action: row.get(2)?,
        target_type: row.get(3)?,
        target_id: row.get(4)?,
        details: details.and_then(|d| serde_json::from_str(&d).ok()),
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn notification_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        defect_id: row.get(2)?,
        kind: row.get(3)?,
        message: row.get(4)?,
        read_at: parse_opt_datetime(row.get(5)?),
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn query_defect(conn: &Connection, id: &str) -> Result<Option<Defect>> {
    conn.query_row(
        &format!("SELECT {DEFECT_COLS} FROM defects WHERE id = ?1"),
        params![id],
        defect_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn insert_audit(conn: &Connection, entry: &NewAuditEntry, at: &DateTime<Utc>) -> Result<i64> {
    conn.execute(
        "INSERT INTO audit_log (actor_id, action, target_type, target_id, details, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.actor_id,
            entry.action,
            entry.target_type,
            entry.target_id,
            entry.details.as_ref().map(|d| d.to_string()),
            format_datetime(at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // Project operations

    fn create_project(&self, project: &Project) -> Result<()> {
        self.conn().execute(
            "INSERT INTO projects (id, name, description, archived, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                project.id,
                project.name,
                project.description,
                project.archived,
                project.created_by,
                format_datetime(&project.created_at),
                format_datetime(&project.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, description, archived, created_by, created_at, updated_at
             FROM projects WHERE id = ?1",
            params![id],
            project_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_project_by_name(&self, name: &str) -> Result<Option<Project>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, description, archived, created_by, created_at, updated_at
             FROM projects WHERE name = ?1",
            params![name],
            project_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_projects(&self, cursor: &str, limit: i32) -> Result<Vec<Project>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, description, archived, created_by, created_at, updated_at
             FROM projects WHERE id > ?1 ORDER BY id LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![cursor, limit], project_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_project(&self, project: &Project) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE projects SET name = ?1, description = ?2, archived = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                project.name,
                project.description,
                project.archived,
                format_datetime(&project.updated_at),
                project.id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    // Floor plan operations

    fn create_floor_plan(&self, plan: &FloorPlan) -> Result<()> {
        self.conn().execute(
            "INSERT INTO floor_plans (id, project_id, name, image_ref, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                plan.id,
                plan.project_id,
                plan.name,
                plan.image_ref,
                format_datetime(&plan.created_at),
                format_datetime(&plan.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_floor_plan(&self, id: &str) -> Result<Option<FloorPlan>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, project_id, name, image_ref, deleted_at, deleted_by, created_at, updated_at
             FROM floor_plans WHERE id = ?1",
            params![id],
            floor_plan_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_floor_plans(
        &self,
        project_id: &str,
        cursor: &str,
        limit: i32,
    ) -> Result<Vec<FloorPlan>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, name, image_ref, deleted_at, deleted_by, created_at, updated_at
             FROM floor_plans
             WHERE project_id = ?1 AND deleted_at IS NULL AND id > ?2
             ORDER BY id LIMIT ?3",
        )?;

        let rows = stmt.query_map(params![project_id, cursor, limit], floor_plan_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_floor_plan(
        &self,
        id: &str,
        actor_id: &str,
        at: DateTime<Utc>,
        audit: &NewAuditEntry,
    ) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let at_str = format_datetime(&at);

        let rows = tx.execute(
            "UPDATE floor_plans SET deleted_at = ?1, deleted_by = ?2, updated_at = ?1
             WHERE id = ?3 AND deleted_at IS NULL",
            params![at_str, actor_id, id],
        )?;
        if rows == 0 {
            return Ok(false);
        }

        // Cascade: defects pinned to the plan, then their comments.
        tx.execute(
            "UPDATE defects SET deleted_at = ?1, deleted_by = ?2, updated_at = ?1, updated_by = ?2
             WHERE floor_plan_id = ?3 AND deleted_at IS NULL",
            params![at_str, actor_id, id],
        )?;
        tx.execute(
            "UPDATE defect_comments SET deleted_at = ?1
             WHERE deleted_at IS NULL AND defect_id IN
                 (SELECT id FROM defects WHERE floor_plan_id = ?2 AND deleted_at = ?1)",
            params![at_str, id],
        )?;

        insert_audit(&tx, audit, &at)?;
        tx.commit()?;
        Ok(true)
    }

    // Defect operations

    fn create_defect(&self, defect: &Defect, audit: &NewAuditEntry) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO defects (id, project_id, floor_plan_id, title, description, pin_x, pin_y,
                 priority, status, assignee_id, reporter_id, created_at, updated_at, updated_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                defect.id,
                defect.project_id,
                defect.floor_plan_id,
                defect.title,
                defect.description,
                defect.pin_x,
                defect.pin_y,
                defect.priority.as_str(),
                defect.status.as_str(),
                defect.assignee_id,
                defect.reporter_id,
                format_datetime(&defect.created_at),
                format_datetime(&defect.updated_at),
                defect.updated_by,
            ],
        )?;

        insert_audit(&tx, audit, &defect.created_at)?;
        tx.commit()?;
        Ok(())
    }

    fn get_defect(&self, id: &str) -> Result<Option<Defect>> {
        query_defect(&self.conn(), id)
    }

    fn list_defects(&self, filter: &DefectFilter, cursor: &str, limit: i32) -> Result<Vec<Defect>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {DEFECT_COLS} FROM defects
             WHERE deleted_at IS NULL
               AND (?1 IS NULL OR project_id = ?1)
               AND (?2 IS NULL OR floor_plan_id = ?2)
               AND (?3 IS NULL OR status = ?3)
               AND (?4 IS NULL OR assignee_id = ?4)
               AND id > ?5
             ORDER BY id LIMIT ?6"
        ))?;

        let rows = stmt.query_map(
            params![
                filter.project_id,
                filter.floor_plan_id,
                filter.status.map(|s| s.as_str()),
                filter.assignee_id,
                cursor,
                limit,
            ],
            defect_from_row,
        )?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_defect_details(&self, defect: &Defect, audit: &NewAuditEntry) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let rows = tx.execute(
            "UPDATE defects SET title = ?1, description = ?2, pin_x = ?3, pin_y = ?4,
                 priority = ?5, assignee_id = ?6, updated_at = ?7, updated_by = ?8
             WHERE id = ?9 AND deleted_at IS NULL",
            params![
                defect.title,
                defect.description,
                defect.pin_x,
                defect.pin_y,
                defect.priority.as_str(),
                defect.assignee_id,
                format_datetime(&defect.updated_at),
                defect.updated_by,
                defect.id,
            ],
        )?;
        if rows == 0 {
            return Err(Error::NotFound);
        }

        insert_audit(&tx, audit, &defect.updated_at)?;
        tx.commit()?;
        Ok(())
    }

    fn apply_transition(&self, update: &TransitionUpdate, audit: &NewAuditEntry) -> Result<Defect> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Re-read and re-validate under the transaction.
        let row: Option<(String, Option<String>)> = tx
            .query_row(
                "SELECT status, deleted_at FROM defects WHERE id = ?1",
                params![update.defect_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (status_raw, deleted_at) = row.ok_or(Error::NotFound)?;
        if deleted_at.is_some() {
            return Err(Error::NotFound);
        }
        let current = DefectStatus::parse(&status_raw)
            .ok_or_else(|| Error::Validation(format!("unknown stored status '{status_raw}'")))?;
        if current != update.expected {
            return Err(Error::InvalidTransition {
                from: current,
                to: update.new_status,
            });
        }

        // The status guard in the WHERE clause matches the raw stored string,
        // so legacy-alias rows are guarded on their literal value.
        let rows = tx.execute(
            "UPDATE defects SET
                 status = ?2,
                 acceptance_comment = COALESCE(?3, acceptance_comment),
                 rejection_comment = COALESCE(?4, rejection_comment),
                 closure_evidence = COALESCE(?5, closure_evidence),
                 accepted_by = COALESCE(?6, accepted_by),
                 accepted_at = COALESCE(?7, accepted_at),
                 updated_at = ?8,
                 updated_by = ?9
             WHERE id = ?1 AND status = ?10 AND deleted_at IS NULL",
            params![
                update.defect_id,
                update.new_status.as_str(),
                update.acceptance_comment,
                update.rejection_comment,
                update.closure_evidence,
                update.accepted_by,
                update.accepted_at.map(|t| format_datetime(&t)),
                format_datetime(&update.occurred_at),
                update.actor_id,
                status_raw,
            ],
        )?;
        if rows == 0 {
            return Err(Error::InvalidTransition {
                from: current,
                to: update.new_status,
            });
        }

        insert_audit(&tx, audit, &update.occurred_at)?;

        let defect = query_defect(&tx, &update.defect_id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(defect)
    }

    fn soft_delete_defect(
        &self,
        id: &str,
        actor_id: &str,
        at: DateTime<Utc>,
        audit: &NewAuditEntry,
    ) -> Result<SoftDelete> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let deleted: Option<Option<String>> = tx
            .query_row(
                "SELECT deleted_at FROM defects WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        match deleted {
            None => return Err(Error::NotFound),
            Some(Some(_)) => return Ok(SoftDelete::AlreadyDeleted),
            Some(None) => {}
        }

        let at_str = format_datetime(&at);
        tx.execute(
            "UPDATE defects SET deleted_at = ?1, deleted_by = ?2, updated_at = ?1, updated_by = ?2
             WHERE id = ?3 AND deleted_at IS NULL",
            params![at_str, actor_id, id],
        )?;
        tx.execute(
            "UPDATE defect_comments SET deleted_at = ?1
             WHERE defect_id = ?2 AND deleted_at IS NULL",
            params![at_str, id],
        )?;

        insert_audit(&tx, audit, &at)?;

        let defect = query_defect(&tx, id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(SoftDelete::Deleted(defect))
    }

    fn restore_defect(
        &self,
        id: &str,
        actor_id: &str,
        at: DateTime<Utc>,
        audit: &NewAuditEntry,
    ) -> Result<Defect> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let deleted: Option<Option<String>> = tx
            .query_row(
                "SELECT deleted_at FROM defects WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        let deleted_at = match deleted {
            None => return Err(Error::NotFound),
            Some(None) => return Err(Error::Validation("defect is not deleted".to_string())),
            Some(Some(deleted_at)) => deleted_at,
        };

        tx.execute(
            "UPDATE defects SET deleted_at = NULL, deleted_by = NULL, updated_at = ?1, updated_by = ?2
             WHERE id = ?3",
            params![format_datetime(&at), actor_id, id],
        )?;
        // Only comments swept by the delete cascade come back; individually
        // deleted comments keep their own timestamp and stay deleted.
        tx.execute(
            "UPDATE defect_comments SET deleted_at = NULL
             WHERE defect_id = ?1 AND deleted_at = ?2",
            params![id, deleted_at],
        )?;

        insert_audit(&tx, audit, &at)?;

        let defect = query_defect(&tx, id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(defect)
    }

    // Comment operations

    fn create_comment(&self, comment: &DefectComment, audit: &NewAuditEntry) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO defect_comments (id, defect_id, author_id, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                comment.id,
                comment.defect_id,
                comment.author_id,
                comment.body,
                format_datetime(&comment.created_at),
            ],
        )?;

        insert_audit(&tx, audit, &comment.created_at)?;
        tx.commit()?;
        Ok(())
    }

    fn list_comments(&self, defect_id: &str) -> Result<Vec<DefectComment>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, defect_id, author_id, body, deleted_at, created_at
             FROM defect_comments
             WHERE defect_id = ?1 AND deleted_at IS NULL
             ORDER BY created_at, id",
        )?;

        let rows = stmt.query_map(params![defect_id], |row| {
            Ok(DefectComment {
                id: row.get(0)?,
                defect_id: row.get(1)?,
                author_id: row.get(2)?,
                body: row.get(3)?,
                deleted_at: parse_opt_datetime(row.get(4)?),
                created_at: parse_datetime(&row.get::<_, String>(5)?),
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // User operations

    fn create_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, username, display_name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id,
                user.username,
                user.display_name,
                format_datetime(&user.created_at),
                format_datetime(&user.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, username, display_name, deleted_at, created_at, updated_at
             FROM users WHERE id = ?1",
            params![id],
            user_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, username, display_name, deleted_at, created_at, updated_at
             FROM users WHERE username = ?1",
            params![username],
            user_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_users(&self, cursor: &str, limit: i32) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, username, display_name, deleted_at, created_at, updated_at
             FROM users WHERE deleted_at IS NULL AND id > ?1 ORDER BY id LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![cursor, limit], user_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn soft_delete_user(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE users SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![format_datetime(&at), id],
        )?;
        Ok(rows > 0)
    }

    // Role operations

    fn create_role(&self, role: &Role) -> Result<()> {
        self.conn().execute(
            "INSERT INTO roles (id, name, permission_bits, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                role.id,
                role.name,
                i64::from(role.permission_bits),
                format_datetime(&role.created_at),
                format_datetime(&role.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_role(&self, id: &str) -> Result<Option<Role>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, permission_bits, created_at, updated_at FROM roles WHERE id = ?1",
            params![id],
            role_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, permission_bits, created_at, updated_at FROM roles WHERE name = ?1",
            params![name],
            role_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_roles(&self, cursor: &str, limit: i32) -> Result<Vec<Role>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, permission_bits, created_at, updated_at
             FROM roles WHERE id > ?1 ORDER BY id LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![cursor, limit], role_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_role(&self, role: &Role) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE roles SET name = ?1, permission_bits = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                role.name,
                i64::from(role.permission_bits),
                format_datetime(&role.updated_at),
                role.id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_role(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM roles WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Role membership operations

    fn assign_role(&self, user_id: &str, role_id: &str) -> Result<()> {
        // Re-assigning reactivates a soft-deleted membership.
        self.conn().execute(
            "INSERT INTO user_roles (user_id, role_id) VALUES (?1, ?2)
             ON CONFLICT(user_id, role_id) DO UPDATE SET deleted_at = NULL",
            params![user_id, role_id],
        )?;
        Ok(())
    }

    fn revoke_role(&self, user_id: &str, role_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE user_roles SET deleted_at = ?1
             WHERE user_id = ?2 AND role_id = ?3 AND deleted_at IS NULL",
            params![format_datetime(&at), user_id, role_id],
        )?;
        Ok(rows > 0)
    }

    fn list_user_roles(&self, user_id: &str) -> Result<Vec<Role>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT r.id, r.name, r.permission_bits, r.created_at, r.updated_at
             FROM roles r
             JOIN user_roles ur ON ur.role_id = r.id
             WHERE ur.user_id = ?1 AND ur.deleted_at IS NULL
             ORDER BY r.name",
        )?;

        let rows = stmt.query_map(params![user_id], role_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Direct grant operations

    fn upsert_user_grant(&self, grant: &UserGrant) -> Result<()> {
        self.conn().execute(
            "INSERT INTO user_grants (user_id, allow_bits, deny_bits, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                 allow_bits = excluded.allow_bits,
                 deny_bits = excluded.deny_bits,
                 updated_at = excluded.updated_at",
            params![
                grant.user_id,
                i64::from(grant.allow_bits),
                i64::from(grant.deny_bits),
                format_datetime(&grant.created_at),
                format_datetime(&grant.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_user_grant(&self, user_id: &str) -> Result<Option<UserGrant>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT user_id, allow_bits, deny_bits, created_at, updated_at
             FROM user_grants WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(UserGrant {
                    user_id: row.get(0)?,
                    allow_bits: Permission::from(row.get::<_, i64>(1)?),
                    deny_bits: Permission::from(row.get::<_, i64>(2)?),
                    created_at: parse_datetime(&row.get::<_, String>(3)?),
                    updated_at: parse_datetime(&row.get::<_, String>(4)?),
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn delete_user_grant(&self, user_id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM user_grants WHERE user_id = ?1", params![user_id])?;
        Ok(rows > 0)
    }

    // Token operations

    fn create_token(&self, token: &Token) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO tokens (id, token_hash, token_lookup, is_admin, user_id, created_at, expires_at, last_used_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                token.id,
                token.token_hash,
                token.token_lookup,
                token.is_admin,
                token.user_id,
                format_datetime(&token.created_at),
                token.expires_at.map(|t| format_datetime(&t)),
                token.last_used_at.map(|t| format_datetime(&t)),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, Some(msg)))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
                    && msg.contains("token_lookup") =>
            {
                Err(Error::TokenLookupCollision)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_token_by_id(&self, id: &str) -> Result<Option<Token>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, token_hash, token_lookup, is_admin, user_id, created_at, expires_at, last_used_at
             FROM tokens WHERE id = ?1",
            params![id],
            token_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_token_by_lookup(&self, lookup: &str) -> Result<Option<Token>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, token_hash, token_lookup, is_admin, user_id, created_at, expires_at, last_used_at
             FROM tokens WHERE token_lookup = ?1",
            params![lookup],
            token_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_tokens(&self, cursor: &str, limit: i32) -> Result<Vec<Token>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, token_hash, token_lookup, is_admin, user_id, created_at, expires_at, last_used_at
             FROM tokens WHERE id > ?1 ORDER BY id LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![cursor, limit], token_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_user_tokens(&self, user_id: &str) -> Result<Vec<Token>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, token_hash, token_lookup, is_admin, user_id, created_at, expires_at, last_used_at
             FROM tokens WHERE user_id = ?1 ORDER BY id",
        )?;

        let rows = stmt.query_map(params![user_id], token_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_token(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM tokens WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn update_token_last_used(&self, id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE tokens SET last_used_at = ?1 WHERE id = ?2",
            params![format_datetime(&Utc::now()), id],
        )?;
        Ok(())
    }

    // Audit operations

    fn append_audit(&self, entry: &NewAuditEntry) -> Result<i64> {
        insert_audit(&self.conn(), entry, &Utc::now())
    }

    fn list_defect_audit(&self, defect_id: &str) -> Result<Vec<AuditEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, actor_id, action, target_type, target_id, details, created_at
             FROM audit_log WHERE target_type = 'defect' AND target_id = ?1 ORDER BY id",
        )?;

        let rows = stmt.query_map(params![defect_id], audit_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_audit(&self, cursor: i64, limit: i32) -> Result<Vec<AuditEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, actor_id, action, target_type, target_id, details, created_at
             FROM audit_log WHERE id > ?1 ORDER BY id LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![cursor, limit], audit_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Notification operations

    fn create_notification(&self, notification: &NewNotification) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO notifications (user_id, defect_id, kind, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                notification.user_id,
                notification.defect_id,
                notification.kind,
                notification.message,
                format_datetime(&Utc::now()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn list_user_notifications(
        &self,
        user_id: &str,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, defect_id, kind, message, read_at, created_at
             FROM notifications
             WHERE user_id = ?1 AND (?2 = 0 OR read_at IS NULL)
             ORDER BY (read_at IS NULL) DESC, id DESC",
        )?;

        let rows = stmt.query_map(params![user_id, unread_only], notification_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn mark_notification_read(&self, id: i64, user_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE notifications SET read_at = ?1
             WHERE id = ?2 AND user_id = ?3 AND read_at IS NULL",
            params![format_datetime(&at), id, user_id],
        )?;
        Ok(rows > 0)
    }

    // Admin token check

    fn has_admin_token(&self) -> Result<bool> {
        let conn = self.conn();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM tokens WHERE is_admin = 1)",
            [],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}
