pub const SCHEMA: &str = r#"
-- Projects group floor plans and defects
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    archived INTEGER NOT NULL DEFAULT 0,
    created_by TEXT REFERENCES users(id),
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

-- Floor plans host pinned defects; the rendered image is referenced, not stored
CREATE TABLE IF NOT EXISTS floor_plans (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    image_ref TEXT,
    deleted_at TEXT,
    deleted_by TEXT REFERENCES users(id),
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now')),

    UNIQUE(project_id, name)
);

-- Users hold roles and direct grants; tokens are just auth credentials
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    display_name TEXT,
    deleted_at TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

-- Roles carry a permission bitmask
CREATE TABLE IF NOT EXISTS roles (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    permission_bits INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

-- Role memberships are soft-deletable; only rows with deleted_at IS NULL count
CREATE TABLE IF NOT EXISTS user_roles (
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    role_id TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
    deleted_at TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    PRIMARY KEY (user_id, role_id)
);

-- Direct per-user grant, layered on top of role bits (deny wins)
CREATE TABLE IF NOT EXISTS user_grants (
    user_id TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
    allow_bits INTEGER NOT NULL DEFAULT 0,
    deny_bits INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

-- Defects; status holds only canonical values for rows written by this
-- server. Rows migrated from older deployments may carry 'pending' or
-- 'verified', which are normalized on read.
CREATE TABLE IF NOT EXISTS defects (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    floor_plan_id TEXT REFERENCES floor_plans(id) ON DELETE SET NULL,
    title TEXT NOT NULL,
    description TEXT,

    -- Normalized pin position on the floor plan
    pin_x REAL CHECK (pin_x IS NULL OR (pin_x >= 0.0 AND pin_x <= 1.0)),
    pin_y REAL CHECK (pin_y IS NULL OR (pin_y >= 0.0 AND pin_y <= 1.0)),

    priority TEXT NOT NULL DEFAULT 'medium',
    status TEXT NOT NULL DEFAULT 'open',

    assignee_id TEXT REFERENCES users(id),
    reporter_id TEXT NOT NULL REFERENCES users(id),

    acceptance_comment TEXT,
    rejection_comment TEXT,
    closure_evidence TEXT,
    accepted_by TEXT REFERENCES users(id),
    accepted_at TEXT,

    deleted_at TEXT,
    deleted_by TEXT REFERENCES users(id),
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now')),
    updated_by TEXT REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS defect_comments (
    id TEXT PRIMARY KEY,
    defect_id TEXT NOT NULL REFERENCES defects(id) ON DELETE CASCADE,
    author_id TEXT NOT NULL REFERENCES users(id),
    body TEXT NOT NULL,
    deleted_at TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

-- Append-only: no UPDATE or DELETE statement is ever issued against this table
CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    actor_id TEXT,
    action TEXT NOT NULL,
    target_type TEXT NOT NULL,
    target_id TEXT NOT NULL,
    details TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

-- In-app notification records; delivery is out of scope
CREATE TABLE IF NOT EXISTS notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    defect_id TEXT REFERENCES defects(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    message TEXT NOT NULL,
    read_at TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

-- Tokens are auth credentials; non-admin tokens must belong to a user
CREATE TABLE IF NOT EXISTS tokens (
    id TEXT PRIMARY KEY,
    token_hash TEXT NOT NULL,          -- argon2id hash with embedded salt
    token_lookup TEXT NOT NULL,        -- first 8 chars of ID for fast lookup
    is_admin INTEGER NOT NULL DEFAULT 0,  -- admin tokens only access /api/v1/admin/* routes

    -- User binding (required for non-admin tokens, NULL only for admin tokens)
    user_id TEXT REFERENCES users(id) ON DELETE CASCADE,

    -- Lifecycle
    created_at TEXT DEFAULT (datetime('now')),
    expires_at TEXT,            -- NULL = never
    last_used_at TEXT
);

-- Create indexes
CREATE INDEX IF NOT EXISTS idx_floor_plans_project ON floor_plans(project_id);
CREATE INDEX IF NOT EXISTS idx_defects_project ON defects(project_id);
CREATE INDEX IF NOT EXISTS idx_defects_plan ON defects(floor_plan_id);
CREATE INDEX IF NOT EXISTS idx_defects_status ON defects(status);
CREATE INDEX IF NOT EXISTS idx_defects_assignee ON defects(assignee_id);
CREATE INDEX IF NOT EXISTS idx_comments_defect ON defect_comments(defect_id);
CREATE INDEX IF NOT EXISTS idx_user_roles_role ON user_roles(role_id);
CREATE INDEX IF NOT EXISTS idx_audit_target ON audit_log(target_type, target_id);
CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_tokens_lookup ON tokens(token_lookup);
CREATE INDEX IF NOT EXISTS idx_tokens_user ON tokens(user_id);
"#;
