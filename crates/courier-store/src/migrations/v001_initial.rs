//! v001 -- Initial schema creation.
//!
//! Creates the core tables: `users`, `groups`, `group_members`, `messages`,
//! and `message_seen_by`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id          TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    full_name   TEXT NOT NULL,
    profile_pic TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Groups
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS groups (
    id         TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    name       TEXT NOT NULL,
    created_by TEXT NOT NULL,                -- FK -> users(id)
    avatar     TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,

    FOREIGN KEY (created_by) REFERENCES users(id)
);

-- Membership is append-only in this core; is_admin marks group admins.
CREATE TABLE IF NOT EXISTS group_members (
    group_id TEXT NOT NULL,                  -- FK -> groups(id)
    user_id  TEXT NOT NULL,                  -- FK -> users(id)
    is_admin INTEGER NOT NULL DEFAULT 0,     -- boolean 0/1

    PRIMARY KEY (group_id, user_id),
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id)  REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
-- Routing exclusivity and the never-empty rule are enforced here as well
-- as in the constructors, so no code path can persist an invalid row.
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    sender_id   TEXT NOT NULL,               -- FK -> users(id)
    receiver_id TEXT,                        -- nullable FK -> users(id)
    group_id    TEXT,                        -- nullable FK -> groups(id)
    text        TEXT,
    image_url   TEXT,
    created_at  TEXT NOT NULL,               -- ISO-8601
    seen        INTEGER NOT NULL DEFAULT 0,  -- direct messages only
    seen_at     TEXT,

    FOREIGN KEY (sender_id)   REFERENCES users(id),
    FOREIGN KEY (receiver_id) REFERENCES users(id),
    FOREIGN KEY (group_id)    REFERENCES groups(id) ON DELETE CASCADE,

    CHECK ((receiver_id IS NULL) != (group_id IS NULL)),
    CHECK (text IS NOT NULL OR image_url IS NOT NULL)
);

CREATE INDEX IF NOT EXISTS idx_messages_direct
    ON messages(sender_id, receiver_id, seen);
CREATE INDEX IF NOT EXISTS idx_messages_group
    ON messages(group_id, created_at);

-- ----------------------------------------------------------------
-- Group read receipts
-- ----------------------------------------------------------------
-- One row per (message, reader); the primary key makes the seen_by set
-- idempotent under INSERT OR IGNORE.
CREATE TABLE IF NOT EXISTS message_seen_by (
    message_id TEXT NOT NULL,                -- FK -> messages(id)
    user_id    TEXT NOT NULL,                -- FK -> users(id)

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id)    REFERENCES users(id)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
