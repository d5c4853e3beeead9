//! v001 -- Initial schema creation.
//!
//! One table of JSON documents keyed by their top-level path segment.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Documents
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS documents (
    key        TEXT PRIMARY KEY NOT NULL,   -- identity key, conversation id, or 'users'
    body       TEXT NOT NULL,               -- JSON subtree
    updated_at TEXT NOT NULL                -- RFC-3339
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
