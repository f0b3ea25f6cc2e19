//! Database schema migrations.
//!
//! Applies the initial schema: sessions, messages, profiles, preferences
//! and the schema_migrations bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use confab_core::error::ConfabError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), ConfabError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| ConfabError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| ConfabError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
///
/// Timestamps are Unix epoch milliseconds so that messages saved in quick
/// succession still order correctly.
fn apply_v1(conn: &Connection) -> Result<(), ConfabError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            id              TEXT PRIMARY KEY NOT NULL,
            owner_id        TEXT NOT NULL,
            name            TEXT NOT NULL,
            last_message    TEXT,
            message_count   INTEGER NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_owner_updated
            ON sessions (owner_id, updated_at DESC);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY NOT NULL,
            session_id      TEXT NOT NULL,
            role            TEXT NOT NULL
                            CHECK (role IN ('user', 'assistant')),
            content         TEXT NOT NULL,
            timestamp       INTEGER NOT NULL,
            FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_messages_session
            ON messages (session_id, timestamp ASC);

        CREATE TABLE IF NOT EXISTS profiles (
            owner_id        TEXT PRIMARY KEY NOT NULL,
            name            TEXT NOT NULL DEFAULT '',
            location        TEXT NOT NULL DEFAULT '',
            tone            TEXT NOT NULL DEFAULT '',
            projects        TEXT NOT NULL DEFAULT '[]',
            facts           TEXT NOT NULL DEFAULT '[]',
            context         TEXT NOT NULL DEFAULT '',
            updated_at      INTEGER NOT NULL
        );

        -- Key/value preferences. `scope` is an owner id, or 'global' for
        -- values that exist before any owner is known.
        CREATE TABLE IF NOT EXISTS preferences (
            scope           TEXT NOT NULL,
            key             TEXT NOT NULL,
            value           TEXT NOT NULL,
            PRIMARY KEY (scope, key)
        );

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| ConfabError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}
