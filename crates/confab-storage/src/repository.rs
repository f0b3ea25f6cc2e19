//! Owner-scoped SQLite implementations of the session and message stores.
//!
//! Every message mutation runs in a transaction together with
//! `refresh_session_summary`, so a session's `message_count`,
//! `last_message` and `updated_at` are always recomputed from the rows
//! that actually exist rather than adjusted incrementally.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use confab_core::error::{ConfabError, Result};
use confab_core::store::{MessageStore, SessionStore};
use confab_core::types::{Message, Role, Session};

use crate::db::Database;

const SESSION_COLUMNS: &str =
    "id, owner_id, name, last_message, message_count, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, session_id, role, content, timestamp";

/// Session registry for a single owner.
pub struct SqliteSessionStore {
    db: Arc<Database>,
    owner_id: String,
}

impl SqliteSessionStore {
    pub fn new(db: Arc<Database>, owner_id: impl Into<String>) -> Self {
        Self {
            db,
            owner_id: owner_id.into(),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create(&self, name: &str) -> Result<Session> {
        let id = Uuid::new_v4();
        let now = now_millis();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, owner_id, name, last_message, message_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, NULL, 0, ?4, ?4)",
                rusqlite::params![id.to_string(), self.owner_id, name, now],
            )
            .map_err(|e| ConfabError::Storage(format!("Failed to create session: {}", e)))?;
            debug!(session_id = %id, name, "Session created");
            find_session(conn, &self.owner_id, id)?
                .ok_or_else(|| ConfabError::NotFound(format!("session {}", id)))
        })
    }

    async fn list(&self) -> Result<Vec<Session>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM sessions
                     WHERE owner_id = ?1
                     ORDER BY updated_at DESC, created_at DESC, rowid DESC",
                    SESSION_COLUMNS
                ))
                .map_err(|e| ConfabError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![self.owner_id], |row| Ok(row_to_session(row)))
                .map_err(|e| ConfabError::Storage(e.to_string()))?;

            let mut sessions = Vec::new();
            for row in rows {
                sessions.push(row.map_err(|e| ConfabError::Storage(e.to_string()))??);
            }
            Ok(sessions)
        })
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<Session>> {
        self.db
            .with_conn(|conn| find_session(conn, &self.owner_id, session_id))
    }

    async fn rename(&self, session_id: Uuid, name: &str) -> Result<Session> {
        let now = now_millis();
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE sessions SET name = ?1, updated_at = ?2
                     WHERE id = ?3 AND owner_id = ?4",
                    rusqlite::params![name, now, session_id.to_string(), self.owner_id],
                )
                .map_err(|e| ConfabError::Storage(format!("Failed to rename session: {}", e)))?;
            if changed == 0 {
                return Err(ConfabError::NotFound(format!("session {}", session_id)));
            }
            find_session(conn, &self.owner_id, session_id)?
                .ok_or_else(|| ConfabError::NotFound(format!("session {}", session_id)))
        })
    }
}

/// Message storage restricted to sessions of a single owner.
pub struct SqliteMessageStore {
    db: Arc<Database>,
    owner_id: String,
}

impl SqliteMessageStore {
    pub fn new(db: Arc<Database>, owner_id: impl Into<String>) -> Self {
        Self {
            db,
            owner_id: owner_id.into(),
        }
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn save(&self, session_id: Uuid, role: Role, content: &str) -> Result<Message> {
        let id = Uuid::new_v4();
        self.db.with_tx(|tx| {
            if find_session(tx, &self.owner_id, session_id)?.is_none() {
                return Err(ConfabError::NotFound(format!("session {}", session_id)));
            }

            // Strictly increasing per session, even for saves within the
            // same millisecond.
            let last: Option<i64> = tx
                .query_row(
                    "SELECT MAX(timestamp) FROM messages WHERE session_id = ?1",
                    rusqlite::params![session_id.to_string()],
                    |row| row.get(0),
                )
                .map_err(|e| ConfabError::Storage(e.to_string()))?;
            let timestamp = match last {
                Some(last) => now_millis().max(last + 1),
                None => now_millis(),
            };

            tx.execute(
                "INSERT INTO messages (id, session_id, role, content, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    id.to_string(),
                    session_id.to_string(),
                    role.as_str(),
                    content,
                    timestamp,
                ],
            )
            .map_err(|e| ConfabError::Storage(format!("Failed to save message: {}", e)))?;

            refresh_session_summary(tx, session_id, timestamp)?;

            Ok(Message {
                id,
                session_id,
                role,
                content: content.to_string(),
                timestamp: from_millis(timestamp),
            })
        })
    }

    async fn list(&self, session_id: Uuid) -> Result<Vec<Message>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM messages
                     WHERE session_id = ?1
                       AND session_id IN (SELECT id FROM sessions WHERE owner_id = ?2)
                     ORDER BY timestamp ASC, rowid ASC",
                    MESSAGE_COLUMNS
                ))
                .map_err(|e| ConfabError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(
                    rusqlite::params![session_id.to_string(), self.owner_id],
                    |row| Ok(row_to_message(row)),
                )
                .map_err(|e| ConfabError::Storage(e.to_string()))?;

            let mut messages = Vec::new();
            for row in rows {
                messages.push(row.map_err(|e| ConfabError::Storage(e.to_string()))??);
            }
            Ok(messages)
        })
    }

    async fn delete(&self, message_id: Uuid) -> Result<()> {
        self.db.with_tx(|tx| {
            let message = find_message(tx, &self.owner_id, message_id)?
                .ok_or_else(|| ConfabError::NotFound(format!("message {}", message_id)))?;

            tx.execute(
                "DELETE FROM messages WHERE id = ?1",
                rusqlite::params![message_id.to_string()],
            )
            .map_err(|e| ConfabError::Storage(format!("Failed to delete message: {}", e)))?;

            refresh_session_summary(tx, message.session_id, now_millis())?;
            debug!(message_id = %message_id, "Message deleted");
            Ok(())
        })
    }

    async fn update_content(&self, message_id: Uuid, content: &str) -> Result<Message> {
        self.db.with_tx(|tx| {
            let mut message = find_message(tx, &self.owner_id, message_id)?
                .ok_or_else(|| ConfabError::NotFound(format!("message {}", message_id)))?;

            tx.execute(
                "UPDATE messages SET content = ?1 WHERE id = ?2",
                rusqlite::params![content, message_id.to_string()],
            )
            .map_err(|e| ConfabError::Storage(format!("Failed to update message: {}", e)))?;

            refresh_session_summary(tx, message.session_id, now_millis())?;
            message.content = content.to_string();
            Ok(message)
        })
    }
}

/// Recompute the denormalized summary of a session from its messages.
fn refresh_session_summary(conn: &Connection, session_id: Uuid, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE sessions SET
            message_count = (SELECT COUNT(*) FROM messages WHERE session_id = ?1),
            last_message = (SELECT content FROM messages WHERE session_id = ?1
                            ORDER BY timestamp DESC, rowid DESC LIMIT 1),
            updated_at = MAX(updated_at, ?2)
         WHERE id = ?1",
        rusqlite::params![session_id.to_string(), now],
    )
    .map_err(|e| ConfabError::Storage(format!("Failed to refresh session summary: {}", e)))?;
    Ok(())
}

fn find_session(conn: &Connection, owner_id: &str, id: Uuid) -> Result<Option<Session>> {
    let result = conn
        .query_row(
            &format!(
                "SELECT {} FROM sessions WHERE id = ?1 AND owner_id = ?2",
                SESSION_COLUMNS
            ),
            rusqlite::params![id.to_string(), owner_id],
            |row| Ok(row_to_session(row)),
        )
        .optional()
        .map_err(|e| ConfabError::Storage(e.to_string()))?;

    result.transpose()
}

fn find_message(conn: &Connection, owner_id: &str, id: Uuid) -> Result<Option<Message>> {
    let result = conn
        .query_row(
            &format!(
                "SELECT {} FROM messages
                 WHERE id = ?1
                   AND session_id IN (SELECT id FROM sessions WHERE owner_id = ?2)",
                MESSAGE_COLUMNS
            ),
            rusqlite::params![id.to_string(), owner_id],
            |row| Ok(row_to_message(row)),
        )
        .optional()
        .map_err(|e| ConfabError::Storage(e.to_string()))?;

    result.transpose()
}

// ============================================================================
// Helper functions for row-to-entity conversion.
// ============================================================================

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| ConfabError::Storage(format!("Invalid UUID: {}", e)))
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<Session> {
    let get_err = |e: rusqlite::Error| ConfabError::Storage(e.to_string());

    let id: String = row.get(0).map_err(get_err)?;
    let message_count: i64 = row.get(4).map_err(get_err)?;
    let created_at: i64 = row.get(5).map_err(get_err)?;
    let updated_at: i64 = row.get(6).map_err(get_err)?;

    Ok(Session {
        id: parse_uuid(&id)?,
        owner_id: row.get(1).map_err(get_err)?,
        name: row.get(2).map_err(get_err)?,
        last_message_preview: row.get(3).map_err(get_err)?,
        message_count: message_count.max(0) as u64,
        created_at: from_millis(created_at),
        updated_at: from_millis(updated_at),
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message> {
    let get_err = |e: rusqlite::Error| ConfabError::Storage(e.to_string());

    let id: String = row.get(0).map_err(get_err)?;
    let session_id: String = row.get(1).map_err(get_err)?;
    let role: String = row.get(2).map_err(get_err)?;
    let timestamp: i64 = row.get(4).map_err(get_err)?;

    Ok(Message {
        id: parse_uuid(&id)?,
        session_id: parse_uuid(&session_id)?,
        role: role.parse().map_err(ConfabError::Storage)?,
        content: row.get(3).map_err(get_err)?,
        timestamp: from_millis(timestamp),
    })
}
