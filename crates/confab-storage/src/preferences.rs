//! Remembered preferences and owner identity.
//!
//! Values live in the `preferences` key/value table. Per-owner values
//! (active session, selected model) are scoped by owner id; the owner id
//! itself is stored under the `global` scope.

use std::sync::Arc;

use rand::Rng;
use rusqlite::OptionalExtension;
use tracing::info;
use uuid::Uuid;

use confab_core::error::{ConfabError, Result};
use confab_core::store::PreferenceStore;

use crate::db::Database;

const GLOBAL_SCOPE: &str = "global";
const KEY_OWNER_ID: &str = "owner_id";
const KEY_ACTIVE_SESSION: &str = "active_session";
const KEY_SELECTED_MODEL: &str = "selected_model";

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate an owner id of the form `user_<base36 millis>_<9 random base36>`.
pub fn generate_owner_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let mut rng = rand::rng();
    let suffix: String = (0..9)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect();
    format!("user_{}_{}", to_base36(millis), suffix)
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// Preference storage for a single owner.
pub struct PreferenceRepository {
    db: Arc<Database>,
    owner_id: String,
}

impl PreferenceRepository {
    pub fn new(db: Arc<Database>, owner_id: impl Into<String>) -> Self {
        Self {
            db,
            owner_id: owner_id.into(),
        }
    }

    /// Resolve the owner id for this installation.
    ///
    /// A non-empty `configured` id wins. Otherwise the stored id is reused,
    /// or a new one is generated and stored on first run.
    pub fn resolve_owner_id(db: &Database, configured: &str) -> Result<String> {
        let configured = configured.trim();
        if !configured.is_empty() {
            return Ok(configured.to_string());
        }

        if let Some(existing) = read_value(db, GLOBAL_SCOPE, KEY_OWNER_ID)? {
            return Ok(existing);
        }

        let owner_id = generate_owner_id();
        write_value(db, GLOBAL_SCOPE, KEY_OWNER_ID, &owner_id)?;
        info!(owner_id = %owner_id, "Generated new owner id");
        Ok(owner_id)
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }
}

impl PreferenceStore for PreferenceRepository {
    fn active_session(&self) -> Result<Option<Uuid>> {
        match read_value(&self.db, &self.owner_id, KEY_ACTIVE_SESSION)? {
            Some(value) => Uuid::parse_str(&value)
                .map(Some)
                .map_err(|e| ConfabError::Storage(format!("Invalid UUID: {}", e))),
            None => Ok(None),
        }
    }

    fn set_active_session(&self, session_id: Option<Uuid>) -> Result<()> {
        match session_id {
            Some(id) => write_value(&self.db, &self.owner_id, KEY_ACTIVE_SESSION, &id.to_string()),
            None => remove_value(&self.db, &self.owner_id, KEY_ACTIVE_SESSION),
        }
    }

    fn selected_model(&self) -> Result<Option<String>> {
        read_value(&self.db, &self.owner_id, KEY_SELECTED_MODEL)
    }

    fn set_selected_model(&self, model: &str) -> Result<()> {
        write_value(&self.db, &self.owner_id, KEY_SELECTED_MODEL, model)
    }
}

fn read_value(db: &Database, scope: &str, key: &str) -> Result<Option<String>> {
    db.with_conn(|conn| {
        conn.query_row(
            "SELECT value FROM preferences WHERE scope = ?1 AND key = ?2",
            rusqlite::params![scope, key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| ConfabError::Storage(e.to_string()))
    })
}

fn write_value(db: &Database, scope: &str, key: &str, value: &str) -> Result<()> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO preferences (scope, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(scope, key) DO UPDATE SET value = excluded.value",
            rusqlite::params![scope, key, value],
        )
        .map_err(|e| ConfabError::Storage(format!("Failed to save preference {}: {}", key, e)))?;
        Ok(())
    })
}

fn remove_value(db: &Database, scope: &str, key: &str) -> Result<()> {
    db.with_conn(|conn| {
        conn.execute(
            "DELETE FROM preferences WHERE scope = ?1 AND key = ?2",
            rusqlite::params![scope, key],
        )
        .map_err(|e| ConfabError::Storage(format!("Failed to remove preference {}: {}", key, e)))?;
        Ok(())
    })
}
