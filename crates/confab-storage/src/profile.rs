//! Persistent user profile with an in-memory snapshot.
//!
//! Reads never touch the database: the current profile is cached in a
//! `RwLock` and replaced after each successful write.

use std::sync::{Arc, RwLock};

use rusqlite::OptionalExtension;
use tracing::debug;

use confab_core::error::{ConfabError, Result};
use confab_core::store::ProfileProvider;
use confab_core::types::UserProfile;

use crate::db::Database;

pub struct ProfileRepository {
    db: Arc<Database>,
    owner_id: String,
    current: RwLock<UserProfile>,
}

impl ProfileRepository {
    /// Load the stored profile for `owner_id`, or start from an empty one.
    pub fn load(db: Arc<Database>, owner_id: impl Into<String>) -> Result<Self> {
        let owner_id = owner_id.into();
        let stored = db.with_conn(|conn| {
            conn.query_row(
                "SELECT name, location, tone, projects, facts, context
                 FROM profiles WHERE owner_id = ?1",
                rusqlite::params![owner_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| ConfabError::Storage(e.to_string()))
        })?;

        let profile = match stored {
            Some((name, location, tone, projects, facts, context)) => UserProfile {
                name,
                location,
                tone,
                projects: serde_json::from_str(&projects)?,
                facts: serde_json::from_str(&facts)?,
                context,
            },
            None => UserProfile::default(),
        };

        Ok(Self {
            db,
            owner_id,
            current: RwLock::new(profile),
        })
    }

    /// Normalize and persist a replacement profile, returning what was stored.
    pub fn update(&self, profile: UserProfile) -> Result<UserProfile> {
        let profile = profile.normalized();
        let projects = serde_json::to_string(&profile.projects)?;
        let facts = serde_json::to_string(&profile.facts)?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (owner_id, name, location, tone, projects, facts, context, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(owner_id) DO UPDATE SET
                    name = excluded.name,
                    location = excluded.location,
                    tone = excluded.tone,
                    projects = excluded.projects,
                    facts = excluded.facts,
                    context = excluded.context,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    self.owner_id,
                    profile.name,
                    profile.location,
                    profile.tone,
                    projects,
                    facts,
                    profile.context,
                    chrono::Utc::now().timestamp_millis(),
                ],
            )
            .map_err(|e| ConfabError::Storage(format!("Failed to save profile: {}", e)))?;
            Ok(())
        })?;

        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = profile.clone();
        debug!(owner_id = %self.owner_id, "Profile updated");
        Ok(profile)
    }
}

impl ProfileProvider for ProfileRepository {
    fn snapshot(&self) -> UserProfile {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_db() -> Arc<Database> {
        Arc::new(Database::in_memory().unwrap())
    }

    #[test]
    fn test_missing_profile_is_empty() {
        let repo = ProfileRepository::load(make_db(), "owner").unwrap();
        assert_eq!(repo.snapshot(), UserProfile::default());
    }

    #[test]
    fn test_update_normalizes_and_caches() {
        let repo = ProfileRepository::load(make_db(), "owner").unwrap();
        let stored = repo
            .update(UserProfile {
                name: " Ada ".into(),
                projects: vec!["x".into(), "x".into(), "y".into()],
                ..UserProfile::default()
            })
            .unwrap();

        assert_eq!(stored.name, "Ada");
        assert_eq!(stored.projects, vec!["x", "y"]);
        assert_eq!(repo.snapshot(), stored);
    }

    #[test]
    fn test_profile_survives_reload() {
        let db = make_db();
        let repo = ProfileRepository::load(db.clone(), "owner").unwrap();
        repo.update(UserProfile {
            name: "Ada".into(),
            tone: "casual".into(),
            facts: vec!["f1".into(), "f2".into()],
            context: "planning".into(),
            ..UserProfile::default()
        })
        .unwrap();

        let reloaded = ProfileRepository::load(db.clone(), "owner").unwrap();
        let profile = reloaded.snapshot();
        assert_eq!(profile.tone, "casual");
        assert_eq!(profile.facts, vec!["f1", "f2"]);
        assert_eq!(profile.context, "planning");

        let other = ProfileRepository::load(db, "someone_else").unwrap();
        assert_eq!(other.snapshot(), UserProfile::default());
    }
}
