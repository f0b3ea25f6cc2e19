//! Confab Storage crate - SQLite persistence for sessions, messages,
//! the user profile and remembered preferences.
//!
//! Provides a WAL-mode SQLite database with migrations and owner-scoped
//! implementations of the store traits defined in `confab-core`.

pub mod db;
pub mod migrations;
pub mod preferences;
pub mod profile;
pub mod repository;

pub use db::Database;
pub use preferences::{generate_owner_id, PreferenceRepository};
pub use profile::ProfileRepository;
pub use repository::{SqliteMessageStore, SqliteSessionStore};
