//! Collaborator contracts consumed by the conversation orchestrator.
//!
//! Storage backends implement these traits; the orchestrator only ever
//! talks to them through `Arc<dyn ...>` handles so tests can substitute
//! in-memory or failure-injecting doubles.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{Message, Role, Session, UserProfile};

/// Durable, ordered storage of messages keyed by session.
///
/// Every mutation must leave the owning session's `message_count`,
/// `last_message_preview` and `updated_at` recomputed from the stored
/// messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message and return the stored record.
    async fn save(&self, session_id: Uuid, role: Role, content: &str) -> Result<Message>;

    /// All messages of a session in chronological order.
    async fn list(&self, session_id: Uuid) -> Result<Vec<Message>>;

    /// Remove a message. Fails with `NotFound` if it does not exist.
    async fn delete(&self, message_id: Uuid) -> Result<()>;

    /// Replace the content of an existing message.
    async fn update_content(&self, message_id: Uuid, content: &str) -> Result<Message>;
}

/// Durable registry of conversation sessions for one owner.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, name: &str) -> Result<Session>;

    /// Sessions ordered most-recently-updated first.
    async fn list(&self) -> Result<Vec<Session>>;

    async fn get(&self, session_id: Uuid) -> Result<Option<Session>>;

    async fn rename(&self, session_id: Uuid, name: &str) -> Result<Session>;
}

/// Small remembered values that survive restarts.
pub trait PreferenceStore: Send + Sync {
    fn active_session(&self) -> Result<Option<Uuid>>;

    fn set_active_session(&self, session_id: Option<Uuid>) -> Result<()>;

    fn selected_model(&self) -> Result<Option<String>>;

    fn set_selected_model(&self, model: &str) -> Result<()>;
}

/// Synchronous read of the current user profile.
pub trait ProfileProvider: Send + Sync {
    fn snapshot(&self) -> UserProfile;
}
