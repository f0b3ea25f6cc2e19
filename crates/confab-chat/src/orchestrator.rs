//! Conversation orchestrator: the stateful core sequencing persistence and
//! inference for each user action.
//!
//! State lives behind a `std::sync::Mutex` that is never held across an
//! await. Mutating operations additionally take a single-flight permit
//! (`try_lock` on an async mutex) before doing anything else, so a second
//! operation issued while one is in flight is ignored rather than queued.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use confab_core::config::ChatConfig;
use confab_core::events::ChatEvent;
use confab_core::store::{MessageStore, PreferenceStore, ProfileProvider, SessionStore};
use confab_core::types::{ExportSnapshot, Message, RegenerationKind, Role, Session, Status};

use crate::error::ChatError;
use crate::inference::{InferenceClient, PromptMessage};
use crate::prompt::compose;

/// Label shown while a plain submit is waiting for the model.
pub const SENDING_LABEL: &str = "AI is typing";

// =============================================================================
// Outcomes
// =============================================================================

/// Why an operation was skipped without touching any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardViolation {
    /// Another operation is in flight.
    Busy,
    EmptyInput,
    NoActiveSession,
    /// Regeneration requested but the transcript has no user message.
    NoBasisMessage,
    UnknownSession,
    UnknownMessage,
}

/// Result of an orchestrator operation.
///
/// Guard violations are not errors: callers usually ignore them. `Aborted`
/// means a store call failed and the operation stopped; the failure has
/// already been logged and published as `ChatEvent::OperationFailed`.
#[derive(Debug)]
pub enum Outcome<T = ()> {
    Settled(T),
    Ignored(GuardViolation),
    Aborted(ChatError),
}

impl<T> Outcome<T> {
    pub fn is_settled(&self) -> bool {
        matches!(self, Outcome::Settled(_))
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Outcome::Ignored(_))
    }

    pub fn settled(self) -> Option<T> {
        match self {
            Outcome::Settled(value) => Some(value),
            _ => None,
        }
    }
}

// =============================================================================
// Transcript entries
// =============================================================================

/// Whether a transcript entry is known to match the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Confirmed,
    /// Shown before the store has accepted it; dropped if the save fails.
    PendingSave,
    /// Being deleted; restored if the delete fails.
    PendingDelete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEntry {
    #[serde(flatten)]
    pub message: Message,
    pub state: EntryState,
    pub is_error: bool,
}

impl TranscriptEntry {
    fn confirmed(message: Message) -> Self {
        Self {
            is_error: message.is_error(),
            message,
            state: EntryState::Confirmed,
        }
    }
}

/// Read-only view of the orchestrator for presentation layers.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorSnapshot {
    pub owner_id: String,
    pub sessions: Vec<Session>,
    pub active_session_id: Option<Uuid>,
    pub messages: Vec<TranscriptEntry>,
    pub status: Status,
    pub regeneration_kind: Option<RegenerationKind>,
    pub progress_label: Option<&'static str>,
    pub selected_model: String,
}

#[derive(Default)]
struct State {
    /// Most recently updated first.
    sessions: Vec<Session>,
    active_session_id: Option<Uuid>,
    messages: Vec<TranscriptEntry>,
    status: Status,
    regeneration_kind: Option<RegenerationKind>,
    selected_model: String,
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct ConversationOrchestrator {
    session_store: Arc<dyn SessionStore>,
    message_store: Arc<dyn MessageStore>,
    inference: Arc<dyn InferenceClient>,
    profile: Arc<dyn ProfileProvider>,
    preferences: Arc<dyn PreferenceStore>,
    config: ChatConfig,
    owner_id: String,
    state: Mutex<State>,
    flight: tokio::sync::Mutex<()>,
    events: broadcast::Sender<ChatEvent>,
}

/// Collaborators handed to `ConversationOrchestrator::new`.
pub struct Collaborators {
    pub sessions: Arc<dyn SessionStore>,
    pub messages: Arc<dyn MessageStore>,
    pub inference: Arc<dyn InferenceClient>,
    pub profile: Arc<dyn ProfileProvider>,
    pub preferences: Arc<dyn PreferenceStore>,
}

/// Single-flight permit. While `in_flight` is set, dropping the permit
/// returns the status to idle, including when the operation's future is
/// dropped mid-way.
struct FlightPermit<'a> {
    orchestrator: &'a ConversationOrchestrator,
    _lock: tokio::sync::MutexGuard<'a, ()>,
    in_flight: bool,
}

impl FlightPermit<'_> {
    fn enter(&mut self, status: Status, kind: Option<RegenerationKind>) {
        self.in_flight = true;
        {
            let mut state = self.orchestrator.lock_state();
            state.status = status;
            state.regeneration_kind = kind;
        }
        self.orchestrator.publish(ChatEvent::StatusChanged {
            status,
            regeneration: kind,
            timestamp: Utc::now(),
        });
    }
}

impl Drop for FlightPermit<'_> {
    fn drop(&mut self) {
        if !self.in_flight {
            return;
        }
        {
            let mut state = self.orchestrator.lock_state();
            state.status = Status::Idle;
            state.regeneration_kind = None;
        }
        self.orchestrator.publish(ChatEvent::StatusChanged {
            status: Status::Idle,
            regeneration: None,
            timestamp: Utc::now(),
        });
    }
}

impl ConversationOrchestrator {
    /// Create an orchestrator with no sessions loaded. Call `initialize`
    /// once the owner is known.
    pub fn new(
        collaborators: Collaborators,
        config: ChatConfig,
        default_model: &str,
        owner_id: impl Into<String>,
    ) -> Self {
        let selected_model = match collaborators.preferences.selected_model() {
            Ok(Some(model)) if !model.trim().is_empty() => model,
            Ok(_) => default_model.to_string(),
            Err(e) => {
                warn!(error = %e, "Failed to read remembered model, using default");
                default_model.to_string()
            }
        };

        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            session_store: collaborators.sessions,
            message_store: collaborators.messages,
            inference: collaborators.inference,
            profile: collaborators.profile,
            preferences: collaborators.preferences,
            config,
            owner_id: owner_id.into(),
            state: Mutex::new(State {
                selected_model,
                ..State::default()
            }),
            flight: tokio::sync::Mutex::new(()),
            events,
        }
    }

    // -------------------------------------------------------------------------
    // Read-only state
    // -------------------------------------------------------------------------

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.lock_state().sessions.clone()
    }

    pub fn active_session_id(&self) -> Option<Uuid> {
        self.lock_state().active_session_id
    }

    /// Messages of the active session, including provisional entries.
    pub fn messages(&self) -> Vec<Message> {
        self.lock_state()
            .messages
            .iter()
            .map(|entry| entry.message.clone())
            .collect()
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.lock_state().messages.clone()
    }

    pub fn status(&self) -> Status {
        self.lock_state().status
    }

    pub fn regeneration_kind(&self) -> Option<RegenerationKind> {
        self.lock_state().regeneration_kind
    }

    pub fn selected_model(&self) -> String {
        self.lock_state().selected_model.clone()
    }

    /// Text a presentation layer shows while an operation is in flight.
    pub fn progress_label(&self) -> Option<&'static str> {
        let state = self.lock_state();
        progress_label(state.status, state.regeneration_kind)
    }

    pub fn snapshot(&self) -> OrchestratorSnapshot {
        let state = self.lock_state();
        OrchestratorSnapshot {
            owner_id: self.owner_id.clone(),
            sessions: state.sessions.clone(),
            active_session_id: state.active_session_id,
            messages: state.messages.clone(),
            status: state.status,
            regeneration_kind: state.regeneration_kind,
            progress_label: progress_label(state.status, state.regeneration_kind),
            selected_model: state.selected_model.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    // -------------------------------------------------------------------------
    // Session operations
    // -------------------------------------------------------------------------

    /// Load sessions and pick the active one.
    ///
    /// Restores the remembered session when it still exists, creates a first
    /// session when there are none, and otherwise selects the most recently
    /// updated one.
    pub async fn initialize(&self) -> Outcome {
        let _permit = match self.begin() {
            Ok(permit) => permit,
            Err(violation) => return Outcome::Ignored(violation),
        };

        let sessions = match self.session_store.list().await {
            Ok(sessions) => sessions,
            Err(e) => return self.abort("initialize", e.into()),
        };

        let remembered = match self.preferences.active_session() {
            Ok(remembered) => remembered,
            Err(e) => {
                warn!(error = %e, "Failed to read remembered session");
                None
            }
        };

        let restore = remembered.filter(|id| sessions.iter().any(|s| s.id == *id));
        let most_recent = sessions.first().map(|s| s.id);
        info!(
            owner_id = %self.owner_id,
            sessions = sessions.len(),
            restored = restore.is_some(),
            "Loaded sessions"
        );
        self.lock_state().sessions = sessions;

        match restore.or(most_recent) {
            Some(id) => self.load_session(id).await,
            None => match self.create_session_locked().await {
                Outcome::Settled(_) => Outcome::Settled(()),
                Outcome::Ignored(v) => Outcome::Ignored(v),
                Outcome::Aborted(e) => Outcome::Aborted(e),
            },
        }
    }

    /// Create a session named "<prefix> N" and make it active.
    pub async fn create_session(&self) -> Outcome<Session> {
        let _permit = match self.begin() {
            Ok(permit) => permit,
            Err(violation) => return Outcome::Ignored(violation),
        };
        self.create_session_locked().await
    }

    /// Make `session_id` active and load its messages.
    ///
    /// If the messages cannot be loaded the session still becomes active but
    /// with an empty transcript, never another session's messages.
    pub async fn select_session(&self, session_id: Uuid) -> Outcome {
        let _permit = match self.begin() {
            Ok(permit) => permit,
            Err(violation) => return Outcome::Ignored(violation),
        };
        if !self.lock_state().sessions.iter().any(|s| s.id == session_id) {
            return Outcome::Ignored(GuardViolation::UnknownSession);
        }
        self.load_session(session_id).await
    }

    pub async fn rename_session(&self, session_id: Uuid, name: &str) -> Outcome<Session> {
        let _permit = match self.begin() {
            Ok(permit) => permit,
            Err(violation) => return Outcome::Ignored(violation),
        };
        let name = name.trim();
        if name.is_empty() {
            return Outcome::Ignored(GuardViolation::EmptyInput);
        }
        if !self.lock_state().sessions.iter().any(|s| s.id == session_id) {
            return Outcome::Ignored(GuardViolation::UnknownSession);
        }

        match self.session_store.rename(session_id, name).await {
            Ok(session) => {
                {
                    let mut state = self.lock_state();
                    upsert_session(&mut state.sessions, session.clone());
                }
                self.publish(ChatEvent::SessionRenamed {
                    session_id,
                    name: session.name.clone(),
                    timestamp: Utc::now(),
                });
                Outcome::Settled(session)
            }
            Err(e) => self.abort("rename_session", ChatError::for_session(session_id, e)),
        }
    }

    /// Clear all in-memory state, as when the owner signs out.
    pub fn reset(&self) -> Outcome {
        let _permit = match self.begin() {
            Ok(permit) => permit,
            Err(violation) => return Outcome::Ignored(violation),
        };
        let mut state = self.lock_state();
        state.sessions.clear();
        state.active_session_id = None;
        state.messages.clear();
        debug!("Orchestrator state reset");
        Outcome::Settled(())
    }

    // -------------------------------------------------------------------------
    // Message operations
    // -------------------------------------------------------------------------

    /// Send user input to the model and record both sides of the exchange.
    ///
    /// Returns the stored assistant message. An inference failure still
    /// settles: the reply is an `Error: ` message.
    pub async fn submit(&self, content: &str) -> Outcome<Message> {
        let mut permit = match self.begin() {
            Ok(permit) => permit,
            Err(violation) => return Outcome::Ignored(violation),
        };
        let content = content.trim();
        if content.is_empty() {
            return Outcome::Ignored(GuardViolation::EmptyInput);
        }
        let Some(session_id) = self.active_session_id() else {
            return Outcome::Ignored(GuardViolation::NoActiveSession);
        };

        permit.enter(Status::Sending, None);

        let provisional_id = Uuid::new_v4();
        self.lock_state().messages.push(TranscriptEntry {
            message: Message {
                id: provisional_id,
                session_id,
                role: Role::User,
                content: content.to_string(),
                timestamp: Utc::now(),
            },
            state: EntryState::PendingSave,
            is_error: false,
        });

        let saved = match self
            .message_store
            .save(session_id, Role::User, content)
            .await
        {
            Ok(saved) => saved,
            Err(e) => {
                self.lock_state()
                    .messages
                    .retain(|entry| entry.message.id != provisional_id);
                return self.abort("submit", ChatError::for_session(session_id, e));
            }
        };

        {
            let mut state = self.lock_state();
            if let Some(entry) = state
                .messages
                .iter_mut()
                .find(|entry| entry.message.id == provisional_id)
            {
                *entry = TranscriptEntry::confirmed(saved.clone());
            }
        }
        self.publish_appended(&saved);
        self.refresh_session(session_id).await;

        let reply = self.infer(content).await;
        self.record_reply(session_id, reply).await
    }

    /// Replace the latest assistant reply with a new one produced under a
    /// modified instruction.
    pub async fn regenerate(&self, kind: RegenerationKind) -> Outcome<Message> {
        let mut permit = match self.begin() {
            Ok(permit) => permit,
            Err(violation) => return Outcome::Ignored(violation),
        };
        let Some(session_id) = self.active_session_id() else {
            return Outcome::Ignored(GuardViolation::NoActiveSession);
        };

        let (basis, target) = {
            let state = self.lock_state();
            let basis_index = state.messages.iter().rposition(|entry| {
                entry.message.role == Role::User && entry.state == EntryState::Confirmed
            });
            let Some(basis_index) = basis_index else {
                return Outcome::Ignored(GuardViolation::NoBasisMessage);
            };
            let target = state
                .messages
                .iter()
                .rev()
                .find(|entry| {
                    entry.message.role == Role::Assistant && entry.state == EntryState::Confirmed
                })
                .map(|entry| entry.message.id);
            (state.messages[basis_index].message.content.clone(), target)
        };

        permit.enter(Status::Regenerating, Some(kind));
        info!(kind = %kind, session_id = %session_id, "Regenerating response");

        if let Some(target_id) = target {
            self.set_entry_state(target_id, EntryState::PendingDelete);
            if let Err(e) = self.message_store.delete(target_id).await {
                self.set_entry_state(target_id, EntryState::Confirmed);
                return self.abort("regenerate", ChatError::for_message(target_id, e));
            }
            self.lock_state()
                .messages
                .retain(|entry| entry.message.id != target_id);
            self.publish(ChatEvent::MessageRemoved {
                session_id,
                message_id: target_id,
                timestamp: Utc::now(),
            });
            self.refresh_session(session_id).await;
        }

        let reply = self.infer(&kind.apply(&basis)).await;
        self.record_reply(session_id, reply).await
    }

    /// Replace the content of a message in the active session.
    pub async fn edit_message(&self, message_id: Uuid, content: &str) -> Outcome<Message> {
        let _permit = match self.begin() {
            Ok(permit) => permit,
            Err(violation) => return Outcome::Ignored(violation),
        };
        let content = content.trim();
        if content.is_empty() {
            return Outcome::Ignored(GuardViolation::EmptyInput);
        }
        let session_id = {
            let state = self.lock_state();
            let known = state.messages.iter().any(|entry| {
                entry.message.id == message_id && entry.state == EntryState::Confirmed
            });
            match state.active_session_id {
                Some(id) if known => id,
                _ => return Outcome::Ignored(GuardViolation::UnknownMessage),
            }
        };

        match self.message_store.update_content(message_id, content).await {
            Ok(updated) => {
                {
                    let mut state = self.lock_state();
                    if let Some(entry) = state
                        .messages
                        .iter_mut()
                        .find(|entry| entry.message.id == message_id)
                    {
                        *entry = TranscriptEntry::confirmed(updated.clone());
                    }
                }
                self.publish(ChatEvent::MessageEdited {
                    session_id,
                    message_id,
                    timestamp: Utc::now(),
                });
                self.refresh_session(session_id).await;
                Outcome::Settled(updated)
            }
            Err(e) => self.abort("edit_message", ChatError::for_message(message_id, e)),
        }
    }

    // -------------------------------------------------------------------------
    // Model and export
    // -------------------------------------------------------------------------

    /// Choose the model for subsequent requests. Allowed while busy; an
    /// in-flight request keeps the model it started with.
    pub fn set_selected_model(&self, model: &str) -> Outcome {
        let model = model.trim();
        if model.is_empty() {
            return Outcome::Ignored(GuardViolation::EmptyInput);
        }
        self.lock_state().selected_model = model.to_string();
        if let Err(e) = self.preferences.set_selected_model(model) {
            warn!(error = %e, "Failed to remember selected model");
        }
        self.publish(ChatEvent::ModelChanged {
            model: model.to_string(),
            timestamp: Utc::now(),
        });
        Outcome::Settled(())
    }

    /// Everything the owner can take away: sessions as stored, the profile
    /// and the total message count.
    pub async fn export_snapshot(&self) -> Result<ExportSnapshot, ChatError> {
        let sessions = self.session_store.list().await?;
        let total_messages = sessions.iter().map(|s| s.message_count).sum();
        Ok(ExportSnapshot {
            owner_id: self.owner_id.clone(),
            exported_at: Utc::now(),
            sessions,
            profile: self.profile.snapshot(),
            total_messages,
        })
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self) -> Result<FlightPermit<'_>, GuardViolation> {
        let lock = self.flight.try_lock().map_err(|_| {
            debug!("Operation ignored: another operation is in flight");
            GuardViolation::Busy
        })?;
        Ok(FlightPermit {
            orchestrator: self,
            _lock: lock,
            in_flight: false,
        })
    }

    fn publish(&self, event: ChatEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish_appended(&self, message: &Message) {
        self.publish(ChatEvent::MessageAppended {
            session_id: message.session_id,
            message_id: message.id,
            role: message.role,
            is_error: message.is_error(),
            timestamp: Utc::now(),
        });
    }

    fn abort<T>(&self, operation: &str, error: ChatError) -> Outcome<T> {
        warn!(operation, error = %error, "Operation aborted");
        self.publish(ChatEvent::OperationFailed {
            operation: operation.to_string(),
            reason: error.to_string(),
            timestamp: Utc::now(),
        });
        Outcome::Aborted(error)
    }

    fn remember_active(&self, session_id: Option<Uuid>) {
        if let Err(e) = self.preferences.set_active_session(session_id) {
            warn!(error = %e, "Failed to remember active session");
        }
    }

    fn set_entry_state(&self, message_id: Uuid, entry_state: EntryState) {
        let mut state = self.lock_state();
        if let Some(entry) = state
            .messages
            .iter_mut()
            .find(|entry| entry.message.id == message_id)
        {
            entry.state = entry_state;
        }
    }

    async fn create_session_locked(&self) -> Outcome<Session> {
        let name = format!(
            "{} {}",
            self.config.session_name_prefix,
            self.lock_state().sessions.len() + 1
        );

        let session = match self.session_store.create(&name).await {
            Ok(session) => session,
            Err(e) => return self.abort("create_session", e.into()),
        };

        {
            let mut state = self.lock_state();
            state.sessions.insert(0, session.clone());
            state.active_session_id = Some(session.id);
            state.messages.clear();
        }
        self.remember_active(Some(session.id));
        info!(session_id = %session.id, name = %session.name, "Session created");
        self.publish(ChatEvent::SessionCreated {
            session_id: session.id,
            name: session.name.clone(),
            timestamp: Utc::now(),
        });
        Outcome::Settled(session)
    }

    async fn load_session(&self, session_id: Uuid) -> Outcome {
        let loaded = self.message_store.list(session_id).await;

        let (outcome, count) = {
            let mut state = self.lock_state();
            state.active_session_id = Some(session_id);
            match loaded {
                Ok(messages) => {
                    state.messages = messages.into_iter().map(TranscriptEntry::confirmed).collect();
                    (Outcome::Settled(()), state.messages.len())
                }
                Err(e) => {
                    state.messages.clear();
                    (Outcome::Aborted(ChatError::from(e)), 0)
                }
            }
        };
        self.remember_active(Some(session_id));

        match outcome {
            Outcome::Aborted(e) => self.abort("select_session", e),
            settled => {
                debug!(session_id = %session_id, messages = count, "Session selected");
                self.publish(ChatEvent::SessionSelected {
                    session_id,
                    message_count: count,
                    timestamp: Utc::now(),
                });
                settled
            }
        }
    }

    /// Compose the system prompt from the current profile and call the model
    /// with the selected model. Failures become `Error: ` content.
    async fn infer(&self, user_content: &str) -> String {
        let profile = self
            .profile
            .snapshot()
            .with_default_tone(&self.config.default_tone);
        let messages = [
            PromptMessage::system(compose(&profile)),
            PromptMessage::user(user_content),
        ];
        let model = self.selected_model();

        match self.inference.send(&messages, &model).await {
            Ok(text) => text,
            Err(e) => {
                warn!(model = %model, error = %e, "Inference failed");
                Message::error_content(&e.to_string())
            }
        }
    }

    async fn record_reply(&self, session_id: Uuid, content: String) -> Outcome<Message> {
        match self
            .message_store
            .save(session_id, Role::Assistant, &content)
            .await
        {
            Ok(saved) => {
                {
                    let mut state = self.lock_state();
                    if state.active_session_id == Some(session_id) {
                        state.messages.push(TranscriptEntry::confirmed(saved.clone()));
                    }
                }
                self.publish_appended(&saved);
                self.refresh_session(session_id).await;
                Outcome::Settled(saved)
            }
            Err(e) => self.abort("save_reply", ChatError::for_session(session_id, e)),
        }
    }

    /// Re-read a session's summary from the store. If that fails, derive it
    /// from the confirmed transcript instead.
    async fn refresh_session(&self, session_id: Uuid) {
        let fetched = self.session_store.get(session_id).await;
        let mut state = self.lock_state();
        match fetched {
            Ok(Some(session)) => upsert_session(&mut state.sessions, session),
            Ok(None) => {
                warn!(session_id = %session_id, "Session vanished from store");
                state.sessions.retain(|s| s.id != session_id);
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Failed to refresh session");
                if state.active_session_id != Some(session_id) {
                    return;
                }
                let confirmed: Vec<&Message> = state
                    .messages
                    .iter()
                    .filter(|entry| entry.state != EntryState::PendingSave)
                    .map(|entry| &entry.message)
                    .collect();
                let count = confirmed.len() as u64;
                let preview = confirmed.last().map(|m| m.content.clone());
                if let Some(session) = state.sessions.iter_mut().find(|s| s.id == session_id) {
                    session.message_count = count;
                    session.last_message_preview = preview;
                    session.updated_at = Utc::now();
                }
                sort_sessions(&mut state.sessions);
            }
        }
    }
}

fn progress_label(status: Status, kind: Option<RegenerationKind>) -> Option<&'static str> {
    match (status, kind) {
        (Status::Idle, _) => None,
        (Status::Regenerating, Some(kind)) => Some(kind.progress_label()),
        _ => Some(SENDING_LABEL),
    }
}

fn upsert_session(sessions: &mut Vec<Session>, session: Session) {
    match sessions.iter_mut().find(|s| s.id == session.id) {
        Some(existing) => *existing = session,
        None => sessions.insert(0, session),
    }
    sort_sessions(sessions);
}

fn sort_sessions(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use confab_core::error::{ConfabError, Result as CoreResult};
    use confab_core::types::{UserProfile, ERROR_PREFIX};
    use confab_storage::{Database, PreferenceRepository, SqliteMessageStore, SqliteSessionStore};

    use crate::error::InferenceError;
    use crate::inference::{MockInference, PromptRole};
    use crate::prompt::DEFINITION;

    const OWNER: &str = "user_test";

    // ---- Test doubles ----

    struct FixedProfile(UserProfile);

    impl ProfileProvider for FixedProfile {
        fn snapshot(&self) -> UserProfile {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct Faults {
        create: AtomicBool,
        save_user: AtomicBool,
        save_assistant: AtomicBool,
        list: AtomicBool,
        delete: AtomicBool,
    }

    fn injected() -> ConfabError {
        ConfabError::Storage("injected failure".into())
    }

    struct FlakySessions {
        inner: SqliteSessionStore,
        faults: Arc<Faults>,
    }

    #[async_trait]
    impl SessionStore for FlakySessions {
        async fn create(&self, name: &str) -> CoreResult<Session> {
            if self.faults.create.load(Ordering::SeqCst) {
                return Err(injected());
            }
            self.inner.create(name).await
        }

        async fn list(&self) -> CoreResult<Vec<Session>> {
            self.inner.list().await
        }

        async fn get(&self, session_id: Uuid) -> CoreResult<Option<Session>> {
            self.inner.get(session_id).await
        }

        async fn rename(&self, session_id: Uuid, name: &str) -> CoreResult<Session> {
            self.inner.rename(session_id, name).await
        }
    }

    struct FlakyMessages {
        inner: SqliteMessageStore,
        faults: Arc<Faults>,
    }

    #[async_trait]
    impl MessageStore for FlakyMessages {
        async fn save(&self, session_id: Uuid, role: Role, content: &str) -> CoreResult<Message> {
            let fail = match role {
                Role::User => &self.faults.save_user,
                Role::Assistant => &self.faults.save_assistant,
            };
            if fail.load(Ordering::SeqCst) {
                return Err(injected());
            }
            self.inner.save(session_id, role, content).await
        }

        async fn list(&self, session_id: Uuid) -> CoreResult<Vec<Message>> {
            if self.faults.list.load(Ordering::SeqCst) {
                return Err(injected());
            }
            self.inner.list(session_id).await
        }

        async fn delete(&self, message_id: Uuid) -> CoreResult<()> {
            if self.faults.delete.load(Ordering::SeqCst) {
                return Err(injected());
            }
            self.inner.delete(message_id).await
        }

        async fn update_content(&self, message_id: Uuid, content: &str) -> CoreResult<Message> {
            self.inner.update_content(message_id, content).await
        }
    }

    struct Harness {
        orchestrator: Arc<ConversationOrchestrator>,
        inference: Arc<MockInference>,
        faults: Arc<Faults>,
        db: Arc<Database>,
        store: Arc<SqliteMessageStore>,
        sessions: Arc<SqliteSessionStore>,
    }

    impl Harness {
        fn build(inference: MockInference, profile: UserProfile) -> Self {
            Self::build_on(Arc::new(Database::in_memory().unwrap()), inference, profile)
        }

        fn build_on(db: Arc<Database>, inference: MockInference, profile: UserProfile) -> Self {
            let faults = Arc::new(Faults::default());
            let inference = Arc::new(inference);
            let collaborators = Collaborators {
                sessions: Arc::new(FlakySessions {
                    inner: SqliteSessionStore::new(db.clone(), OWNER),
                    faults: faults.clone(),
                }),
                messages: Arc::new(FlakyMessages {
                    inner: SqliteMessageStore::new(db.clone(), OWNER),
                    faults: faults.clone(),
                }),
                inference: inference.clone(),
                profile: Arc::new(FixedProfile(profile)),
                preferences: Arc::new(PreferenceRepository::new(db.clone(), OWNER)),
            };
            let orchestrator = Arc::new(ConversationOrchestrator::new(
                collaborators,
                ChatConfig::default(),
                "gpt-4o",
                OWNER,
            ));
            Self {
                orchestrator,
                inference,
                faults,
                store: Arc::new(SqliteMessageStore::new(db.clone(), OWNER)),
                sessions: Arc::new(SqliteSessionStore::new(db.clone(), OWNER)),
                db,
            }
        }

        async fn ready() -> Self {
            let harness = Self::build(MockInference::new(), UserProfile::default());
            assert!(harness.orchestrator.initialize().await.is_settled());
            harness
        }

        async fn persisted(&self) -> Vec<Message> {
            let id = self.orchestrator.active_session_id().unwrap();
            self.store.list(id).await.unwrap()
        }

        /// Every in-memory session summary matches the stored rows.
        async fn assert_counts_consistent(&self) {
            for session in self.orchestrator.sessions() {
                let rows = self.store.list(session.id).await.unwrap();
                assert_eq!(session.message_count, rows.len() as u64, "{}", session.name);
                assert_eq!(
                    session.last_message_preview,
                    rows.last().map(|m| m.content.clone())
                );
            }
        }
    }

    fn contents(messages: &[Message]) -> Vec<(Role, String)> {
        messages
            .iter()
            .map(|m| (m.role, m.content.clone()))
            .collect()
    }

    // ---- Initial load ----

    #[tokio::test]
    async fn test_initialize_creates_first_session() {
        let h = Harness::ready().await;

        let sessions = h.orchestrator.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].name, "Session 1");
        assert_eq!(h.orchestrator.active_session_id(), Some(sessions[0].id));
        assert!(h.orchestrator.messages().is_empty());
        assert_eq!(h.orchestrator.status(), Status::Idle);
    }

    #[tokio::test]
    async fn test_initialize_selects_most_recent_session() {
        let db = Arc::new(Database::in_memory().unwrap());
        let store = SqliteSessionStore::new(db.clone(), OWNER);
        let older = store.create("Older").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newer = store.create("Newer").await.unwrap();

        let h = Harness::build_on(db, MockInference::new(), UserProfile::default());
        assert!(h.orchestrator.initialize().await.is_settled());

        let ids: Vec<Uuid> = h.orchestrator.sessions().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
        assert_eq!(h.orchestrator.active_session_id(), Some(newer.id));
    }

    #[tokio::test]
    async fn test_initialize_restores_remembered_session() {
        let db = Arc::new(Database::in_memory().unwrap());
        let store = SqliteSessionStore::new(db.clone(), OWNER);
        let remembered = store.create("Remembered").await.unwrap();
        SqliteMessageStore::new(db.clone(), OWNER)
            .save(remembered.id, Role::User, "earlier")
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.create("Newer").await.unwrap();
        PreferenceRepository::new(db.clone(), OWNER)
            .set_active_session(Some(remembered.id))
            .unwrap();

        let h = Harness::build_on(db, MockInference::new(), UserProfile::default());
        assert!(h.orchestrator.initialize().await.is_settled());

        assert_eq!(h.orchestrator.active_session_id(), Some(remembered.id));
        assert_eq!(
            contents(&h.orchestrator.messages()),
            vec![(Role::User, "earlier".to_string())]
        );
    }

    #[tokio::test]
    async fn test_initialize_ignores_stale_remembered_session() {
        let db = Arc::new(Database::in_memory().unwrap());
        PreferenceRepository::new(db.clone(), OWNER)
            .set_active_session(Some(Uuid::new_v4()))
            .unwrap();

        let h = Harness::build_on(db, MockInference::new(), UserProfile::default());
        assert!(h.orchestrator.initialize().await.is_settled());
        assert_eq!(h.orchestrator.sessions().len(), 1);
        assert_eq!(
            h.orchestrator.active_session_id(),
            Some(h.orchestrator.sessions()[0].id)
        );
    }

    #[tokio::test]
    async fn test_remembered_model_is_restored() {
        let db = Arc::new(Database::in_memory().unwrap());
        PreferenceRepository::new(db.clone(), OWNER)
            .set_selected_model("gpt-3.5-turbo")
            .unwrap();
        let h = Harness::build_on(db, MockInference::new(), UserProfile::default());
        assert_eq!(h.orchestrator.selected_model(), "gpt-3.5-turbo");
    }

    // ---- Submit ----

    #[tokio::test]
    async fn test_submit_appends_user_then_assistant() {
        let h = Harness::ready().await;
        h.inference.push_reply("Hi there!");

        let reply = h.orchestrator.submit("hello").await.settled().unwrap();
        assert_eq!(reply.content, "Hi there!");

        let expected = vec![
            (Role::User, "hello".to_string()),
            (Role::Assistant, "Hi there!".to_string()),
        ];
        assert_eq!(contents(&h.orchestrator.messages()), expected);
        assert_eq!(contents(&h.persisted().await), expected);
        assert!(h
            .orchestrator
            .transcript()
            .iter()
            .all(|entry| entry.state == EntryState::Confirmed));
        assert_eq!(h.orchestrator.status(), Status::Idle);
        h.assert_counts_consistent().await;
    }

    #[tokio::test]
    async fn test_submit_sends_system_and_user_with_selected_model() {
        let profile = UserProfile {
            name: "Ada".into(),
            ..UserProfile::default()
        };
        let h = Harness::build(MockInference::new(), profile);
        h.orchestrator.initialize().await;
        h.orchestrator.set_selected_model("gpt-4o-mini");

        h.orchestrator.submit("  hello  ").await;

        let calls = h.inference.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].model, "gpt-4o-mini");
        assert_eq!(calls[0].messages.len(), 2);
        assert_eq!(calls[0].messages[0].role, PromptRole::System);
        assert!(calls[0].messages[0].content.contains("support Ada"));
        assert!(calls[0].messages[0].content.contains(DEFINITION));
        assert_eq!(calls[0].messages[1], PromptMessage::user("hello"));
    }

    #[tokio::test]
    async fn test_submit_applies_default_tone() {
        let h = Harness::ready().await;
        h.orchestrator.submit("hello").await;
        let system = &h.inference.calls()[0].messages[0].content;
        assert!(system.contains("Tone: professional."));
    }

    #[tokio::test]
    async fn test_submit_empty_is_noop() {
        let h = Harness::ready().await;
        let before = h.orchestrator.snapshot();

        for input in ["", "   ", "\n\t"] {
            let outcome = h.orchestrator.submit(input).await;
            assert!(matches!(outcome, Outcome::Ignored(GuardViolation::EmptyInput)));
        }

        let after = h.orchestrator.snapshot();
        assert_eq!(after.messages, before.messages);
        assert_eq!(after.sessions, before.sessions);
        assert_eq!(after.status, Status::Idle);
        assert!(h.inference.calls().is_empty());
    }

    #[tokio::test]
    async fn test_submit_without_active_session_is_noop() {
        let h = Harness::build(MockInference::new(), UserProfile::default());
        let outcome = h.orchestrator.submit("hello").await;
        assert!(matches!(
            outcome,
            Outcome::Ignored(GuardViolation::NoActiveSession)
        ));
        assert!(h.inference.calls().is_empty());
    }

    #[tokio::test]
    async fn test_inference_failure_becomes_error_message() {
        let h = Harness::ready().await;
        h.inference.push_error(InferenceError::Http {
            status: 429,
            message: "Rate limit reached".into(),
        });

        let reply = h.orchestrator.submit("hello").await.settled().unwrap();
        assert_eq!(reply.content, "Error: Rate limit reached");
        assert!(reply.is_error());

        let messages = h.orchestrator.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert!(messages[1].content.starts_with(ERROR_PREFIX));
        assert!(h.orchestrator.transcript()[1].is_error);
        assert_eq!(h.persisted().await.len(), 2);
        h.assert_counts_consistent().await;
    }

    #[tokio::test]
    async fn test_user_save_failure_discards_provisional_entry() {
        let h = Harness::ready().await;
        h.faults.save_user.store(true, Ordering::SeqCst);
        let mut events = h.orchestrator.subscribe();

        let outcome = h.orchestrator.submit("hello").await;
        assert!(matches!(outcome, Outcome::Aborted(ChatError::Storage(_))));
        assert!(h.orchestrator.messages().is_empty());
        assert!(h.inference.calls().is_empty());
        assert_eq!(h.orchestrator.status(), Status::Idle);

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if let ChatEvent::OperationFailed { operation, .. } = event {
                assert_eq!(operation, "submit");
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn test_assistant_save_failure_keeps_user_message() {
        let h = Harness::ready().await;
        h.faults.save_assistant.store(true, Ordering::SeqCst);

        let outcome = h.orchestrator.submit("hello").await;
        assert!(matches!(outcome, Outcome::Aborted(_)));

        assert_eq!(
            contents(&h.orchestrator.messages()),
            vec![(Role::User, "hello".to_string())]
        );
        assert_eq!(h.persisted().await.len(), 1);
        assert_eq!(h.orchestrator.status(), Status::Idle);
        h.assert_counts_consistent().await;
    }

    #[tokio::test]
    async fn test_submit_while_busy_is_noop() {
        let h = Harness::build(MockInference::gated(), UserProfile::default());
        h.orchestrator.initialize().await;

        let orchestrator = h.orchestrator.clone();
        let first = tokio::spawn(async move { orchestrator.submit("first").await });
        h.inference.wait_for_call().await;

        assert_eq!(h.orchestrator.status(), Status::Sending);
        assert_eq!(h.orchestrator.progress_label(), Some(SENDING_LABEL));

        let second = h.orchestrator.submit("second").await;
        assert!(matches!(second, Outcome::Ignored(GuardViolation::Busy)));
        let regen = h.orchestrator.regenerate(RegenerationKind::TryAgain).await;
        assert!(matches!(regen, Outcome::Ignored(GuardViolation::Busy)));
        let created = h.orchestrator.create_session().await;
        assert!(matches!(created, Outcome::Ignored(GuardViolation::Busy)));

        h.inference.release();
        assert!(first.await.unwrap().is_settled());

        assert_eq!(h.orchestrator.status(), Status::Idle);
        assert_eq!(h.inference.calls().len(), 1);
        assert_eq!(h.orchestrator.messages().len(), 2);
        assert_eq!(h.orchestrator.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_model_change_allowed_while_busy() {
        let h = Harness::build(MockInference::gated(), UserProfile::default());
        h.orchestrator.initialize().await;

        let orchestrator = h.orchestrator.clone();
        let pending = tokio::spawn(async move { orchestrator.submit("hello").await });
        h.inference.wait_for_call().await;

        assert!(h.orchestrator.set_selected_model("gpt-4-turbo").is_settled());
        h.inference.release();
        pending.await.unwrap();

        assert_eq!(h.inference.calls()[0].model, "gpt-4o");
        assert_eq!(h.orchestrator.selected_model(), "gpt-4-turbo");
    }

    #[tokio::test]
    async fn test_dropped_submit_returns_to_idle() {
        let h = Harness::build(MockInference::gated(), UserProfile::default());
        h.orchestrator.initialize().await;

        let orchestrator = h.orchestrator.clone();
        let pending = tokio::spawn(async move { orchestrator.submit("hello").await });
        h.inference.wait_for_call().await;
        pending.abort();
        let _ = pending.await;

        assert_eq!(h.orchestrator.status(), Status::Idle);
        // The user message was already stored and stays.
        assert_eq!(h.persisted().await.len(), 1);

        let orchestrator = h.orchestrator.clone();
        let retry = tokio::spawn(async move { orchestrator.submit("again").await });
        h.inference.wait_for_call().await;
        h.inference.release();
        assert!(retry.await.unwrap().is_settled());
        assert_eq!(h.persisted().await.len(), 3);
    }

    // ---- Regenerate ----

    async fn seeded() -> Harness {
        let h = Harness::ready().await;
        h.inference.push_reply("hello");
        h.orchestrator.submit("hi").await;
        h
    }

    #[tokio::test]
    async fn test_regenerate_replaces_last_assistant_message() {
        let h = seeded().await;
        let before = h.persisted().await;
        let (user_before, old_reply) = (before[0].clone(), before[1].clone());
        h.inference.push_reply("a different hello");

        let reply = h
            .orchestrator
            .regenerate(RegenerationKind::TryAgain)
            .await
            .settled()
            .unwrap();

        let after = h.persisted().await;
        assert_eq!(after.len(), 2);
        assert_eq!(after[0], user_before);
        assert!(after.iter().all(|m| m.id != old_reply.id));
        assert_eq!(after[1].id, reply.id);
        assert_eq!(after[1].content, "a different hello");
        assert_eq!(h.orchestrator.messages(), after);
        assert_eq!(h.orchestrator.status(), Status::Idle);
        assert_eq!(h.orchestrator.regeneration_kind(), None);
        h.assert_counts_consistent().await;
    }

    #[tokio::test]
    async fn test_regenerate_appends_instruction_to_inference_input_only() {
        let h = seeded().await;
        h.orchestrator.regenerate(RegenerationKind::AddDetail).await;

        let calls = h.inference.calls();
        assert_eq!(
            calls[1].messages[1].content,
            "hi\n\n(Please provide a more detailed and comprehensive response)"
        );
        let persisted = h.persisted().await;
        assert!(persisted.iter().all(|m| !m.content.contains("Please provide")));
        assert_eq!(persisted.iter().filter(|m| m.role == Role::User).count(), 1);
    }

    #[tokio::test]
    async fn test_regenerate_without_user_message_is_noop() {
        let h = Harness::ready().await;
        let outcome = h.orchestrator.regenerate(RegenerationKind::MoreConcise).await;
        assert!(matches!(
            outcome,
            Outcome::Ignored(GuardViolation::NoBasisMessage)
        ));
        assert!(h.inference.calls().is_empty());
        assert_eq!(h.orchestrator.status(), Status::Idle);
    }

    #[tokio::test]
    async fn test_regenerate_without_assistant_reply_skips_delete() {
        let h = Harness::ready().await;
        h.faults.save_assistant.store(true, Ordering::SeqCst);
        h.orchestrator.submit("hi").await;
        h.faults.save_assistant.store(false, Ordering::SeqCst);
        h.inference.push_reply("late reply");

        let reply = h
            .orchestrator
            .regenerate(RegenerationKind::TryAgain)
            .await
            .settled()
            .unwrap();
        assert_eq!(reply.content, "late reply");
        assert_eq!(
            contents(&h.persisted().await),
            vec![
                (Role::User, "hi".to_string()),
                (Role::Assistant, "late reply".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_regenerate_error_reply_can_be_regenerated() {
        let h = Harness::ready().await;
        h.inference
            .push_error(InferenceError::Transport("connection reset".into()));
        h.orchestrator.submit("hi").await;
        assert!(h.orchestrator.messages()[1].is_error());

        h.inference.push_reply("recovered");
        h.orchestrator.regenerate(RegenerationKind::TryAgain).await;

        let messages = h.orchestrator.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "recovered");
    }

    #[tokio::test]
    async fn test_regenerate_delete_failure_restores_entry() {
        let h = seeded().await;
        let before = h.orchestrator.messages();
        h.faults.delete.store(true, Ordering::SeqCst);

        let outcome = h.orchestrator.regenerate(RegenerationKind::TryAgain).await;
        assert!(matches!(outcome, Outcome::Aborted(_)));
        assert_eq!(h.orchestrator.messages(), before);
        assert!(h
            .orchestrator
            .transcript()
            .iter()
            .all(|entry| entry.state == EntryState::Confirmed));
        assert_eq!(h.inference.calls().len(), 1);
        assert_eq!(h.orchestrator.status(), Status::Idle);
    }

    #[tokio::test]
    async fn test_regenerate_multi_exchange_replaces_only_latest_reply() {
        let h = seeded().await;
        h.inference.push_reply("second answer");
        h.orchestrator.submit("second").await;
        let before = h.persisted().await;
        assert_eq!(before.len(), 4);
        h.inference.push_reply("rewritten");

        h.orchestrator
            .regenerate(RegenerationKind::TryAgain)
            .await
            .settled()
            .unwrap();

        let after = h.persisted().await;
        assert_eq!(after.len(), 4);
        assert_eq!(after[..3], before[..3]);
        assert!(after.iter().all(|m| m.id != before[3].id));
        assert_eq!(after[3].content, "rewritten");
        assert_eq!(
            h.inference.calls().last().unwrap().messages[1].content,
            "second\n\n(Please provide an alternative response to this request)"
        );
        assert_eq!(h.orchestrator.messages(), after);
        h.assert_counts_consistent().await;
    }

    #[tokio::test]
    async fn test_regenerate_after_lost_reply_replaces_previous_reply() {
        let h = seeded().await;
        h.faults.save_assistant.store(true, Ordering::SeqCst);
        assert!(matches!(
            h.orchestrator.submit("second").await,
            Outcome::Aborted(_)
        ));
        h.faults.save_assistant.store(false, Ordering::SeqCst);
        h.inference.push_reply("regen");

        h.orchestrator
            .regenerate(RegenerationKind::TryAgain)
            .await
            .settled()
            .unwrap();

        assert_eq!(
            contents(&h.persisted().await),
            vec![
                (Role::User, "hi".to_string()),
                (Role::User, "second".to_string()),
                (Role::Assistant, "regen".to_string()),
            ]
        );
        assert!(h
            .inference
            .calls()
            .last()
            .unwrap()
            .messages[1]
            .content
            .starts_with("second\n\n"));
        assert_eq!(h.orchestrator.messages(), h.persisted().await);
        h.assert_counts_consistent().await;
    }

    #[tokio::test]
    async fn test_regenerate_reply_deleted_elsewhere_is_not_found() {
        let h = seeded().await;
        let reply = h.orchestrator.messages()[1].clone();
        h.store.delete(reply.id).await.unwrap();

        let outcome = h.orchestrator.regenerate(RegenerationKind::TryAgain).await;
        assert!(matches!(
            outcome,
            Outcome::Aborted(ChatError::MessageNotFound(id)) if id == reply.id
        ));
        assert_eq!(h.inference.calls().len(), 1);
        assert_eq!(h.orchestrator.status(), Status::Idle);
    }

    #[tokio::test]
    async fn test_regenerating_status_and_label() {
        let h = Harness::build(MockInference::gated(), UserProfile::default());
        h.orchestrator.initialize().await;
        let orchestrator = h.orchestrator.clone();
        let first = tokio::spawn(async move { orchestrator.submit("hi").await });
        h.inference.wait_for_call().await;
        h.inference.release();
        first.await.unwrap();

        let orchestrator = h.orchestrator.clone();
        let regen = tokio::spawn(async move {
            orchestrator
                .regenerate(RegenerationKind::MoreConcise)
                .await
        });
        h.inference.wait_for_call().await;

        assert_eq!(h.orchestrator.status(), Status::Regenerating);
        assert_eq!(
            h.orchestrator.regeneration_kind(),
            Some(RegenerationKind::MoreConcise)
        );
        assert_eq!(h.orchestrator.progress_label(), Some("Being more concise..."));
        // The old reply is already gone while the new one is pending.
        assert_eq!(h.orchestrator.messages().len(), 1);

        h.inference.release();
        assert!(regen.await.unwrap().is_settled());
        assert_eq!(h.orchestrator.regeneration_kind(), None);
        assert_eq!(h.orchestrator.progress_label(), None);
    }

    // ---- Sessions ----

    #[tokio::test]
    async fn test_create_session_names_and_activates() {
        let h = seeded().await;
        let created = h.orchestrator.create_session().await.settled().unwrap();

        assert_eq!(created.name, "Session 2");
        assert_eq!(h.orchestrator.sessions()[0].id, created.id);
        assert_eq!(h.orchestrator.active_session_id(), Some(created.id));
        assert!(h.orchestrator.messages().is_empty());

        let remembered = PreferenceRepository::new(h.db.clone(), OWNER)
            .active_session()
            .unwrap();
        assert_eq!(remembered, Some(created.id));
    }

    #[tokio::test]
    async fn test_create_session_failure_leaves_state_unchanged() {
        let h = seeded().await;
        let before = h.orchestrator.snapshot();
        h.faults.create.store(true, Ordering::SeqCst);

        let outcome = h.orchestrator.create_session().await;
        assert!(matches!(outcome, Outcome::Aborted(_)));

        let after = h.orchestrator.snapshot();
        assert_eq!(after.sessions, before.sessions);
        assert_eq!(after.active_session_id, before.active_session_id);
        assert_eq!(after.messages, before.messages);
    }

    #[tokio::test]
    async fn test_select_round_trip_restores_messages() {
        let h = seeded().await;
        let a = h.orchestrator.active_session_id().unwrap();
        let a_messages = h.orchestrator.messages();

        let b = h.orchestrator.create_session().await.settled().unwrap().id;
        h.inference.push_reply("b reply");
        h.orchestrator.submit("b question").await;

        assert!(h.orchestrator.select_session(a).await.is_settled());
        assert_eq!(h.orchestrator.messages(), a_messages);

        h.orchestrator.select_session(b).await;
        assert_eq!(
            contents(&h.orchestrator.messages()),
            vec![
                (Role::User, "b question".to_string()),
                (Role::Assistant, "b reply".to_string())
            ]
        );

        h.orchestrator.select_session(a).await;
        assert_eq!(h.orchestrator.messages(), a_messages);
        h.assert_counts_consistent().await;
    }

    #[tokio::test]
    async fn test_select_failure_clears_messages() {
        let h = seeded().await;
        let a = h.orchestrator.active_session_id().unwrap();
        let b = h.orchestrator.create_session().await.settled().unwrap().id;
        h.orchestrator.select_session(a).await;
        assert_eq!(h.orchestrator.messages().len(), 2);

        h.faults.list.store(true, Ordering::SeqCst);
        let outcome = h.orchestrator.select_session(b).await;

        assert!(matches!(outcome, Outcome::Aborted(_)));
        assert_eq!(h.orchestrator.active_session_id(), Some(b));
        assert!(h.orchestrator.messages().is_empty());
    }

    #[tokio::test]
    async fn test_select_unknown_session_is_noop() {
        let h = seeded().await;
        let before = h.orchestrator.active_session_id();
        let outcome = h.orchestrator.select_session(Uuid::new_v4()).await;
        assert!(matches!(
            outcome,
            Outcome::Ignored(GuardViolation::UnknownSession)
        ));
        assert_eq!(h.orchestrator.active_session_id(), before);
    }

    #[tokio::test]
    async fn test_sessions_ordered_by_recent_activity() {
        let h = seeded().await;
        let a = h.orchestrator.active_session_id().unwrap();
        let b = h.orchestrator.create_session().await.settled().unwrap().id;
        assert_eq!(h.orchestrator.sessions()[0].id, b);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        h.orchestrator.select_session(a).await;
        h.orchestrator.submit("back to a").await;

        let order: Vec<Uuid> = h.orchestrator.sessions().iter().map(|s| s.id).collect();
        assert_eq!(order, vec![a, b]);
    }

    #[tokio::test]
    async fn test_rename_session() {
        let h = Harness::ready().await;
        let id = h.orchestrator.active_session_id().unwrap();

        let renamed = h
            .orchestrator
            .rename_session(id, "  Trip planning ")
            .await
            .settled()
            .unwrap();
        assert_eq!(renamed.name, "Trip planning");
        assert_eq!(h.orchestrator.sessions()[0].name, "Trip planning");
        assert_eq!(
            h.sessions.get(id).await.unwrap().unwrap().name,
            "Trip planning"
        );

        assert!(h.orchestrator.rename_session(id, "  ").await.is_ignored());
    }

    // ---- Edit ----

    #[tokio::test]
    async fn test_edit_message_updates_store_and_state() {
        let h = seeded().await;
        let user = h.orchestrator.messages()[0].clone();

        let edited = h
            .orchestrator
            .edit_message(user.id, "hi, edited")
            .await
            .settled()
            .unwrap();
        assert_eq!(edited.content, "hi, edited");
        assert_eq!(h.orchestrator.messages()[0].content, "hi, edited");
        assert_eq!(h.persisted().await[0].content, "hi, edited");
        h.assert_counts_consistent().await;

        let unknown = h.orchestrator.edit_message(Uuid::new_v4(), "x").await;
        assert!(matches!(
            unknown,
            Outcome::Ignored(GuardViolation::UnknownMessage)
        ));
    }

    #[tokio::test]
    async fn test_edit_message_deleted_elsewhere_is_not_found() {
        let h = seeded().await;
        let user = h.orchestrator.messages()[0].clone();
        h.store.delete(user.id).await.unwrap();

        let outcome = h.orchestrator.edit_message(user.id, "changed").await;
        assert!(matches!(
            outcome,
            Outcome::Aborted(ChatError::MessageNotFound(id)) if id == user.id
        ));
        assert_eq!(h.orchestrator.messages()[0].content, "hi");
        assert_eq!(h.orchestrator.status(), Status::Idle);
    }

    // ---- Model, export, reset ----

    #[tokio::test]
    async fn test_set_selected_model_persists() {
        let h = Harness::ready().await;
        assert!(h.orchestrator.set_selected_model("gpt-4o-mini").is_settled());
        assert!(h.orchestrator.set_selected_model("   ").is_ignored());
        assert_eq!(h.orchestrator.selected_model(), "gpt-4o-mini");

        let stored = PreferenceRepository::new(h.db.clone(), OWNER)
            .selected_model()
            .unwrap();
        assert_eq!(stored.as_deref(), Some("gpt-4o-mini"));
    }

    #[tokio::test]
    async fn test_export_snapshot_totals() {
        let profile = UserProfile {
            name: "Ada".into(),
            ..UserProfile::default()
        };
        let h = Harness::build(MockInference::new(), profile);
        h.orchestrator.initialize().await;
        h.orchestrator.submit("one").await;
        h.orchestrator.create_session().await;
        h.orchestrator.submit("two").await;
        h.orchestrator.submit("three").await;

        let export = h.orchestrator.export_snapshot().await.unwrap();
        assert_eq!(export.owner_id, OWNER);
        assert_eq!(export.sessions.len(), 2);
        assert_eq!(export.total_messages, 6);
        assert_eq!(export.profile.name, "Ada");
    }

    #[tokio::test]
    async fn test_reset_clears_state() {
        let h = seeded().await;
        assert!(h.orchestrator.reset().is_settled());

        assert!(h.orchestrator.sessions().is_empty());
        assert!(h.orchestrator.active_session_id().is_none());
        assert!(h.orchestrator.messages().is_empty());
        // Selected model survives a reset.
        assert_eq!(h.orchestrator.selected_model(), "gpt-4o");
    }

    // ---- Events ----

    #[tokio::test]
    async fn test_submit_event_sequence() {
        let h = Harness::ready().await;
        let mut events = h.orchestrator.subscribe();

        h.orchestrator.submit("hello").await;

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.event_name());
        }
        assert_eq!(
            names,
            vec![
                "status_changed",
                "message_appended",
                "message_appended",
                "status_changed"
            ]
        );
    }

    #[tokio::test]
    async fn test_message_count_invariant_across_operations() {
        let h = seeded().await;
        h.orchestrator.regenerate(RegenerationKind::TryAgain).await;
        h.orchestrator.create_session().await;
        h.inference
            .push_error(InferenceError::Transport("offline".into()));
        h.orchestrator.submit("x").await;
        h.orchestrator.regenerate(RegenerationKind::AddDetail).await;
        let first = h.orchestrator.messages()[0].id;
        h.orchestrator.edit_message(first, "y").await;

        h.assert_counts_consistent().await;
    }
}
