//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use confab_chat::ConversationOrchestrator;
use confab_core::config::ConfabConfig;
use confab_storage::ProfileRepository;

/// Shared application state, passed to handlers via axum's `State`
/// extractor. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfabConfig>,
    /// The single orchestrator every operation goes through.
    pub orchestrator: Arc<ConversationOrchestrator>,
    /// Profile of the orchestrator's owner; also its `ProfileProvider`.
    pub profiles: Arc<ProfileRepository>,
    /// Bearer token required on protected routes.
    pub api_token: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: ConfabConfig,
        orchestrator: Arc<ConversationOrchestrator>,
        profiles: Arc<ProfileRepository>,
        api_token: impl Into<String>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator,
            profiles,
            api_token: api_token.into(),
            start_time: Instant::now(),
        }
    }
}
