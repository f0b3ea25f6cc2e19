//! Confab application binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Open the SQLite database and resolve the owner identity
//! 3. Build the stores, inference client and conversation orchestrator
//! 4. Run the initial load (restore or create the active session)
//! 5. Serve the HTTP API on 127.0.0.1

mod cli;

use std::sync::Arc;

use clap::Parser;

use confab_api::auth::load_or_generate_token;
use confab_api::{start_server, AppState};
use confab_chat::{Collaborators, ConversationOrchestrator, OpenAiClient, Outcome};
use confab_core::config::ConfabConfig;
use confab_storage::{
    Database, PreferenceRepository, ProfileRepository, SqliteMessageStore, SqliteSessionStore,
};

use cli::{expand_home, CliArgs};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let mut config = ConfabConfig::load_or_default(&config_file);
    args.apply(&mut config);

    // RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Confab v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Storage.
    let data_dir = expand_home(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let db_path = data_dir.join("confab.db");
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    let owner_id = PreferenceRepository::resolve_owner_id(&db, &config.general.owner_id)?;
    tracing::info!(owner_id = %owner_id, "Owner resolved");

    let profiles = Arc::new(ProfileRepository::load(Arc::clone(&db), owner_id.clone())?);
    let inference = Arc::new(OpenAiClient::from_config(&config.inference)?);

    let orchestrator = Arc::new(ConversationOrchestrator::new(
        Collaborators {
            sessions: Arc::new(SqliteSessionStore::new(Arc::clone(&db), owner_id.clone())),
            messages: Arc::new(SqliteMessageStore::new(Arc::clone(&db), owner_id.clone())),
            inference,
            profile: profiles.clone(),
            preferences: Arc::new(PreferenceRepository::new(Arc::clone(&db), owner_id.clone())),
        },
        config.chat.clone(),
        &config.inference.default_model,
        owner_id,
    ));

    if let Some(ref model) = args.model {
        orchestrator.set_selected_model(model);
    }
    tracing::info!(model = %orchestrator.selected_model(), "Model selected");

    // A failed initial load still serves the API; the caller can retry by
    // creating or selecting a session.
    match orchestrator.initialize().await {
        Outcome::Settled(()) => tracing::info!(
            sessions = orchestrator.sessions().len(),
            active = ?orchestrator.active_session_id(),
            "Initial load complete"
        ),
        Outcome::Ignored(reason) => tracing::warn!(?reason, "Initial load skipped"),
        Outcome::Aborted(e) => tracing::error!(error = %e, "Initial load failed"),
    }

    let token = load_or_generate_token(&data_dir.join(&config.api.token_file));
    let state = AppState::new(config, orchestrator, profiles, token);

    if let Err(e) = start_server(state).await {
        tracing::error!(error = %e, "API server stopped");
        return Err(e.into());
    }

    Ok(())
}
