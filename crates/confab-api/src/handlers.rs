//! Route handler functions for all API endpoints.
//!
//! Read handlers return views of the orchestrator's state. Operation
//! handlers run one orchestrator operation and answer with an
//! `OperationResponse` carrying the state after it settled.

use std::convert::Infallible;
use std::str::FromStr;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use confab_chat::orchestrator::TranscriptEntry;
use confab_chat::{
    find_model, ChatError, GuardViolation, ModelInfo, OrchestratorSnapshot, Outcome,
    MODEL_CATALOG,
};
use confab_core::store::ProfileProvider;
use confab_core::types::{
    ExportSnapshot, Message, RegenerationKind, Session, Status, UserProfile,
};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct RegenerateRequest {
    /// One of `try-again`, `add-detail`, `more-concise`.
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelRequest {
    pub model: String,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub session_count: usize,
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<Session>,
    pub active_session_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub session_id: Option<Uuid>,
    pub messages: Vec<TranscriptEntry>,
    pub status: Status,
    pub progress_label: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: &'static [ModelInfo],
    pub selected: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelResponse {
    pub model: String,
    /// Catalog display name, or the id itself for models outside the catalog.
    pub name: String,
}

/// Result of an orchestrator operation together with the state after it.
#[derive(Debug, Serialize)]
pub struct OperationResponse<T> {
    /// `settled` or `ignored`.
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<GuardViolation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    pub state: OrchestratorSnapshot,
}

/// Map an operation outcome onto the HTTP contract: busy is a conflict,
/// other guard violations are a successful no-op, aborts are server errors.
fn respond<T>(state: &AppState, outcome: Outcome<T>) -> Result<Json<OperationResponse<T>>, ApiError> {
    let (label, reason, result) = match outcome {
        Outcome::Settled(value) => ("settled", None, Some(value)),
        Outcome::Ignored(GuardViolation::Busy) => {
            return Err(ApiError::Conflict(
                "Another operation is in progress".to_string(),
            ))
        }
        Outcome::Ignored(reason) => ("ignored", Some(reason), None),
        Outcome::Aborted(e) => return Err(e.into()),
    };

    Ok(Json(OperationResponse {
        outcome: label,
        reason,
        result,
        state: state.orchestrator.snapshot(),
    }))
}

fn model_response(model: String) -> ModelResponse {
    let name = find_model(&model)
        .map(|info| info.name.to_string())
        .unwrap_or_else(|| model.clone());
    ModelResponse { model, name }
}

// =============================================================================
// Read handlers
// =============================================================================

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        session_count: state.orchestrator.sessions().len(),
    })
}

/// GET /state - full read-only view of the orchestrator.
pub async fn get_state(State(state): State<AppState>) -> Json<OrchestratorSnapshot> {
    Json(state.orchestrator.snapshot())
}

/// GET /sessions
pub async fn list_sessions(State(state): State<AppState>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: state.orchestrator.sessions(),
        active_session_id: state.orchestrator.active_session_id(),
    })
}

/// GET /messages - transcript of the active session.
pub async fn list_messages(State(state): State<AppState>) -> Json<MessagesResponse> {
    let snapshot = state.orchestrator.snapshot();
    Json(MessagesResponse {
        session_id: snapshot.active_session_id,
        messages: snapshot.messages,
        status: snapshot.status,
        progress_label: snapshot.progress_label,
    })
}

/// GET /models
pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: MODEL_CATALOG,
        selected: state.orchestrator.selected_model(),
    })
}

/// GET /model
pub async fn get_model(State(state): State<AppState>) -> Json<ModelResponse> {
    Json(model_response(state.orchestrator.selected_model()))
}

/// GET /profile
pub async fn get_profile(State(state): State<AppState>) -> Json<UserProfile> {
    Json(state.profiles.snapshot())
}

/// GET /export - sessions, profile and totals for the owner.
pub async fn export(State(state): State<AppState>) -> Result<Json<ExportSnapshot>, ApiError> {
    let snapshot = state.orchestrator.export_snapshot().await?;
    tracing::info!(
        sessions = snapshot.sessions.len(),
        messages = snapshot.total_messages,
        "Export generated"
    );
    Ok(Json(snapshot))
}

/// GET /stream - SSE relay of orchestrator events.
pub async fn stream(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>> + Send> {
    let rx = state.orchestrator.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => {
            let data = serde_json::to_string(&event).unwrap_or_default();
            Some(Ok(Event::default().event(event.event_name()).data(data)))
        }
        // Lagged receivers skip what they missed.
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

// =============================================================================
// Operation handlers
// =============================================================================

/// POST /sessions
pub async fn create_session(
    State(state): State<AppState>,
) -> Result<Json<OperationResponse<Session>>, ApiError> {
    let outcome = state.orchestrator.create_session().await;
    respond(&state, outcome)
}

/// PUT /sessions/{id}
pub async fn rename_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RenameRequest>,
) -> Result<Json<OperationResponse<Session>>, ApiError> {
    let outcome = state.orchestrator.rename_session(id, &body.name).await;
    respond(&state, outcome)
}

/// POST /sessions/{id}/select
pub async fn select_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OperationResponse<()>>, ApiError> {
    let outcome = state.orchestrator.select_session(id).await;
    respond(&state, outcome)
}

/// POST /messages - submit user input and wait for the reply.
pub async fn submit(
    State(state): State<AppState>,
    Json(body): Json<SubmitRequest>,
) -> Result<Json<OperationResponse<Message>>, ApiError> {
    let outcome = state.orchestrator.submit(&body.content).await;
    respond(&state, outcome)
}

/// PUT /messages/{id}
pub async fn edit_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<EditRequest>,
) -> Result<Json<OperationResponse<Message>>, ApiError> {
    let outcome = state.orchestrator.edit_message(id, &body.content).await;
    respond(&state, outcome)
}

/// POST /regenerate
pub async fn regenerate(
    State(state): State<AppState>,
    Json(body): Json<RegenerateRequest>,
) -> Result<Json<OperationResponse<Message>>, ApiError> {
    let kind = RegenerationKind::from_str(body.kind.trim())
        .map_err(|_| ChatError::InvalidKind(body.kind.clone()))?;
    let outcome = state.orchestrator.regenerate(kind).await;
    respond(&state, outcome)
}

/// PUT /model
pub async fn set_model(
    State(state): State<AppState>,
    Json(body): Json<ModelRequest>,
) -> Result<Json<OperationResponse<ModelResponse>>, ApiError> {
    let outcome = match state.orchestrator.set_selected_model(&body.model) {
        Outcome::Settled(()) => Outcome::Settled(model_response(state.orchestrator.selected_model())),
        Outcome::Ignored(reason) => Outcome::Ignored(reason),
        Outcome::Aborted(e) => Outcome::Aborted(e),
    };
    respond(&state, outcome)
}

/// PUT /profile - replace the profile; returns it normalized.
pub async fn update_profile(
    State(state): State<AppState>,
    Json(profile): Json<UserProfile>,
) -> Result<Json<UserProfile>, ApiError> {
    let updated = state.profiles.update(profile)?;
    tracing::info!(
        projects = updated.projects.len(),
        facts = updated.facts.len(),
        "Profile updated"
    );
    Ok(Json(updated))
}
