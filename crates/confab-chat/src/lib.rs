//! Conversation orchestration for confab.
//!
//! Provides the system-prompt composer, the chat-completion client
//! contract with its OpenAI-compatible implementation, the model catalog,
//! and the `ConversationOrchestrator` state machine that sequences
//! persistence and inference for each user action.

pub mod error;
pub mod inference;
pub mod models;
pub mod orchestrator;
pub mod prompt;

pub use error::{ChatError, InferenceError};
pub use inference::{InferenceClient, MockInference, OpenAiClient, PromptMessage, PromptRole};
pub use models::{find_model, ModelInfo, MODEL_CATALOG};
pub use orchestrator::{
    Collaborators, ConversationOrchestrator, EntryState, GuardViolation, OrchestratorSnapshot,
    Outcome, TranscriptEntry,
};
pub use prompt::compose;
