//! Chat-completion client contract and implementations.
//!
//! `OpenAiClient` talks to an OpenAI-compatible `/chat/completions`
//! endpoint over HTTP. `MockInference` is a scripted stand-in used by the
//! orchestrator and API tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, warn};

use confab_core::config::InferenceConfig;

use crate::error::InferenceError;

/// Content returned when the endpoint answers successfully but without text.
pub const EMPTY_COMPLETION: &str = "No response generated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

/// One role-tagged entry of an inference request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }
}

/// Stateless request/response call to a chat-completion endpoint.
///
/// Implementations must fail on any non-success response rather than
/// returning degraded text.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn send(&self, messages: &[PromptMessage], model: &str)
        -> Result<String, InferenceError>;
}

// =============================================================================
// OpenAI-compatible HTTP client
// =============================================================================

pub struct OpenAiClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    api_key_env: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiClient {
    /// Build a client from configuration, reading the API key from the
    /// configured environment variable.
    ///
    /// A missing key is not fatal here; every request then fails with
    /// `InferenceError::MissingApiKey`.
    pub fn from_config(config: &InferenceConfig) -> Result<Self, InferenceError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        if api_key.is_none() {
            warn!(
                "{} is not set; chat requests will fail until it is provided",
                config.api_key_env
            );
        }
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(
        config: &InferenceConfig,
        api_key: Option<String>,
    ) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| InferenceError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.base_url.clone(),
            api_key,
            api_key_env: config.api_key_env.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl InferenceClient for OpenAiClient {
    async fn send(
        &self,
        messages: &[PromptMessage],
        model: &str,
    ) -> Result<String, InferenceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| InferenceError::MissingApiKey(self.api_key_env.clone()))?;

        let body = CompletionRequest {
            model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        debug!(model, messages = messages.len(), "Sending chat completion request");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(InferenceError::Http {
                status: status.as_u16(),
                message: error_reason(status, &text),
            });
        }

        parse_completion(&text)
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Extract the first choice's text. A well-formed body without text maps
/// to `EMPTY_COMPLETION`.
fn parse_completion(body: &str) -> Result<String, InferenceError> {
    let parsed: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| InferenceError::MalformedResponse(e.to_string()))?;

    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .filter(|content| !content.is_empty());

    Ok(content.unwrap_or_else(|| EMPTY_COMPLETION.to_string()))
}

/// Human-readable reason for a failed response: the body's
/// `error.message` when present, else `HTTP <code>: <reason phrase>`.
fn error_reason(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|wrapper| wrapper.error.message)
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| {
            format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown Status")
            )
        })
}

// =============================================================================
// Scripted client for tests
// =============================================================================

/// Recorded request made to a `MockInference`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub messages: Vec<PromptMessage>,
    pub model: String,
}

/// Inference client that replays scripted results.
///
/// Replies are consumed in order; once the script runs out every call
/// succeeds with `default_reply`. When gated, each call parks after being
/// recorded until `release` is called, which lets tests observe the
/// orchestrator while a request is in flight.
pub struct MockInference {
    script: Mutex<VecDeque<Result<String, InferenceError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    default_reply: String,
    gated: bool,
    entered: Notify,
    gate: Notify,
}

impl Default for MockInference {
    fn default() -> Self {
        Self::new()
    }
}

impl MockInference {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            default_reply: "mock reply".to_string(),
            gated: false,
            entered: Notify::new(),
            gate: Notify::new(),
        }
    }

    /// A mock whose calls block until `release` is called.
    pub fn gated() -> Self {
        Self {
            gated: true,
            ..Self::new()
        }
    }

    pub fn push_reply(&self, reply: impl Into<String>) -> &Self {
        self.lock_script().push_back(Ok(reply.into()));
        self
    }

    pub fn push_error(&self, error: InferenceError) -> &Self {
        self.lock_script().push_back(Err(error));
        self
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Wait until a gated call has been recorded.
    pub async fn wait_for_call(&self) {
        self.entered.notified().await;
    }

    /// Let one parked call proceed.
    pub fn release(&self) {
        self.gate.notify_one();
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, InferenceError>>> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl InferenceClient for MockInference {
    async fn send(
        &self,
        messages: &[PromptMessage],
        model: &str,
    ) -> Result<String, InferenceError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(RecordedCall {
                messages: messages.to_vec(),
                model: model.to_string(),
            });

        if self.gated {
            self.entered.notify_one();
            self.gate.notified().await;
        }

        let next = self.lock_script().pop_front();
        next.unwrap_or_else(|| Ok(self.default_reply.clone()))
    }
}
