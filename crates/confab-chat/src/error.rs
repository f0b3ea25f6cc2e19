//! Error types for conversation orchestration.

use confab_core::error::ConfabError;

/// Errors from the orchestrator and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("inference error: {0}")]
    Inference(#[from] InferenceError),
    #[error("session not found: {0}")]
    SessionNotFound(uuid::Uuid),
    #[error("message not found: {0}")]
    MessageNotFound(uuid::Uuid),
    #[error("unknown regeneration kind: {0}")]
    InvalidKind(String),
}

impl From<ConfabError> for ChatError {
    fn from(err: ConfabError) -> Self {
        ChatError::Storage(err.to_string())
    }
}

impl ChatError {
    /// Store error from an operation on message `id`.
    pub fn for_message(id: uuid::Uuid, err: ConfabError) -> Self {
        match err {
            ConfabError::NotFound(_) => ChatError::MessageNotFound(id),
            other => other.into(),
        }
    }

    /// Store error from an operation on session `id`.
    pub fn for_session(id: uuid::Uuid, err: ConfabError) -> Self {
        match err {
            ConfabError::NotFound(_) => ChatError::SessionNotFound(id),
            other => other.into(),
        }
    }
}

/// Failure of a single chat-completion request.
///
/// The `Display` text is the human-readable reason that ends up after the
/// `Error: ` prefix of a persisted assistant message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferenceError {
    /// The request never produced an HTTP response (DNS, connect, timeout).
    #[error("{0}")]
    Transport(String),
    /// Non-success status. `message` comes from the error body when present,
    /// else `HTTP <code>: <reason phrase>`.
    #[error("{message}")]
    Http { status: u16, message: String },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("API key missing: set the {0} environment variable")]
    MissingApiKey(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_chat_error_display() {
        let err = ChatError::Storage("disk full".to_string());
        assert_eq!(err.to_string(), "storage error: disk full");

        let id = Uuid::nil();
        let err = ChatError::SessionNotFound(id);
        assert_eq!(
            err.to_string(),
            "session not found: 00000000-0000-0000-0000-000000000000"
        );

        let err = ChatError::InvalidKind("louder".to_string());
        assert_eq!(err.to_string(), "unknown regeneration kind: louder");
    }

    #[test]
    fn test_chat_error_from_confab_error() {
        let storage_err = ConfabError::Storage("connection lost".to_string());
        let chat_err: ChatError = storage_err.into();
        assert!(matches!(chat_err, ChatError::Storage(_)));
        assert!(chat_err.to_string().contains("connection lost"));
    }

    #[test]
    fn test_not_found_maps_to_lookup_variant() {
        let id = Uuid::new_v4();
        let err = ChatError::for_message(id, ConfabError::NotFound(format!("message {}", id)));
        assert!(matches!(err, ChatError::MessageNotFound(found) if found == id));

        let err = ChatError::for_session(id, ConfabError::NotFound("session".into()));
        assert!(matches!(err, ChatError::SessionNotFound(found) if found == id));

        let err = ChatError::for_message(id, ConfabError::Storage("locked".into()));
        assert!(matches!(err, ChatError::Storage(_)));
    }

    #[test]
    fn test_inference_error_reason_text() {
        let err = InferenceError::Http {
            status: 401,
            message: "Incorrect API key provided".to_string(),
        };
        assert_eq!(err.to_string(), "Incorrect API key provided");

        let err = InferenceError::Http {
            status: 503,
            message: "HTTP 503: Service Unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 503: Service Unavailable");

        let err = InferenceError::MissingApiKey("OPENAI_API_KEY".to_string());
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_inference_error_into_chat_error() {
        let err: ChatError = InferenceError::Transport("connection refused".into()).into();
        assert!(matches!(err, ChatError::Inference(_)));
        assert_eq!(err.to_string(), "inference error: connection refused");
    }
}
