use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{RegenerationKind, Role, Status};

/// Observable changes to orchestrator state.
///
/// Events are published on a broadcast channel after the corresponding
/// state change has been applied and consumed by:
/// - The SSE stream (for live UI updates)
/// - Tests asserting on the order of transitions
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ChatEvent {
    // =========================================================================
    // Session Events
    // =========================================================================
    /// A session was created and became active.
    SessionCreated {
        session_id: Uuid,
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// The active session changed.
    SessionSelected {
        session_id: Uuid,
        message_count: usize,
        timestamp: DateTime<Utc>,
    },

    SessionRenamed {
        session_id: Uuid,
        name: String,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Message Events
    // =========================================================================
    /// A message was appended to the active transcript.
    MessageAppended {
        session_id: Uuid,
        message_id: Uuid,
        role: Role,
        is_error: bool,
        timestamp: DateTime<Utc>,
    },

    /// A message was removed ahead of regeneration.
    MessageRemoved {
        session_id: Uuid,
        message_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    MessageEdited {
        session_id: Uuid,
        message_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Orchestrator Events
    // =========================================================================
    /// The in-flight status changed.
    StatusChanged {
        status: Status,
        regeneration: Option<RegenerationKind>,
        timestamp: DateTime<Utc>,
    },

    ModelChanged {
        model: String,
        timestamp: DateTime<Utc>,
    },

    /// An operation aborted because a collaborator failed.
    OperationFailed {
        operation: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl ChatEvent {
    /// Returns the timestamp of this event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ChatEvent::SessionCreated { timestamp, .. }
            | ChatEvent::SessionSelected { timestamp, .. }
            | ChatEvent::SessionRenamed { timestamp, .. }
            | ChatEvent::MessageAppended { timestamp, .. }
            | ChatEvent::MessageRemoved { timestamp, .. }
            | ChatEvent::MessageEdited { timestamp, .. }
            | ChatEvent::StatusChanged { timestamp, .. }
            | ChatEvent::ModelChanged { timestamp, .. }
            | ChatEvent::OperationFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Returns the event name used for logging and as the SSE event type.
    pub fn event_name(&self) -> &'static str {
        match self {
            ChatEvent::SessionCreated { .. } => "session_created",
            ChatEvent::SessionSelected { .. } => "session_selected",
            ChatEvent::SessionRenamed { .. } => "session_renamed",
            ChatEvent::MessageAppended { .. } => "message_appended",
            ChatEvent::MessageRemoved { .. } => "message_removed",
            ChatEvent::MessageEdited { .. } => "message_edited",
            ChatEvent::StatusChanged { .. } => "status_changed",
            ChatEvent::ModelChanged { .. } => "model_changed",
            ChatEvent::OperationFailed { .. } => "operation_failed",
        }
    }
}
