use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved prefix marking an assistant message that carries a failure reason.
pub const ERROR_PREFIX: &str = "Error: ";

// =============================================================================
// Enums
// =============================================================================

/// Author of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// How a regenerated response should differ from the one it replaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegenerationKind {
    TryAgain,
    AddDetail,
    MoreConcise,
}

impl RegenerationKind {
    pub const ALL: [RegenerationKind; 3] = [
        RegenerationKind::TryAgain,
        RegenerationKind::AddDetail,
        RegenerationKind::MoreConcise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RegenerationKind::TryAgain => "try-again",
            RegenerationKind::AddDetail => "add-detail",
            RegenerationKind::MoreConcise => "more-concise",
        }
    }

    /// Instruction appended to the basis message. Sent to the model only.
    pub fn instruction(&self) -> &'static str {
        match self {
            RegenerationKind::TryAgain => {
                "(Please provide an alternative response to this request)"
            }
            RegenerationKind::AddDetail => {
                "(Please provide a more detailed and comprehensive response)"
            }
            RegenerationKind::MoreConcise => {
                "(Please provide a more concise and succinct response)"
            }
        }
    }

    /// Short label a presentation layer shows while the request is in flight.
    pub fn progress_label(&self) -> &'static str {
        match self {
            RegenerationKind::TryAgain => "Trying again...",
            RegenerationKind::AddDetail => "Adding detail...",
            RegenerationKind::MoreConcise => "Being more concise...",
        }
    }

    /// Build the inference input from the basis message content.
    pub fn apply(&self, basis: &str) -> String {
        format!("{}\n\n{}", basis, self.instruction())
    }
}

impl fmt::Display for RegenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegenerationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RegenerationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown regeneration kind: {}", s))
    }
}

/// Whether the orchestrator has a network operation in flight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Idle,
    Sending,
    Regenerating,
}

// =============================================================================
// Records
// =============================================================================

/// A named conversation thread owned by one user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    /// Content of the most recent message, if any.
    pub last_message_preview: Option<String>,
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One turn in a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Content for an assistant message reporting a failure.
    pub fn error_content(reason: &str) -> String {
        format!("{}{}", ERROR_PREFIX, reason)
    }

    /// True when the content carries the reserved error prefix.
    pub fn is_error(&self) -> bool {
        self.content.starts_with(ERROR_PREFIX.trim_end())
    }
}

/// Snapshot of what the assistant knows about the user.
///
/// Every field may be empty; the prompt composer skips empty sections.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub name: String,
    pub location: String,
    pub tone: String,
    pub projects: Vec<String>,
    pub facts: Vec<String>,
    pub context: String,
}

impl UserProfile {
    /// Trim every field and drop blank or repeated list entries, keeping
    /// first-seen order.
    pub fn normalized(self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            location: self.location.trim().to_string(),
            tone: self.tone.trim().to_string(),
            projects: dedup_trimmed(self.projects),
            facts: dedup_trimmed(self.facts),
            context: self.context.trim().to_string(),
        }
    }

    /// Fill in the tone when the profile leaves it blank.
    pub fn with_default_tone(mut self, tone: &str) -> Self {
        if self.tone.trim().is_empty() {
            self.tone = tone.to_string();
        }
        self
    }
}

fn dedup_trimmed(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let item = item.trim();
        if !item.is_empty() && !out.iter().any(|existing| existing == item) {
            out.push(item.to_string());
        }
    }
    out
}

/// Everything a user can take away from the application.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExportSnapshot {
    pub owner_id: String,
    pub exported_at: DateTime<Utc>,
    pub sessions: Vec<Session>,
    pub profile: UserProfile,
    pub total_messages: u64,
}
