// Chat data models
//
// Per-workflow conversation state: the workflow key a conversation is scoped
// to, individual messages, and the bounded session that holds them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use once_cell::sync::Lazy;
use regex::Regex;

/// Storage sentinel for a workflow that has not been created yet.
const NEW_WORKFLOW_KEY: &str = "new_workflow";
/// Storage sentinel for a page where no workflow id could be determined.
const UNKNOWN_WORKFLOW_KEY: &str = "unknown_workflow";

static WORKFLOW_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"workflow/([^/?#]+)").expect("workflow url pattern is valid")
});

/// Identifies the workflow a conversation belongs to.
///
/// Keys are stable for the lifetime of a navigation context: a concrete
/// workflow id, a not-yet-created ("new") workflow, or "unknown" when the id
/// could not be determined from the page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum WorkflowKey {
    /// An existing remote workflow.
    Workflow(String),
    /// A workflow that has not been created remotely yet.
    New,
    /// The workflow id could not be resolved.
    Unknown,
}

impl WorkflowKey {
    /// Derive the key from a workflow editor URL.
    ///
    /// `/workflow/new` maps to [`WorkflowKey::New`], `/workflow/{id}` to
    /// [`WorkflowKey::Workflow`], anything else to [`WorkflowKey::Unknown`].
    pub fn from_url(url: &str) -> Self {
        if url.contains("/workflow/new") {
            return WorkflowKey::New;
        }
        match WORKFLOW_URL_RE.captures(url) {
            Some(caps) => WorkflowKey::Workflow(caps[1].to_string()),
            None => WorkflowKey::Unknown,
        }
    }

    /// Stable string form used as the session-table key and on the wire.
    pub fn storage_key(&self) -> String {
        match self {
            WorkflowKey::Workflow(id) => id.clone(),
            WorkflowKey::New => NEW_WORKFLOW_KEY.to_string(),
            WorkflowKey::Unknown => UNKNOWN_WORKFLOW_KEY.to_string(),
        }
    }

    /// Default display name for a session created under this key.
    pub fn default_display_name(&self) -> String {
        match self {
            WorkflowKey::Workflow(id) => format!("Workflow {}", id),
            WorkflowKey::New => "New Workflow".to_string(),
            WorkflowKey::Unknown => "Unknown Workflow".to_string(),
        }
    }

    /// Concrete workflow id, if this key names one.
    pub fn workflow_id(&self) -> Option<&str> {
        match self {
            WorkflowKey::Workflow(id) => Some(id),
            _ => None,
        }
    }
}

impl From<String> for WorkflowKey {
    fn from(s: String) -> Self {
        match s.as_str() {
            NEW_WORKFLOW_KEY | "new" => WorkflowKey::New,
            UNKNOWN_WORKFLOW_KEY | "" => WorkflowKey::Unknown,
            _ => WorkflowKey::Workflow(s),
        }
    }
}

impl From<WorkflowKey> for String {
    fn from(key: WorkflowKey) -> Self {
        key.storage_key()
    }
}

impl std::fmt::Display for WorkflowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.storage_key())
    }
}

/// Message author role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            _ => Err(format!("Invalid message role: {}", s)),
        }
    }
}

/// Message flavor, used by renderers to style errors and status notices.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Normal,
    Error,
    Notice,
}

/// A single chat message. Immutable once appended; ordering within a session
/// is insertion order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Message author role
    pub role: MessageRole,
    /// Message text content
    pub content: String,
    /// Message flavor
    #[serde(default)]
    pub kind: MessageKind,
    /// When the message was created
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: MessageRole, content: String, kind: MessageKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            kind,
            created_at: Utc::now(),
        }
    }

    /// Create a user message
    pub fn user(content: String) -> Self {
        Self::new(MessageRole::User, content, MessageKind::Normal)
    }

    /// Create an assistant message
    pub fn assistant(content: String) -> Self {
        Self::new(MessageRole::Assistant, content, MessageKind::Normal)
    }

    /// Create an assistant-role error message
    pub fn error(content: String) -> Self {
        Self::new(MessageRole::Assistant, content, MessageKind::Error)
    }

    /// Create an assistant-role status notice
    pub fn notice(content: String) -> Self {
        Self::new(MessageRole::Assistant, content, MessageKind::Notice)
    }
}

/// Conversation state for one workflow key.
///
/// Created lazily on first access to a key, mutated only through the session
/// store. `last_activity_at` is `None` until the first append; reads never
/// refresh it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    /// Workflow this conversation is scoped to
    pub key: WorkflowKey,
    /// Human-readable name shown in session lists
    pub display_name: String,
    /// Bounded, insertion-ordered message log
    pub messages: Vec<Message>,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// When a message was last appended; `None` for a session that has never
    /// seen one
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl ChatSession {
    /// Create an empty session for `key` with a derived display name.
    pub fn new(key: WorkflowKey) -> Self {
        let display_name = key.default_display_name();
        Self {
            key,
            display_name,
            messages: Vec::new(),
            created_at: Utc::now(),
            last_activity_at: None,
        }
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}
