//! Core types shared across the protocol

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Session status as stored by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Error,
    Timeout,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
            SessionStatus::Timeout => "timeout",
        }
    }
}

/// Agent status - what the agent is currently doing in this session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Thinking,
    #[serde(alias = "working")]
    Running,
    Streaming,
    Completed,
    Error,
}

impl AgentStatus {
    /// True while a turn is in flight
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            AgentStatus::Thinking | AgentStatus::Running | AgentStatus::Streaming
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Thinking => "thinking",
            AgentStatus::Running => "running",
            AgentStatus::Streaming => "streaming",
            AgentStatus::Completed => "completed",
            AgentStatus::Error => "error",
        }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, alias = "creation", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>, now: &str) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            streaming: false,
            tool_name: None,
            timestamp: Some(now.to_string()),
        }
    }

    /// Empty assistant message that receives streamed tokens
    pub fn assistant_placeholder() -> Self {
        Self {
            role: MessageRole::Assistant,
            content: String::new(),
            streaming: true,
            tool_name: None,
            timestamp: None,
        }
    }

    pub fn system(content: impl Into<String>, now: &str) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            streaming: false,
            tool_name: None,
            timestamp: Some(now.to_string()),
        }
    }
}

/// Tool call lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Running,
    Success,
    Error,
}

/// A discrete invocation of an agent tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default = "crate::new_id")]
    pub id: String,
    pub tool_name: String,
    pub status: ToolCallStatus,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Todo status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

impl TodoStatus {
    /// Status a user toggle moves to: completed items reopen, everything else completes.
    pub fn toggled(self) -> Self {
        match self {
            TodoStatus::Completed => TodoStatus::Pending,
            TodoStatus::Pending | TodoStatus::InProgress => TodoStatus::Completed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TodoStatus::Pending => "pending",
            TodoStatus::InProgress => "in_progress",
            TodoStatus::Completed => "completed",
        }
    }
}

/// A todo item tracked by the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    #[serde(rename = "name")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
    pub status: TodoStatus,
}

/// A file or directory in the session workspace.
///
/// Content is never carried here; it is fetched by `name` through the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FileRecord", into = "FileRecord")]
pub struct FileRef {
    /// Backend record name, the key for content fetches
    pub name: Option<String>,
    pub path: String,
    pub display_name: String,
    pub is_directory: bool,
}

impl FileRef {
    pub fn new(name: Option<String>, path: impl Into<String>, is_directory: bool) -> Self {
        let path = path.into();
        let display_name = display_name_for(&path);
        Self {
            name,
            path,
            display_name,
            is_directory,
        }
    }
}

/// Backend shape of a file entry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    file_path: String,
    #[serde(default, deserialize_with = "flag")]
    is_directory: bool,
}

impl From<FileRecord> for FileRef {
    fn from(record: FileRecord) -> Self {
        FileRef::new(record.name, record.file_path, record.is_directory)
    }
}

impl From<FileRef> for FileRecord {
    fn from(file: FileRef) -> Self {
        FileRecord {
            name: file.name,
            file_path: file.path,
            is_directory: file.is_directory,
        }
    }
}

fn display_name_for(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or(path)
        .to_string()
}

/// A session as listed by the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "name")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_definition: Option<String>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation: Option<String>,
}

/// Full session state returned by `get_session`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub name: String,
    #[serde(default)]
    pub agent_definition: Option<String>,
    pub status: SessionStatus,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub todos: Vec<Todo>,
    #[serde(default)]
    pub files: Vec<FileRef>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub started_at: Option<String>,
}

/// An agent definition available for new sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub enable_filesystem: bool,
    #[serde(default, deserialize_with = "flag")]
    pub enable_todos: bool,
}

/// Acknowledgement returned by create/send/end calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAck {
    pub session: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

/// Result of importing an agent definition from YAML
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentImport {
    /// Name of the created or updated agent definition
    pub agent: String,
    pub status: String,
}

/// Backend check fields arrive as `0`/`1` or as booleans.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        Value::String(s) => matches!(s.as_str(), "1" | "true"),
        _ => false,
    })
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
