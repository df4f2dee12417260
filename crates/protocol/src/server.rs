//! Server → Client channel events

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::types::*;

/// Events pushed on a session channel.
///
/// Frames look like `{"event": "<kind>", "data": {...}}`; every payload
/// carries the `session` it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ChannelEvent {
    AgentToken {
        session: String,
        token: String,
    },
    ToolCallStart {
        session: String,
        tool_name: String,
        #[serde(default)]
        input: Value,
    },
    ToolCallComplete {
        session: String,
        tool_name: String,
        #[serde(default = "default_success")]
        success: bool,
        #[serde(default, deserialize_with = "text_or_json")]
        output: String,
    },
    /// Completion event emitted by the backend task runner
    ToolResult {
        session: String,
        tool: String,
        #[serde(default, deserialize_with = "text_or_json")]
        result: String,
    },
    AgentStatus {
        session: String,
        status: AgentStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    TodoUpdate {
        session: String,
        todos: Vec<Todo>,
    },
    FileUpdate {
        session: String,
        files: Vec<FileRef>,
    },
    AgentComplete {
        session: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    AgentError {
        session: String,
        error: String,
    },
}

impl ChannelEvent {
    /// Session the event is addressed to
    pub fn session(&self) -> &str {
        match self {
            ChannelEvent::AgentToken { session, .. }
            | ChannelEvent::ToolCallStart { session, .. }
            | ChannelEvent::ToolCallComplete { session, .. }
            | ChannelEvent::ToolResult { session, .. }
            | ChannelEvent::AgentStatus { session, .. }
            | ChannelEvent::TodoUpdate { session, .. }
            | ChannelEvent::FileUpdate { session, .. }
            | ChannelEvent::AgentComplete { session, .. }
            | ChannelEvent::AgentError { session, .. } => session,
        }
    }

    /// Wire name of the event kind
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelEvent::AgentToken { .. } => "agent_token",
            ChannelEvent::ToolCallStart { .. } => "tool_call_start",
            ChannelEvent::ToolCallComplete { .. } => "tool_call_complete",
            ChannelEvent::ToolResult { .. } => "tool_result",
            ChannelEvent::AgentStatus { .. } => "agent_status",
            ChannelEvent::TodoUpdate { .. } => "todo_update",
            ChannelEvent::FileUpdate { .. } => "file_update",
            ChannelEvent::AgentComplete { .. } => "agent_complete",
            ChannelEvent::AgentError { .. } => "agent_error",
        }
    }
}

fn default_success() -> bool {
    true
}

/// Tool output is usually text, but null and structured values also occur.
fn text_or_json<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}
