//! Session state store
//!
//! The authoritative in-memory model of the active session: transcript,
//! tool-call registry, todos, files and the agent-status state machine.
//! Mutators are plain synchronous methods taking `now` explicitly, so the
//! whole model is unit-testable without a runtime.
//!
//! Agent status transitions:
//!
//! ```text
//! idle ──send──▶ thinking ──tool_call_start──▶ running
//!                   │                             │
//!                   └──────────token──────────────┴──▶ streaming
//! streaming | running ──agent_complete──▶ completed
//! any ──agent_error | failed send──▶ error
//! completed | error ──send──▶ thinking
//! ```

use deepagents_protocol::{
    new_id, AgentStatus, FileRef, Message, MessageRole, Session, SessionSnapshot, SessionStatus,
    Todo, TodoStatus, ToolCall, ToolCallStatus,
};
use serde_json::Value;

use crate::assembler;
use crate::error::{ClientError, Result};

/// Read-only copy of the store published to renderers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    pub session: Option<Session>,
    pub messages: Vec<Message>,
    pub tool_calls: Vec<ToolCall>,
    pub todos: Vec<Todo>,
    pub files: Vec<FileRef>,
    pub agent_status: AgentStatus,
    pub status_detail: Option<String>,
    pub revision: u64,
}

impl StoreSnapshot {
    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }
}

#[derive(Debug, Default)]
pub struct SessionStore {
    session: Option<Session>,
    messages: Vec<Message>,
    tool_calls: Vec<ToolCall>,
    todos: Vec<Todo>,
    files: Vec<FileRef>,
    agent_status: AgentStatus,
    status_detail: Option<String>,
    revision: u64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Reads ----------------------------------------------------------------

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    pub fn todos(&self) -> &[Todo] {
        &self.todos
    }

    pub fn files(&self) -> &[FileRef] {
        &self.files
    }

    pub fn agent_status(&self) -> AgentStatus {
        self.agent_status
    }

    pub fn status_detail(&self) -> Option<&str> {
        self.status_detail.as_deref()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn streaming_count(&self) -> usize {
        self.messages.iter().filter(|m| m.streaming).count()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            session: self.session.clone(),
            messages: self.messages.clone(),
            tool_calls: self.tool_calls.clone(),
            todos: self.todos.clone(),
            files: self.files.clone(),
            agent_status: self.agent_status,
            status_detail: self.status_detail.clone(),
            revision: self.revision,
        }
    }

    // -- Session lifetime -----------------------------------------------------

    /// Discard everything and make `session_id` the active session.
    /// Events for any other session are rejected from here on.
    pub fn reset(&mut self, session_id: &str) {
        self.session = Some(Session {
            id: session_id.to_string(),
            agent_definition: None,
            status: SessionStatus::Active,
            started_at: None,
            creation: None,
        });
        self.messages.clear();
        self.tool_calls.clear();
        self.todos.clear();
        self.files.clear();
        self.agent_status = AgentStatus::Idle;
        self.status_detail = None;
        self.touch();
    }

    /// Replace all collections with a freshly fetched snapshot.
    pub fn load(&mut self, snapshot: SessionSnapshot) {
        let SessionSnapshot {
            name,
            agent_definition,
            status,
            mut messages,
            todos,
            files,
            tool_calls,
            started_at,
        } = snapshot;

        // A persisted transcript never has a live stream attached.
        for message in &mut messages {
            message.streaming = false;
        }

        self.agent_status = initial_agent_status(status, &messages);
        self.status_detail = None;
        self.session = Some(Session {
            id: name,
            agent_definition,
            status,
            started_at,
            creation: None,
        });
        self.messages = messages;
        self.todos = todos;
        self.files = files;
        self.tool_calls = tool_calls;
        self.touch();
    }

    pub fn set_session_status(&mut self, status: SessionStatus) {
        if let Some(session) = self.session.as_mut() {
            session.status = status;
            self.touch();
        }
    }

    // -- Turns ----------------------------------------------------------------

    /// Local start of a turn: user message plus the streaming placeholder.
    pub fn begin_turn(&mut self, content: &str, now: &str) -> Result<()> {
        if self.session.is_none() {
            return Err(ClientError::NoActiveSession);
        }
        // Keep at most one streaming message even if the previous turn never closed.
        assembler::finalize(&mut self.messages, now);
        self.messages.push(Message::user(content, now));
        self.messages.push(Message::assistant_placeholder());
        self.agent_status = AgentStatus::Thinking;
        self.status_detail = None;
        self.touch();
        Ok(())
    }

    /// The send call for the current turn failed.
    pub fn fail_turn(&mut self, error: &str, now: &str) {
        assembler::finalize(&mut self.messages, now);
        self.agent_status = AgentStatus::Error;
        self.push_system(format!("Failed to send message: {error}"), now);
    }

    pub fn append_token(&mut self, fragment: &str) -> bool {
        if !assembler::append_fragment(&mut self.messages, fragment) {
            return false;
        }
        self.agent_status = AgentStatus::Streaming;
        self.touch();
        true
    }

    pub fn complete_turn(&mut self, now: &str) {
        assembler::finalize(&mut self.messages, now);
        self.agent_status = AgentStatus::Completed;
        self.status_detail = None;
        self.touch();
    }

    pub fn fail_agent(&mut self, error: &str, now: &str) {
        assembler::finalize(&mut self.messages, now);
        self.agent_status = AgentStatus::Error;
        self.status_detail = None;
        self.push_system(format!("Agent error: {error}"), now);
    }

    pub fn set_agent_status(&mut self, status: AgentStatus, detail: Option<String>) {
        self.agent_status = status;
        self.status_detail = detail.filter(|d| !d.is_empty());
        self.touch();
    }

    /// Append a system notice. While a message is streaming the notice goes
    /// in front of it so the placeholder stays last.
    pub fn push_system(&mut self, content: impl Into<String>, now: &str) {
        let notice = Message::system(content, now);
        match assembler::streaming_index(&self.messages) {
            Some(index) => self.messages.insert(index, notice),
            None => self.messages.push(notice),
        }
        self.touch();
    }

    // -- Tool calls -----------------------------------------------------------

    pub fn start_tool_call(&mut self, tool_name: &str, input: Value, now: &str) -> &ToolCall {
        self.tool_calls.push(ToolCall {
            id: new_id(),
            tool_name: tool_name.to_string(),
            status: ToolCallStatus::Running,
            input,
            output: None,
            error: None,
            timestamp: Some(now.to_string()),
        });
        self.agent_status = AgentStatus::Running;
        self.touch();
        &self.tool_calls[self.tool_calls.len() - 1]
    }

    /// Resolve the first running call with this tool name.
    ///
    /// Completions carry no correlation id, so two concurrently running calls
    /// with the same name are told apart by start order only.
    pub fn complete_tool_call(&mut self, tool_name: &str, success: bool, output: String) -> bool {
        let Some(call) = self
            .tool_calls
            .iter_mut()
            .find(|c| c.tool_name == tool_name && c.status == ToolCallStatus::Running)
        else {
            return false;
        };

        if success {
            call.status = ToolCallStatus::Success;
            call.output = Some(output);
        } else {
            call.status = ToolCallStatus::Error;
            call.error = Some(output);
        }
        self.touch();
        true
    }

    // -- Snapshot collections -------------------------------------------------

    pub fn replace_todos(&mut self, todos: Vec<Todo>) {
        self.todos = todos;
        self.touch();
    }

    pub fn replace_files(&mut self, files: Vec<FileRef>) {
        self.files = files;
        self.touch();
    }

    /// Flip a todo locally. Returns the previous status for rollback.
    pub fn toggle_todo(&mut self, todo_id: &str) -> Result<(TodoStatus, TodoStatus)> {
        let todo = self
            .todos
            .iter_mut()
            .find(|t| t.id == todo_id)
            .ok_or_else(|| ClientError::TodoNotFound(todo_id.to_string()))?;
        let previous = todo.status;
        todo.status = previous.toggled();
        let next = todo.status;
        self.touch();
        Ok((previous, next))
    }

    pub fn restore_todo(&mut self, todo_id: &str, status: TodoStatus) -> bool {
        let Some(todo) = self.todos.iter_mut().find(|t| t.id == todo_id) else {
            return false;
        };
        todo.status = status;
        self.touch();
        true
    }

    /// Adopt the server's copy of a single todo.
    pub fn upsert_todo(&mut self, todo: Todo) {
        match self.todos.iter_mut().find(|t| t.id == todo.id) {
            Some(existing) => *existing = todo,
            None => self.todos.push(todo),
        }
        self.touch();
    }

    fn touch(&mut self) {
        self.revision += 1;
    }
}

/// Best-effort status for a freshly loaded session
fn initial_agent_status(status: SessionStatus, messages: &[Message]) -> AgentStatus {
    match status {
        SessionStatus::Error => AgentStatus::Error,
        SessionStatus::Active
            if messages.last().map(|m| m.role) == Some(MessageRole::User) =>
        {
            AgentStatus::Thinking
        }
        _ => AgentStatus::Idle,
    }
}
